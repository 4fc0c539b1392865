use crate::Frame;

use bytes::Bytes;

/// El servidor responde PONG si no se proporciona argumento, en caso
/// contrario retorna una copia del argumento.
///
/// Se utiliza para comprobar que una conexion sigue viva.
#[derive(Debug, Default)]
pub struct Ping {
    /// mensaje opcional que el servidor devolvera
    msg: Option<String>,
}

impl Ping {
    /// Crea un nuevo comando `Ping` con un `msg` opcional.
    pub fn new(msg: Option<String>) -> Ping {
        Ping { msg }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// PING [message]
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("ping".as_bytes()));
        if let Some(msg) = self.msg {
            frame.push_bulk(Bytes::from(msg));
        }
        frame
    }
}
