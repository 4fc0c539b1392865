use crate::Frame;

use bytes::Bytes;

/// Publica un mensaje en un canal.
///
/// El mensaje se envia sin esperar el reconocimiento de ningun consumidor.
/// Los nombres de los canales no tienen relacion con el espacio de nombres
/// de las claves: puede haber una clave 'foo' y un canal 'foo' sin que
/// interfieran.
#[derive(Debug)]
pub struct Publish {
    /// Nombre del canal donde el mensaje sera publicado.
    channel: String,

    /// El mensaje que sera publicado
    message: Bytes,
}

impl Publish {
    /// Crea un nuevo comando `Publish`
    pub fn new(channel: impl ToString, message: Bytes) -> Publish {
        Publish {
            channel: channel.to_string(),
            message,
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// PUBLISH channel message
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("publish".as_bytes()));
        frame.push_bulk(Bytes::from(self.channel.into_bytes()));
        frame.push_bulk(self.message);

        frame
    }
}
