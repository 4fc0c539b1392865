use crate::Frame;

use bytes::Bytes;

/// Autentica la conexion con la password configurada en el servidor.
#[derive(Debug)]
pub struct Auth {
    password: String,
}

impl Auth {
    /// Crea el comando
    pub fn new(password: impl ToString) -> Auth {
        Auth {
            password: password.to_string(),
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// AUTH password
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("auth".as_bytes()));
        frame.push_bulk(Bytes::from(self.password.into_bytes()));
        frame
    }
}

