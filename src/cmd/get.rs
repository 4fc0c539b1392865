use crate::Frame;

use bytes::Bytes;

/// Obtiene el valor de una clave.
///
/// Si la clave no existe el servidor responde con 'nil'.
#[derive(Debug)]
pub struct Get {
    /// Nombre de la key de la que se obtiene el valor
    key: String,
}

impl Get {
    /// Crea el comando
    pub fn new(key: impl ToString) -> Get {
        Get {
            key: key.to_string(),
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// GET key
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("get".as_bytes()));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame
    }
}
