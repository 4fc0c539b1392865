use crate::Frame;

use bytes::Bytes;
use std::time::Duration;

/// Asigna (o reemplaza) la expiracion de una clave existente.
///
/// Se envia como `PEXPIRE` para no perder precision por debajo del
/// segundo. El servidor responde `1` si la clave existia y `0` si no.
#[derive(Debug)]
pub struct Expire {
    key: String,
    ttl: Duration,
}

impl Expire {
    /// Crea el comando
    pub fn new(key: impl ToString, ttl: Duration) -> Expire {
        Expire {
            key: key.to_string(),
            ttl,
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// PEXPIRE key milliseconds
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("pexpire".as_bytes()));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame.push_bulk(Bytes::from(self.ttl.as_millis().to_string()));
        frame
    }
}
