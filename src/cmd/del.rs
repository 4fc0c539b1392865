use crate::Frame;

use bytes::Bytes;

/// Borra una clave. Es idempotente: si la clave no existe el servidor
/// responde `0` y no se considera un error.
#[derive(Debug)]
pub struct Del {
    key: String,
}

/// Script que borra la clave solo si todavia contiene el valor esperado.
/// Redis ejecuta los scripts de forma atomica.
const DEL_IF_EQ_SCRIPT: &str = "if redis.call('get', KEYS[1]) == ARGV[1] then \
                                return redis.call('del', KEYS[1]) \
                                else return 0 end";

/// Compare-and-delete: `DEL` condicionado a que el valor almacenado sea
/// igual a `value`. Se envia como un `EVAL`.
#[derive(Debug)]
pub struct DelIfEq {
    key: String,
    value: Bytes,
}

impl Del {
    /// Crea el comando
    pub fn new(key: impl ToString) -> Del {
        Del {
            key: key.to_string(),
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// DEL key
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("del".as_bytes()));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame
    }
}

impl DelIfEq {
    /// Crea el comando
    pub fn new(key: impl ToString, value: Bytes) -> DelIfEq {
        DelIfEq {
            key: key.to_string(),
            value,
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// EVAL script 1 key value
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("eval".as_bytes()));
        frame.push_bulk(Bytes::from_static(DEL_IF_EQ_SCRIPT.as_bytes()));
        frame.push_bulk(Bytes::from("1".as_bytes()));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame.push_bulk(self.value);
        frame
    }
}
