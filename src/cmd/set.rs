use crate::Frame;

use bytes::Bytes;
use std::time::Duration;

/// Asigna el valor de una clave
///
/// Si ya existe un valor con esta clave el valor anterior sera
/// sobreescrito, salvo que se haya pedido `only_if_absent` (opcion `NX`),
/// en cuyo caso el servidor no toca la clave y responde 'nil'.
#[derive(Debug)]
pub struct Set {
    /// clave para acceder al valor
    key: String,

    /// Valor almacenado
    value: Bytes,

    /// Cuando expira el valor
    expire: Option<Duration>,

    /// Solo se asigna si la clave no existe
    only_if_absent: bool,
}

impl Set {
    /// Crea el comando
    pub fn new(key: impl ToString, value: Bytes, expire: Option<Duration>) -> Set {
        Set {
            key: key.to_string(),
            value,
            expire,
            only_if_absent: false,
        }
    }

    /// Crea un `SET` condicional: solo se asigna si la clave no existe.
    /// Es la primitiva atomica sobre la que se construye `Lease`.
    pub fn if_absent(key: impl ToString, value: Bytes, expire: Duration) -> Set {
        Set {
            key: key.to_string(),
            value,
            expire: Some(expire),
            only_if_absent: true,
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// SET key value [PX milliseconds] [NX]
    ///
    /// La expiracion siempre se envia en milisegundos.
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("set".as_bytes()));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame.push_bulk(self.value);
        if let Some(ms) = self.expire {
            // Redis solo acepta bulks dentro de un comando.
            frame.push_bulk(Bytes::from("px".as_bytes()));
            frame.push_bulk(Bytes::from(ms.as_millis().to_string()));
        }
        if self.only_if_absent {
            frame.push_bulk(Bytes::from("nx".as_bytes()));
        }
        frame
    }
}
