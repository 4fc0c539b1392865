use crate::Frame;

use bytes::Bytes;

/// Subscribe el cliente a uno o mas canales.
///
/// Una vez un cliente entra en estado subscrito el servidor ya no acepta
/// ningun otro comando, excepto SUBSCRIBE, PSUBSCRIBE, UNSUBSCRIBE,
/// PUNSUBSCRIBE, PING y QUIT.
#[derive(Debug)]
pub struct Subscribe {
    channels: Vec<String>,
}

/// Elimina la subscripcion del cliente a uno o mas canales.
///
/// Cuando no se especifican canales, el servidor elimina la subscripcion
/// de todos los canales a los que el cliente se subscribio previamente.
#[derive(Clone, Debug)]
pub struct Unsubscribe {
    channels: Vec<String>,
}

impl Subscribe {
    /// Crea un nuevo comando `Subscribe` para los canales especificados.
    pub fn new(channels: &[String]) -> Subscribe {
        Subscribe {
            channels: channels.to_vec(),
        }
    }

    /// Convierte este comando en su representacion en un Frame.
    ///
    /// # Formato del comando
    /// SUBSCRIBE channel [channel ...]
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("subscribe".as_bytes()));
        for channel in self.channels {
            frame.push_bulk(Bytes::from(channel.into_bytes()));
        }
        frame
    }
}

impl Unsubscribe {
    /// Crea una nueva instancia del comando `Unsubscribe` con
    /// los canales que se han proporcionado.
    pub fn new(channels: &[String]) -> Unsubscribe {
        Unsubscribe {
            channels: channels.to_vec(),
        }
    }

    /// Convierte el comando en el `Frame` equivalente.
    ///
    /// # Formato del comando
    /// UNSUBSCRIBE [channel [channel ...]]
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("unsubscribe".as_bytes()));

        for channel in self.channels {
            frame.push_bulk(Bytes::from(channel.into_bytes()));
        }

        frame
    }
}
