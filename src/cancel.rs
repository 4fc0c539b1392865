use std::fmt;
use tokio::sync::broadcast;

/// Escucha la senyal de cancelacion de una espera.
///
/// La senyal se envia con el `broadcast::Sender` cuyo `Receiver` se ha
/// utilizado para crear el `Cancel`. Un solo envio cancela a todos los
/// `Cancel` creados desde ese sender. Si el sender se destruye sin enviar
/// nada, tambien se interpreta como una cancelacion.
///
/// Como `broadcast::Sender::send` no es asincrono, la senyal puede
/// enviarse desde un thread que no pertenece al runtime.
#[derive(Debug)]
pub struct Cancel {
    /// `true` si ya se ha recibido la senyal.
    cancelled: bool,

    /// Receptor de la senyal. `None` para una espera que nunca se cancela.
    notify: Option<broadcast::Receiver<()>>,
}

/// Resultado de una espera abandonada por una senyal de `Cancel`.
///
/// Es distinto de "no se ha conseguido el lock antes del timeout".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl Cancel {
    /// Crea un nuevo `Cancel` a partir del `broadcast::Receiver` dado.
    pub fn new(notify: broadcast::Receiver<()>) -> Cancel {
        Cancel {
            cancelled: false,
            notify: Some(notify),
        }
    }

    /// Un `Cancel` que nunca recibe la senyal.
    pub fn never() -> Cancel {
        Cancel {
            cancelled: false,
            notify: None,
        }
    }

    /// Retorna `true` si ya se ha recibido la senyal de cancelacion.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Espera a recibir la senyal de cancelacion, si es necesario.
    pub async fn recv(&mut self) {
        // Si ya se habia recibido la senyal se retorna inmediatamente.
        if self.cancelled {
            return;
        }

        match &mut self.notify {
            // Solo se puede recibir un valor, asi que no hace falta
            // distinguir entre el envio y el cierre del canal.
            Some(notify) => {
                let _ = notify.recv().await;
            }
            None => std::future::pending::<()>().await,
        }

        self.cancelled = true;
    }
}

impl fmt::Display for Cancelled {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        "wait cancelled".fmt(fmt)
    }
}

impl std::error::Error for Cancelled {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    #[tokio::test]
    async fn recv_completes_after_send() {
        let (tx, rx) = broadcast::channel(1);
        let mut cancel = Cancel::new(rx);
        assert!(!cancel.is_cancelled());

        tx.send(()).unwrap();
        cancel.recv().await;
        assert!(cancel.is_cancelled());

        // Una vez cancelado, `recv` retorna sin esperar.
        cancel.recv().await;
    }

    #[tokio::test]
    async fn dropped_sender_cancels() {
        let (tx, rx) = broadcast::channel::<()>(1);
        let mut cancel = Cancel::new(rx);

        drop(tx);
        cancel.recv().await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn never_does_not_fire() {
        let mut cancel = Cancel::never();

        let res = time::timeout(Duration::from_secs(60), cancel.recv()).await;
        assert!(res.is_err());
        assert!(!cancel.is_cancelled());
    }
}
