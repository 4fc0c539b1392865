//! Publicacion de mensajes y reparto de los mensajes recibidos entre los
//! handlers de cada canal.
//!
//! Solo se reciben los mensajes publicados despues de la subscripcion; no
//! hay persistencia, ni confirmacion de entrega, ni control de flujo.

use crate::{Cancel, Client, Message, Pool};

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, instrument, warn};

/// Publicador de mensajes en un canal concreto.
#[derive(Debug, Clone)]
pub struct Publisher {
    channel: String,
    pool: Pool,
}

impl Publisher {
    /// Publicador para `channel` que utiliza las conexiones de `pool`.
    pub fn of(channel: impl ToString, pool: Pool) -> Publisher {
        Publisher {
            channel: channel.to_string(),
            pool,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publica un mensaje de texto (o binario). Retorna el numero de
    /// subscriptores que lo han recibido en el servidor.
    pub async fn publish(&self, message: impl Into<Bytes>) -> crate::Result<u64> {
        self.pool.publish(&self.channel, message.into()).await
    }

    /// Publica `value` serializado como JSON.
    pub async fn publish_json<T: Serialize + ?Sized>(&self, value: &T) -> crate::Result<u64> {
        let message = serde_json::to_vec(value)?;
        self.publish(message).await
    }
}

/// Handler de los mensajes de un canal.
type Handler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Reparte los mensajes recibidos entre los handlers registrados para su
/// canal.
///
/// Los handlers se registran con `add_handler` antes de arrancar. `run` y
/// `subscribe` consumen el `Dispatcher`, asi que no se pueden anyadir
/// handlers una vez arrancado.
///
/// Cada mensaje se entrega a cada handler de su canal en una tarea de
/// `spawn_blocking`: un handler lento no retrasa la recepcion, pero
/// tampoco hay ningun limite en el numero de tareas pendientes.
#[derive(Default)]
pub struct Dispatcher {
    /// Handlers por canal, en orden de registro.
    handlers: HashMap<String, Vec<Handler>>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher::default()
    }

    /// Registra un handler para `channel`. Un canal puede tener varios.
    pub fn add_handler<F>(&mut self, channel: impl ToString, handler: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.handlers
            .entry(channel.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Canales con al menos un handler.
    pub fn channels(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Subscribe `client` a todos los canales con handler y reparte los
    /// mensajes hasta que se cierre la conexion o llegue la senyal de
    /// `cancel`.
    pub async fn subscribe(self, client: Client, cancel: Cancel) -> crate::Result<()> {
        let subscriber = client.subscribe(self.channels()).await?;

        self.run(subscriber.into_stream(), cancel).await
    }

    /// Reparte los mensajes de `messages` hasta que el stream termine o
    /// llegue la senyal de `cancel`.
    ///
    /// Un error del stream termina el reparto y se retorna.
    #[instrument(skip_all)]
    pub async fn run<St>(self, messages: St, mut cancel: Cancel) -> crate::Result<()>
    where
        St: Stream<Item = crate::Result<Message>>,
    {
        tokio::pin!(messages);

        loop {
            let message = tokio::select! {
                _ = cancel.recv() => {
                    debug!("dispatcher cancelled");
                    return Ok(());
                }
                message = messages.next() => message,
            };

            match message {
                Some(Ok(message)) => {
                    self.dispatch(message);
                }
                Some(Err(err)) => {
                    warn!(cause = %err, "subscription failed");
                    return Err(err);
                }
                None => {
                    debug!("subscription closed");
                    return Ok(());
                }
            }
        }
    }

    /// Entrega `message` a los handlers de su canal. Retorna el numero de
    /// handlers a los que se ha entregado.
    fn dispatch(&self, message: Message) -> usize {
        let handlers = match self.handlers.get(&message.channel) {
            Some(handlers) => handlers,
            None => return 0,
        };

        for handler in handlers {
            let handler = handler.clone();
            let content = message.content.clone();

            task::spawn_blocking(move || handler(content));
        }

        handlers.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels())
            .finish()
    }
}
