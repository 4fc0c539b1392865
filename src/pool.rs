//! Pool de conexiones.
//!
//! Una operacion de negocio toma prestado un `Client`, ejecuta uno o mas
//! comandos y lo devuelve. Los metodos de conveniencia de `Pool` hacen
//! exactamente eso para un unico comando.

use crate::{Client, Config};

use bytes::Bytes;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, instrument};

/// Pool de conexiones hacia un servidor Redis.
///
/// Las conexiones se abren bajo demanda, hasta `Config::max_connections`.
/// Cuando todas estan prestadas, `client()` espera a que se devuelva
/// alguna.
///
/// `Pool` se puede clonar; todos los clones comparten las conexiones.
#[derive(Debug, Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    config: Config,

    /// Conexiones abiertas que no estan prestadas. No se realizan
    /// operaciones asincronas mientras se mantiene el bloqueo, asi que se
    /// utiliza un `std::sync::Mutex`.
    idle: Mutex<Vec<Client>>,

    /// Limita el numero de conexiones prestadas (y por tanto abiertas).
    limit: Arc<Semaphore>,
}

/// Un `Client` prestado por el `Pool`.
///
/// Se devuelve al pool cuando se destruye. Si se destruye con una
/// peticion a medias (el futuro se abandono antes de leer la respuesta)
/// la conexion se cierra en lugar de devolverse.
#[derive(Debug)]
pub struct PooledClient {
    /// Siempre `Some` hasta que se ejecuta `drop`.
    client: Option<Client>,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl Pool {
    /// Crea un pool vacio. No se abre ninguna conexion hasta que se
    /// necesita.
    ///
    /// # Panics
    /// Si `config.max_connections` es 0.
    pub fn new(config: Config) -> Pool {
        assert!(config.max_connections > 0, "a pool needs at least one connection");

        let limit = Arc::new(Semaphore::new(config.max_connections));

        Pool {
            shared: Arc::new(Shared {
                config,
                idle: Mutex::new(Vec::new()),
                limit,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Numero de conexiones abiertas que estan esperando en el pool.
    pub fn idle_connections(&self) -> usize {
        self.shared.idle.lock().unwrap().len()
    }

    /// Toma prestado un `Client`.
    ///
    /// Se reutiliza una conexion libre si la hay; si no, se abre una
    /// nueva (y se autentica si hay password configurada).
    #[instrument(skip(self))]
    pub async fn client(&self) -> crate::Result<PooledClient> {
        let permit = self.shared.limit.clone().acquire_owned().await?;

        let idle = self.shared.idle.lock().unwrap().pop();

        let client = match idle {
            Some(client) => client,
            None => self.shared.connect().await?,
        };

        Ok(PooledClient {
            client: Some(client),
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    /// `GET key` con una conexion prestada.
    pub async fn get(&self, key: &str) -> crate::Result<Option<Bytes>> {
        let mut client = self.client().await?;
        client.get(key).await
    }

    /// `SET key value` con una conexion prestada.
    pub async fn set(&self, key: &str, value: Bytes) -> crate::Result<()> {
        let mut client = self.client().await?;
        client.set(key, value).await
    }

    /// `SET key value PX ms` con una conexion prestada.
    pub async fn set_expires(&self, key: &str, value: Bytes, expiration: Duration) -> crate::Result<()> {
        let mut client = self.client().await?;
        client.set_expires(key, value, expiration).await
    }

    /// `SET key value PX ms NX` con una conexion prestada.
    pub async fn set_nx(&self, key: &str, value: Bytes, expiration: Duration) -> crate::Result<bool> {
        let mut client = self.client().await?;
        client.set_nx(key, value, expiration).await
    }

    /// `DEL key` con una conexion prestada.
    pub async fn del(&self, key: &str) -> crate::Result<u64> {
        let mut client = self.client().await?;
        client.del(key).await
    }

    /// `PEXPIRE key ms` con una conexion prestada.
    pub async fn expire(&self, key: &str, ttl: Duration) -> crate::Result<bool> {
        let mut client = self.client().await?;
        client.expire(key, ttl).await
    }

    /// `PUBLISH channel message` con una conexion prestada.
    pub async fn publish(&self, channel: &str, message: Bytes) -> crate::Result<u64> {
        let mut client = self.client().await?;
        client.publish(channel, message).await
    }
}

impl Shared {
    async fn connect(&self) -> crate::Result<Client> {
        let addr = self.config.addr();
        debug!(%addr, "opening connection");

        let mut client = time::timeout(self.config.connect_timeout, Client::connect(addr.as_str())).await??;

        if let Some(password) = &self.config.password {
            client.auth(password).await?;
        }

        Ok(client)
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("pooled client used after drop")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("pooled client used after drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_reusable() {
                self.shared.idle.lock().unwrap().push(client);
            } else {
                debug!("discarding connection with an unfinished request");
            }
        }
    }
}
