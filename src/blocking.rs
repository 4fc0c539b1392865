//! Cliente y lease bloqueantes.
//!
//! Envuelven las versiones asincronas junto con un runtime de Tokio de un
//! solo thread (`current_thread`). Cada llamada bloquea el thread que la
//! hace hasta que termina, asi que se pueden usar desde threads que no
//! pertenecen a ningun runtime.

use crate::client::Client;
use crate::{Cancel, Cancelled, Lease, LeaseStore};

use bytes::Bytes;
use std::time::Duration;
use tokio::net::ToSocketAddrs;
use tokio::runtime::Runtime;

/// Conexion establecida con un servidor Redis, version bloqueante.
#[derive(Debug)]
pub struct BlockingClient {
    /// El cliente asincrono.
    inner: Client,

    /// Runtime `current_thread` que ejecuta las operaciones del cliente.
    rt: Runtime,
}

/// Un `Lease` que se utiliza de forma bloqueante.
///
/// Se cancela una espera de `try_acquire_for` desde otro thread enviando
/// la senyal por el `broadcast::Sender` del `Cancel`.
#[derive(Debug)]
pub struct BlockingLease<S> {
    inner: Lease<S>,
    rt: Runtime,
}

fn runtime() -> crate::Result<Runtime> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    Ok(rt)
}

impl BlockingClient {
    /// Establece una conexion con el servidor Redis ubicado en `addr`.
    pub fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<BlockingClient> {
        let rt = runtime()?;

        let inner = rt.block_on(Client::connect(addr))?;

        Ok(BlockingClient { inner, rt })
    }

    /// Obtiene el valor de una clave.
    pub fn get(&mut self, key: &str) -> crate::Result<Option<Bytes>> {
        self.rt.block_on(self.inner.get(key))
    }

    /// Asigna `value` a la clave `key`.
    pub fn set(&mut self, key: &str, value: Bytes) -> crate::Result<()> {
        self.rt.block_on(self.inner.set(key, value))
    }

    /// Asigna `value` a la clave `key` con expiracion.
    pub fn set_expires(&mut self, key: &str, value: Bytes, expiration: Duration) -> crate::Result<()> {
        self.rt.block_on(self.inner.set_expires(key, value, expiration))
    }

    /// `SET` condicional con expiracion. Retorna `true` si se ha asignado.
    pub fn set_nx(&mut self, key: &str, value: Bytes, expiration: Duration) -> crate::Result<bool> {
        self.rt.block_on(self.inner.set_nx(key, value, expiration))
    }

    /// Borra una clave. Retorna el numero de claves borradas.
    pub fn del(&mut self, key: &str) -> crate::Result<u64> {
        self.rt.block_on(self.inner.del(key))
    }

    /// Publica `message` en `channel`.
    pub fn publish(&mut self, channel: &str, message: Bytes) -> crate::Result<u64> {
        self.rt.block_on(self.inner.publish(channel, message))
    }

    /// Convierte la conexion en un `BlockingLease` sobre `key`. El lease
    /// reutiliza el runtime al que pertenece la conexion.
    ///
    /// # Panics
    /// Si `ttl` es menor que un milisegundo.
    pub fn lease(self, key: impl ToString, ttl: Duration) -> BlockingLease<Client> {
        BlockingLease {
            inner: Lease::new(self.inner, key, ttl),
            rt: self.rt,
        }
    }
}

impl<S: LeaseStore> BlockingLease<S> {
    /// Envuelve un `Lease` con un runtime propio.
    ///
    /// El almacen no debe tener conexiones abiertas desde otro runtime:
    /// es adecuado para un `Pool` nuevo (que abre conexiones bajo demanda)
    /// pero no para un `Client` ya conectado ni para un `Pool` que se
    /// comparte con otro runtime. Para un `Client` usar
    /// `BlockingClient::lease`.
    pub fn new(lease: Lease<S>) -> crate::Result<BlockingLease<S>> {
        Ok(BlockingLease {
            inner: lease,
            rt: runtime()?,
        })
    }

    pub fn lease(&self) -> &Lease<S> {
        &self.inner
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_held()
    }

    /// Ver `Lease::try_acquire`.
    pub fn try_acquire(&mut self) -> bool {
        self.rt.block_on(self.inner.try_acquire())
    }

    /// Ver `Lease::try_acquire_for`.
    pub fn try_acquire_for(&mut self, timeout: Duration, cancel: &mut Cancel) -> Result<bool, Cancelled> {
        self.rt.block_on(self.inner.try_acquire_for(timeout, cancel))
    }

    /// Ver `Lease::try_acquire_timeout`.
    pub fn try_acquire_timeout(&mut self, timeout: Duration) -> bool {
        self.rt.block_on(self.inner.try_acquire_timeout(timeout))
    }

    /// Ver `Lease::release`.
    pub fn release(&mut self) -> crate::Result<()> {
        self.rt.block_on(self.inner.release())
    }

    /// Ver `Lease::release_if_owned`.
    pub fn release_if_owned(&mut self) -> crate::Result<bool> {
        self.rt.block_on(self.inner.release_if_owned())
    }
}
