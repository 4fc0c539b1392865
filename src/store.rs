use crate::{Client, Pool};

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Las operaciones del almacen key/value que necesita un `Lease`.
///
/// El almacen es el unico punto de serializacion entre procesos: la
/// exclusion mutua depende por completo de que `set_if_absent` sea
/// atomico.
#[async_trait]
pub trait LeaseStore: Send {
    /// Asigna `value` a `key` con expiracion `ttl`, solo si `key` no
    /// existe. Retorna `true` si la clave se ha creado.
    async fn set_if_absent(&mut self, key: &str, value: Bytes, ttl: Duration) -> crate::Result<bool>;

    /// Borra `key`. No es un error que la clave no exista.
    async fn delete(&mut self, key: &str) -> crate::Result<()>;

    /// Borra `key` solo si su valor es `value`, de forma atomica.
    /// Retorna `true` si se ha borrado.
    async fn delete_if_equals(&mut self, key: &str, value: Bytes) -> crate::Result<bool>;
}

#[async_trait]
impl LeaseStore for Client {
    async fn set_if_absent(&mut self, key: &str, value: Bytes, ttl: Duration) -> crate::Result<bool> {
        self.set_nx(key, value, ttl).await
    }

    async fn delete(&mut self, key: &str) -> crate::Result<()> {
        self.del(key).await.map(|_| ())
    }

    async fn delete_if_equals(&mut self, key: &str, value: Bytes) -> crate::Result<bool> {
        self.del_if_eq(key, value).await
    }
}

/// Cada operacion toma prestada una conexion y la devuelve al terminar.
#[async_trait]
impl LeaseStore for Pool {
    async fn set_if_absent(&mut self, key: &str, value: Bytes, ttl: Duration) -> crate::Result<bool> {
        self.set_nx(key, value, ttl).await
    }

    async fn delete(&mut self, key: &str) -> crate::Result<()> {
        self.del(key).await.map(|_| ())
    }

    async fn delete_if_equals(&mut self, key: &str, value: Bytes) -> crate::Result<bool> {
        let mut client = self.client().await?;
        client.del_if_eq(key, value).await
    }
}

