//! Lock de exclusion mutua sobre una unica clave del almacen.
//!
//! Un `Lease` se adquiere escribiendo un token propio en la clave con un
//! `SET` condicional (`NX`) que ademas fija una expiracion. Si el proceso
//! que lo tiene muere sin liberarlo, el almacen elimina la clave cuando
//! vence la expiracion.
//!
//! # Limitaciones
//!
//! * `is_held()` es una cache local. Si la expiracion vence antes de
//!   llamar a `release`, el almacen ya ha borrado la clave y otro proceso
//!   puede haberla adquirido, pero el `Lease` sigue informando `true`.
//!
//! * `release` borra la clave sin comprobar el token. En el escenario
//!   anterior borraria el lease del otro proceso. `release_if_owned` hace
//!   un compare-and-delete atomico y no tiene este problema.
//!
//! * No hay renovacion de la expiracion ni fencing token.
//!
//! * La espera de `try_acquire_for` es un sondeo: no hay cola ni orden
//!   entre procesos que esperan el mismo recurso.

use crate::{Cancel, Cancelled, LeaseStore};

use bytes::Bytes;
use rand::Rng;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, error, instrument, warn};

/// Pausa por defecto entre intentos de `try_acquire_for`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Lease sobre la clave `key` del almacen `S`.
///
/// Los metodos toman `&mut self`: una instancia se utiliza desde una
/// unica tarea a la vez. Cada proceso (o tarea) que compite por el
/// recurso crea su propio `Lease`.
#[derive(Debug)]
pub struct Lease<S> {
    store: S,

    /// Clave que identifica el recurso protegido.
    key: String,

    /// Valor escrito en la clave. Distingue este lease del de cualquier
    /// otro proceso.
    token: Bytes,

    /// Expiracion de la clave en el almacen.
    ttl: Duration,

    /// `true` desde una adquisicion con exito hasta el siguiente `release`.
    held: bool,

    /// Pausa entre intentos de `try_acquire_for`.
    poll_interval: Duration,
}

impl<S: LeaseStore> Lease<S> {
    /// Crea un `Lease` sobre `key` con un token aleatorio.
    ///
    /// # Panics
    /// Si `ttl` es menor que un milisegundo.
    pub fn new(store: S, key: impl ToString, ttl: Duration) -> Lease<S> {
        Lease::with_token(store, key, random_token(), ttl)
    }

    /// Crea un `Lease` con un token proporcionado por el llamante.
    ///
    /// El token debe ser distinto para cada `Lease` que compite por la
    /// misma clave; si no, `release_if_owned` no puede distinguirlos.
    ///
    /// # Panics
    /// Si `ttl` es menor que un milisegundo.
    pub fn with_token(store: S, key: impl ToString, token: impl Into<Bytes>, ttl: Duration) -> Lease<S> {
        // La expiracion viaja en milisegundos y el servidor rechaza `PX 0`.
        assert!(ttl.as_millis() > 0, "lease ttl must be at least one millisecond");

        Lease {
            store,
            key: key.to_string(),
            token: token.into(),
            ttl,
            held: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Cambia la pausa entre intentos de `try_acquire_for`.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Lease<S> {
        self.poll_interval = poll_interval;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &Bytes {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `true` si la ultima adquisicion tuvo exito y no se ha liberado.
    ///
    /// Es lo que este proceso cree, no lo que dice el almacen: ver las
    /// limitaciones del modulo.
    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Un unico intento de adquirir el lease.
    ///
    /// Retorna `true` si la clave se ha creado con nuestro token. Retorna
    /// `false` si ya existia o si el almacen ha fallado; el error se
    /// registra en el log. En ambos casos `is_held()` no cambia.
    ///
    /// No es reentrante: un segundo intento mientras se tiene el lease
    /// choca con nuestra propia clave y retorna `false`.
    pub async fn try_acquire(&mut self) -> bool {
        match self.try_acquire_checked().await {
            Ok(acquired) => acquired,
            Err(err) => {
                error!(key = %self.key, cause = %err, "lease acquisition failed");
                false
            }
        }
    }

    /// Como `try_acquire`, pero el error del almacen se retorna en lugar
    /// de tratarse como "ocupado". Permite distinguir un recurso ocupado
    /// (`Ok(false)`) de un almacen no disponible (`Err`).
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn try_acquire_checked(&mut self) -> crate::Result<bool> {
        let acquired = self
            .store
            .set_if_absent(&self.key, self.token.clone(), self.ttl)
            .await?;

        if acquired {
            self.held = true;
        }

        debug!(acquired);

        Ok(acquired)
    }

    /// Reintenta `try_acquire` hasta conseguirlo o hasta que pase
    /// `timeout`.
    ///
    /// Siempre se hace al menos un intento, incluso con `timeout` cero: el
    /// plazo se comprueba despues de cada intento. Entre intentos se
    /// espera `poll_interval`.
    ///
    /// Tanto la peticion al almacen como la pausa terminan en cuanto
    /// `cancel` recibe la senyal; en ese caso se retorna `Err(Cancelled)`.
    /// Si la senyal llega con la peticion en vuelo, no se sabe si el
    /// almacen llego a crear la clave: `is_held()` sigue en `false` y la
    /// clave, si existe, desaparecera con la expiracion. Un `Client` con
    /// la respuesta pendiente ya no acepta peticiones; hay que volver a
    /// conectar. `Pool` descarta esa conexion por su cuenta.
    #[instrument(skip(self, cancel), fields(key = %self.key))]
    pub async fn try_acquire_for(&mut self, timeout: Duration, cancel: &mut Cancel) -> Result<bool, Cancelled> {
        let deadline = Instant::now() + timeout;

        loop {
            let acquired = tokio::select! {
                biased;
                _ = cancel.recv() => return Err(Cancelled),
                acquired = self.try_acquire() => acquired,
            };

            if acquired {
                return Ok(true);
            }

            if Instant::now() >= deadline {
                debug!("lease wait timed out");
                return Ok(false);
            }

            tokio::select! {
                biased;
                _ = cancel.recv() => return Err(Cancelled),
                _ = time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// `try_acquire_for` sin senyal de cancelacion. Para abandonar la
    /// espera basta con descartar el futuro.
    pub async fn try_acquire_timeout(&mut self, timeout: Duration) -> bool {
        let mut cancel = Cancel::never();

        // `Cancel::never` no recibe nunca la senyal.
        self.try_acquire_for(timeout, &mut cancel)
            .await
            .unwrap_or(false)
    }

    /// Libera el lease.
    ///
    /// Si no se tiene, no se hace nada. En caso contrario se borra la
    /// clave y `is_held()` pasa a `false`.
    ///
    /// Un fallo del almacen se registra en el log y se retorna, pero el
    /// lease se considera liberado igualmente: la expiracion acabara
    /// borrando la clave. El llamante puede ignorar el error.
    ///
    /// El borrado es incondicional. Si nuestra expiracion ya vencio y otro
    /// proceso adquirio la clave, este `release` borra SU lease. Usar
    /// `release_if_owned` para evitarlo.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(&mut self) -> crate::Result<()> {
        if !self.held {
            return Ok(());
        }

        self.held = false;

        if let Err(err) = self.store.delete(&self.key).await {
            warn!(cause = %err, "lease release failed, key will expire");
            return Err(err);
        }

        Ok(())
    }

    /// Libera el lease solo si la clave todavia contiene nuestro token,
    /// mediante un compare-and-delete atomico en el almacen.
    ///
    /// Retorna `true` si la clave se ha borrado. `false` indica que no se
    /// tenia el lease o que ya no era nuestro (expiro y quiza otro
    /// proceso lo tiene ahora). `is_held()` pasa a `false` en todos los
    /// casos.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release_if_owned(&mut self) -> crate::Result<bool> {
        if !self.held {
            return Ok(false);
        }

        self.held = false;

        match self.store.delete_if_equals(&self.key, self.token.clone()).await {
            Ok(deleted) => {
                if !deleted {
                    warn!("lease expired before release");
                }
                Ok(deleted)
            }
            Err(err) => {
                warn!(cause = %err, "lease release failed, key will expire");
                Err(err)
            }
        }
    }
}

/// 128 bits aleatorios en hexadecimal.
fn random_token() -> Bytes {
    let value: u128 = rand::thread_rng().gen();
    Bytes::from(format!("{:032x}", value))
}
