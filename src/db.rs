//! Almacen key/value en memoria, dentro del propio proceso.
//!
//! Ofrece las mismas primitivas que el lock necesita del servidor Redis
//! (`SET NX` con expiracion, `DEL`, compare-and-delete) ademas de pub/sub.
//! Se utiliza como almacen inyectable en los tests, donde el reloj de
//! Tokio se puede pausar y avanzar, y cuando los recursos a proteger
//! pertenecen a un unico proceso.

use crate::client::Message;
use crate::store::LeaseStore;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};
use tokio::time::{self, Duration, Instant};
use tokio_stream::{Stream, StreamExt, StreamMap};
use tracing::debug;

/// Envoltorio alrededor de una instancia `Db`.
///
/// Al destruirse marca la tarea de purga en segundo plano para que
/// termine.
#[derive(Debug)]
pub struct DbDropGuard {
    /// La instancia de `Db` que sera desmontada cuando esta estructura
    /// `DbDropGuard` sea eliminada (dropped).
    db: Db,
}

/// Estado compartido por todos los clones de `Db`.
///
/// Cuando se crea un `Db` se lanza tambien una tarea que gestiona la
/// expiracion de los valores. La tarea funciona hasta que el
/// `DbDropGuard` es eliminado.
#[derive(Debug, Clone)]
pub struct Db {
    /// La tarea que gestiona las expiraciones tambien posee un
    /// `Arc<Shared>`.
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    /// Se utiliza un `std::sync::Mutex` y no el de Tokio porque no se
    /// realizan operaciones asincronas mientras se mantiene el bloqueo, y
    /// las secciones criticas son muy cortas.
    state: Mutex<State>,

    /// Despierta a la tarea de purga cuando cambia la proxima expiracion
    /// o cuando hay que detenerla.
    background_task: Notify,
}

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,

    /// Canales pub/sub. Espacio de nombres independiente de `entries`.
    pub_sub: HashMap<String, broadcast::Sender<Bytes>>,

    /// Expiraciones ordenadas por instante. El `u64` es el id de la
    /// entrada y desambigua expiraciones en el mismo instante.
    expirations: BTreeMap<(Instant, u64), String>,

    /// Id de la proxima entrada.
    next_id: u64,

    /// `true` cuando el `DbDropGuard` se ha eliminado.
    shutdown: bool,
}

/// Entrada en el almacen Key/Value
#[derive(Debug)]
struct Entry {
    /// Identificador unico de la entrada.
    id: u64,

    /// Datos almacenados
    data: Bytes,

    /// Instante en el que la entrada expira
    expires_at: Option<Instant>,
}

/// Stream de mensajes de un canal.
type Messages = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

impl DbDropGuard {
    /// Crea un nuevo `DbDropGuard` con un `Db` vacio.
    ///
    /// Debe llamarse desde dentro de un runtime de Tokio: se lanza la
    /// tarea de purga.
    pub fn new() -> DbDropGuard {
        DbDropGuard { db: Db::new() }
    }

    /// Obtiene el recurso compartido. Internamente es un `Arc`, asi que
    /// solo se incrementa el contador de referencias.
    pub fn db(&self) -> Db {
        self.db.clone()
    }
}

impl Default for DbDropGuard {
    fn default() -> DbDropGuard {
        DbDropGuard::new()
    }
}

impl Drop for DbDropGuard {
    fn drop(&mut self) {
        self.db.shutdown_purge_task();
    }
}

impl Db {
    /// Crea un `Db` vacio y lanza la tarea que gestiona las expiraciones.
    pub(crate) fn new() -> Db {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                entries: HashMap::new(),
                pub_sub: HashMap::new(),
                expirations: BTreeMap::new(),
                next_id: 0,
                shutdown: false,
            }),
            background_task: Notify::new(),
        });

        tokio::spawn(purge_expired_tasks(shared.clone()));

        Db { shared }
    }

    /// Obtiene el valor asociado con una clave.
    ///
    /// Retorna `None` si la clave no existe o si su valor ha expirado,
    /// aunque la tarea de purga todavia no lo haya eliminado.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let state = self.shared.state.lock().unwrap();

        state
            .live_entry(key, Instant::now())
            .map(|entry| entry.data.clone())
    }

    /// Asigna un valor a una clave con una expiracion opcional.
    ///
    /// El valor (y la expiracion) anteriores son reemplazados.
    pub fn set(&self, key: String, value: Bytes, expire: Option<Duration>) {
        let notify = {
            let mut state = self.shared.state.lock().unwrap();
            state.insert(key, value, expire)
        };

        // El mutex se libera antes de notificar, asi la tarea no se
        // despierta para quedarse esperando el bloqueo.
        if notify {
            self.shared.background_task.notify_one();
        }
    }

    /// Asigna el valor solo si la clave no existe (o ha expirado).
    ///
    /// La comprobacion y la escritura se hacen bajo el mismo bloqueo, asi
    /// que la operacion es atomica. Retorna `true` si se ha asignado.
    pub fn set_nx(&self, key: String, value: Bytes, expire: Duration) -> bool {
        let notify = {
            let mut state = self.shared.state.lock().unwrap();

            if state.live_entry(&key, Instant::now()).is_some() {
                return false;
            }

            state.insert(key, value, Some(expire))
        };

        if notify {
            self.shared.background_task.notify_one();
        }

        true
    }

    /// Borra una clave. Retorna `true` si existia.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.shared.state.lock().unwrap();

        let live = state.live_entry(key, Instant::now()).is_some();
        state.remove(key);

        live
    }

    /// Borra la clave solo si su valor es `value`. Retorna `true` si se
    /// ha borrado.
    pub fn delete_if_eq(&self, key: &str, value: &[u8]) -> bool {
        let mut state = self.shared.state.lock().unwrap();

        let matches = state
            .live_entry(key, Instant::now())
            .map(|entry| entry.data == value)
            .unwrap_or(false);

        if matches {
            state.remove(key);
        }

        matches
    }

    /// Reemplaza la expiracion de una clave existente. Retorna `false` si
    /// la clave no existe.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let notify = {
            let mut state = self.shared.state.lock().unwrap();

            if state.live_entry(key, Instant::now()).is_none() {
                return false;
            }

            match state.remove(key) {
                Some(entry) => state.insert(key.to_string(), entry.data, Some(ttl)),
                None => return false,
            }
        };

        if notify {
            self.shared.background_task.notify_one();
        }

        true
    }

    /// Retorna un `broadcast::Receiver` para el canal indicado.
    pub fn subscribe(&self, key: String) -> broadcast::Receiver<Bytes> {
        use std::collections::hash_map::Entry;

        let mut state = self.shared.state.lock().unwrap();

        match state.pub_sub.entry(key) {
            Entry::Occupied(e) => e.get().subscribe(),
            Entry::Vacant(e) => {
                // Un mensaje permanece en el canal hasta que todos los
                // subscriptores lo han recibido. Con el canal lleno, los
                // mensajes antiguos se descartan: un consumidor lento no
                // bloquea a los demas.
                let (tx, rx) = broadcast::channel(1024);
                e.insert(tx);
                rx
            }
        }
    }

    /// Subscribe a varios canales y mezcla sus mensajes en un unico
    /// stream, con la misma forma que `Subscriber::into_stream`.
    ///
    /// La subscripcion es inmediata: los mensajes publicados despues de
    /// esta llamada se reciben aunque el stream todavia no se consuma.
    pub fn messages(&self, channels: &[String]) -> impl Stream<Item = crate::Result<Message>> + Send + 'static {
        let mut subscriptions: StreamMap<String, Messages> = StreamMap::new();

        for channel in channels {
            let mut rx = self.subscribe(channel.clone());

            let rx = Box::pin(async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok(msg) => yield msg,
                        // El consumidor se ha retrasado, se continua.
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(_) => break,
                    }
                }
            });

            subscriptions.insert(channel.clone(), rx);
        }

        subscriptions.map(|(channel, content)| Ok::<_, crate::Error>(Message { channel, content }))
    }

    /// Publica un mensaje en el canal y retorna el numero de subscriptores
    /// en el momento del envio.
    pub fn publish(&self, key: &str, value: Bytes) -> usize {
        let state = self.shared.state.lock().unwrap();

        state
            .pub_sub
            .get(key)
            // Sin receptores `send` falla; se cuenta como 0 subscriptores.
            .map(|tx| tx.send(value).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Senyal de parada para la tarea de purga. La invoca `DbDropGuard`.
    fn shutdown_purge_task(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }

        self.shared.background_task.notify_one();
    }
}

#[async_trait]
impl LeaseStore for Db {
    async fn set_if_absent(&mut self, key: &str, value: Bytes, ttl: Duration) -> crate::Result<bool> {
        Ok(self.set_nx(key.to_string(), value, ttl))
    }

    async fn delete(&mut self, key: &str) -> crate::Result<()> {
        Db::delete(self, key);
        Ok(())
    }

    async fn delete_if_equals(&mut self, key: &str, value: Bytes) -> crate::Result<bool> {
        Ok(self.delete_if_eq(key, &value))
    }
}

impl Shared {
    /// Purga todas las claves que han expirado y retorna el `Instant` de
    /// la siguiente expiracion.
    fn purge_expired_keys(&self) -> Option<Instant> {
        let mut state = self.state.lock().unwrap();

        if state.shutdown {
            return None;
        }

        // `lock()` retorna un `MutexGuard`; el borrow checker no puede ver
        // a traves de el que `expirations` y `entries` son campos
        // distintos, asi que se obtiene un `&mut State` real.
        let state = &mut *state;

        let now = Instant::now();

        while let Some((&(when, id), key)) = state.expirations.iter().next() {
            if when > now {
                // El resto de expiraciones son posteriores.
                return Some(when);
            }

            state.entries.remove(key);
            state.expirations.remove(&(when, id));
        }

        None
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }
}

impl State {
    fn next_expiration(&self) -> Option<Instant> {
        self.expirations
            .keys()
            .next()
            .map(|expiration| expiration.0)
    }

    /// La entrada de `key` si existe y no ha expirado en `now`.
    fn live_entry(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at.map_or(true, |when| when > now))
    }

    /// Inserta (o reemplaza) una entrada. Retorna `true` si la nueva
    /// expiracion pasa a ser la proxima y hay que avisar a la tarea de
    /// purga.
    fn insert(&mut self, key: String, value: Bytes, expire: Option<Duration>) -> bool {
        let id = self.next_id;
        self.next_id += 1;

        let (notify, expires_at) = match expire {
            Some(expire) => {
                let when = Instant::now() + expire;

                // Sin expiraciones pendientes la tarea esta dormida sin
                // plazo, asi que tambien hay que avisarla.
                let notify = self
                    .next_expiration()
                    .map(|expiration| expiration > when)
                    .unwrap_or(true);

                self.expirations.insert((when, id), key.clone());

                (notify, Some(when))
            }
            None => (false, None),
        };

        let prev = self.entries.insert(
            key,
            Entry {
                id,
                data: value,
                expires_at,
            },
        );

        // La expiracion del valor reemplazado ya no aplica.
        if let Some(prev) = prev {
            if let Some(when) = prev.expires_at {
                self.expirations.remove(&(when, prev.id));
            }
        }

        notify
    }

    /// Elimina una entrada junto con su expiracion.
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let prev = self.entries.remove(key)?;

        if let Some(when) = prev.expires_at {
            self.expirations.remove(&(when, prev.id));
        }

        Some(prev)
    }
}

/// Tarea ejecutada en segundo plano.
///
/// Duerme hasta la proxima expiracion o hasta recibir una notificacion.
async fn purge_expired_tasks(shared: Arc<Shared>) {
    while !shared.is_shutdown() {
        if let Some(when) = shared.purge_expired_keys() {
            tokio::select! {
                _ = time::sleep_until(when) => {}
                _ = shared.background_task.notified() => {}
            }
        } else {
            shared.background_task.notified().await;
        }
    }

    debug!("Purge background task shut down")
}
