//! Cliente Redis con pool de conexiones, un lock de recurso unico basado
//! en `SET NX PX` y un repartidor de mensajes pub/sub.
//!
//! El almacen key/value se trata como un servicio opaco al que se accede
//! por la red. Este crate solo implementa el lado del cliente.
//!
//! # Layout
//!
//! Los componentes principales son:
//!
//! * `lease`: el lock de un solo recurso (`Lease`). Se adquiere con un
//!   `SET` condicional con expiracion y se libera con un `DEL`.
//!
//! * `store`: el trait `LeaseStore` que desacopla el lock del almacen
//!   concreto. Lo implementan `Client`, `Pool` y `Db`.
//!
//! * `client`: cliente Redis asincrono construido con Tokio.
//!
//! * `pool`: pool de conexiones que presta instancias de `Client`.
//!
//! * `blocking`: version bloqueante del cliente y del lock para ser
//!   utilizada desde threads que no pertenecen a un runtime.
//!
//! * `pubsub`: `Publisher` y `Dispatcher`, que reparte los mensajes
//!   recibidos entre los handlers registrados para cada canal.
//!
//! * `cmd`: los comandos Redis que el cliente sabe enviar.
//!
//! * `frame`: representa una trama del protocolo Redis. Un frame se utiliza
//!   como representacion intermedia entre un "comando" y los bytes.
//!
//! * `db`: almacen en memoria, en el mismo proceso. Se utiliza en los
//!   tests y cuando el lock solo protege recursos de un unico proceso.

pub mod blocking;

pub mod cancel;
pub use cancel::{Cancel, Cancelled};

pub mod client;
pub use client::{Client, Message, Subscriber};

pub mod cmd;

pub mod config;
pub use config::Config;

mod connection;
pub use connection::Connection;

pub mod db;
pub use db::{Db, DbDropGuard};

pub mod frame;
pub use frame::Frame;

pub mod lease;
pub use lease::Lease;

mod parse;
use parse::Parse;

pub mod pool;
pub use pool::{Pool, PooledClient};

pub mod pubsub;
pub use pubsub::{Dispatcher, Publisher};

pub mod store;
pub use store::LeaseStore;

/// Puerto por defecto que se utilizara si no se especifica otro
pub const DEFAULT_PORT: u16 = 6379;

/// Error retornado por la mayoria de funciones.
///
/// En una aplicacion real se puede considerar especializar la
/// gestion de errores del crate por ejemplo definiendo el error
/// como una enumeracion de causas.
///
/// Aqui se utiliza un boxed `std::error::Error`, salvo en los
/// "hot path" (parseado de frames) donde se definen errores mediante
/// 'enum' que implementan `std::error::Error` y que por tanto se
/// pueden convertir en un `Box<dyn std::error::Error>`.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Un `Result` especializado para las operaciones del crate.
pub type Result<T> = std::result::Result<T, Error>;
