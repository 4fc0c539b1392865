//! Comandos Redis que el cliente sabe enviar.
//!
//! Cada comando se construye con `new` y se convierte en el `Frame` que
//! viaja por la conexion con `into_frame`.

mod auth;
pub use auth::Auth;

mod del;
pub use del::{Del, DelIfEq};

mod expire;
pub use expire::Expire;

mod get;
pub use get::Get;

mod publish;
pub use publish::Publish;

mod set;
pub use set::Set;

mod subscribe;
pub use subscribe::{Subscribe, Unsubscribe};

mod ping;
pub use ping::Ping;
