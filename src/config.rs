use crate::DEFAULT_PORT;

use std::time::Duration;

/// Configuracion del acceso al servidor Redis y del pool de conexiones.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host del servidor.
    pub host: String,

    /// Puerto del servidor.
    pub port: u16,

    /// Si el servidor requiere autenticacion, cada conexion nueva envia
    /// `AUTH` con esta password antes de ser utilizada.
    pub password: Option<String>,

    /// Numero maximo de conexiones abiertas simultaneamente por el pool.
    pub max_connections: usize,

    /// Tiempo maximo para establecer una conexion.
    pub connect_timeout: Duration,
}

impl Config {
    /// Direccion `host:port` del servidor.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            password: None,
            max_connections: 8,
            connect_timeout: Duration::from_secs(5),
        }
    }
}
