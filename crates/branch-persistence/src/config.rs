//! Carga de configuración de conexión al plano de control desde variables
//! de entorno. Usa `CONTROL_DATABASE_URL` (o `DATABASE_URL` como respaldo) y
//! parámetros opcionales de pool.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::error::PersistenceError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn new(url: &str) -> Self {
        Self { url: url.to_string(),
               min_connections: 2,
               max_connections: 16 }
    }

    pub fn from_env() -> Result<Self, PersistenceError> {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("CONTROL_DATABASE_URL").or_else(|_| env::var("DATABASE_URL"))
                                                  .map_err(|_| {
                                                      PersistenceError::Config("CONTROL_DATABASE_URL / DATABASE_URL no definido".into())
                                                  })?;
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(2);
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(16);
        Ok(Self { url, min_connections, max_connections })
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
