//! Identidad y parámetros de conexión de cada sucursal (tenant).

mod catalog;

pub use catalog::{ChangeNotifier, InMemoryTenantCatalog, TenantCatalog, TenantChangeListener};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_TENANT_ID_LEN;
use crate::errors::InvalidTenantId;

/// Identificador estable de una sucursal.
///
/// Se valida al construirse: 1..=64 caracteres ASCII alfanuméricos, `-` o
/// `_`. Es el único punto donde un llamador puede violar el contrato del
/// orquestador; todo lo demás se reporta como `MigrationResult`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(value: &str) -> Result<Self, InvalidTenantId> {
        if value.is_empty() {
            return Err(InvalidTenantId { value: value.to_string(), reason: "empty" });
        }
        if value.len() > MAX_TENANT_ID_LEN {
            return Err(InvalidTenantId { value: value.to_string(), reason: "too long" });
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(InvalidTenantId { value: value.to_string(), reason: "only [A-Za-z0-9_-] allowed" });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = InvalidTenantId;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = InvalidTenantId;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Motor de base de datos de la sucursal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Archivo embebido (SQLite); se crea al conectar.
    Sqlite,
    /// Servidor en red (PostgreSQL).
    Postgres,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "file" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(format!("unknown engine kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    pub enabled: bool,
    pub trust_server_certificate: bool,
}

/// Descriptor de conexión de una sucursal.
///
/// Fuente de verdad propiedad del plano de control. `revision` la asigna el
/// catálogo en cada escritura; el resolver la usa para descartar conexiones
/// abiertas con una versión anterior del descriptor.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescriptor {
    pub id: TenantId,
    pub code: String,
    pub name: String,
    pub engine: EngineKind,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub file_path: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub revision: u64,
}

impl TenantDescriptor {
    /// Descriptor mínimo para una sucursal con archivo embebido.
    pub fn sqlite(id: TenantId, code: &str, name: &str, file_path: &str) -> Self {
        Self { id,
               code: code.to_string(),
               name: name.to_string(),
               engine: EngineKind::Sqlite,
               host: None,
               port: None,
               database: None,
               file_path: Some(file_path.to_string()),
               username: None,
               password: None,
               tls: TlsSettings::default(),
               params: BTreeMap::new(),
               revision: 0 }
    }

    /// Descriptor mínimo para una sucursal en un servidor Postgres.
    pub fn postgres(id: TenantId, code: &str, name: &str, host: &str, database: &str) -> Self {
        Self { id,
               code: code.to_string(),
               name: name.to_string(),
               engine: EngineKind::Postgres,
               host: Some(host.to_string()),
               port: None,
               database: Some(database.to_string()),
               file_path: None,
               username: None,
               password: None,
               tls: TlsSettings::default(),
               params: BTreeMap::new(),
               revision: 0 }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl fmt::Debug for TenantDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantDescriptor")
         .field("id", &self.id)
         .field("code", &self.code)
         .field("name", &self.name)
         .field("engine", &self.engine)
         .field("host", &self.host)
         .field("port", &self.port)
         .field("database", &self.database)
         .field("file_path", &self.file_path)
         .field("username", &self.username)
         .field("password", &self.password.as_ref().map(|_| "***"))
         .field("tls", &self.tls)
         .field("params", &self.params)
         .field("revision", &self.revision)
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_validation() {
        assert!(TenantId::parse("sucursal-norte_01").is_ok());
        assert_eq!(TenantId::parse("").unwrap_err().reason, "empty");
        assert!(TenantId::parse("con espacio").is_err());
        assert!(TenantId::parse(&"x".repeat(65)).is_err());
        let id: TenantId = serde_json::from_value(serde_json::json!("centro")).unwrap();
        assert_eq!(id.as_str(), "centro");
        assert!(serde_json::from_value::<TenantId>(serde_json::json!("a/b")).is_err());
    }

    #[test]
    fn engine_kind_parsing() {
        assert_eq!("PostgreSQL".parse::<EngineKind>().unwrap(), EngineKind::Postgres);
        assert_eq!("sqlite".parse::<EngineKind>().unwrap(), EngineKind::Sqlite);
        assert!("oracle".parse::<EngineKind>().is_err());
    }

    #[test]
    fn debug_and_json_hide_password() {
        let mut d = TenantDescriptor::postgres(TenantId::parse("sur").unwrap(), "SUR", "Sur", "db.local", "sur");
        d.password = Some("s3cr3t".into());
        assert!(!format!("{d:?}").contains("s3cr3t"));
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("s3cr3t"));
    }
}
