//! Contratos de conexión hacia la base de datos de una sucursal.

use crate::errors::SessionError;
use crate::tenant::{EngineKind, TenantDescriptor};

/// Sesión viva contra la base de una sucursal.
///
/// Una sesión se reutiliza secuencialmente dentro de un intento de
/// migración; nunca se comparte entre sucursales.
pub trait TenantSession: Send {
    fn engine(&self) -> EngineKind;
    /// Ida y vuelta trivial (`SELECT 1`).
    fn ping(&mut self) -> Result<(), SessionError>;
    /// Ejecuta un lote de sentencias sin transacción explícita.
    fn execute(&mut self, sql: &str) -> Result<(), SessionError>;
    /// Ejecuta un lote de sentencias dentro de una única transacción.
    fn execute_atomic(&mut self, sql: &str) -> Result<(), SessionError>;
    /// Ejecuta una consulta que devuelve una sola columna entera llamada `n`.
    fn count(&mut self, sql: &str) -> Result<i64, SessionError>;
}

/// Abre sesiones a partir de un descriptor.
///
/// La sesión devuelta todavía no fue validada; el resolver la valida con
/// `ping` antes de cachearla.
pub trait SessionFactory: Send + Sync {
    fn open(&self, descriptor: &TenantDescriptor) -> Result<Box<dyn TenantSession>, SessionError>;
}
