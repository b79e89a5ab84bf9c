//! Constantes del núcleo de migraciones.
//!
//! Valores por defecto que el facade puede sobrescribir desde configuración.

/// Duración por defecto del lease de migración (segundos). Debe superar con
/// holgura la duración de la unidad más lenta, porque el lease se renueva
/// solo entre unidades.
pub const DEFAULT_LEASE_SECONDS: i64 = 300;

/// Longitud máxima de un `TenantId`.
pub const MAX_TENANT_ID_LEN: usize = 64;

/// Prefijo de detalle usado al reconciliar intentos abandonados.
pub const INTERRUPTED_DETAIL: &str = "interrupted: previous attempt abandoned its lease";
