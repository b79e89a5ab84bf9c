//! Estado de migración por sucursal, persistido en el plano de control.
//!
//! El ledger es la única fuente de verdad sobre qué unidad aplicó cada
//! sucursal y quién tiene el lock; nunca vive en la base de la sucursal.

mod store;

pub use store::{InMemoryLedger, MigrationLedger};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationStatus {
    Idle,
    Applying,
    Succeeded,
    Failed,
    RollingBack,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Applying => "Applying",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::RollingBack => "RollingBack",
            Self::RolledBack => "RolledBack",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Idle" => Some(Self::Idle),
            "Applying" => Some(Self::Applying),
            "Succeeded" => Some(Self::Succeeded),
            "Failed" => Some(Self::Failed),
            "RollingBack" => Some(Self::RollingBack),
            "RolledBack" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Estados que sólo son legítimos mientras alguien sostiene el lock.
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Applying | Self::RollingBack)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown migration status {s}"))
    }
}

/// Fila del ledger para una sucursal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tenant_id: TenantId,
    pub last_applied_unit: Option<String>,
    pub status: MigrationStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_detail: Option<String>,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id,
               last_applied_unit: None,
               status: MigrationStatus::Idle,
               last_attempt_at: None,
               retry_count: 0,
               error_detail: None,
               lock_owner: None,
               lock_expires_at: None }
    }

    /// Lock vigente: tiene dueño y `now` no pasó de `lock_expires_at`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.lock_owner, self.lock_expires_at) {
            (Some(_), Some(expires)) => expires >= now,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// El lock se puede tomar: libre o expirado.
    pub fn is_acquirable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_locked_at(now)
    }

    pub fn is_in_flight(&self) -> bool {
        self.status.is_transitional()
    }
}

/// Avance del puntero registrado atómicamente junto con el historial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStep {
    /// La unidad se aplicó: pasa a ser la última y entra al historial.
    Applied { unit_id: String },
    /// La unidad se revirtió: sale del historial y el puntero vuelve a `previous`.
    Reverted { unit_id: String, previous: Option<String> },
    /// Borrado administrativo: la unidad sale del historial sin ejecutar
    /// `revert`; el puntero queda en `last_applied`.
    Erased { unit_id: String, last_applied: Option<String> },
}

impl LedgerStep {
    pub fn unit_id(&self) -> &str {
        match self {
            Self::Applied { unit_id } | Self::Reverted { unit_id, .. } | Self::Erased { unit_id, .. } => unit_id,
        }
    }

    /// Valor de `last_applied_unit` después del paso.
    pub fn last_applied_after(&self) -> Option<&str> {
        match self {
            Self::Applied { unit_id } => Some(unit_id),
            Self::Reverted { previous, .. } => previous.as_deref(),
            Self::Erased { last_applied, .. } => last_applied.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedUnitRecord {
    pub unit_id: String,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_round_trips_through_text() {
        for status in [MigrationStatus::Idle, MigrationStatus::RollingBack, MigrationStatus::RolledBack] {
            assert_eq!(status.as_str().parse::<MigrationStatus>().unwrap(), status);
        }
        assert!(MigrationStatus::parse("Pending").is_none());
    }

    #[test]
    fn lock_expiry_is_relative_to_now() {
        let now = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
        let mut entry = LedgerEntry::new(TenantId::parse("norte").unwrap());
        assert!(!entry.is_locked_at(now));
        entry.lock_owner = Some("cp-1/a".into());
        entry.lock_expires_at = Some(now + Duration::seconds(30));
        assert!(entry.is_locked_at(now));
        assert!(entry.is_acquirable_at(now + Duration::seconds(31)));
    }

    #[test]
    fn step_pointer() {
        let step = LedgerStep::Reverted { unit_id: "u3".into(), previous: Some("u2".into()) };
        assert_eq!(step.last_applied_after(), Some("u2"));
        assert_eq!(LedgerStep::Applied { unit_id: "u1".into() }.last_applied_after(), Some("u1"));
    }
}
