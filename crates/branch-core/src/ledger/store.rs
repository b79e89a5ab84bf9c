use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{AppliedUnitRecord, LedgerEntry, LedgerStep, MigrationStatus};
use crate::errors::StoreError;
use crate::tenant::TenantId;

/// Almacenamiento durable del ledger.
///
/// Contrato compartido por todas las implementaciones:
/// - `try_acquire_lock` es un compare-and-set: toma el lock sólo si está libre
///   o expiró en `now`, y devuelve `true` si quedó a nombre de `owner`.
/// - Las escrituras que reciben `owner` (`renew_lock`, `release_lock`,
///   `mark_status`, `record_progress`, `record_failure`) sólo tocan la fila si
///   `lock_owner == owner`; `false` significa que el lease ya no es propio.
/// - `record_progress` actualiza puntero, historial y estado en una sola
///   transacción, resetea `retry_count` y limpia `error_detail`.
/// - `record_failure` incrementa `retry_count` y nunca mueve el puntero.
/// - `clear_failure` deja la fila en `Succeeded` sin fallos pendientes, con
///   el puntero intacto.
/// - Operar sobre una sucursal sin fila devuelve `StoreError::MissingEntry`
///   (salvo `ensure_entry`, `read` y `history`).
pub trait MigrationLedger: Send + Sync {
    /// Crea la fila en `Idle` si no existe y devuelve la fila actual.
    fn ensure_entry(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<LedgerEntry, StoreError>;
    fn read(&self, tenant: &TenantId) -> Result<Option<LedgerEntry>, StoreError>;
    fn list(&self) -> Result<Vec<LedgerEntry>, StoreError>;
    /// Unidades registradas como aplicadas, en orden de id.
    fn history(&self, tenant: &TenantId) -> Result<Vec<AppliedUnitRecord>, StoreError>;

    fn try_acquire_lock(&self,
                        tenant: &TenantId,
                        owner: &str,
                        expires_at: DateTime<Utc>,
                        now: DateTime<Utc>)
                        -> Result<bool, StoreError>;
    fn renew_lock(&self, tenant: &TenantId, owner: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError>;
    fn release_lock(&self, tenant: &TenantId, owner: &str) -> Result<bool, StoreError>;

    fn mark_status(&self,
                   tenant: &TenantId,
                   owner: &str,
                   status: MigrationStatus,
                   now: DateTime<Utc>)
                   -> Result<bool, StoreError>;
    fn record_progress(&self,
                       tenant: &TenantId,
                       owner: &str,
                       step: &LedgerStep,
                       status: MigrationStatus,
                       now: DateTime<Utc>)
                       -> Result<bool, StoreError>;
    fn record_failure(&self,
                      tenant: &TenantId,
                      owner: &str,
                      status: MigrationStatus,
                      detail: &str,
                      now: DateTime<Utc>)
                      -> Result<bool, StoreError>;
    fn clear_failure(&self, tenant: &TenantId, owner: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;
}

struct Slot {
    entry: LedgerEntry,
    history: BTreeMap<String, DateTime<Utc>>,
}

/// Ledger en memoria. Cada operación corre bajo el lock de shard del
/// `DashMap`, lo que da la misma atomicidad que el UPDATE condicional.
#[derive(Default)]
pub struct InMemoryLedger {
    slots: DashMap<TenantId, Slot>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_owned_slot<F>(&self, tenant: &TenantId, owner: &str, f: F) -> Result<bool, StoreError>
        where F: FnOnce(&mut Slot)
    {
        let mut slot = self.slots
                           .get_mut(tenant)
                           .ok_or_else(|| StoreError::MissingEntry(tenant.to_string()))?;
        if slot.entry.lock_owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        f(&mut slot);
        Ok(true)
    }
}

impl MigrationLedger for InMemoryLedger {
    fn ensure_entry(&self, tenant: &TenantId, _now: DateTime<Utc>) -> Result<LedgerEntry, StoreError> {
        let slot = self.slots.entry(tenant.clone()).or_insert_with(|| Slot { entry: LedgerEntry::new(tenant.clone()),
                                                                              history: BTreeMap::new() });
        Ok(slot.entry.clone())
    }

    fn read(&self, tenant: &TenantId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.slots.get(tenant).map(|slot| slot.entry.clone()))
    }

    fn list(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut all: Vec<LedgerEntry> = self.slots.iter().map(|slot| slot.entry.clone()).collect();
        all.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(all)
    }

    fn history(&self, tenant: &TenantId) -> Result<Vec<AppliedUnitRecord>, StoreError> {
        Ok(self.slots
               .get(tenant)
               .map(|slot| {
                   slot.history
                       .iter()
                       .map(|(unit_id, applied_at)| AppliedUnitRecord { unit_id: unit_id.clone(),
                                                                         applied_at: *applied_at })
                       .collect()
               })
               .unwrap_or_default())
    }

    fn try_acquire_lock(&self,
                        tenant: &TenantId,
                        owner: &str,
                        expires_at: DateTime<Utc>,
                        now: DateTime<Utc>)
                        -> Result<bool, StoreError> {
        let mut slot = self.slots
                           .get_mut(tenant)
                           .ok_or_else(|| StoreError::MissingEntry(tenant.to_string()))?;
        if !slot.entry.is_acquirable_at(now) {
            return Ok(false);
        }
        slot.entry.lock_owner = Some(owner.to_string());
        slot.entry.lock_expires_at = Some(expires_at);
        Ok(true)
    }

    fn renew_lock(&self, tenant: &TenantId, owner: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.with_owned_slot(tenant, owner, |slot| slot.entry.lock_expires_at = Some(expires_at))
    }

    fn release_lock(&self, tenant: &TenantId, owner: &str) -> Result<bool, StoreError> {
        self.with_owned_slot(tenant, owner, |slot| {
                slot.entry.lock_owner = None;
                slot.entry.lock_expires_at = None;
            })
    }

    fn mark_status(&self,
                   tenant: &TenantId,
                   owner: &str,
                   status: MigrationStatus,
                   now: DateTime<Utc>)
                   -> Result<bool, StoreError> {
        self.with_owned_slot(tenant, owner, |slot| {
                slot.entry.status = status;
                slot.entry.last_attempt_at = Some(now);
            })
    }

    fn record_progress(&self,
                       tenant: &TenantId,
                       owner: &str,
                       step: &LedgerStep,
                       status: MigrationStatus,
                       now: DateTime<Utc>)
                       -> Result<bool, StoreError> {
        self.with_owned_slot(tenant, owner, |slot| {
                match step {
                    LedgerStep::Applied { unit_id } => {
                        slot.history.insert(unit_id.clone(), now);
                    }
                    LedgerStep::Reverted { unit_id, .. } | LedgerStep::Erased { unit_id, .. } => {
                        slot.history.remove(unit_id);
                    }
                }
                slot.entry.last_applied_unit = step.last_applied_after().map(str::to_string);
                slot.entry.status = status;
                slot.entry.last_attempt_at = Some(now);
                slot.entry.retry_count = 0;
                slot.entry.error_detail = None;
            })
    }

    fn record_failure(&self,
                      tenant: &TenantId,
                      owner: &str,
                      status: MigrationStatus,
                      detail: &str,
                      now: DateTime<Utc>)
                      -> Result<bool, StoreError> {
        self.with_owned_slot(tenant, owner, |slot| {
                slot.entry.status = status;
                slot.entry.last_attempt_at = Some(now);
                slot.entry.retry_count = slot.entry.retry_count.saturating_add(1);
                slot.entry.error_detail = Some(detail.to_string());
            })
    }

    fn clear_failure(&self, tenant: &TenantId, owner: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.with_owned_slot(tenant, owner, |slot| {
                slot.entry.status = MigrationStatus::Succeeded;
                slot.entry.last_attempt_at = Some(now);
                slot.entry.retry_count = 0;
                slot.entry.error_detail = None;
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200, 0).unwrap()
    }

    fn tenant() -> TenantId {
        TenantId::parse("norte").unwrap()
    }

    #[test]
    fn acquire_is_compare_and_set() {
        let ledger = InMemoryLedger::new();
        let t = tenant();
        assert_eq!(ledger.try_acquire_lock(&t, "a", t0(), t0()).unwrap_err(),
                   StoreError::MissingEntry("norte".into()));
        ledger.ensure_entry(&t, t0()).unwrap();

        let lease = t0() + Duration::seconds(60);
        assert!(ledger.try_acquire_lock(&t, "a", lease, t0()).unwrap());
        assert!(!ledger.try_acquire_lock(&t, "b", lease, t0() + Duration::seconds(59)).unwrap());
        // vencido: otro dueño lo toma
        assert!(ledger.try_acquire_lock(&t, "b", lease + Duration::seconds(60), t0() + Duration::seconds(61))
                      .unwrap());
        assert!(!ledger.release_lock(&t, "a").unwrap());
        assert!(!ledger.renew_lock(&t, "a", lease).unwrap());
        assert!(ledger.release_lock(&t, "b").unwrap());
        assert!(ledger.read(&t).unwrap().unwrap().lock_owner.is_none());
    }

    #[test]
    fn owner_checked_writes() {
        let ledger = InMemoryLedger::new();
        let t = tenant();
        ledger.ensure_entry(&t, t0()).unwrap();
        ledger.try_acquire_lock(&t, "a", t0() + Duration::seconds(60), t0()).unwrap();

        let step = LedgerStep::Applied { unit_id: "u1".into() };
        assert!(!ledger.record_progress(&t, "b", &step, MigrationStatus::Succeeded, t0()).unwrap());
        assert!(ledger.read(&t).unwrap().unwrap().last_applied_unit.is_none());
        assert!(ledger.record_progress(&t, "a", &step, MigrationStatus::Succeeded, t0()).unwrap());
        assert_eq!(ledger.read(&t).unwrap().unwrap().last_applied_unit.as_deref(), Some("u1"));
    }

    #[test]
    fn failure_counts_and_progress_resets() {
        let ledger = InMemoryLedger::new();
        let t = tenant();
        ledger.ensure_entry(&t, t0()).unwrap();
        ledger.try_acquire_lock(&t, "a", t0() + Duration::seconds(60), t0()).unwrap();

        ledger.record_failure(&t, "a", MigrationStatus::Failed, "boom", t0()).unwrap();
        ledger.record_failure(&t, "a", MigrationStatus::Failed, "boom again", t0()).unwrap();
        let entry = ledger.read(&t).unwrap().unwrap();
        assert_eq!((entry.retry_count, entry.error_detail.as_deref()), (2, Some("boom again")));
        assert!(entry.last_applied_unit.is_none());

        ledger.record_progress(&t, "a", &LedgerStep::Applied { unit_id: "u1".into() }, MigrationStatus::Succeeded, t0())
              .unwrap();
        let entry = ledger.read(&t).unwrap().unwrap();
        assert_eq!((entry.retry_count, entry.error_detail), (0, None));
    }

    #[test]
    fn clear_failure_keeps_pointer() {
        let ledger = InMemoryLedger::new();
        let t = tenant();
        ledger.ensure_entry(&t, t0()).unwrap();
        ledger.try_acquire_lock(&t, "a", t0() + Duration::seconds(60), t0()).unwrap();
        ledger.record_progress(&t, "a", &LedgerStep::Applied { unit_id: "u1".into() }, MigrationStatus::Succeeded, t0())
              .unwrap();
        ledger.record_failure(&t, "a", MigrationStatus::Failed, "revert of u1 failed", t0()).unwrap();

        assert!(!ledger.clear_failure(&t, "b", t0()).unwrap());
        assert!(ledger.clear_failure(&t, "a", t0()).unwrap());
        let entry = ledger.read(&t).unwrap().unwrap();
        assert_eq!(entry.status, MigrationStatus::Succeeded);
        assert_eq!((entry.retry_count, entry.error_detail), (0, None));
        assert_eq!(entry.last_applied_unit.as_deref(), Some("u1"));
    }

    #[test]
    fn lock_is_held_until_strictly_past_expiry() {
        let ledger = InMemoryLedger::new();
        let t = tenant();
        ledger.ensure_entry(&t, t0()).unwrap();
        let expires = t0() + Duration::seconds(60);
        assert!(ledger.try_acquire_lock(&t, "holder/1", expires, t0()).unwrap());

        assert!(!ledger.try_acquire_lock(&t, "other/2", expires + Duration::seconds(60), expires).unwrap());
        assert_eq!(ledger.read(&t).unwrap().unwrap().lock_owner.as_deref(), Some("holder/1"));
        assert!(ledger.try_acquire_lock(&t, "other/2", expires + Duration::seconds(60), expires + Duration::milliseconds(1))
                      .unwrap());
    }

    #[test]
    fn history_follows_steps() {
        let ledger = InMemoryLedger::new();
        let t = tenant();
        ledger.ensure_entry(&t, t0()).unwrap();
        ledger.try_acquire_lock(&t, "a", t0() + Duration::seconds(60), t0()).unwrap();
        for unit in ["u1", "u2", "u3"] {
            ledger.record_progress(&t, "a", &LedgerStep::Applied { unit_id: unit.into() }, MigrationStatus::Applying, t0())
                  .unwrap();
        }
        let step = LedgerStep::Reverted { unit_id: "u3".into(), previous: Some("u2".into()) };
        ledger.record_progress(&t, "a", &step, MigrationStatus::RolledBack, t0()).unwrap();
        let step = LedgerStep::Erased { unit_id: "u1".into(), last_applied: Some("u2".into()) };
        ledger.record_progress(&t, "a", &step, MigrationStatus::Idle, t0()).unwrap();

        let ids: Vec<String> = ledger.history(&t).unwrap().into_iter().map(|r| r.unit_id).collect();
        assert_eq!(ids, vec!["u2"]);
        assert_eq!(ledger.read(&t).unwrap().unwrap().last_applied_unit.as_deref(), Some("u2"));
    }
}
