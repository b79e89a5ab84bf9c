//! Máquina de estados apply/rollback por sucursal.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use uuid::Uuid;

use super::result::{BulkMigrationResult, LiveLock, MigrationResult, ReconcileReport, SchemaCheck, TenantHistory,
                    TenantMigrationStatus};
use super::CancelFlag;
use crate::clock::Clock;
use crate::constants::{DEFAULT_LEASE_SECONDS, INTERRUPTED_DETAIL};
use crate::errors::{MigrationError, MigrationErrorKind, StoreError, UnitError};
use crate::ledger::{LedgerEntry, LedgerStep, MigrationLedger, MigrationStatus};
use crate::registry::MigrationRegistry;
use crate::resolver::ConnectionResolver;
use crate::tenant::{TenantCatalog, TenantDescriptor, TenantId};

/// Tiempo máximo que `validate` espera por la sesión de la sucursal.
const VALIDATE_SESSION_WAIT: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Prefijo de los owner ids (`"{instance_id}/{uuid}"`); identifica a
    /// esta instancia del plano de control en el ledger.
    pub instance_id: String,
    /// Duración del lease; se renueva antes de cada unidad.
    pub lease: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self { instance_id: format!("branchflow-{}", &suffix[..8]),
               lease: Duration::seconds(DEFAULT_LEASE_SECONDS) }
    }
}

/// Orquestador de migraciones por sucursal.
///
/// Garantías:
/// - A lo sumo un intento apply/rollback en vuelo por sucursal, vía el lease
///   del ledger (válido también entre procesos).
/// - Dentro de un intento las unidades corren en orden de registro, una por
///   vez, sobre la misma sesión.
/// - Sucursales distintas no comparten ningún lock de proceso.
/// - Las operaciones que devuelven `MigrationResult` nunca devuelven `Err`
///   ni propagan pánicos de las unidades.
pub struct MigrationOrchestrator {
    registry: Arc<MigrationRegistry>,
    ledger: Arc<dyn MigrationLedger>,
    catalog: Arc<dyn TenantCatalog>,
    resolver: Arc<ConnectionResolver>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
    /// owner id -> sucursal, para las operaciones en curso de este proceso.
    active: DashMap<String, TenantId>,
}

/// Lease tomado sobre una sucursal; se libera al soltarse.
struct LeaseGuard<'a> {
    orchestrator: &'a MigrationOrchestrator,
    tenant: TenantId,
    owner: String,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.active.remove(&self.owner);
        match self.orchestrator.ledger.release_lock(&self.tenant, &self.owner) {
            Ok(true) => debug!("lease:released tenant={} owner={}", self.tenant, self.owner),
            Ok(false) => warn!("lease:release_skipped tenant={} owner={} (superseded)", self.tenant, self.owner),
            Err(e) => warn!("lease:release_failed tenant={} owner={} err={}", self.tenant, self.owner, e),
        }
    }
}

/// Avance acumulado de un intento, reportado incluso si falla.
#[derive(Default)]
struct Progress {
    units: Vec<String>,
    from: Option<String>,
    to: Option<String>,
}

impl MigrationOrchestrator {
    pub fn new(registry: Arc<MigrationRegistry>,
               ledger: Arc<dyn MigrationLedger>,
               catalog: Arc<dyn TenantCatalog>,
               resolver: Arc<ConnectionResolver>,
               clock: Arc<dyn Clock>,
               settings: OrchestratorSettings)
               -> Self {
        Self { registry,
               ledger,
               catalog,
               resolver,
               clock,
               settings,
               active: DashMap::new() }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<dyn MigrationLedger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &Arc<dyn TenantCatalog> {
        &self.catalog
    }

    pub fn resolver(&self) -> &Arc<ConnectionResolver> {
        &self.resolver
    }

    /// Crea la fila del ledger de la sucursal si todavía no existe.
    pub fn ensure_entry(&self, tenant: &TenantId) -> Result<LedgerEntry, MigrationError> {
        self.require_tenant(tenant)?;
        Ok(self.ledger.ensure_entry(tenant, self.clock.now())?)
    }

    /// Owner ids de las operaciones en curso en este proceso.
    pub fn active_owners(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    // ------------------------------------------------------------------
    // apply
    // ------------------------------------------------------------------

    /// Lleva la sucursal hasta `target` (por defecto, la última unidad).
    pub fn apply(&self, tenant: &TenantId, target: Option<&str>) -> MigrationResult {
        self.apply_with_cancel(tenant, target, &CancelFlag::never())
    }

    pub fn apply_with_cancel(&self, tenant: &TenantId, target: Option<&str>, cancel: &CancelFlag) -> MigrationResult {
        let mut progress = Progress::default();
        match self.run_apply(tenant, target, cancel, &mut progress) {
            Ok(message) => {
                info!("apply:done tenant={} units={} to={:?}", tenant, progress.units.len(), progress.to);
                MigrationResult::ok(tenant.clone(), message, progress.units, progress.from, progress.to)
            }
            Err(e) => {
                debug!("apply:failed tenant={} kind={:?} err={}", tenant, e.kind(), e);
                MigrationResult::failed(tenant.clone(), &e, progress.units, progress.from, progress.to)
            }
        }
    }

    fn run_apply(&self,
                 tenant: &TenantId,
                 target: Option<&str>,
                 cancel: &CancelFlag,
                 progress: &mut Progress)
                 -> Result<String, MigrationError> {
        self.require_tenant(tenant)?;
        self.ledger.ensure_entry(tenant, self.clock.now())?;
        if let Some(target) = target {
            if !self.registry.contains(target) {
                return Err(MigrationError::UnknownUnit(target.to_string()));
            }
        }

        let lease = self.acquire(tenant)?;
        let handle = self.resolver.resolve(tenant)?;
        let entry = self.read_entry(tenant)?;
        let last = entry.last_applied_unit;
        if let Some(last) = &last {
            if !self.registry.contains(last) {
                return Err(MigrationError::UnknownUnit(last.clone()));
            }
        }
        progress.from = last.clone();
        progress.to = last.clone();

        let pending = self.registry.pending(last.as_deref(), target);
        if pending.is_empty() {
            let stale_failure = entry.status == MigrationStatus::Failed
                                || entry.retry_count > 0
                                || entry.error_detail.is_some();
            if stale_failure && !self.ledger.clear_failure(tenant, &lease.owner, self.clock.now())? {
                return Err(MigrationError::LeaseLost(tenant.clone()));
            }
            return Ok(format!("tenant {} is up to date at {}", tenant, last.as_deref().unwrap_or("<none>")));
        }
        debug!("apply:start tenant={} owner={} pending={}", tenant, lease.owner, pending.len());

        let mut session = handle.lock();
        let total = pending.len();
        for (index, unit) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                let detail = format!("cancelled before unit {}", unit.id());
                self.record_failure(&lease, &detail)?;
                return Err(MigrationError::Cancelled { tenant: tenant.clone(), detail });
            }
            self.renew(&lease)?;
            self.mark(&lease, MigrationStatus::Applying)?;

            debug!("apply:unit tenant={} unit={}", tenant, unit.id());
            if let Err(reason) = run_unit(|| unit.apply(&mut **session)) {
                error!("apply:unit_failed tenant={} unit={} reason={}", tenant, unit.id(), reason);
                self.resolver.invalidate(tenant);
                self.record_failure(&lease, &format!("unit {} failed: {}", unit.id(), reason))?;
                return Err(MigrationError::UnitExecutionFailed { tenant: tenant.clone(),
                                                                 unit: unit.id().to_string(),
                                                                 reason });
            }

            let status = if index + 1 == total { MigrationStatus::Succeeded } else { MigrationStatus::Applying };
            let step = LedgerStep::Applied { unit_id: unit.id().to_string() };
            if !self.ledger.record_progress(tenant, &lease.owner, &step, status, self.clock.now())? {
                warn!("apply:lease_lost tenant={} unit={} (result discarded)", tenant, unit.id());
                return Err(MigrationError::LeaseLost(tenant.clone()));
            }
            progress.units.push(unit.id().to_string());
            progress.to = Some(unit.id().to_string());
        }

        Ok(format!("applied {} unit(s) on {}: {} -> {}",
                   total,
                   tenant,
                   progress.from.as_deref().unwrap_or("<none>"),
                   progress.to.as_deref().unwrap_or("<none>")))
    }

    // ------------------------------------------------------------------
    // rollback
    // ------------------------------------------------------------------

    /// Revierte exactamente la última unidad aplicada.
    pub fn rollback_last(&self, tenant: &TenantId) -> MigrationResult {
        self.rollback_last_with_cancel(tenant, &CancelFlag::never())
    }

    pub fn rollback_last_with_cancel(&self, tenant: &TenantId, cancel: &CancelFlag) -> MigrationResult {
        let mut progress = Progress::default();
        match self.run_rollback(tenant, cancel, &mut progress) {
            Ok(message) => {
                info!("rollback:done tenant={} from={:?} to={:?}", tenant, progress.from, progress.to);
                MigrationResult::ok(tenant.clone(), message, progress.units, progress.from, progress.to)
            }
            Err(e) => {
                debug!("rollback:failed tenant={} kind={:?} err={}", tenant, e.kind(), e);
                MigrationResult::failed(tenant.clone(), &e, progress.units, progress.from, progress.to)
            }
        }
    }

    fn run_rollback(&self, tenant: &TenantId, cancel: &CancelFlag, progress: &mut Progress) -> Result<String, MigrationError> {
        self.require_tenant(tenant)?;
        self.ledger.ensure_entry(tenant, self.clock.now())?;

        let lease = self.acquire(tenant)?;
        let entry = self.read_entry(tenant)?;
        let last = entry.last_applied_unit
                        .ok_or_else(|| MigrationError::NoMigrationToRollback(tenant.clone()))?;
        let unit = self.registry
                       .get(&last)
                       .cloned()
                       .ok_or_else(|| MigrationError::UnknownUnit(last.clone()))?;
        progress.from = Some(last.clone());
        progress.to = Some(last.clone());

        let handle = self.resolver.resolve(tenant)?;
        if cancel.is_cancelled() {
            let detail = format!("cancelled before unit {last}");
            self.record_failure(&lease, &detail)?;
            return Err(MigrationError::Cancelled { tenant: tenant.clone(), detail });
        }
        self.renew(&lease)?;
        self.mark(&lease, MigrationStatus::RollingBack)?;
        debug!("rollback:start tenant={} owner={} unit={}", tenant, lease.owner, last);

        let mut session = handle.lock();
        if let Err(reason) = run_unit(|| unit.revert(&mut **session)) {
            error!("rollback:unit_failed tenant={} unit={} reason={}", tenant, last, reason);
            self.resolver.invalidate(tenant);
            self.record_failure(&lease, &format!("revert of unit {last} failed: {reason}"))?;
            return Err(MigrationError::UnitExecutionFailed { tenant: tenant.clone(), unit: last, reason });
        }

        let previous = self.registry.previous(&last).map(str::to_string);
        let step = LedgerStep::Reverted { unit_id: last.clone(), previous: previous.clone() };
        if !self.ledger
                .record_progress(tenant, &lease.owner, &step, MigrationStatus::RolledBack, self.clock.now())?
        {
            warn!("rollback:lease_lost tenant={} unit={} (result discarded)", tenant, last);
            return Err(MigrationError::LeaseLost(tenant.clone()));
        }
        progress.units.push(last.clone());
        progress.to = previous.clone();
        Ok(format!("rolled back {} on {}; last applied is now {}",
                   last,
                   tenant,
                   previous.as_deref().unwrap_or("<none>")))
    }

    // ------------------------------------------------------------------
    // force remove
    // ------------------------------------------------------------------

    /// Borra `unit_id` del historial de la sucursal sin invocar `revert`.
    ///
    /// Sólo corrige la contabilidad del ledger (por ejemplo, una unidad que
    /// se eliminó del registro después de publicarse). El esquema de la
    /// sucursal queda como esté.
    pub fn force_remove(&self, tenant: &TenantId, unit_id: &str) -> MigrationResult {
        let mut progress = Progress::default();
        match self.run_force_remove(tenant, unit_id, &mut progress) {
            Ok(message) => MigrationResult::ok(tenant.clone(), message, progress.units, progress.from, progress.to),
            Err(e) => MigrationResult::failed(tenant.clone(), &e, progress.units, progress.from, progress.to),
        }
    }

    fn run_force_remove(&self, tenant: &TenantId, unit_id: &str, progress: &mut Progress) -> Result<String, MigrationError> {
        self.require_tenant(tenant)?;
        self.ledger.ensure_entry(tenant, self.clock.now())?;

        let lease = self.acquire(tenant)?;
        let entry = self.read_entry(tenant)?;
        let not_applied = || MigrationError::UnitNotApplied { tenant: tenant.clone(), unit: unit_id.to_string() };
        let last = entry.last_applied_unit.ok_or_else(not_applied)?;
        if unit_id > last.as_str() {
            return Err(not_applied());
        }
        if unit_id != last {
            let recorded = self.ledger.history(tenant)?.iter().any(|r| r.unit_id == unit_id);
            if !recorded {
                return Err(not_applied());
            }
        }

        let new_last = if unit_id == last {
            self.registry.previous(unit_id).map(str::to_string)
        } else {
            Some(last.clone())
        };
        warn!("FORCE-REMOVE tenant={} unit={} owner={} last_applied {:?} -> {:?}; revert NOT invoked",
              tenant, unit_id, lease.owner, last, new_last);

        let step = LedgerStep::Erased { unit_id: unit_id.to_string(), last_applied: new_last.clone() };
        if !self.ledger
                .record_progress(tenant, &lease.owner, &step, MigrationStatus::Idle, self.clock.now())?
        {
            return Err(MigrationError::LeaseLost(tenant.clone()));
        }
        progress.units.push(unit_id.to_string());
        progress.from = Some(last);
        progress.to = new_last;
        Ok(format!("force-removed {unit_id} from {tenant} without revert"))
    }

    // ------------------------------------------------------------------
    // fan-out
    // ------------------------------------------------------------------

    pub fn apply_all(&self) -> BulkMigrationResult {
        self.fan_out("apply_all", |tenant| self.apply(tenant, None))
    }

    pub fn rollback_all(&self) -> BulkMigrationResult {
        self.fan_out("rollback_all", |tenant| self.rollback_last(tenant))
    }

    /// `force_remove` en todas las sucursales; donde la unidad no está
    /// aplicada se reporta como omitida con éxito.
    pub fn force_remove_all(&self, unit_id: &str) -> BulkMigrationResult {
        self.fan_out("force_remove_all", |tenant| {
                let result = self.force_remove(tenant, unit_id);
                if result.error == Some(MigrationErrorKind::UnitNotApplied) {
                    return MigrationResult::ok(tenant.clone(),
                                               format!("skipped: {unit_id} is not applied on {tenant}"),
                                               Vec::new(),
                                               None,
                                               None);
                }
                result
            })
    }

    fn fan_out<F>(&self, operation: &str, op: F) -> BulkMigrationResult
        where F: Fn(&TenantId) -> MigrationResult + Sync + Send
    {
        let tenants = match self.catalog.list() {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("{}:catalog_failed err={}", operation, e);
                return BulkMigrationResult::aborted(operation, &e.to_string());
            }
        };
        let results: Vec<MigrationResult> = tenants.par_iter().map(|d| op(&d.id)).collect();
        let bulk = BulkMigrationResult::from_results(operation, results);
        info!("{}", bulk.message);
        bulk
    }

    // ------------------------------------------------------------------
    // consultas
    // ------------------------------------------------------------------

    /// Unidades pendientes según el ledger; no toma el lock.
    pub fn pending(&self, tenant: &TenantId) -> Result<Vec<String>, MigrationError> {
        self.require_tenant(tenant)?;
        let last = self.ledger.read(tenant)?.and_then(|e| e.last_applied_unit);
        Ok(self.registry.pending_ids(last.as_deref()))
    }

    pub fn history(&self, tenant: &TenantId) -> Result<TenantHistory, MigrationError> {
        self.require_tenant(tenant)?;
        let entry = self.ledger.read(tenant)?.unwrap_or_else(|| LedgerEntry::new(tenant.clone()));
        let applied = self.ledger.history(tenant)?;
        let pending = self.registry.pending_ids(entry.last_applied_unit.as_deref());
        Ok(TenantHistory { entry, applied, pending })
    }

    /// Chequeo estructural barato: coherencia del ledger con el registro y
    /// una ida y vuelta por la conexión.
    pub fn validate(&self, tenant: &TenantId) -> SchemaCheck {
        let mut issues = Vec::new();
        if let Err(e) = self.collect_issues(tenant, &mut issues) {
            issues.push(e.to_string());
        }
        if !issues.is_empty() {
            warn!("validate:issues tenant={} issues={:?}", tenant, issues);
        }
        SchemaCheck { tenant_id: tenant.clone(),
                      valid: issues.is_empty(),
                      issues }
    }

    fn collect_issues(&self, tenant: &TenantId, issues: &mut Vec<String>) -> Result<(), MigrationError> {
        self.require_tenant(tenant)?;
        let last = self.ledger.read(tenant)?.and_then(|e| e.last_applied_unit);
        if let Some(last) = &last {
            if !self.registry.contains(last) {
                issues.push(format!("last applied unit {last} is not registered"));
            }
        }
        for record in self.ledger.history(tenant)? {
            if last.as_deref().map_or(true, |l| record.unit_id.as_str() > l) {
                issues.push(format!("history row {} is beyond last applied {}",
                                    record.unit_id,
                                    last.as_deref().unwrap_or("<none>")));
            }
        }

        let handle = self.resolver.resolve(tenant)?;
        match handle.try_lock_for(VALIDATE_SESSION_WAIT) {
            Some(mut session) => {
                if let Err(e) = session.ping() {
                    self.resolver.invalidate(tenant);
                    issues.push(format!("connection round-trip failed: {e}"));
                }
            }
            None => issues.push("connection busy with another operation".to_string()),
        }
        Ok(())
    }

    /// Estado de todas las sucursales del catálogo.
    pub fn status(&self) -> Result<Vec<TenantMigrationStatus>, MigrationError> {
        let now = self.clock.now();
        let tenants = self.catalog.list()?;
        let mut rows = Vec::with_capacity(tenants.len());
        for descriptor in tenants {
            let entry = self.ledger
                            .read(&descriptor.id)?
                            .unwrap_or_else(|| LedgerEntry::new(descriptor.id.clone()));
            rows.push(self.status_row(descriptor, entry, now));
        }
        Ok(rows)
    }

    fn status_row(&self,
                  descriptor: TenantDescriptor,
                  entry: LedgerEntry,
                  now: chrono::DateTime<chrono::Utc>)
                  -> TenantMigrationStatus {
        let locked = entry.is_locked_at(now);
        let pending_count = self.registry.pending(entry.last_applied_unit.as_deref(), None).len();
        TenantMigrationStatus { tenant_id: descriptor.id,
                                code: descriptor.code,
                                name: descriptor.name,
                                engine: descriptor.engine,
                                last_applied_unit: entry.last_applied_unit,
                                status: entry.status,
                                last_attempt_at: entry.last_attempt_at,
                                retry_count: entry.retry_count,
                                error_detail: entry.error_detail,
                                locked,
                                lock_owner: entry.lock_owner,
                                lock_expires_at: entry.lock_expires_at,
                                pending_count }
    }

    // ------------------------------------------------------------------
    // reconciliación
    // ------------------------------------------------------------------

    /// Revisa el ledger al arrancar.
    ///
    /// Los locks vivos no se tocan nunca: expiran solos. Las entradas que
    /// quedaron en `Applying`/`RollingBack` sin lease vivo se toman con el CAS
    /// normal y se marcan `Failed`.
    pub fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let now = self.clock.now();
        let entries = match self.ledger.list() {
            Ok(entries) => entries,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        for entry in entries {
            if entry.is_locked_at(now) {
                let owner = entry.lock_owner.clone().unwrap_or_default();
                let local = self.active.contains_key(&owner);
                debug!("reconcile:live_lock tenant={} owner={} local={}", entry.tenant_id, owner, local);
                report.live_locks.push(LiveLock { tenant_id: entry.tenant_id,
                                                  owner,
                                                  expires_at: entry.lock_expires_at,
                                                  local });
                continue;
            }
            if !entry.is_in_flight() {
                continue;
            }
            match self.mark_interrupted(&entry.tenant_id) {
                Ok(true) => report.interrupted.push(entry.tenant_id),
                Ok(false) => {}
                Err(e) => report.errors.push(format!("{}: {}", entry.tenant_id, e)),
            }
        }
        if !report.interrupted.is_empty() {
            warn!("reconcile:interrupted tenants={:?}", report.interrupted);
        }
        report
    }

    fn mark_interrupted(&self, tenant: &TenantId) -> Result<bool, MigrationError> {
        let lease = self.acquire(tenant)?;
        // otro proceso pudo corregir la fila entre el listado y el CAS
        if !self.read_entry(tenant)?.is_in_flight() {
            return Ok(false);
        }
        self.record_failure(&lease, INTERRUPTED_DETAIL)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    fn require_tenant(&self, tenant: &TenantId) -> Result<TenantDescriptor, MigrationError> {
        self.catalog
            .get(tenant)?
            .ok_or_else(|| MigrationError::TenantNotFound(tenant.clone()))
    }

    fn read_entry(&self, tenant: &TenantId) -> Result<LedgerEntry, MigrationError> {
        Ok(self.ledger
               .read(tenant)?
               .ok_or_else(|| StoreError::MissingEntry(tenant.to_string()))?)
    }

    fn acquire(&self, tenant: &TenantId) -> Result<LeaseGuard<'_>, MigrationError> {
        let owner = format!("{}/{}", self.settings.instance_id, Uuid::new_v4());
        let now = self.clock.now();
        if !self.ledger.try_acquire_lock(tenant, &owner, now + self.settings.lease, now)? {
            let (holder, expires_at) = match self.ledger.read(tenant)? {
                Some(entry) => (entry.lock_owner.unwrap_or_default(), entry.lock_expires_at),
                None => (String::new(), None),
            };
            warn!("lease:held tenant={} holder={} expires_at={:?}", tenant, holder, expires_at);
            return Err(MigrationError::LockHeld { tenant: tenant.clone(), owner: holder, expires_at });
        }
        self.active.insert(owner.clone(), tenant.clone());
        debug!("lease:acquired tenant={} owner={}", tenant, owner);
        Ok(LeaseGuard { orchestrator: self,
                        tenant: tenant.clone(),
                        owner })
    }

    fn renew(&self, lease: &LeaseGuard<'_>) -> Result<(), MigrationError> {
        let expires_at = self.clock.now() + self.settings.lease;
        if !self.ledger.renew_lock(&lease.tenant, &lease.owner, expires_at)? {
            warn!("lease:lost tenant={} owner={}", lease.tenant, lease.owner);
            return Err(MigrationError::LeaseLost(lease.tenant.clone()));
        }
        Ok(())
    }

    fn mark(&self, lease: &LeaseGuard<'_>, status: MigrationStatus) -> Result<(), MigrationError> {
        if !self.ledger.mark_status(&lease.tenant, &lease.owner, status, self.clock.now())? {
            return Err(MigrationError::LeaseLost(lease.tenant.clone()));
        }
        Ok(())
    }

    /// Registra un fallo. Si el lease ya no es propio el fallo no se escribe
    /// (el nuevo dueño manda) y sólo queda en el log.
    fn record_failure(&self, lease: &LeaseGuard<'_>, detail: &str) -> Result<(), MigrationError> {
        let written =
            self.ledger
                .record_failure(&lease.tenant, &lease.owner, MigrationStatus::Failed, detail, self.clock.now())?;
        if !written {
            warn!("ledger:failure_not_recorded tenant={} owner={} detail={}", lease.tenant, lease.owner, detail);
        }
        Ok(())
    }
}

/// Ejecuta una unidad convirtiendo errores y pánicos en un motivo legible.
fn run_unit<F>(f: F) -> Result<(), String>
    where F: FnOnce() -> Result<(), UnitError>
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "core_tests.rs"]
mod tests;
