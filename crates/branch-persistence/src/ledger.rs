//! `MigrationLedger` sobre las tablas `migration_ledger` y
//! `migration_history`.
//!
//! El CAS del lock es un único `UPDATE` condicional (libre o vencido); las
//! escrituras con dueño filtran por `lock_owner = owner`. Un `UPDATE` que no
//! toca filas se desambigua con una lectura: fila ausente → `MissingEntry`,
//! fila presente → el lease no es propio.

use branch_core::{AppliedUnitRecord, LedgerEntry, LedgerStep, MigrationLedger, MigrationStatus, StoreError, TenantId};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;

use crate::error::{with_retry, PersistenceError};
use crate::pool::{from_ms, ms_now, on_conn, ControlPool};
use crate::schema::{migration_history, migration_ledger};

#[derive(Queryable, Debug)]
struct LedgerRow {
    tenant_id: String,
    last_applied_unit: Option<String>,
    status: String,
    last_attempt_at_ms: Option<i64>,
    retry_count: i32,
    error_detail: Option<String>,
    lock_owner: Option<String>,
    lock_expires_at_ms: Option<i64>,
    #[allow(dead_code)]
    created_at_ms: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = migration_ledger)]
struct NewLedgerRow<'a> {
    tenant_id: &'a str,
    status: &'a str,
    retry_count: i32,
    created_at_ms: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = migration_history)]
struct NewHistoryRow<'a> {
    tenant_id: &'a str,
    unit_id: &'a str,
    applied_at_ms: i64,
}

impl LedgerRow {
    fn into_entry(self) -> Result<LedgerEntry, PersistenceError> {
        let tenant_id = TenantId::parse(&self.tenant_id).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        let status = MigrationStatus::parse(&self.status).ok_or_else(|| {
                                                              PersistenceError::Corrupt(format!("status={}",
                                                                                                self.status))
                                                          })?;
        Ok(LedgerEntry { tenant_id,
                         last_applied_unit: self.last_applied_unit,
                         status,
                         last_attempt_at: self.last_attempt_at_ms
                                              .map(|ms| from_ms(ms, "last_attempt_at_ms"))
                                              .transpose()?,
                         retry_count: u32::try_from(self.retry_count).unwrap_or(0),
                         error_detail: self.error_detail,
                         lock_owner: self.lock_owner,
                         lock_expires_at: self.lock_expires_at_ms
                                              .map(|ms| from_ms(ms, "lock_expires_at_ms"))
                                              .transpose()?, })
    }
}

/// Ledger durable en el plano de control (PostgreSQL o SQLite).
#[derive(Clone, Debug)]
pub struct DieselLedger {
    pool: ControlPool,
}

impl DieselLedger {
    pub fn new(pool: ControlPool) -> Self {
        Self { pool }
    }

    fn read_row(&self, tenant: &TenantId) -> Result<Option<LedgerEntry>, PersistenceError> {
        let row: Option<LedgerRow> = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(migration_ledger::table.find(tenant.as_str()).first::<LedgerRow>(conn).optional()?)
            })
        })?;
        row.map(LedgerRow::into_entry).transpose()
    }

    /// Interpreta un `UPDATE` con dueño: 1 fila → `true`; 0 filas → `false`
    /// si la fila existe, `MissingEntry` si no.
    fn owned_outcome(&self, tenant: &TenantId, updated: usize) -> Result<bool, StoreError> {
        if updated > 0 {
            return Ok(true);
        }
        match self.read_row(tenant)? {
            Some(_) => Ok(false),
            None => Err(StoreError::MissingEntry(tenant.to_string())),
        }
    }
}

impl MigrationLedger for DieselLedger {
    fn ensure_entry(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<LedgerEntry, StoreError> {
        with_retry(|| {
            on_conn!(&self.pool, conn => {
                diesel::insert_into(migration_ledger::table)
                    .values(NewLedgerRow { tenant_id: tenant.as_str(),
                                           status: MigrationStatus::Idle.as_str(),
                                           retry_count: 0,
                                           created_at_ms: ms_now(now) })
                    .on_conflict_do_nothing()
                    .execute(conn)?;
                Ok(())
            })
        })?;
        self.read_row(tenant)?
            .ok_or_else(|| StoreError::MissingEntry(tenant.to_string()))
    }

    fn read(&self, tenant: &TenantId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.read_row(tenant)?)
    }

    fn list(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<LedgerRow> = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(migration_ledger::table.order(migration_ledger::tenant_id.asc()).load::<LedgerRow>(conn)?)
            })
        })?;
        Ok(rows.into_iter().map(LedgerRow::into_entry).collect::<Result<Vec<_>, _>>()?)
    }

    fn history(&self, tenant: &TenantId) -> Result<Vec<AppliedUnitRecord>, StoreError> {
        let rows: Vec<(String, i64)> = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(migration_history::table.filter(migration_history::tenant_id.eq(tenant.as_str()))
                                           .select((migration_history::unit_id, migration_history::applied_at_ms))
                                           .order(migration_history::unit_id.asc())
                                           .load::<(String, i64)>(conn)?)
            })
        })?;
        let mut out = Vec::with_capacity(rows.len());
        for (unit_id, ms) in rows {
            out.push(AppliedUnitRecord { unit_id, applied_at: from_ms(ms, "applied_at_ms")? });
        }
        Ok(out)
    }

    fn try_acquire_lock(&self,
                        tenant: &TenantId,
                        owner: &str,
                        expires_at: DateTime<Utc>,
                        now: DateTime<Utc>)
                        -> Result<bool, StoreError> {
        use crate::schema::migration_ledger::dsl::*;
        let now_ms = ms_now(now);
        let updated = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(diesel::update(migration_ledger.filter(tenant_id.eq(tenant.as_str()))
                                                  .filter(lock_owner.is_null().or(lock_expires_at_ms.lt(now_ms))))
                    .set((lock_owner.eq(owner), lock_expires_at_ms.eq(ms_now(expires_at))))
                    .execute(conn)?)
            })
        })?;
        debug!("ledger:acquire tenant={} owner={} acquired={}", tenant, owner, updated == 1);
        self.owned_outcome(tenant, updated)
    }

    fn renew_lock(&self, tenant: &TenantId, owner: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        use crate::schema::migration_ledger::dsl::*;
        let updated = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(diesel::update(migration_ledger.filter(tenant_id.eq(tenant.as_str())).filter(lock_owner.eq(owner)))
                    .set(lock_expires_at_ms.eq(ms_now(expires_at)))
                    .execute(conn)?)
            })
        })?;
        self.owned_outcome(tenant, updated)
    }

    fn release_lock(&self, tenant: &TenantId, owner: &str) -> Result<bool, StoreError> {
        use crate::schema::migration_ledger::dsl::*;
        let updated = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(diesel::update(migration_ledger.filter(tenant_id.eq(tenant.as_str())).filter(lock_owner.eq(owner)))
                    .set((lock_owner.eq(None::<String>), lock_expires_at_ms.eq(None::<i64>)))
                    .execute(conn)?)
            })
        })?;
        self.owned_outcome(tenant, updated)
    }

    fn mark_status(&self,
                   tenant: &TenantId,
                   owner: &str,
                   new_status: MigrationStatus,
                   now: DateTime<Utc>)
                   -> Result<bool, StoreError> {
        use crate::schema::migration_ledger::dsl::*;
        let updated = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(diesel::update(migration_ledger.filter(tenant_id.eq(tenant.as_str())).filter(lock_owner.eq(owner)))
                    .set((status.eq(new_status.as_str()), last_attempt_at_ms.eq(Some(ms_now(now)))))
                    .execute(conn)?)
            })
        })?;
        self.owned_outcome(tenant, updated)
    }

    fn record_progress(&self,
                       tenant: &TenantId,
                       owner: &str,
                       step: &LedgerStep,
                       new_status: MigrationStatus,
                       now: DateTime<Utc>)
                       -> Result<bool, StoreError> {
        use crate::schema::migration_ledger::dsl::*;
        let now_ms = ms_now(now);
        let updated = with_retry(|| {
            on_conn!(&self.pool, conn => {
                conn.transaction::<usize, PersistenceError, _>(|tx| {
                    let updated = diesel::update(migration_ledger.filter(tenant_id.eq(tenant.as_str()))
                                                                 .filter(lock_owner.eq(owner)))
                        .set((last_applied_unit.eq(step.last_applied_after()),
                              status.eq(new_status.as_str()),
                              last_attempt_at_ms.eq(Some(now_ms)),
                              retry_count.eq(0),
                              error_detail.eq(None::<String>)))
                        .execute(tx)?;
                    if updated == 0 {
                        return Ok(0);
                    }
                    let history_row = migration_history::table
                        .filter(migration_history::tenant_id.eq(tenant.as_str()))
                        .filter(migration_history::unit_id.eq(step.unit_id()));
                    diesel::delete(history_row).execute(tx)?;
                    if let LedgerStep::Applied { unit_id } = step {
                        diesel::insert_into(migration_history::table)
                            .values(NewHistoryRow { tenant_id: tenant.as_str(), unit_id, applied_at_ms: now_ms })
                            .execute(tx)?;
                    }
                    Ok(updated)
                })
            })
        })?;
        debug!("ledger:progress tenant={} owner={} unit={} status={} written={}",
               tenant,
               owner,
               step.unit_id(),
               new_status,
               updated > 0);
        self.owned_outcome(tenant, updated)
    }

    fn record_failure(&self,
                      tenant: &TenantId,
                      owner: &str,
                      new_status: MigrationStatus,
                      detail: &str,
                      now: DateTime<Utc>)
                      -> Result<bool, StoreError> {
        use crate::schema::migration_ledger::dsl::*;
        let updated = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(diesel::update(migration_ledger.filter(tenant_id.eq(tenant.as_str())).filter(lock_owner.eq(owner)))
                    .set((status.eq(new_status.as_str()),
                          last_attempt_at_ms.eq(Some(ms_now(now))),
                          retry_count.eq(retry_count + 1),
                          error_detail.eq(Some(detail))))
                    .execute(conn)?)
            })
        })?;
        self.owned_outcome(tenant, updated)
    }

    fn clear_failure(&self, tenant: &TenantId, owner: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        use crate::schema::migration_ledger::dsl::*;
        let updated = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(diesel::update(migration_ledger.filter(tenant_id.eq(tenant.as_str())).filter(lock_owner.eq(owner)))
                    .set((status.eq(MigrationStatus::Succeeded.as_str()),
                          last_attempt_at_ms.eq(Some(ms_now(now))),
                          retry_count.eq(0),
                          error_detail.eq(None::<String>)))
                    .execute(conn)?)
            })
        })?;
        self.owned_outcome(tenant, updated)
    }
}
