//! Cuenta privilegiada por defecto (`accounts` + `account_assignments`).

use branch_core::{AccountBootstrapper, BootstrapReport, PrivilegeLevel, StoreError, TenantId};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{with_retry, PersistenceError};
use crate::pool::{on_conn, ControlPool};
use crate::schema::{account_assignments, accounts};

/// Datos de la cuenta por defecto (desde configuración).
#[derive(Clone, PartialEq, Eq)]
pub struct DefaultAccount {
    pub login: String,
    pub display_name: String,
    /// Si falta, se genera una contraseña al crear la cuenta.
    pub password: Option<String>,
}

impl std::fmt::Debug for DefaultAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultAccount")
         .field("login", &self.login)
         .field("display_name", &self.display_name)
         .field("password", &self.password.as_ref().map(|_| "***"))
         .finish()
    }
}

impl Default for DefaultAccount {
    fn default() -> Self {
        Self { login: "admin".into(),
               display_name: "Administrator".into(),
               password: None }
    }
}

/// Hash `sha256$<salt>$<hex>` con sal aleatoria.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("sha256${salt}${}", digest(&salt, password))
}

pub fn verify_password(stored: &str, candidate: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sha256"), Some(salt), Some(hex)) => digest(salt, candidate) == hex,
        _ => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Insertable, Debug)]
#[diesel(table_name = accounts)]
struct NewAccount<'a> {
    account_id: &'a str,
    login: &'a str,
    password_hash: &'a str,
    display_name: &'a str,
    created_at_ms: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = account_assignments)]
struct NewAssignment<'a> {
    account_id: &'a str,
    tenant_id: &'a str,
    privilege_level: i32,
    assigned_at_ms: i64,
}

pub struct DieselAccountBootstrapper {
    pool: ControlPool,
    account: DefaultAccount,
}

impl DieselAccountBootstrapper {
    pub fn new(pool: ControlPool, account: DefaultAccount) -> Self {
        Self { pool, account }
    }

    /// Nivel asignado a la cuenta en una sucursal, si existe la asignación.
    pub fn privilege_of(&self, login: &str, tenant: &TenantId) -> Result<Option<PrivilegeLevel>, StoreError> {
        let level: Option<i32> = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(account_assignments::table.inner_join(accounts::table)
                                             .filter(accounts::login.eq(login))
                                             .filter(account_assignments::tenant_id.eq(tenant.as_str()))
                                             .select(account_assignments::privilege_level)
                                             .first::<i32>(conn)
                                             .optional()?)
            })
        })?;
        level.map(|l| PrivilegeLevel::from_i32(l).ok_or_else(|| StoreError::Corrupt(format!("privilege_level={l}"))))
             .transpose()
    }

    /// Hash guardado para un login (para verificación).
    pub fn password_hash(&self, login: &str) -> Result<Option<String>, StoreError> {
        Ok(with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(accounts::table.filter(accounts::login.eq(login))
                                  .select(accounts::password_hash)
                                  .first::<String>(conn)
                                  .optional()?)
            })
        })?)
    }
}

impl AccountBootstrapper for DieselAccountBootstrapper {
    fn ensure_default_account(&self, tenant: &TenantId) -> Result<BootstrapReport, StoreError> {
        let privilege = PrivilegeLevel::HIGHEST;
        let report = with_retry(|| {
            let generated = self.account.password.is_none();
            let password = self.account
                               .password
                               .clone()
                               .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let candidate_id = Uuid::new_v4().to_string();
            let hash = hash_password(&password);
            let now_ms = Utc::now().timestamp_millis();
            on_conn!(&self.pool, conn => {
                conn.transaction::<BootstrapReport, PersistenceError, _>(|tx| {
                    let created = diesel::insert_into(accounts::table)
                        .values(NewAccount { account_id: &candidate_id,
                                             login: &self.account.login,
                                             password_hash: &hash,
                                             display_name: &self.account.display_name,
                                             created_at_ms: now_ms })
                        .on_conflict_do_nothing()
                        .execute(tx)?;
                    let account_id: String = accounts::table.filter(accounts::login.eq(&self.account.login))
                                                            .select(accounts::account_id)
                                                            .first(tx)?;
                    let assigned = diesel::insert_into(account_assignments::table)
                        .values(NewAssignment { account_id: &account_id,
                                                tenant_id: tenant.as_str(),
                                                privilege_level: privilege.as_i32(),
                                                assigned_at_ms: now_ms })
                        .on_conflict_do_nothing()
                        .execute(tx)?;
                    Ok(BootstrapReport { account_id,
                                         login: self.account.login.clone(),
                                         account_created: created == 1,
                                         assignment_created: assigned == 1,
                                         privilege,
                                         initial_password: (created == 1 && generated).then(|| password.clone()) })
                })
            })
        })?;
        if report.account_created || report.assignment_created {
            info!("accounts:bootstrap tenant={} login={} account_created={} assignment_created={}",
                  tenant,
                  report.login,
                  report.account_created,
                  report.assignment_created);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip() {
        let stored = hash_password("s3cr3t");
        assert!(stored.starts_with("sha256$"));
        assert!(verify_password(&stored, "s3cr3t"));
        assert!(!verify_password(&stored, "other"));
        assert!(!verify_password("plain", "plain"));
        // sal distinta en cada hash
        assert_ne!(hash_password("s3cr3t"), stored);
    }

    #[test]
    fn default_account_debug_redacts_password() {
        let account = DefaultAccount { password: Some("hunter2".into()), ..DefaultAccount::default() };
        assert!(!format!("{account:?}").contains("hunter2"));
    }
}
