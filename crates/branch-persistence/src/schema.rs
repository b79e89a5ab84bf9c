//! Esquema Diesel del plano de control (escrito a mano, espejo de
//! `migrations/`). Reemplazable con `diesel print-schema`.

diesel::table! {
    tenants (tenant_id) {
        tenant_id -> Text,
        code -> Text,
        name -> Text,
        engine -> Text,
        host -> Nullable<Text>,
        port -> Nullable<Integer>,
        database_name -> Nullable<Text>,
        file_path -> Nullable<Text>,
        username -> Nullable<Text>,
        password -> Nullable<Text>,
        tls_enabled -> Bool,
        trust_server_certificate -> Bool,
        params -> Text,
        revision -> BigInt,
        updated_at_ms -> BigInt,
    }
}

diesel::table! {
    migration_ledger (tenant_id) {
        tenant_id -> Text,
        last_applied_unit -> Nullable<Text>,
        status -> Text,
        last_attempt_at_ms -> Nullable<BigInt>,
        retry_count -> Integer,
        error_detail -> Nullable<Text>,
        lock_owner -> Nullable<Text>,
        lock_expires_at_ms -> Nullable<BigInt>,
        created_at_ms -> BigInt,
    }
}

diesel::table! {
    migration_history (tenant_id, unit_id) {
        tenant_id -> Text,
        unit_id -> Text,
        applied_at_ms -> BigInt,
    }
}

diesel::table! {
    accounts (account_id) {
        account_id -> Text,
        login -> Text,
        password_hash -> Text,
        display_name -> Text,
        created_at_ms -> BigInt,
    }
}

diesel::table! {
    account_assignments (account_id, tenant_id) {
        account_id -> Text,
        tenant_id -> Text,
        privilege_level -> Integer,
        assigned_at_ms -> BigInt,
    }
}

diesel::joinable!(migration_history -> migration_ledger (tenant_id));
diesel::joinable!(account_assignments -> accounts (account_id));

diesel::allow_tables_to_appear_in_same_query!(
    tenants,
    migration_ledger,
    migration_history,
    accounts,
    account_assignments,
);
