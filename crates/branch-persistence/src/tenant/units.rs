//! Esquema base de las bases de sucursal (retail).
//!
//! Las unidades usan SQL portable; la única diferencia entre motores es la
//! columna identidad, que se resuelve con un override para Postgres.

use std::sync::Arc;

use branch_core::{EngineKind, MigrationRegistry, MigrationUnit, RegistryError, SqlUnit};

const IDENTITY_SQLITE: &str = "INTEGER PRIMARY KEY AUTOINCREMENT";
const IDENTITY_POSTGRES: &str = "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY";

fn unit(id: &str, description: &str, up: &str, down: &str) -> Arc<dyn MigrationUnit> {
    let sqlite_up = up.replace("{identity}", IDENTITY_SQLITE);
    let postgres_up = up.replace("{identity}", IDENTITY_POSTGRES);
    Arc::new(SqlUnit::new(id, &sqlite_up, down).describe(description)
                                               .for_engine(EngineKind::Postgres, &postgres_up, down))
}

/// Unidades del esquema de sucursal, en orden.
pub fn retail_units() -> Vec<Arc<dyn MigrationUnit>> {
    vec![unit("20240110_0001_reference_tables",
              "payment methods, tax rates and units of measure",
              "CREATE TABLE payment_methods (
                   code   TEXT PRIMARY KEY,
                   name   TEXT NOT NULL,
                   active BOOLEAN NOT NULL DEFAULT TRUE
               );
               CREATE TABLE tax_rates (
                   code TEXT PRIMARY KEY,
                   name TEXT NOT NULL,
                   rate NUMERIC(6,4) NOT NULL
               );
               CREATE TABLE units_of_measure (
                   code TEXT PRIMARY KEY,
                   name TEXT NOT NULL
               );",
              "DROP TABLE units_of_measure; DROP TABLE tax_rates; DROP TABLE payment_methods;"),
         unit("20240110_0002_customers",
              "customer directory",
              "CREATE TABLE customers (
                   id         {identity},
                   code       TEXT NOT NULL UNIQUE,
                   name       TEXT NOT NULL,
                   tax_id     TEXT,
                   email      TEXT,
                   phone      TEXT,
                   created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
               );",
              "DROP TABLE customers;"),
         unit("20240115_0001_inventory",
              "products and stock levels",
              "CREATE TABLE products (
                   id        {identity},
                   sku       TEXT NOT NULL UNIQUE,
                   name      TEXT NOT NULL,
                   unit_code TEXT NOT NULL REFERENCES units_of_measure (code),
                   tax_code  TEXT NOT NULL REFERENCES tax_rates (code),
                   price     NUMERIC(12,2) NOT NULL DEFAULT 0
               );
               CREATE TABLE stock_levels (
                   product_id BIGINT PRIMARY KEY REFERENCES products (id) ON DELETE CASCADE,
                   quantity   NUMERIC(12,3) NOT NULL DEFAULT 0,
                   updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
               );",
              "DROP TABLE stock_levels; DROP TABLE products;"),
         unit("20240120_0001_sales",
              "sales and sale lines",
              "CREATE TABLE sales (
                   id           {identity},
                   customer_id  BIGINT REFERENCES customers (id),
                   payment_code TEXT NOT NULL REFERENCES payment_methods (code),
                   total        NUMERIC(12,2) NOT NULL DEFAULT 0,
                   sold_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
               );
               CREATE TABLE sale_lines (
                   id         {identity},
                   sale_id    BIGINT NOT NULL REFERENCES sales (id) ON DELETE CASCADE,
                   product_id BIGINT NOT NULL REFERENCES products (id),
                   quantity   NUMERIC(12,3) NOT NULL,
                   unit_price NUMERIC(12,2) NOT NULL
               );
               CREATE INDEX idx_sale_lines_sale ON sale_lines (sale_id);",
              "DROP INDEX idx_sale_lines_sale; DROP TABLE sale_lines; DROP TABLE sales;"),
         unit("20240125_0001_invoices",
              "fiscal invoices issued for sales",
              "CREATE TABLE invoices (
                   id        {identity},
                   sale_id   BIGINT NOT NULL UNIQUE REFERENCES sales (id),
                   folio     TEXT NOT NULL UNIQUE,
                   status    TEXT NOT NULL DEFAULT 'issued',
                   issued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
               );",
              "DROP TABLE invoices;"),
         unit("20240201_0001_deliveries",
              "home deliveries",
              "CREATE TABLE deliveries (
                   id            {identity},
                   sale_id       BIGINT NOT NULL REFERENCES sales (id),
                   address       TEXT NOT NULL,
                   status        TEXT NOT NULL DEFAULT 'pending',
                   scheduled_for TIMESTAMP,
                   delivered_at  TIMESTAMP
               );",
              "DROP TABLE deliveries;"),
         unit("20240215_0001_customer_loyalty",
              "loyalty points per customer",
              "ALTER TABLE customers ADD COLUMN loyalty_points INTEGER NOT NULL DEFAULT 0;",
              "ALTER TABLE customers DROP COLUMN loyalty_points;"),]
}

/// Registro compilado con el esquema de sucursal.
pub fn retail_registry() -> Result<MigrationRegistry, RegistryError> {
    MigrationRegistry::new(retail_units())
}
