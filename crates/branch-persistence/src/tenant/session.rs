use branch_core::{EngineKind, SessionError, TenantSession};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::sqlite::SqliteConnection;

#[derive(QueryableByName, Debug)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

/// Conexión viva a la base de una sucursal.
pub enum DieselSession {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

fn query_err(e: diesel::result::Error) -> SessionError {
    SessionError::Query(e.to_string())
}

impl TenantSession for DieselSession {
    fn engine(&self) -> EngineKind {
        match self {
            Self::Postgres(_) => EngineKind::Postgres,
            Self::Sqlite(_) => EngineKind::Sqlite,
        }
    }

    fn ping(&mut self) -> Result<(), SessionError> {
        let probe = diesel::sql_query("SELECT 1");
        let result = match self {
            Self::Postgres(conn) => probe.execute(conn),
            Self::Sqlite(conn) => probe.execute(conn),
        };
        result.map(|_| ()).map_err(|e| SessionError::Connect(e.to_string()))
    }

    fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        let result = match self {
            Self::Postgres(conn) => conn.batch_execute(sql),
            Self::Sqlite(conn) => conn.batch_execute(sql),
        };
        result.map_err(query_err)
    }

    fn execute_atomic(&mut self, sql: &str) -> Result<(), SessionError> {
        let result = match self {
            Self::Postgres(conn) => conn.transaction(|tx| tx.batch_execute(sql)),
            Self::Sqlite(conn) => conn.transaction(|tx| tx.batch_execute(sql)),
        };
        result.map_err(query_err)
    }

    fn count(&mut self, sql: &str) -> Result<i64, SessionError> {
        let query = diesel::sql_query(sql);
        let row: CountRow = match self {
            Self::Postgres(conn) => query.get_result(conn),
            Self::Sqlite(conn) => query.get_result(conn),
        }.map_err(query_err)?;
        Ok(row.n)
    }
}

impl std::fmt::Debug for DieselSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DieselSession({})", self.engine())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> DieselSession {
        DieselSession::Sqlite(SqliteConnection::establish(":memory:").unwrap())
    }

    #[test]
    fn atomic_batch_rolls_back_on_error() {
        let mut session = memory();
        session.ping().unwrap();
        session.execute("CREATE TABLE t (v INTEGER NOT NULL);").unwrap();
        let err = session.execute_atomic("INSERT INTO t VALUES (1); INSERT INTO t VALUES (NULL);").unwrap_err();
        assert!(matches!(err, SessionError::Query(_)));
        assert_eq!(session.count("SELECT COUNT(*) AS n FROM t").unwrap(), 0);

        session.execute_atomic("INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);").unwrap();
        assert_eq!(session.count("SELECT COUNT(*) AS n FROM t").unwrap(), 2);
    }

    #[test]
    fn count_on_missing_table_is_a_query_error() {
        let mut session = memory();
        assert!(matches!(session.count("SELECT COUNT(*) AS n FROM nope"), Err(SessionError::Query(_))));
    }
}
