//! Schema migrations.
//!
//! The applied schema version lives in SQLite's `user_version` pragma. Each
//! pending migration runs in its own transaction together with the pragma
//! bump, so a crash never leaves a half-applied step behind.

use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, Transaction};

use super::Error;

/// Ordered schema steps; the slice index + 1 is the version a step produces.
const MIGRATIONS: &[&str] = &[include_str!("../../migrations/001_stores.sql")];

/// Schema version this build expects.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

fn apply(tx: &Transaction<'_>, version: i64, sql: &str) -> rusqlite::Result<()> {
    tx.execute_batch(sql)?;
    // PRAGMA values cannot be bound as parameters.
    tx.execute_batch(&format!("PRAGMA user_version = {version}"))
}

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`Error::MigrationFailed`] if the database is newer than this
/// build, or a database error if a step fails.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current > SCHEMA_VERSION {
            return Err(Error::MigrationFailed(format!(
                "database schema {current} is newer than supported {SCHEMA_VERSION}"
            )));
        }

        for (version, sql) in (1..).zip(MIGRATIONS).skip(current as usize) {
            let tx = conn.transaction()?;
            apply(&tx, version, sql)?;
            tx.commit()?;
            tracing::debug!(version, "applied migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
