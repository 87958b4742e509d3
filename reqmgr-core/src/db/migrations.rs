//! Versioned schema migrations.
//!
//! The `schema_version` table carries a single row; a fresh database gets
//! the full current schema, an older one is upgraded step by step. Callers
//! never probe table shapes at query time.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Schema version this build reads and writes.
pub(crate) const SCHEMA_VERSION: i32 = 2;

/// Brings the connected database up to [`SCHEMA_VERSION`].
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    let current: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    if current == 0 {
        conn.execute_batch(include_str!("schema.sql"))?;
        return Ok(());
    }

    if current > SCHEMA_VERSION {
        return Err(Error::Validation(format!(
            "database schema version {} is newer than this build supports ({})",
            current, SCHEMA_VERSION
        )));
    }

    let mut version = current;
    while version < SCHEMA_VERSION {
        match version {
            1 => upgrade_v1_to_v2(conn)?,
            other => {
                return Err(Error::Validation(format!(
                    "no upgrade path from schema version {}",
                    other
                )))
            }
        }
        version += 1;
        conn.execute("UPDATE schema_version SET version = ?1", [version])?;
    }

    Ok(())
}

/// v1 predates the review and trash features: it has no completion note,
/// completion timestamp, or soft-delete marker.
fn upgrade_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "ALTER TABLE requirements ADD COLUMN completed_at TEXT;
         ALTER TABLE requirements ADD COLUMN comment TEXT;
         ALTER TABLE requirements ADD COLUMN is_deleted INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE requirements ADD COLUMN deleted_at TEXT;",
    )?;
    Ok(())
}
