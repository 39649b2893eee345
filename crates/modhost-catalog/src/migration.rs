//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch with a version number; applied
//! versions are recorded in the `_migrations` table. Running the set is
//! idempotent, and new schema changes are appended as new versions rather
//! than editing old ones.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, CatalogResult};

struct Migration {
    /// Versions count up from 1 and never repeat.
    version: u32,
    description: &'static str,
    /// SQL batch; may hold several `;`-separated statements.
    sql: &'static str,
}

/// Every migration, oldest first. Append only.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "installed module records",
    sql: r#"
        CREATE TABLE modules (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL,
            description  TEXT,
            file         TEXT NOT NULL,
            version      TEXT NOT NULL,
            icon         TEXT,
            meta         TEXT NOT NULL DEFAULT '[]',
            directory    TEXT NOT NULL,
            installed_at INTEGER NOT NULL
        );
        CREATE INDEX idx_modules_name ON modules(name);
    "#,
}];

/// Bring the schema up to the latest version.
///
/// Already-applied versions are skipped, so calling this on every open is
/// cheap and safe.
pub fn run_all(conn: &Connection) -> CatalogResult<()> {
    ensure_migrations_table(conn)?;
    let start = current_version(conn)?;

    let mut applied = 0u32;
    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = start, "catalog schema already current");
    } else {
        info!(
            from = start,
            to = start + applied,
            applied,
            "catalog schema migrated"
        );
    }
    Ok(())
}

/// Highest applied migration version, 0 on a database that has none.
pub fn current_version(conn: &Connection) -> CatalogResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| CatalogError::Migration {
        version: 0,
        message: format!("cannot read schema version: {e}"),
    })
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> CatalogResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations \
         (version INTEGER PRIMARY KEY, description TEXT NOT NULL, applied_at INTEGER NOT NULL)",
    )
    .map_err(|e| CatalogError::Migration {
        version: 0,
        message: format!("cannot create _migrations table: {e}"),
    })
}

/// Run one migration and record it, atomically.
///
/// The store hands out `&Connection`, so `rusqlite::Transaction` (which
/// needs `&mut`) is out; the transaction is driven by hand instead.
fn apply(conn: &Connection, migration: &Migration) -> CatalogResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying catalog migration"
    );

    batch(conn, migration.version, "BEGIN IMMEDIATE;")?;
    match execute_and_record(conn, migration) {
        Ok(()) => batch(conn, migration.version, "COMMIT;"),
        Err(err) => {
            warn!(version = migration.version, %err, "migration rolled back");
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

fn execute_and_record(conn: &Connection, migration: &Migration) -> CatalogResult<()> {
    batch(conn, migration.version, migration.sql)?;
    conn.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().timestamp()
        ],
    )
    .map_err(|e| CatalogError::Migration {
        version: migration.version,
        message: format!("cannot record applied migration: {e}"),
    })?;
    Ok(())
}

fn batch(conn: &Connection, version: u32, sql: &str) -> CatalogResult<()> {
    conn.execute_batch(sql).map_err(|e| CatalogError::Migration {
        version,
        message: e.to_string(),
    })
}

// ── tests ────────────────────────────────────────────────────────────
