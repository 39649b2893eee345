//! SQLite-backed catalog of installed modules.
//!
//! [`CatalogStore`] wraps a `rusqlite::Connection` behind an `Arc<Mutex<>>`
//! and dispatches every operation onto the blocking thread pool via
//! `tokio::task::spawn_blocking`, so the async runtime never waits on disk
//! I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::error::{CatalogError, CatalogResult};
use crate::manifest::{InstalledModule, MetaKind, ModuleManifest};
use crate::migration;

/// Thread-safe handle to the module catalog.
///
/// Cloning is cheap; every clone talks to the same connection.
#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    /// Open (or create) a catalog at `path` and apply pragmas.
    ///
    /// This call blocks briefly on file I/O, so call it during startup or
    /// wrap it in `spawn_blocking` yourself. [`CatalogStore::open_and_migrate`]
    /// does both.
    pub fn open(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening catalog");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory catalog, useful for tests.
    pub fn open_in_memory() -> CatalogResult<Self> {
        debug!("opening in-memory catalog");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the catalog and run all pending migrations.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> CatalogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> CatalogResult<()> {
        self.execute(|conn| migration::run_all(conn)).await
    }

    /// Record an installed module.
    ///
    /// Installing an id that is already present replaces the record, which
    /// is what a reinstall or upgrade wants.
    #[instrument(skip(self, module))]
    pub async fn insert(&self, module: &InstalledModule) -> CatalogResult<()> {
        let meta = serde_json::to_string(&module.manifest.meta)?;
        let m = module.manifest.clone();
        let directory = module.directory.to_string_lossy().into_owned();
        let installed_at = module.installed_at.timestamp();

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO modules (id, name, description, file, version, icon, meta, directory, installed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(id) DO UPDATE SET \
                     name = excluded.name, description = excluded.description, \
                     file = excluded.file, version = excluded.version, \
                     icon = excluded.icon, meta = excluded.meta, \
                     directory = excluded.directory, installed_at = excluded.installed_at",
                rusqlite::params![
                    m.id,
                    m.name,
                    m.description,
                    m.file,
                    m.version,
                    m.icon,
                    meta,
                    directory,
                    installed_at
                ],
            )?;
            Ok(())
        })
        .await?;

        debug!(module_id = %module.manifest.id, "module recorded in catalog");
        Ok(())
    }

    /// Fetch a single module by id, returning `None` if not installed.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> CatalogResult<Option<InstalledModule>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let result = conn.query_row(
                "SELECT id, name, description, file, version, icon, meta, directory, installed_at \
                 FROM modules WHERE id = ?1",
                rusqlite::params![id],
                ModuleRow::from_row,
            );
            match result {
                Ok(row) => row.into_installed().map(Some),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(CatalogError::Sqlite(e)),
            }
        })
        .await
    }

    /// List every installed module, ordered by name.
    #[instrument(skip(self))]
    pub async fn list(&self) -> CatalogResult<Vec<InstalledModule>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, file, version, icon, meta, directory, installed_at \
                 FROM modules ORDER BY name",
            )?;
            let rows = stmt.query_map([], ModuleRow::from_row)?;
            let mut modules = Vec::new();
            for row in rows {
                modules.push(row?.into_installed()?);
            }
            Ok(modules)
        })
        .await
    }

    /// Delete a module record by id.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> CatalogResult<()> {
        let owned = id.to_string();
        let removed = self
            .execute(move |conn| {
                Ok(conn.execute("DELETE FROM modules WHERE id = ?1", rusqlite::params![owned])?)
            })
            .await?;

        if removed == 0 {
            return Err(CatalogError::NotFound {
                entity: "module",
                id: id.to_string(),
            });
        }

        debug!(module_id = %id, "module removed from catalog");
        Ok(())
    }

    /// Whether a module with this id is installed.
    pub async fn contains(&self, id: &str) -> CatalogResult<bool> {
        let id = id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM modules WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// Execute a closure against the connection on the blocking pool.
    async fn execute<F, T>(&self, f: F) -> CatalogResult<T>
    where
        F: FnOnce(&Connection) -> CatalogResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| CatalogError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    /// Apply pragmas to a fresh connection.
    fn apply_pragmas(conn: &Connection) -> CatalogResult<()> {
        // WAL mode: concurrent readers, non-blocking writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL; a power failure can only lose the
        // last transaction, not corrupt the file.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Concurrent writers wait instead of failing immediately.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        Ok(())
    }
}

// ── row mapping ──────────────────────────────────────────────────────

struct ModuleRow {
    id: String,
    name: String,
    description: Option<String>,
    file: String,
    version: String,
    icon: Option<String>,
    meta: String,
    directory: String,
    installed_at: i64,
}

impl ModuleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            file: row.get(3)?,
            version: row.get(4)?,
            icon: row.get(5)?,
            meta: row.get(6)?,
            directory: row.get(7)?,
            installed_at: row.get(8)?,
        })
    }

    fn into_installed(self) -> CatalogResult<InstalledModule> {
        let meta: Vec<MetaKind> = serde_json::from_str(&self.meta)?;
        Ok(InstalledModule {
            directory: PathBuf::from(self.directory),
            installed_at: DateTime::from_timestamp(self.installed_at, 0).unwrap_or_default(),
            manifest: ModuleManifest {
                id: self.id,
                name: self.name,
                description: self.description,
                file: self.file,
                version: self.version,
                icon: self.icon,
                meta,
            },
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> CatalogStore {
        let store = CatalogStore::open_in_memory().unwrap();
        store.run_migrations().await.unwrap();
        store
    }

    fn installed(id: &str, name: &str) -> InstalledModule {
        InstalledModule::new(
            PathBuf::from(format!("/data/modules/{id}")),
            ModuleManifest {
                id: id.into(),
                name: name.into(),
                description: Some("a module".into()),
                file: format!("{id}.wasm"),
                version: "1.0.0".into(),
                icon: None,
                meta: vec![MetaKind::Video, MetaKind::Text],
            },
        )
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = setup().await;
        let module = installed("weather", "Weather");
        store.insert(&module).await.unwrap();

        let fetched = store.get("weather").await.unwrap().unwrap();
        assert_eq!(fetched.manifest, module.manifest);
        assert_eq!(fetched.directory, module.directory);
        assert_eq!(
            fetched.installed_at.timestamp(),
            module.installed_at.timestamp()
        );
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = setup().await;
        assert!(store.get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_name() {
        let store = setup().await;
        store.insert(&installed("z", "Zebra")).await.unwrap();
        store.insert(&installed("a", "Anime")).await.unwrap();

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.manifest.name)
            .collect();
        assert_eq!(names, vec!["Anime".to_owned(), "Zebra".to_owned()]);
    }

    #[tokio::test]
    async fn reinstall_replaces_the_record() {
        let store = setup().await;
        store.insert(&installed("weather", "Weather")).await.unwrap();

        let mut upgraded = installed("weather", "Weather");
        upgraded.manifest.version = "2.0.0".into();
        store.insert(&upgraded).await.unwrap();

        let fetched = store.get("weather").await.unwrap().unwrap();
        assert_eq!(fetched.manifest.version, "2.0.0");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_deletes_the_record() {
        let store = setup().await;
        store.insert(&installed("weather", "Weather")).await.unwrap();

        store.remove("weather").await.unwrap();
        assert!(store.get("weather").await.unwrap().is_none());
        assert!(!store.contains("weather").await.unwrap());
    }

    #[tokio::test]
    async fn remove_missing_reports_not_found() {
        let store = setup().await;
        let err = store.remove("ghost").await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::NotFound {
                entity: "module",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn contains_reflects_inserts() {
        let store = setup().await;
        assert!(!store.contains("weather").await.unwrap());
        store.insert(&installed("weather", "Weather")).await.unwrap();
        assert!(store.contains("weather").await.unwrap());
    }

    #[tokio::test]
    async fn open_and_migrate_creates_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("catalog.db");

        let store = CatalogStore::open_and_migrate(path.clone()).await.unwrap();
        store.insert(&installed("a", "A")).await.unwrap();
        assert!(path.exists());
    }
}
