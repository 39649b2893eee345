//! # modhost-catalog
//!
//! The persisted catalog of installed modules.
//!
//! A repository publishes a JSON [`ModuleManifest`] per module; installing
//! one copies its files into a directory and records an [`InstalledModule`]
//! here. The catalog itself is a single SQLite table behind
//! [`CatalogStore`], with WAL mode and versioned migrations.
//!
//! ## Quick start
//!
//! ```ignore
//! use modhost_catalog::{CatalogStore, InstalledModule, ModuleManifest};
//!
//! let store = CatalogStore::open_and_migrate("data/catalog.db").await?;
//! let manifest: ModuleManifest = serde_json::from_str(&json)?;
//! manifest.validate()?;
//! store.insert(&InstalledModule::new(dir, manifest)).await?;
//! ```

pub mod error;
pub mod manifest;
pub mod migration;
pub mod store;

// ── re-exports ───────────────────────────────────────────────────────

pub use error::{CatalogError, CatalogResult};
pub use manifest::{InstalledModule, MetaKind, ModuleManifest};
pub use store::CatalogStore;
