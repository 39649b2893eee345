//! Module loader.
//!
//! [`ModuleLoader`] discovers `.wasm` files in a directory, instantiates
//! each through a shared [`ModuleRuntime`], and tracks the running
//! instances by name so callers can invoke exports without holding the
//! instance themselves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::instance::ModuleInstance;
use crate::runtime::ModuleRuntime;

/// Discovers and loads modules from a directory.
///
/// The runtime is shared across every instance produced by this loader.
/// Each instance sits behind its own lock; invocations of different
/// modules never serialize against each other.
pub struct ModuleLoader {
    /// Shared runtime. Loading only needs `&self`, so no lock is required.
    runtime: Arc<ModuleRuntime>,
    /// Directory to scan for `.wasm` module files.
    modules_dir: PathBuf,
    /// Running instances keyed by module name.
    instances: HashMap<String, Arc<Mutex<ModuleInstance>>>,
}

impl ModuleLoader {
    /// Create a loader with a fresh [`ModuleRuntime`] built from `config`.
    pub fn new(modules_dir: PathBuf, config: RuntimeConfig) -> Result<Self> {
        let runtime = ModuleRuntime::new(config)?;
        tracing::info!(modules_dir = %modules_dir.display(), "module loader created");
        Ok(Self {
            runtime: Arc::new(runtime),
            modules_dir,
            instances: HashMap::new(),
        })
    }

    /// Create a loader around an existing shared runtime.
    pub fn with_runtime(modules_dir: PathBuf, runtime: Arc<ModuleRuntime>) -> Self {
        Self {
            runtime,
            modules_dir,
            instances: HashMap::new(),
        }
    }

    /// A clone of the shared runtime handle.
    pub fn runtime(&self) -> Arc<ModuleRuntime> {
        Arc::clone(&self.runtime)
    }

    /// The directory this loader scans.
    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Scan `modules_dir` and load every `.wasm` file found.
    ///
    /// Returns the names that loaded. A file that fails to load is logged
    /// and skipped; it never aborts the rest of the batch.
    pub async fn load_all(&mut self) -> Result<Vec<String>> {
        let dir = &self.modules_dir;

        if !dir.exists() {
            tracing::warn!(path = %dir.display(), "modules directory does not exist");
            return Ok(Vec::new());
        }

        if !dir.is_dir() {
            return Err(RuntimeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", dir.display()),
            )));
        }

        let mut entries = Vec::new();

        let mut read_dir = tokio::fs::read_dir(dir).await.map_err(RuntimeError::Io)?;

        while let Some(entry) = read_dir.next_entry().await.map_err(RuntimeError::Io)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("wasm") {
                entries.push(path);
            }
        }

        // Deterministic load order.
        entries.sort();

        tracing::info!(
            modules_dir = %dir.display(),
            count = entries.len(),
            "discovered wasm module files"
        );

        let mut loaded = Vec::with_capacity(entries.len());

        for path in &entries {
            match self.load_module(path).await {
                Ok(name) => {
                    tracing::info!(module = %name, path = %path.display(), "loaded module");
                    loaded.push(name);
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to load module, skipping"
                    );
                }
            }
        }

        Ok(loaded)
    }

    /// Load one `.wasm` file; the module name is its file stem
    /// (`weather.wasm` loads as `"weather"`).
    pub async fn load_module(&mut self, path: &Path) -> Result<String> {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| RuntimeError::Module {
                reason: format!("cannot derive module name from path: {}", path.display()),
            })?
            .to_owned();

        if self.instances.contains_key(&name) {
            return Err(RuntimeError::Module {
                reason: format!("module '{name}' is already loaded"),
            });
        }

        let wasm_bytes = tokio::fs::read(path).await.map_err(RuntimeError::Io)?;

        tracing::debug!(
            module = %name,
            path = %path.display(),
            size_bytes = wasm_bytes.len(),
            "read wasm bytes from disk"
        );

        // Compilation and instantiation are synchronous and CPU-bound.
        let instance = {
            let runtime = Arc::clone(&self.runtime);
            let name = name.clone();
            tokio::task::spawn_blocking(move || runtime.load(&name, &wasm_bytes))
                .await
                .map_err(|e| RuntimeError::Execution(format!("blocking task panicked: {e}")))?
        }?;

        self.instances
            .insert(name.clone(), Arc::new(Mutex::new(instance)));

        Ok(name)
    }

    /// Call an exported entry point on a loaded module.
    ///
    /// Guest execution may block on `http.send`, so the call runs on a
    /// blocking thread while the caller's task stays scheduled.
    pub async fn invoke(&self, name: &str, entry: &str, args: &[i32]) -> Result<Vec<i32>> {
        let instance = self.get(name).ok_or_else(|| RuntimeError::Module {
            reason: format!("module '{name}' is not loaded"),
        })?;

        let entry = entry.to_owned();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = instance.blocking_lock();
            guard.invoke(&entry, &args)
        })
        .await
        .map_err(|e| RuntimeError::Execution(format!("blocking task panicked: {e}")))?
    }

    /// Unload a module by name, dropping its instance and every handle it
    /// ever issued.
    pub fn unload(&mut self, name: &str) -> Result<()> {
        self.instances
            .remove(name)
            .ok_or_else(|| RuntimeError::Module {
                reason: format!("module '{name}' is not loaded"),
            })?;
        tracing::info!(module = %name, "unloaded module");
        Ok(())
    }

    /// Fetch a running instance by name.
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<ModuleInstance>>> {
        self.instances.get(name).map(Arc::clone)
    }

    /// Names of all loaded modules, sorted.
    pub fn list_loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const ADDER_WAT: &str = r#"
        (module
          (func (export "add") (param i32 i32) (result i32)
            (i32.add (local.get 0) (local.get 1))))
    "#;

    /// Drop a minimal valid module (header only) into `dir`.
    fn stage_wasm(dir: &Path, file: &str) -> PathBuf {
        let path = dir.join(file);
        fs::write(&path, [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]).expect("stage wasm");
        path
    }

    fn loader_in(dir: &Path) -> ModuleLoader {
        ModuleLoader::new(dir.to_path_buf(), RuntimeConfig::default()).expect("create loader")
    }

    #[test]
    fn empty_loader_reports_its_directory() {
        let loader = loader_in(Path::new("/tmp/modhost-madeup"));
        assert_eq!(loader.modules_dir(), Path::new("/tmp/modhost-madeup"));
        assert!(loader.list_loaded().is_empty());
    }

    #[test]
    fn shared_runtime_is_the_same_allocation() {
        let runtime = Arc::new(ModuleRuntime::with_defaults().expect("create runtime"));
        let loader = ModuleLoader::with_runtime(PathBuf::from("/tmp"), Arc::clone(&runtime));
        assert!(Arc::ptr_eq(&loader.runtime(), &runtime));
    }

    #[tokio::test]
    async fn missing_directory_loads_nothing() {
        let dir = PathBuf::from("/tmp/modhost-no-such-dir");
        let _ = fs::remove_dir_all(&dir);

        let mut loader = loader_in(&dir);
        assert!(loader.load_all().await.expect("scan").is_empty());
    }

    #[tokio::test]
    async fn scan_picks_up_only_wasm_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        stage_wasm(tmp.path(), "alpha.wasm");
        stage_wasm(tmp.path(), "beta.wasm");
        fs::write(tmp.path().join("notes.txt"), b"ignored").expect("write file");

        let mut loader = loader_in(tmp.path());
        let loaded = loader.load_all().await.expect("scan");

        assert_eq!(loaded, vec!["alpha".to_owned(), "beta".to_owned()]);
        assert_eq!(loader.list_loaded(), loaded);
    }

    #[tokio::test]
    async fn module_name_comes_from_the_file_stem() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = stage_wasm(tmp.path(), "weather.wasm");

        let mut loader = loader_in(tmp.path());
        let name = loader.load_module(&path).await.expect("load");

        assert_eq!(name, "weather");
        assert!(loader.get("weather").is_some());
    }

    #[tokio::test]
    async fn invoke_calls_through_to_the_guest() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("calc.wasm");
        fs::write(&path, ADDER_WAT).expect("write wat");

        let mut loader = loader_in(tmp.path());
        loader.load_module(&path).await.expect("load");

        let results = loader.invoke("calc", "add", &[2, 3]).await.expect("invoke");
        assert_eq!(results, vec![5]);
    }

    #[tokio::test]
    async fn invoking_an_unloaded_module_fails() {
        let loader = loader_in(Path::new("/tmp"));
        assert!(loader.invoke("ghost", "add", &[1, 2]).await.is_err());
    }

    #[tokio::test]
    async fn unload_forgets_the_instance() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = stage_wasm(tmp.path(), "ephemeral.wasm");

        let mut loader = loader_in(tmp.path());
        loader.load_module(&path).await.expect("load");
        assert_eq!(loader.list_loaded(), vec!["ephemeral".to_owned()]);

        loader.unload("ephemeral").expect("unload");
        assert!(loader.list_loaded().is_empty());
        assert!(loader.unload("ephemeral").is_err());
    }

    #[tokio::test]
    async fn corrupt_bytes_do_not_load() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("bad.wasm");
        fs::write(&path, b"definitely not wasm").expect("write file");

        let mut loader = loader_in(tmp.path());
        assert!(loader.load_module(&path).await.is_err());
    }

    #[tokio::test]
    async fn scan_skips_files_that_fail_to_load() {
        let tmp = tempfile::tempdir().expect("tempdir");
        stage_wasm(tmp.path(), "good.wasm");
        fs::write(tmp.path().join("bad.wasm"), b"garbage").expect("write file");

        let mut loader = loader_in(tmp.path());
        let loaded = loader.load_all().await.expect("scan");
        assert_eq!(loaded, vec!["good".to_owned()]);
    }

    #[tokio::test]
    async fn scanning_a_file_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("plain.txt");
        fs::write(&file, b"hello").expect("write file");

        let mut loader = loader_in(&file);
        assert!(loader.load_all().await.is_err());
    }

    #[tokio::test]
    async fn loading_a_missing_file_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut loader = loader_in(tmp.path());
        assert!(
            loader
                .load_module(&tmp.path().join("absent.wasm"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn loading_the_same_name_twice_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = stage_wasm(tmp.path(), "dupe.wasm");

        let mut loader = loader_in(tmp.path());
        loader.load_module(&path).await.expect("first load");

        let err = loader.load_module(&path).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Module { .. }));
    }
}
