//! CLI entry point for modhost.
//!
//! This binary provides the `modhost` command with subcommands for
//! installing modules into the catalog, inspecting them, and running a
//! module straight from disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use modhost_catalog::{CatalogStore, InstalledModule, ModuleManifest};
use modhost_runtime::{ModuleRuntime, RuntimeConfig};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// modhost, a host for sandboxed WebAssembly modules.
#[derive(Parser)]
#[command(
    name = "modhost",
    version,
    about = "Run and manage sandboxed WebAssembly modules",
    long_about = "Loads untrusted WebAssembly modules, links the http/core/env capability \
                  namespaces into them, and tracks installed modules in a local catalog."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a module into the catalog.
    Install {
        /// Directory containing the module's files.
        dir: PathBuf,
        /// Path to the module's manifest JSON.
        manifest: PathBuf,
    },

    /// List installed modules.
    List,

    /// Show details for one installed module.
    Info {
        /// Module id as recorded in the catalog.
        id: String,
    },

    /// Remove a module from the catalog.
    Remove {
        /// Module id as recorded in the catalog.
        id: String,
    },

    /// Load a module from disk and call an exported entry point.
    Run {
        /// Path to a `.wasm` module file.
        file: PathBuf,
        /// Exported entry point to call.
        #[arg(long, default_value = "main")]
        entry: String,
        /// Scalar argument for the entry point (repeatable).
        #[arg(long = "arg", value_name = "I32")]
        args: Vec<i32>,
        /// Allow the module's HTTP requests to reach the network.
        #[arg(long)]
        allow_network: bool,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Install { dir, manifest } => cmd_install(dir, manifest).await,
        Commands::List => cmd_list().await,
        Commands::Info { id } => cmd_info(&id).await,
        Commands::Remove { id } => cmd_remove(&id).await,
        Commands::Run {
            file,
            entry,
            args,
            allow_network,
        } => cmd_run(file, entry, args, allow_network).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: install
// ---------------------------------------------------------------------------

async fn cmd_install(dir: PathBuf, manifest_path: PathBuf) -> Result<()> {
    init_tracing("modhost=info");

    // 1. Parse and validate the manifest.
    let raw = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    let manifest: ModuleManifest =
        serde_json::from_str(&raw).context("manifest is not valid JSON")?;
    manifest.validate()?;

    // 2. The binary the manifest names must actually be there.
    let dir = dir
        .canonicalize()
        .with_context(|| format!("module directory {} does not exist", dir.display()))?;
    let binary = dir.join(&manifest.file);
    if !binary.is_file() {
        anyhow::bail!("module binary not found at {}", binary.display());
    }

    // 3. Register in the catalog.
    let store = open_catalog().await?;
    let module = InstalledModule::new(dir, manifest);
    store.insert(&module).await?;

    println!(
        "  [+] Installed '{}' v{} ({})",
        module.manifest.name, module.manifest.version, module.manifest.id
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: list
// ---------------------------------------------------------------------------

async fn cmd_list() -> Result<()> {
    init_tracing("modhost=warn");

    let store = open_catalog().await?;
    let modules = store.list().await?;

    println!();
    if modules.is_empty() {
        println!("  No modules installed. Run `modhost install <dir> <manifest>`.");
    } else {
        println!("  Installed modules:");
        println!();
        for module in &modules {
            let m = &module.manifest;
            println!("    {:<24} {:<12} {}", m.id, m.version, m.name);
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: info
// ---------------------------------------------------------------------------

async fn cmd_info(id: &str) -> Result<()> {
    init_tracing("modhost=warn");

    let store = open_catalog().await?;
    let module = store
        .get(id)
        .await?
        .with_context(|| format!("module '{id}' is not installed"))?;
    let m = &module.manifest;

    let meta = m
        .meta
        .iter()
        .map(|kind| kind.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    println!();
    println!("  {} v{} ({})", m.name, m.version, m.id);
    if let Some(description) = &m.description {
        println!("  {description}");
    }
    println!();
    println!("  Binary:     {}", module.binary_path().display());
    println!(
        "  Meta:       {}",
        if meta.is_empty() { "-" } else { meta.as_str() }
    );
    println!(
        "  Installed:  {}",
        module.installed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: remove
// ---------------------------------------------------------------------------

async fn cmd_remove(id: &str) -> Result<()> {
    init_tracing("modhost=info");

    let store = open_catalog().await?;
    store.remove(id).await?;

    println!("  [+] Removed '{id}' from the catalog");

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(file: PathBuf, entry: String, args: Vec<i32>, allow_network: bool) -> Result<()> {
    init_tracing("modhost=info");

    let config = RuntimeConfig::new().with_allow_network(allow_network);
    let runtime = ModuleRuntime::new(config).context("failed to initialize runtime")?;

    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module")
        .to_owned();
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    info!(module = %name, size_bytes = bytes.len(), "loading module");

    // Guest execution can block on http.send, so keep it off the async
    // runtime's worker threads.
    let results = {
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<i32>> {
            let mut instance = runtime.load(&name, &bytes)?;
            Ok(instance.invoke(&entry, &args)?)
        })
        .await
        .context("module execution panicked")??
    };

    if results.is_empty() {
        println!("  {entry}() returned");
    } else {
        let rendered = results
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {entry}() -> {rendered}");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open the catalog under `data/`, creating the directory on first use.
async fn open_catalog() -> Result<CatalogStore> {
    let data_dir = Path::new("data");
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir).context("failed to create data directory")?;
    }

    let db_path = data_dir.join("catalog.db");
    let store = CatalogStore::open_and_migrate(db_path.clone())
        .await
        .context("failed to open catalog")?;
    info!(path = %db_path.display(), "catalog ready");

    Ok(store)
}

/// Initialize the tracing subscriber with the given default log filter.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
