mod commands;
mod logging;
mod progress;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use filescan_core::plugins::PythonIdentifiers;
use filescan_core::scanner::with_trailing_separator;
use filescan_core::storage::models::Lookup;
use filescan_core::{
    AppConfig, Backend, ChecksumRegistry, Database, Error, MemoryStore, ScanEngine, ScanSummary,
    Store,
};
use progress::CliReporter;
use tracing::{debug, error, info, warn};

fn main() {
    dotenv().ok();

    let guard = logging::init_logger();

    let args = Cli::parse();

    let mut config = match filescan_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            drop(guard);
            process::exit(1);
        }
    };
    if let Some(db) = &args.db {
        config.db_path = db.to_string_lossy().into_owned();
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    debug!("Using {} backend at {}", config.backend, config.db_path);

    let outcome = match args.command {
        Some(Commands::Scan { roots, create }) => run_scan(&config, roots, create),
        Some(Commands::History { limit }) => run_history(&config, limit),
        Some(Commands::Events { run_id }) => run_events(&config, run_id),
        Some(Commands::Lookup { path }) => run_lookup(&config, &path),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => run_truncate(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("{:#}", err);
        drop(guard);
        process::exit(1);
    }
}

fn run_scan(config: &AppConfig, roots: Vec<PathBuf>, create: bool) -> anyhow::Result<()> {
    let roots = resolve_roots(config, roots)?;
    info!("Scanning roots: {:?}", roots);

    match config.backend {
        Backend::Sqlite => {
            let db = open_database(config)?;
            if create {
                db.truncate_all()?;
                info!("Started from an empty database at {}", config.db_path);
            }
            scan_roots(db, config, &roots)
        }
        Backend::Memory => scan_roots(MemoryStore::new(), config, &roots),
    }
}

/// Roots named on the command line win over the configured ones.
fn resolve_roots(config: &AppConfig, roots: Vec<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
    let roots: Vec<PathBuf> = if roots.is_empty() {
        config.root_paths.iter().map(PathBuf::from).collect()
    } else {
        roots
    };
    if roots.is_empty() {
        bail!("Nothing to do! Pass a root or set root_paths in the configuration");
    }
    Ok(roots)
}

/// Flag an interrupt. Returns true when one had already been requested.
fn request_cancel(token: &AtomicBool) -> bool {
    token.swap(true, Ordering::SeqCst)
}

fn scan_roots<S: Store>(store: S, config: &AppConfig, roots: &[PathBuf]) -> anyhow::Result<()> {
    let registry = ChecksumRegistry::new().with_plugin(PythonIdentifiers);
    debug!("Content plugins: {:?}", registry.plugin_names());
    let engine = ScanEngine::new(store)
        .with_options(config.scan_options())
        .with_registry(registry);

    let token = engine.cancel_token();
    let handler_token = token.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        if request_cancel(&handler_token) {
            process::exit(130);
        }
        warn!("Interrupt received, stopping after the current file (press again to quit now)");
    }) {
        warn!("Could not install the interrupt handler: {}", err);
    }

    let mut failed = 0;
    let mut cancelled = false;
    for root in roots {
        if token.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }
        let reporter = CliReporter::new();
        match engine.scan(root, &reporter) {
            Ok(summary) => print_summary(&summary),
            Err(Error::Cancelled) => {
                cancelled = true;
                break;
            }
            Err(err) => {
                error!("Scan of {} failed: {}", root.display(), err);
                failed += 1;
            }
        }
    }

    if cancelled {
        bail!("Scan interrupted; the current run was recorded as aborted");
    }
    if failed > 0 {
        bail!("{} of {} roots could not be scanned", failed, roots.len());
    }
    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    let c = &summary.counters;
    println!();
    println!("{} {}", "Run".bold(), summary.run_id.to_string().bold());
    println!("  Root:        {}", summary.root);
    println!("  Known:       {}", c.known.to_string().cyan());
    println!("  Unchanged:   {}", c.unchanged.to_string().cyan());
    println!("  Updated:     {}", c.updated.to_string().yellow());
    println!("  New:         {}", c.new_files.to_string().green());
    println!("  Deleted:     {}", c.deleted.to_string().red());
    println!("  Total seen:  {}", c.files.to_string().bold());
    if summary.errors > 0 {
        println!("  Skipped:     {}", summary.errors.to_string().red());
    }
    println!(
        "  Elapsed:     {}",
        format!("{:.2}s", summary.duration.as_secs_f64()).green()
    );
}

fn run_history(config: &AppConfig, limit: u64) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let runs = store.list_runs(0, limit)?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    for run in runs {
        let finished = run
            .when_finished
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let c = run.counters;
        println!(
            "{:>6}  {}  {:<19}  {:<9}  seen {} new {} upd {} del {}  {}",
            run.id,
            run.when_run.format("%Y-%m-%d %H:%M:%S"),
            finished,
            run.status.as_str(),
            c.files,
            c.new_files.to_string().green(),
            c.updated.to_string().yellow(),
            c.deleted.to_string().red(),
            run.rootdir,
        );
    }
    Ok(())
}

fn run_events(config: &AppConfig, run_id: i64) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let Some(run) = store.get_run(run_id)? else {
        bail!("No run with id {}", run_id);
    };

    let events = store.events_for_run(run.id)?;
    println!(
        "Run {} on {} ({}): {} events",
        run.id,
        run.rootdir,
        run.status.as_str(),
        events.len()
    );
    for event in events {
        let path = format!(
            "{}{}",
            event.data["dirpath"].as_str().unwrap_or_default(),
            event.data["filename"].as_str().unwrap_or_default()
        );
        let reason = match event.reason.as_str() {
            "CREATED" => event.reason.as_str().green(),
            "UPDATED" => event.reason.as_str().yellow(),
            other => other.red(),
        };
        println!("  {:<8} {}", reason, path);
    }
    Ok(())
}

fn run_lookup(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let (Some(parent), Some(filename)) = (path.parent(), path.file_name()) else {
        bail!("{} does not name a file", path.display());
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let parent = fs::canonicalize(parent)
        .with_context(|| format!("resolving directory {}", parent.display()))?;
    let (Some(dirpath), Some(filename)) = (with_trailing_separator(&parent), filename.to_str())
    else {
        bail!("{} is not valid UTF-8 and cannot be in the inventory", path.display());
    };

    let store = open_store(config)?;
    match store.location_for(&dirpath, &filename)? {
        Lookup::Found(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
        Lookup::NotFound => println!("{}{} is not in the inventory", dirpath, filename),
    }
    Ok(())
}

fn run_truncate(config: &AppConfig) -> anyhow::Result<()> {
    if config.backend != Backend::Sqlite {
        println!("Nothing to truncate for the {} backend", config.backend);
        return Ok(());
    }

    let confirmed = prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the Database?",
        Some(false),
    )?;
    if confirmed {
        open_database(config)?.truncate_all()?;
        println!("All tables truncated");
    }
    Ok(())
}

fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    Database::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path))
}

fn open_store(config: &AppConfig) -> anyhow::Result<Box<dyn Store>> {
    Ok(match config.backend {
        Backend::Sqlite => Box::new(open_database(config)?),
        Backend::Memory => Box::new(MemoryStore::new()),
    })
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
