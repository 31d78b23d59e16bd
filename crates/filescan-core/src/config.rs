use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Directory names that are never descended into.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    "__pycache__",
    "site-packages",
    ".git",
    ".ipynb_checkpoints",
    ".mypy_cache",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite => write!(f, "sqlite"),
            Backend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root_paths: Vec<String>,
    pub db_path: String,
    pub backend: Backend,
    pub ignore_dirs: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub trace_changes: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            db_path: "filescan.db".to_string(),
            backend: Backend::Sqlite,
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|d| d.to_string()).collect(),
            ignore_patterns: Vec::new(),
            trace_changes: false,
        }
    }
}

impl AppConfig {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            ignore_dirs: self.ignore_dirs.clone(),
            ignore_patterns: self.ignore_patterns.clone(),
            trace_changes: self.trace_changes,
        }
    }
}

/// Knobs the engine needs for a single scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub ignore_dirs: Vec<String>,
    pub ignore_patterns: Vec<String>,
    /// Log every created/updated/deleted path at `info` rather than `debug`.
    pub trace_changes: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        AppConfig::default().scan_options()
    }
}

fn environment() -> Environment {
    Environment::with_prefix("FILESCAN")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("root_paths")
        .with_list_parse_key("ignore_dirs")
        .with_list_parse_key("ignore_patterns")
}

/// Load `Config.{toml,yaml,json,...}` from the working directory if present,
/// then overlay `FILESCAN_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(environment())
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

pub fn load_configuration_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::from(path).required(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
