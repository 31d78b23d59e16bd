use super::digest::digest_file;
use crate::error::Result;
use crate::plugins::{ContentPlugin, PluginContext};
use crate::storage::models::{ContentRecord, Registration};
use crate::storage::Store;
use std::path::Path;
use tracing::{debug, warn};

/// Maps content digests to deduplicated checksum records and runs the content
/// plugins the first time a digest is seen anywhere in the store.
#[derive(Default)]
pub struct ChecksumRegistry {
    plugins: Vec<Box<dyn ContentPlugin>>,
}

impl ChecksumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin<P: ContentPlugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Register an already computed digest for the file at `path`.
    ///
    /// Plugins run only when this call inserted the checksum; a digest that
    /// already exists is returned untouched.
    pub fn register(&self, store: &dyn Store, checksum: &str, path: &Path) -> Result<ContentRecord> {
        let registration = store.insert_checksum(checksum)?;
        if let Registration::Inserted(ref content) = registration {
            debug!("New checksum {} from {}", content.checksum, path.display());
            self.run_plugins(store, &PluginContext { path, content });
        }
        Ok(registration.into_record())
    }

    /// Hash the file and register the digest. `None` when the file cannot be
    /// read at this instant.
    pub fn register_content(&self, store: &dyn Store, path: &Path) -> Result<Option<ContentRecord>> {
        match digest_file(path) {
            Some(checksum) => self.register(store, &checksum, path).map(Some),
            None => Ok(None),
        }
    }

    fn run_plugins(&self, store: &dyn Store, ctx: &PluginContext<'_>) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.process(store, ctx) {
                warn!(
                    "Plugin '{}' failed on {}: {}",
                    plugin.name(),
                    ctx.path.display(),
                    e
                );
            }
        }
    }
}
