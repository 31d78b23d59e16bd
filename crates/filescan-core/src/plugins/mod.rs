//! Content plugins run once per newly registered checksum.
//!
//! Plugins are handed to [`ChecksumRegistry::with_plugin`] explicitly at
//! startup; nothing is discovered at runtime.
//!
//! [`ChecksumRegistry::with_plugin`]: crate::hasher::ChecksumRegistry::with_plugin

pub mod python;

pub use python::PythonIdentifiers;

use crate::error::Result;
use crate::storage::models::ContentRecord;
use crate::storage::Store;
use std::path::Path;

/// What a plugin gets to know about the content it is asked to process.
pub struct PluginContext<'a> {
    /// The file whose bytes produced `content`.
    pub path: &'a Path,
    pub content: &'a ContentRecord,
}

pub trait ContentPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Extract facts from the file and persist them keyed by `ctx.content`.
    /// Errors are reported by the caller and never abort a scan.
    fn process(&self, store: &dyn Store, ctx: &PluginContext<'_>) -> Result<()>;
}
