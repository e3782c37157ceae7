//! Module codec boundary.
//!
//! Parsing and emitting the on-disk format stays behind [`ModuleIo`]; the
//! pipeline only ever sees the in-memory graph. The shipped codec serializes
//! the graph as JSON, which keeps this collaborator thin and inspectable.

use crate::module::Module;
use crate::result::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Loads and stores module graphs.
pub trait ModuleIo {
    fn load(&self, path: &Path) -> Result<Module>;

    /// Writes the module, creating the output directory when missing.
    fn write(&self, module: &Module, path: &Path) -> Result<()>;
}

/// JSON-backed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonModuleIo;

impl JsonModuleIo {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleIo for JsonModuleIo {
    fn load(&self, path: &Path) -> Result<Module> {
        let raw = fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        let module: Module = serde_json::from_str(&raw)?;
        debug!("loaded module '{}' from {}", module.name, path.display());
        Ok(module)
    }

    fn write(&self, module: &Module, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| Error::FileWrite {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        let raw = serde_json::to_string_pretty(module)?;
        fs::write(path, raw).map_err(|source| Error::FileWrite {
            path: path.display().to_string(),
            source,
        })
    }
}
