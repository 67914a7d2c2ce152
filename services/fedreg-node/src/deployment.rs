//! Deployment record, the registry's address book entry.

use anyhow::{Context, Result};
use fedreg_core::Identity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Hex hash of the genesis ledger entry
    pub registry_id: String,
    pub owner: Identity,
    pub ledger_path: PathBuf,
    pub deployed_at: u64,
}

impl Deployment {
    /// Load a record; `None` when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading deployment record {}", path.display()))?;
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("parsing deployment record {}", path.display()))?;
        Ok(Some(record))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("writing deployment record {}", path.display()))?;
        Ok(())
    }
}
