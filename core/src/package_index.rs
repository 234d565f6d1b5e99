use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

/// One installed package as the privileged package index records it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub uid: u32,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl PackageRecord {
    /// Whether the package's manifest declares the given permission string.
    pub fn declares(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PackageIndexFile {
    #[serde(default)]
    package: Vec<PackageRecord>,
}

/// The installed-package index the broker trusts to map a claimed package
/// identity to its numeric uid and declared permissions. Loaded once at
/// startup from a TOML registry of `[[package]]` tables.
#[derive(Debug, Default)]
pub struct PackageIndex {
    by_name: HashMap<String, PackageRecord>,
}

impl PackageIndex {
    /// Loads the registry. A missing file yields an empty index: the daemon
    /// still runs, but no client can authenticate, which is the fail-closed
    /// direction.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "package index {} not found; starting with an empty index",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read package index {}", path.display())
                });
            }
        };
        let file: PackageIndexFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse package index {}", path.display()))?;
        Ok(Self::from_records(file.package))
    }

    pub fn from_records(records: Vec<PackageRecord>) -> Self {
        let by_name = records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        Self { by_name }
    }

    /// Resolves a claimed identity to its installed-package record, or `None`
    /// when no such package exists.
    pub fn resolve(&self, name: &str) -> Option<&PackageRecord> {
        self.by_name.get(name)
    }

    pub fn uid_for(&self, name: &str) -> Option<u32> {
        self.resolve(name).map(|record| record.uid)
    }
}
