//! Versioned contract registry
//!
//! Built once at startup from an ABI directory laid out as one subdirectory per
//! contract version. Every file whose name contains `abi` (and not `token`) is a
//! JSON object pairing `<name>_abi` keys with `<name>_address` keys. After load
//! the registry is read-only and shared behind an `Arc`.

use alloy::json_abi::{Event, JsonAbi};
use alloy::primitives::{Address, B256};
use skale_common::{ContractName, IndexerError, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum VersionPart {
    // declared first so non-numeric components order below numeric ones
    Text(String),
    Number(u64),
}

/// Dotted `MAJOR.MINOR.PATCH` version compared component by component.
/// Malformed strings never fail; their non-numeric parts sort lowest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractVersion {
    raw: String,
    parts: Vec<VersionPart>,
}

impl ContractVersion {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_start_matches('v').to_string();
        let parts = raw
            .split('.')
            .map(|part| match part.parse::<u64>() {
                Ok(n) => VersionPart::Number(n),
                Err(_) => VersionPart::Text(part.to_string()),
            })
            .collect();
        Self { raw, parts }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for ContractVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts
            .cmp(&other.parts)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ContractVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// A contract role deployed at an address for one version
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub name: ContractName,
    pub version: ContractVersion,
    pub address: Address,
    pub abi: Arc<JsonAbi>,
}

/// Event schema indexed by its selector (topic0)
#[derive(Debug, Clone)]
pub struct EventSchema {
    pub selector: B256,
    pub event: Event,
}

#[derive(Debug, Default)]
pub struct ContractRegistry {
    by_address: HashMap<Address, Arc<ContractBinding>>,
    by_name_version: HashMap<(ContractName, ContractVersion), Arc<ContractBinding>>,
    events: HashMap<B256, Arc<EventSchema>>,
}

impl ContractRegistry {
    pub fn from_bindings(bindings: impl IntoIterator<Item = ContractBinding>) -> Self {
        let mut registry = Self::default();
        for binding in bindings {
            registry.insert(binding);
        }
        registry
    }

    fn insert(&mut self, binding: ContractBinding) {
        for event in binding.abi.events() {
            let selector = event.selector();
            self.events.entry(selector).or_insert_with(|| {
                Arc::new(EventSchema {
                    selector,
                    event: event.clone(),
                })
            });
        }

        let binding = Arc::new(binding);

        // an address reused across versions resolves to its newest binding
        let replace = match self.by_address.get(&binding.address) {
            Some(existing) => existing.version < binding.version,
            None => true,
        };
        if replace {
            self.by_address.insert(binding.address, Arc::clone(&binding));
        }

        self.by_name_version
            .insert((binding.name, binding.version.clone()), binding);
    }

    /// Load every version subdirectory under `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut version_dirs = read_dir_sorted(dir)?;
        version_dirs.retain(|p| p.is_dir());

        let mut bindings = Vec::new();
        for version_dir in version_dirs {
            let Some(version) = version_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let version = ContractVersion::parse(version);

            for file in read_dir_sorted(&version_dir)? {
                let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !file.is_file() || !file_name.contains("abi") || file_name.contains("token") {
                    continue;
                }
                let loaded = load_abi_file(&file, &version)?;
                tracing::debug!(
                    "Loaded {} contract bindings from {} (version {})",
                    loaded.len(),
                    file.display(),
                    version
                );
                bindings.extend(loaded);
            }
        }

        let registry = Self::from_bindings(bindings);
        tracing::info!(
            "Contract registry ready: {} bindings, {} addresses, {} event schemas",
            registry.by_name_version.len(),
            registry.by_address.len(),
            registry.events.len()
        );
        Ok(registry)
    }

    pub fn resolve_by_address(&self, address: &Address) -> Option<Arc<ContractBinding>> {
        self.by_address.get(address).cloned()
    }

    pub fn resolve_by_name_version(
        &self,
        name: ContractName,
        version: &ContractVersion,
    ) -> Option<Arc<ContractBinding>> {
        self.by_name_version.get(&(name, version.clone())).cloned()
    }

    /// For each requested name, all of its bindings ordered newest first, keyed
    /// by the address of the newest one.
    pub fn best_versions(&self, names: &[ContractName]) -> HashMap<Address, Vec<Arc<ContractBinding>>> {
        let mut result = HashMap::new();
        for name in names {
            let mut bindings: Vec<Arc<ContractBinding>> = self
                .by_name_version
                .values()
                .filter(|b| b.name == *name)
                .cloned()
                .collect();
            if bindings.is_empty() {
                continue;
            }
            bindings.sort_by(|a, b| b.version.cmp(&a.version));
            result.insert(bindings[0].address, bindings);
        }
        result
    }

    pub fn best_version(&self, name: ContractName) -> Option<Arc<ContractBinding>> {
        self.by_name_version
            .values()
            .filter(|b| b.name == name)
            .max_by(|a, b| a.version.cmp(&b.version))
            .cloned()
    }

    pub fn event_schema_by_id(&self, selector: &B256) -> Option<Arc<EventSchema>> {
        self.events.get(selector).cloned()
    }

    /// Every address a scrape should request logs for
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.by_address.keys().copied().collect();
        addresses.sort();
        addresses
    }

    /// Addresses of the contracts deployed under `version`
    pub fn version_addresses(&self, version: &ContractVersion) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .by_name_version
            .iter()
            .filter(|((_, v), _)| v == version)
            .map(|(_, binding)| binding.address)
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    pub fn len(&self) -> usize {
        self.by_name_version.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name_version.is_empty()
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| IndexerError::Config(format!("cannot read {}: {}", dir.display(), e)))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| IndexerError::Config(format!("cannot read {}: {}", dir.display(), e)))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn load_abi_file(path: &Path, version: &ContractVersion) -> Result<Vec<ContractBinding>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| IndexerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| IndexerError::Config(format!("invalid JSON in {}: {}", path.display(), e)))?;
    let object = document.as_object().ok_or_else(|| {
        IndexerError::Config(format!("{} is not a JSON object", path.display()))
    })?;

    let mut bindings = Vec::new();
    for (key, value) in object {
        let Some(prefix) = key.strip_suffix("_abi") else {
            continue;
        };
        let Ok(name) = prefix.parse::<ContractName>() else {
            tracing::debug!("Skipping untracked contract {} in {}", prefix, path.display());
            continue;
        };

        let address_key = format!("{}_address", prefix);
        let Some(address) = object.get(&address_key) else {
            tracing::warn!("{} has {} but no {}", path.display(), key, address_key);
            continue;
        };
        let address: Address = address
            .as_str()
            .ok_or_else(|| IndexerError::Config(format!("{} in {} is not a string", address_key, path.display())))?
            .parse()
            .map_err(|e| IndexerError::Config(format!("invalid {} in {}: {}", address_key, path.display(), e)))?;

        let abi: JsonAbi = serde_json::from_value(value.clone())
            .map_err(|e| IndexerError::Config(format!("invalid {} in {}: {}", key, path.display(), e)))?;

        bindings.push(ContractBinding {
            name,
            version: version.clone(),
            address,
            abi: Arc::new(abi),
        });
    }
    Ok(bindings)
}
