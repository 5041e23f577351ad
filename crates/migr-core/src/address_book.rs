//! Named address resolution
//!
//! Contract names map to addresses through deployment records
//! (`<Name>.json` with an `address` field, as written by hardhat-deploy)
//! plus names declared in configuration.

use crate::error::ConfigError;
use indexmap::IndexMap;
use migr_chain::Address;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DeploymentRecord {
    address: Address,
}

/// Name to address mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBook {
    entries: IndexMap<String, Address>,
}

impl AddressBook {
    /// Empty book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` deployment record in `dir`, sorted by file name
    ///
    /// Files without an `address` field (e.g. `.chainId` metadata) are skipped.
    ///
    /// # Errors
    /// Returns `ConfigError::Io` if the directory cannot be read
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let io_err = |e: std::io::Error| ConfigError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        };

        let mut files: Vec<_> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut book = Self::new();
        for path in files {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            match serde_json::from_str::<DeploymentRecord>(&raw) {
                Ok(record) => book.insert(name, record.address),
                Err(e) => tracing::debug!(file = %path.display(), error = %e, "not a deployment record"),
            }
        }
        tracing::debug!(dir = %dir.display(), count = book.len(), "loaded deployment records");
        Ok(book)
    }

    /// Add or replace a name
    pub fn insert(&mut self, name: impl Into<String>, address: Address) {
        self.entries.insert(name.into(), address);
    }

    /// Add a name given as text
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if `value` is not an address literal
    pub fn insert_literal(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let address = parse_literal(value).ok_or_else(|| {
            ConfigError::invalid(name, format!("`{value}` is not an address"))
        })?;
        self.insert(name, address);
        Ok(())
    }

    /// Resolve a `0x` literal or a known name
    ///
    /// # Errors
    /// Returns `UnknownAddress` naming the reference
    pub fn resolve(&self, reference: &str) -> Result<Address, ConfigError> {
        let reference = reference.trim();
        if reference.starts_with("0x") {
            return parse_literal(reference)
                .ok_or_else(|| ConfigError::UnknownAddress(reference.to_string()));
        }
        self.entries
            .get(reference)
            .copied()
            .ok_or_else(|| ConfigError::UnknownAddress(reference.to_string()))
    }

    /// Address for a name, if known
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Address> {
        self.entries.get(name).copied()
    }

    /// All entries in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&str, Address)> {
        self.entries.iter().map(|(name, address)| (name.as_str(), *address))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the book has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_literal(value: &str) -> Option<Address> {
    let value = value.trim();
    if value.len() == 42 && value.starts_with("0x") {
        value.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_deployment_records_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("SystemDictatorProxy.json"),
            r#"{"address": "0x5FbDB2315678afecb367f032d93F642f64180aa3", "abi": []}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("L1StandardBridge.json"),
            r#"{"address": "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("metadata.json"), r#"{"solcVersion": "0.8.15"}"#).unwrap();
        fs::write(dir.path().join(".chainId"), "5").unwrap();

        let book = AddressBook::load_dir(dir.path()).unwrap();
        let names: Vec<_> = book.entries().map(|(name, _)| name).collect();

        assert_eq!(names, vec!["L1StandardBridge", "SystemDictatorProxy"]);
        assert_eq!(
            book.resolve("SystemDictatorProxy").unwrap(),
            "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn resolves_literals_and_reports_unknown_names() {
        let book = AddressBook::new();
        let literal = "0x0000000000000000000000000000000000000042";

        assert_eq!(book.resolve(literal).unwrap(), literal.parse::<Address>().unwrap());
        assert!(matches!(
            book.resolve("OptimismPortalProxy"),
            Err(ConfigError::UnknownAddress(name)) if name == "OptimismPortalProxy"
        ));
        assert!(book.resolve("0x1234").is_err());
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = AddressBook::load_dir(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
