//! Data type registry
//!
//! Items carry a numeric [`DataType`]. The registry maps codes to names
//! (usually mime types) so headers can record which types an index holds.
//! The store only resolves through the [`TypeRegistry`] trait and never
//! mutates the registry it is given.

use crate::storage::error::StoreFault;
use crate::storage::types::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Lookup interface used by index stores
pub trait TypeRegistry: Send + Sync + fmt::Debug {
    /// Type with code `value`, if registered
    fn resolve_by_value(&self, value: u16) -> Option<DataType>;

    /// Type registered under `name`
    fn resolve_by_name(&self, name: &str) -> Option<DataType>;

    /// Name registered for `data_type`
    fn name_of(&self, data_type: DataType) -> Option<String>;
}

/// Registered type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeEntry {
    pub code: u16,
    pub name: String,
}

/// In-memory registry, optionally persisted as JSON
#[derive(Debug, Default)]
pub struct DataTypeRegistry {
    /// Entries indexed by code
    entries: Vec<DataTypeEntry>,
    /// Name to code lookup
    name_to_code: HashMap<String, u16>,
}

impl DataTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in types
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for name in [
            "application/octet-stream",
            "application/x-index-reference",
            "text/plain",
            "application/json",
        ] {
            registry.register(name);
        }
        registry
    }

    /// Load from JSON file, falling back to the built-in types
    pub fn load(path: &Path) -> Result<Self, StoreFault> {
        if !path.exists() {
            return Ok(Self::builtin());
        }

        let content = std::fs::read_to_string(path)?;
        let entries: Vec<DataTypeEntry> = serde_json::from_str(&content)
            .map_err(|e| StoreFault::Serialization(e.to_string()))?;

        let mut registry = Self::new();
        for entry in entries {
            if entry.code as usize != registry.entries.len() {
                return Err(StoreFault::Corruption(format!(
                    "Type registry codes are not dense at '{}'",
                    entry.name
                )));
            }
            registry.register(&entry.name);
        }

        Ok(registry)
    }

    /// Save to JSON file
    pub fn save(&self, path: &Path) -> Result<(), StoreFault> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StoreFault::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Register a type name, returning its code
    pub fn register(&mut self, name: &str) -> DataType {
        if let Some(&code) = self.name_to_code.get(name) {
            return DataType(code);
        }

        let code = self.entries.len() as u16;
        self.name_to_code.insert(name.to_string(), code);
        self.entries.push(DataTypeEntry {
            code,
            name: name.to_string(),
        });
        DataType(code)
    }

    pub fn all(&self) -> &[DataTypeEntry] {
        &self.entries
    }
}

impl TypeRegistry for DataTypeRegistry {
    fn resolve_by_value(&self, value: u16) -> Option<DataType> {
        self.entries.get(value as usize).map(|e| DataType(e.code))
    }

    fn resolve_by_name(&self, name: &str) -> Option<DataType> {
        self.name_to_code.get(name).map(|&code| DataType(code))
    }

    fn name_of(&self, data_type: DataType) -> Option<String> {
        self.entries.get(data_type.0 as usize).map(|e| e.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_codes() {
        let registry = DataTypeRegistry::builtin();
        assert_eq!(
            registry.resolve_by_name("application/octet-stream"),
            Some(DataType::OCTET_STREAM)
        );
        assert_eq!(
            registry.resolve_by_name("application/x-index-reference"),
            Some(DataType::INDEX_REFERENCE)
        );
        assert_eq!(registry.name_of(DataType(2)).as_deref(), Some("text/plain"));
        assert_eq!(registry.resolve_by_value(99), None);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = DataTypeRegistry::builtin();
        let a = registry.register("image/png");
        let b = registry.register("image/png");
        assert_eq!(a, b);
        assert_eq!(registry.all().len(), 5);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta").join("types.json");

        let mut registry = DataTypeRegistry::builtin();
        let png = registry.register("image/png");
        registry.save(&path).unwrap();

        let loaded = DataTypeRegistry::load(&path).unwrap();
        assert_eq!(loaded.resolve_by_name("image/png"), Some(png));
        assert_eq!(loaded.all(), registry.all());
    }

    #[test]
    fn test_load_missing_gives_builtin() {
        let dir = tempdir().unwrap();
        let registry = DataTypeRegistry::load(&dir.path().join("none.json")).unwrap();
        assert_eq!(registry.all().len(), 4);
    }
}
