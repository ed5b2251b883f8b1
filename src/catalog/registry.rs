//! Static type registry backed by a serde-loadable type table

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use super::{TypeCatalog, TypeDef};

/// Errors that can occur when building a registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Duplicate type definition
    #[error("duplicate type definition: {fqn}")]
    Duplicate { fqn: String },

    /// Error reading the type table file
    #[error("error reading type table: {0}")]
    Io(#[from] std::io::Error),

    /// The type table is not valid JSON for the expected shape
    #[error("invalid type table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// JSON structure of a type table
#[derive(Deserialize)]
struct TypeTable {
    types: Vec<TypeDef>,
}

/// Registry of type definitions, keyed by fully qualified name
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeDef>,
}

impl TypeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type definition
    pub fn register(&mut self, def: TypeDef) -> Result<(), RegistryError> {
        if self.types.contains_key(&def.fqn) {
            return Err(RegistryError::Duplicate { fqn: def.fqn });
        }
        self.types.insert(def.fqn.clone(), def);
        Ok(())
    }

    /// Builder-style [`TypeRegistry::register`]
    pub fn with_type(mut self, def: TypeDef) -> Result<Self, RegistryError> {
        self.register(def)?;
        Ok(self)
    }

    /// Load a registry from a JSON type table (`{"types": [...]}`)
    pub fn from_json_str(content: &str) -> Result<Self, RegistryError> {
        let table: TypeTable = serde_json::from_str(content)?;
        let mut registry = Self::new();
        for def in table.types {
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Load a registry from a JSON type table file
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeCatalog for TypeRegistry {
    fn find_type(&self, fqn: &str) -> Option<&TypeDef> {
        self.types.get(fqn)
    }

    fn types(&self) -> Box<dyn Iterator<Item = &TypeDef> + '_> {
        Box::new(self.types.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TypeKind;

    const TABLE: &str = r#"{
        "types": [
            {"fqn": "constructs.Construct", "kind": "class",
             "initializer": {"parameters": [
                {"name": "scope", "type": {"fqn": "constructs.Construct"}},
                {"name": "id", "type": "string"}]}},
            {"fqn": "pkg.IQueue", "kind": "interface"},
            {"fqn": "pkg.Queue", "kind": "class", "base": "constructs.Construct",
             "interfaces": ["pkg.IQueue"],
             "properties": [{"name": "queueArn", "type": "string"}]},
            {"fqn": "pkg.QueueBase", "kind": "class", "abstract": true,
             "interfaces": ["pkg.IQueue"]},
            {"fqn": "pkg.Encryption", "kind": "enum", "members": ["NONE", "KMS"]}
        ]
    }"#;

    #[test]
    fn test_load_table() {
        let registry = TypeRegistry::from_json_str(TABLE).expect("Should load");
        assert_eq!(registry.len(), 5);
        let queue = registry.find_type("pkg.Queue").expect("Should find");
        assert!(queue.is_class());
        assert!(matches!(queue.kind, TypeKind::Class { .. }));
        assert_eq!(
            registry.find_type("pkg.Encryption").unwrap().enum_members(),
            Some(&["NONE".to_string(), "KMS".to_string()][..])
        );
    }

    #[test]
    fn test_extends_and_implementors() {
        let registry = TypeRegistry::from_json_str(TABLE).unwrap();
        let queue = registry.find_type("pkg.Queue").unwrap();
        assert!(registry.extends(queue, "constructs.Construct"));
        assert!(registry.extends(queue, "pkg.IQueue"));
        assert!(!registry.extends(queue, "pkg.Encryption"));

        let names: Vec<&str> = registry
            .implementors("pkg.IQueue")
            .iter()
            .map(|t| t.fqn.as_str())
            .collect();
        assert_eq!(names, vec!["pkg.Queue"]);
    }

    #[test]
    fn test_inherited_properties() {
        let registry = TypeRegistry::from_json_str(TABLE).unwrap();
        let queue = registry.find_type("pkg.Queue").unwrap();
        let props: Vec<&str> = registry
            .all_properties(queue)
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(props, vec!["queueArn"]);
    }

    #[test]
    fn test_duplicate_error() {
        let table = r#"{"types": [
            {"fqn": "pkg.A", "kind": "interface"},
            {"fqn": "pkg.A", "kind": "interface"}
        ]}"#;
        assert!(matches!(
            TypeRegistry::from_json_str(table),
            Err(RegistryError::Duplicate { .. })
        ));
    }
}
