//! Named sub-schema registry
//!
//! Component schemas are stored once under a key and referenced through
//! `$ref`, which keeps recursive component containment finite.

use std::collections::BTreeMap;

use serde_json::{Value, json};

/// Key of the definition accepting any catalog component
pub const ANY_COMPONENT: &str = "AnyComponent";

/// Reference to a registered sub-schema
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaHandle {
    key: String,
}

impl SchemaHandle {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `{"$ref": "#/$defs/<key>"}`
    pub fn reference(&self) -> Value {
        json!({ "$ref": format!("#/$defs/{}", self.key) })
    }
}

/// Registered sub-schemas and the handle of every component variant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    definitions: BTreeMap<String, Value>,
    variants: BTreeMap<String, SchemaHandle>,
}

impl SchemaRegistry {
    pub(crate) fn register(&mut self, handle: &SchemaHandle, definition: Value) {
        self.definitions.insert(handle.key().to_string(), definition);
    }

    pub(crate) fn add_variant(&mut self, component: &str, handle: SchemaHandle) {
        self.variants.insert(component.to_string(), handle);
    }

    pub(crate) fn is_taken(&self, key: &str) -> bool {
        key == ANY_COMPONENT || self.variants.values().any(|h| h.key() == key)
    }

    /// Handle of a component variant
    pub fn handle(&self, component: &str) -> Option<&SchemaHandle> {
        self.variants.get(component)
    }

    pub fn definition(&self, key: &str) -> Option<&Value> {
        self.definitions.get(key)
    }

    /// All definitions, keyed for `$defs`
    pub fn definitions(&self) -> &BTreeMap<String, Value> {
        &self.definitions
    }

    /// Component names of the discriminated variant set
    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reference() {
        let handle = SchemaHandle::new("Hero");
        assert_eq!(handle.reference(), json!({"$ref": "#/$defs/Hero"}));
    }

    #[test]
    fn test_registry_tracks_keys() {
        let mut registry = SchemaRegistry::default();
        let handle = SchemaHandle::new("Hero");
        registry.register(&handle, json!({"type": "object"}));
        registry.add_variant("Hero", handle);

        assert!(registry.is_taken("Hero"));
        assert!(registry.is_taken(ANY_COMPONENT));
        assert!(!registry.is_taken("Footer"));
        assert_eq!(registry.variant_names().collect::<Vec<_>>(), vec!["Hero"]);
        assert!(registry.definition("Hero").is_some());
    }
}
