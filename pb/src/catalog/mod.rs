//! Component catalog
//!
//! The catalog lists the components a page may be composed of: their
//! datasource fields and the named placeholders that hold child components.
//! It is fetched from a [`ComponentsProvider`] at the start of every
//! generating turn.

use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod provider;

pub use provider::{CachedComponentsProvider, ComponentsProvider, FileComponentsProvider};

/// Field type rendered as HTML markup
pub const RICH_TEXT_FIELD: &str = "Rich Text";

/// One component available for page composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Unique component name, e.g. "Hero"
    pub name: String,

    /// What the component is for (shown to the model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Template identifier of the component's datasource items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_template: Option<String>,

    /// Datasource fields
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,

    /// Named child slots
    #[serde(default)]
    pub placeholders: Vec<Placeholder>,
}

impl Component {
    /// Create a component with neither fields nor placeholders
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            datasource_template: None,
            fields: Vec::new(),
            placeholders: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholders.push(placeholder);
        self
    }

    /// Components without fields carry no datasource
    pub fn has_datasource(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn placeholder(&self, name: &str) -> Option<&Placeholder> {
        self.placeholders.iter().find(|p| p.name == name)
    }
}

/// A datasource field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,

    /// CMS field type, e.g. "Single-Line Text" or "Rich Text"
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_field_type() -> String {
    "Single-Line Text".to_string()
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            description: None,
        }
    }

    pub fn is_rich_text(&self) -> bool {
        self.field_type.eq_ignore_ascii_case(RICH_TEXT_FIELD)
    }
}

/// A named slot for child components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placeholder {
    pub name: String,

    /// Components allowed in this slot; empty allows every catalog component
    #[serde(default)]
    pub allowed: Vec<String>,
}

impl Placeholder {
    /// A slot accepting any component
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed: Vec::new(),
        }
    }

    /// A slot accepting only the listed components
    pub fn only<I, S>(name: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

/// The set of components available in the current turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentCatalog {
    components: Vec<Component>,
}

impl ComponentCatalog {
    pub fn new(components: Vec<Component>) -> Self {
        debug!(count = components.len(), "ComponentCatalog::new: called");
        Self { components }
    }

    /// Load a catalog from a JSON (`.json`) or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(?path, "ComponentCatalog::from_file: called");
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read component catalog {}", path.display()))?;

        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let catalog = if is_json {
            serde_json::from_str(&content).context(format!("Failed to parse component catalog {}", path.display()))?
        } else {
            serde_yaml::from_str(&content).context(format!("Failed to parse component catalog {}", path.display()))?
        };
        Ok(catalog)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_catalog_yaml_roundtrip_fields() {
        let yaml = r#"
- name: Container
  placeholders:
    - name: content
- name: Hero
  description: Large banner at the top of a page
  datasourceTemplate: "{A1B2}"
  fields:
    - name: Title
    - name: Body
      type: Rich Text
"#;
        let catalog: ComponentCatalog = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(catalog.names(), vec!["Container", "Hero"]);
        let hero = catalog.get("Hero").unwrap();
        assert!(hero.has_datasource());
        assert_eq!(hero.fields[0].field_type, "Single-Line Text");
        assert!(hero.fields[1].is_rich_text());
        assert_eq!(hero.datasource_template.as_deref(), Some("{A1B2}"));

        let container = catalog.get("Container").unwrap();
        assert!(!container.has_datasource());
        assert!(container.placeholder("content").unwrap().allowed.is_empty());
    }

    #[test]
    fn test_catalog_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("components.json");
        std::fs::write(&path, r#"[{"name": "Footer", "fields": [{"name": "Copyright"}]}]"#).unwrap();

        let catalog = ComponentCatalog::from_file(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("Footer").unwrap().fields[0].name, "Copyright");
    }

    #[test]
    fn test_catalog_from_missing_file() {
        let err = ComponentCatalog::from_file("/nope/components.yml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nope/components.yml"));
    }

    #[test]
    fn test_builders() {
        let c = Component::new("Row")
            .with_field(FieldDefinition::new("Heading", "Single-Line Text"))
            .with_placeholder(Placeholder::only("columns", ["Column"]));
        assert_eq!(c.placeholder("columns").unwrap().allowed, vec!["Column".to_string()]);
        assert!(c.placeholder("missing").is_none());
    }
}
