//! Page schema generation
//!
//! Derives the structured-output schema of a page from the current
//! component catalog. Construction runs in two passes:
//!
//! 1. collect every component's handle, fields and placeholders into a
//!    table (rejecting empty and duplicate names)
//! 2. resolve each placeholder's allowed components against that table and
//!    emit one registry definition per component
//!
//! Child slots point at definitions through `$ref`, so a component that
//! contains itself (directly or through others) yields a finite schema.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{Component, ComponentCatalog};
use crate::page::{PageResult, PlacedComponent};

mod registry;

pub use registry::{ANY_COMPONENT, SchemaHandle, SchemaRegistry};

/// Catalog problems that make schema construction impossible
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("component catalog is empty")]
    EmptyCatalog,

    #[error("component catalog contains a component without a name")]
    EmptyName,

    #[error("component '{0}' is defined more than once")]
    DuplicateComponent(String),

    #[error("component '{component}' declares placeholder '{placeholder}' more than once")]
    DuplicatePlaceholder { component: String, placeholder: String },

    #[error("component '{component}' placeholder '{placeholder}' references unknown component '{reference}'")]
    UnknownReference {
        component: String,
        placeholder: String,
        reference: String,
    },
}

/// Components accepted by a placeholder; `None` accepts all
type SlotRule = Option<BTreeSet<String>>;

/// First-pass table entry
struct Shape<'a> {
    component: &'a Component,
    handle: SchemaHandle,
}

/// Resolved structure of one component, used to check generated pages
#[derive(Debug, Clone, PartialEq)]
struct Resolved {
    has_datasource: bool,
    slots: BTreeMap<String, SlotRule>,
}

/// Structured-output schema of a page plus its sub-schema registry
#[derive(Debug, Clone, PartialEq)]
pub struct PageSchema {
    schema: Value,
    registry: SchemaRegistry,
    any: SchemaHandle,
    resolved: BTreeMap<String, Resolved>,
}

impl PageSchema {
    /// Build the schema for a catalog
    pub fn build(catalog: &ComponentCatalog) -> Result<Self, SchemaError> {
        debug!(components = catalog.len(), "PageSchema::build: called");
        if catalog.is_empty() {
            return Err(SchemaError::EmptyCatalog);
        }

        let mut registry = SchemaRegistry::default();
        let table = collect_shapes(catalog, &mut registry)?;
        let any = SchemaHandle::new(ANY_COMPONENT);

        let mut resolved = BTreeMap::new();
        for shape in table.values() {
            let mut slots = BTreeMap::new();
            let mut slot_schemas = Map::new();
            for placeholder in &shape.component.placeholders {
                let (rule, items) = resolve_slot(shape.component, &placeholder.name, &placeholder.allowed, &table, &any)?;
                slot_schemas.insert(
                    placeholder.name.clone(),
                    json!({ "type": "array", "items": items }),
                );
                slots.insert(placeholder.name.clone(), rule);
            }

            registry.register(&shape.handle, component_definition(shape.component, slot_schemas));
            resolved.insert(
                shape.component.name.clone(),
                Resolved {
                    has_datasource: shape.component.has_datasource(),
                    slots,
                },
            );
        }

        let variants: Vec<Value> = table.values().map(|s| s.handle.reference()).collect();
        registry.register(&any, json!({ "anyOf": variants }));

        let schema = json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "URL path of the page, e.g. /blog/getting-started",
                },
                "title": { "type": "string", "description": "Page title" },
                "description": { "type": "string", "description": "Short page description for search engines" },
                "main": {
                    "type": "array",
                    "description": "Components of the main content area, in order",
                    "items": any.reference(),
                },
            },
            "required": ["path", "title", "description", "main"],
            "additionalProperties": false,
        });

        info!("Built page schema with {} component variants", table.len());
        Ok(Self {
            schema,
            registry,
            any,
            resolved,
        })
    }

    /// Root schema without definitions
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Handle of the definition accepting any component
    pub fn any_component(&self) -> &SchemaHandle {
        &self.any
    }

    /// Component names of the discriminated variant set
    pub fn variant_names(&self) -> BTreeSet<&str> {
        self.registry.variant_names().collect()
    }

    /// Self-contained JSON Schema (root plus `$defs`)
    pub fn to_json_schema(&self) -> Value {
        let mut schema = self.schema.clone();
        schema["$defs"] = Value::Object(
            self.registry
                .definitions()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        schema
    }

    /// Structural mismatches between a page and this schema
    ///
    /// Checks component names, declared placeholders, allowed children and
    /// required datasources. An empty result means the page conforms.
    pub fn violations(&self, page: &PageResult) -> Vec<String> {
        let mut out = Vec::new();
        for (i, node) in page.main.iter().enumerate() {
            self.check_node(node, &format!("main[{}]", i), None, &mut out);
        }
        out
    }

    fn check_node(&self, node: &PlacedComponent, at: &str, allowed: Option<&BTreeSet<String>>, out: &mut Vec<String>) {
        let Some(resolved) = self.resolved.get(&node.name) else {
            out.push(format!("{}: unknown component '{}'", at, node.name));
            return;
        };

        if let Some(allowed) = allowed
            && !allowed.contains(&node.name)
        {
            out.push(format!("{}: component '{}' is not allowed here", at, node.name));
        }

        if resolved.has_datasource && node.datasource.is_none() {
            out.push(format!("{}: component '{}' is missing its datasource", at, node.name));
        }

        for (slot, children) in &node.children {
            let Some(rule) = resolved.slots.get(slot) else {
                out.push(format!("{}: component '{}' has no placeholder '{}'", at, node.name, slot));
                continue;
            };
            for (i, child) in children.iter().enumerate() {
                self.check_node(child, &format!("{}.{}[{}]", at, slot, i), rule.as_ref(), out);
            }
        }
    }
}

/// Pass one: handles for every component, keyed by component name
fn collect_shapes<'a>(
    catalog: &'a ComponentCatalog,
    registry: &mut SchemaRegistry,
) -> Result<BTreeMap<&'a str, Shape<'a>>, SchemaError> {
    let mut table = BTreeMap::new();
    for component in catalog.components() {
        if component.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if table.contains_key(component.name.as_str()) {
            return Err(SchemaError::DuplicateComponent(component.name.clone()));
        }

        let mut seen = BTreeSet::new();
        for placeholder in &component.placeholders {
            if !seen.insert(placeholder.name.as_str()) {
                return Err(SchemaError::DuplicatePlaceholder {
                    component: component.name.clone(),
                    placeholder: placeholder.name.clone(),
                });
            }
        }

        let handle = SchemaHandle::new(unique_key(&component.name, registry));
        registry.add_variant(&component.name, handle.clone());
        table.insert(component.name.as_str(), Shape { component, handle });
    }
    Ok(table)
}

/// Pass two: a placeholder's allowed components, resolved against the table
fn resolve_slot(
    component: &Component,
    placeholder: &str,
    allowed: &[String],
    table: &BTreeMap<&str, Shape<'_>>,
    any: &SchemaHandle,
) -> Result<(SlotRule, Value), SchemaError> {
    if allowed.is_empty() {
        return Ok((None, any.reference()));
    }

    let mut handles = BTreeMap::new();
    for name in allowed {
        let shape = table.get(name.as_str()).ok_or_else(|| SchemaError::UnknownReference {
            component: component.name.clone(),
            placeholder: placeholder.to_string(),
            reference: name.clone(),
        })?;
        handles.insert(name.clone(), shape.handle.reference());
    }

    let items = if handles.len() == 1 {
        handles.values().next().cloned().unwrap_or(Value::Null)
    } else {
        json!({ "anyOf": handles.values().cloned().collect::<Vec<_>>() })
    };
    Ok((Some(handles.into_keys().collect()), items))
}

/// Definition key derived from a component name
fn unique_key(name: &str, registry: &SchemaRegistry) -> String {
    let base: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    let mut key = base.clone();
    let mut n = 2;
    while registry.is_taken(&key) {
        key = format!("{}_{}", base, n);
        n += 1;
    }
    key
}

/// Object schema of one component variant
fn component_definition(component: &Component, slots: Map<String, Value>) -> Value {
    let mut properties = Map::new();
    properties.insert("name".to_string(), json!({ "type": "string", "enum": [component.name] }));

    if component.has_datasource() {
        let mut fields = Map::new();
        for field in &component.fields {
            let mut description = format!("{} field", field.field_type);
            if field.is_rich_text() {
                description.push_str(" (HTML markup, markdown is not supported)");
            }
            if let Some(extra) = &field.description {
                description.push_str(": ");
                description.push_str(extra);
            }
            fields.insert(field.name.clone(), json!({ "type": "string", "description": description }));
        }
        let field_names: Vec<&String> = fields.keys().collect();

        properties.insert(
            "datasource".to_string(),
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Content item name" },
                    "fields": {
                        "type": "object",
                        "properties": fields,
                        "required": field_names,
                        "additionalProperties": false,
                    },
                },
                "required": ["name", "fields"],
                "additionalProperties": false,
            }),
        );
    }

    if !slots.is_empty() {
        let slot_names: Vec<&String> = slots.keys().collect();
        properties.insert(
            "children".to_string(),
            json!({
                "type": "object",
                "description": "Child components by placeholder",
                "properties": slots,
                "required": slot_names,
                "additionalProperties": false,
            }),
        );
    }

    let required: Vec<&String> = properties.keys().collect();
    let mut definition = json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    });
    if let Some(description) = &component.description {
        definition["description"] = json!(description);
    }
    definition
}
