//! Result processors
//!
//! A processor receives the normalized page together with a layout context
//! (the base layout and the current catalog) and turns it into whatever the
//! target system ingests. [`LayoutProcessor`] builds a layout document with
//! one datasource item per placed component that carries field values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::ComponentCatalog;
use crate::page::{NormalizedPage, PlacedComponent};
use crate::storage::Storage;

/// Storage key prefix of layout documents
pub const LAYOUTS_PREFIX: &str = "layouts";

/// Layout name used when a page path normalizes to nothing
const INDEX_NAME: &str = "index";

/// Consumer of a finished page
#[async_trait]
pub trait ResultProcessor: Send + Sync {
    async fn process(&self, page: NormalizedPage, context: LayoutContext) -> Result<()>;
}

/// Raw base layout, rendered for an optional main placeholder name
pub type RawLayout = Arc<dyn Fn(Option<&str>) -> String + Send + Sync>;

/// Base layout the generated page is merged into
#[derive(Clone)]
pub struct GeneratedLayout {
    pub device_id: Option<String>,
    pub raw: RawLayout,
    pub datasources: Vec<DatasourceItem>,
}

impl GeneratedLayout {
    /// Layout with no markup and no datasources
    pub fn empty() -> Self {
        Self {
            device_id: None,
            raw: Arc::new(|_| String::new()),
            datasources: Vec::new(),
        }
    }
}

impl fmt::Debug for GeneratedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedLayout")
            .field("device_id", &self.device_id)
            .field("datasources", &self.datasources)
            .finish_non_exhaustive()
    }
}

/// Context handed to a processor with each page
#[derive(Debug, Clone)]
pub struct LayoutContext {
    pub layout: GeneratedLayout,
    pub components: ComponentCatalog,
}

impl LayoutContext {
    /// Fresh context: empty base layout, current catalog
    pub fn new(components: ComponentCatalog) -> Self {
        Self {
            layout: GeneratedLayout::empty(),
            components,
        }
    }
}

/// Whether a layout exists in the target system yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutState {
    New,
    Saved,
}

/// Content item backing a placed component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceItem {
    /// Local identifier, assigned on creation
    pub internal_id: String,
    /// Identifier in the target system, once saved there
    pub id: Option<String>,
    pub name: String,
    pub template_id: Option<String>,
    pub fields: BTreeMap<String, String>,
}

/// Placed component referencing its datasource item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutComponent {
    pub name: String,
    /// Internal id of the datasource item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<String>,
    #[serde(default)]
    pub children: BTreeMap<String, Vec<LayoutComponent>>,
}

/// Layout built from a generated page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutResult {
    pub name: String,
    pub title: String,
    pub description: String,
    pub main: Vec<LayoutComponent>,
    pub state: LayoutState,
}

/// Layout together with the datasource items it references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBuild {
    pub layout: LayoutResult,
    pub datasources: Vec<DatasourceItem>,
}

/// Convert a normalized page into a layout
///
/// Datasource items already present in the base layout are kept in front
/// of the newly allocated ones.
pub fn build_layout(page: &NormalizedPage, context: &LayoutContext) -> LayoutBuild {
    debug!(name = %page.name, "build_layout: called");
    let mut datasources = context.layout.datasources.clone();
    let main = convert(&page.page.main, &context.components, &mut datasources);

    LayoutBuild {
        layout: LayoutResult {
            name: layout_name(&page.name).to_string(),
            title: page.page.title.clone(),
            description: page.page.description.clone(),
            main,
            state: LayoutState::New,
        },
        datasources,
    }
}

fn convert(
    nodes: &[PlacedComponent],
    catalog: &ComponentCatalog,
    datasources: &mut Vec<DatasourceItem>,
) -> Vec<LayoutComponent> {
    nodes
        .iter()
        .map(|node| {
            let datasource = node.datasource.as_ref().map(|ds| {
                let template_id = ds
                    .template
                    .clone()
                    .or_else(|| catalog.get(&node.name).and_then(|c| c.datasource_template.clone()));
                let item = DatasourceItem {
                    internal_id: Uuid::now_v7().to_string(),
                    id: None,
                    name: ds.name.clone(),
                    template_id,
                    fields: ds.fields.clone(),
                };
                let internal_id = item.internal_id.clone();
                datasources.push(item);
                internal_id
            });

            let children = node
                .children
                .iter()
                .map(|(slot, kids)| (slot.clone(), convert(kids, catalog, datasources)))
                .collect();

            LayoutComponent {
                name: node.name.clone(),
                datasource,
                children,
            }
        })
        .collect()
}

fn layout_name(name: &str) -> &str {
    if name.is_empty() { INDEX_NAME } else { name }
}

/// Writes each layout document through a storage sink
pub struct LayoutProcessor {
    storage: Arc<dyn Storage>,
}

impl LayoutProcessor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ResultProcessor for LayoutProcessor {
    async fn process(&self, page: NormalizedPage, context: LayoutContext) -> Result<()> {
        debug!(name = %page.name, "LayoutProcessor::process: called");
        let LayoutBuild { layout, datasources } = build_layout(&page, &context);

        let key = format!("{}/{}", LAYOUTS_PREFIX, layout.name);
        let document = json!({
            "deviceId": context.layout.device_id,
            "layout": layout,
            "datasources": datasources,
            "raw": (context.layout.raw)(None),
        });

        self.storage
            .save(&key, &document)
            .await
            .context(format!("Failed to save layout {}", key))?;

        info!(
            "Processed layout {} with {} datasource items",
            layout.name,
            datasources.len()
        );
        Ok(())
    }
}
