//! Generated page types
//!
//! A page is a path, a title, a description and a tree of placed
//! components. Every placed component may carry a datasource (the field
//! values of its content item) and holds its children by placeholder name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::ComponentCatalog;

/// Minimum number of components with datasources the prompt asks for
pub const MIN_DATASOURCE_COMPONENTS: usize = 7;

/// Component name used for rich text blocks
const RICH_TEXT_COMPONENT: &str = "rich text";

/// The page produced by the page generation stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    pub path: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub main: Vec<PlacedComponent>,
}

/// A component instance placed on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedComponent {
    /// Catalog component name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<Datasource>,

    /// Child components by placeholder name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Vec<PlacedComponent>>,
}

/// Field values bound to a placed component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datasource {
    /// Content item name
    pub name: String,

    /// Template identifier, filled from the catalog after generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl PageResult {
    /// All placed components, depth first, in document order
    pub fn walk(&self) -> Vec<&PlacedComponent> {
        fn visit<'a>(nodes: &'a [PlacedComponent], out: &mut Vec<&'a PlacedComponent>) {
            for node in nodes {
                out.push(node);
                for children in node.children.values() {
                    visit(children, out);
                }
            }
        }

        let mut out = Vec::new();
        visit(&self.main, &mut out);
        out
    }

    /// Normalize for hand-off to a result processor
    ///
    /// Derives the external name from `path` and binds datasource template
    /// identifiers from the catalog.
    pub fn normalize(mut self, catalog: &ComponentCatalog) -> NormalizedPage {
        fn bind(nodes: &mut [PlacedComponent], catalog: &ComponentCatalog) {
            for node in nodes {
                if let Some(datasource) = node.datasource.as_mut()
                    && datasource.template.is_none()
                {
                    datasource.template = catalog.get(&node.name).and_then(|c| c.datasource_template.clone());
                }
                for children in node.children.values_mut() {
                    bind(children, catalog);
                }
            }
        }

        debug!(path = %self.path, "PageResult::normalize: called");
        bind(&mut self.main, catalog);
        NormalizedPage {
            name: normalize_path(&self.path),
            page: self,
        }
    }
}

/// A page ready for a result processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPage {
    /// Normalized path, used as the external identifier
    pub name: String,

    #[serde(flatten)]
    pub page: PageResult,
}

/// Normalize a page path into an identifier
///
/// Slashes are removed, every other character outside `[A-Za-z0-9_]` becomes
/// `-`, and the result is lower-cased. Idempotent.
pub fn normalize_path(path: &str) -> String {
    path.chars()
        .filter(|c| *c != '/')
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

/// Check a generated page against the prompt's layout rules
///
/// The rules are advisory; the returned warnings are only reported.
pub fn review(page: &PageResult, catalog: &ComponentCatalog) -> Vec<String> {
    debug!(path = %page.path, "review: called");
    let mut warnings = Vec::new();

    match page.main.first() {
        Some(first) if first.name.to_lowercase().contains("container") => {}
        Some(first) => warnings.push(format!(
            "main content area starts with '{}' instead of a container component",
            first.name
        )),
        None => warnings.push("main content area is empty".to_string()),
    }

    let components = page.walk();

    let with_datasource = components.iter().filter(|c| c.datasource.is_some()).count();
    if with_datasource < MIN_DATASOURCE_COMPONENTS {
        warnings.push(format!(
            "only {} components with datasources (expected at least {})",
            with_datasource, MIN_DATASOURCE_COMPONENTS
        ));
    }

    let rich_text = components
        .iter()
        .filter(|c| c.name.eq_ignore_ascii_case(RICH_TEXT_COMPONENT))
        .count();
    if rich_text > 1 {
        warnings.push(format!("{} rich text components used", rich_text));
    }

    for component in &components {
        let (Some(datasource), Some(definition)) = (&component.datasource, catalog.get(&component.name)) else {
            continue;
        };
        for field in definition.fields.iter().filter(|f| f.is_rich_text()) {
            if let Some(value) = datasource.fields.get(&field.name)
                && looks_like_markdown(value)
            {
                warnings.push(format!(
                    "field '{}' of '{}' looks like markdown, expected HTML",
                    field.name, datasource.name
                ));
            }
        }
    }

    warnings
}

fn looks_like_markdown(value: &str) -> bool {
    if value.contains('<') {
        return false;
    }
    value.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("# ") || line.starts_with("## ") || line.starts_with("- ") || line.contains("**")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Component, FieldDefinition, Placeholder};

    fn leaf(name: &str, fields: &[(&str, &str)]) -> PlacedComponent {
        PlacedComponent {
            name: name.to_string(),
            datasource: Some(Datasource {
                name: format!("{} item", name),
                template: None,
                fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            }),
            children: BTreeMap::new(),
        }
    }

    fn container(children: Vec<PlacedComponent>) -> PlacedComponent {
        PlacedComponent {
            name: "Container".to_string(),
            datasource: None,
            children: BTreeMap::from([("content".to_string(), children)]),
        }
    }

    fn catalog() -> ComponentCatalog {
        let mut hero = Component::new("Hero")
            .with_field(FieldDefinition::new("Title", "Single-Line Text"))
            .with_field(FieldDefinition::new("Body", "Rich Text"));
        hero.datasource_template = Some("{HERO-TEMPLATE}".to_string());
        ComponentCatalog::new(vec![
            Component::new("Container").with_placeholder(Placeholder::any("content")),
            hero,
            Component::new("Rich Text").with_field(FieldDefinition::new("Text", "Rich Text")),
        ])
    }

    #[test]
    fn test_normalize_path_example() {
        assert_eq!(normalize_path("My/Blog Post!"), "myblog-post-");
        assert_eq!(normalize_path("/blog/react_hooks"), "blogreact_hooks");
    }

    #[test]
    fn test_normalize_path_idempotent() {
        for path in ["My/Blog Post!", "/", "", "über/straße", "a-b_c"] {
            let once = normalize_path(path);
            assert_eq!(normalize_path(&once), once);
        }
    }

    #[test]
    fn test_walk_is_depth_first() {
        let page = PageResult {
            path: "/".to_string(),
            title: "Home".to_string(),
            description: String::new(),
            main: vec![container(vec![leaf("Hero", &[]), leaf("Hero", &[])]), leaf("Footer", &[])],
        };
        let names: Vec<&str> = page.walk().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Container", "Hero", "Hero", "Footer"]);
    }

    #[test]
    fn test_normalize_binds_templates() {
        let page = PageResult {
            path: "/Blog/Home".to_string(),
            title: "Home".to_string(),
            description: String::new(),
            main: vec![container(vec![leaf("Hero", &[("Title", "Hi")])])],
        };

        let normalized = page.normalize(&catalog());
        assert_eq!(normalized.name, "bloghome");
        let hero = &normalized.page.main[0].children["content"][0];
        assert_eq!(
            hero.datasource.as_ref().unwrap().template.as_deref(),
            Some("{HERO-TEMPLATE}")
        );
    }

    #[test]
    fn test_normalized_page_serializes_flat() {
        let page = PageResult {
            path: "/a".to_string(),
            title: "A".to_string(),
            description: "d".to_string(),
            main: vec![],
        };
        let json = serde_json::to_value(page.normalize(&catalog())).unwrap();
        assert_eq!(json["name"], "a");
        assert_eq!(json["path"], "/a");
        assert_eq!(json["title"], "A");
    }

    #[test]
    fn test_review_flags_rule_violations() {
        let page = PageResult {
            path: "/".to_string(),
            title: "Home".to_string(),
            description: String::new(),
            main: vec![
                leaf("Hero", &[("Body", "# Heading\n**bold**")]),
                leaf("Rich Text", &[("Text", "<p>a</p>")]),
                leaf("Rich Text", &[("Text", "<p>b</p>")]),
            ],
        };

        let warnings = review(&page, &catalog());
        assert!(warnings.iter().any(|w| w.contains("instead of a container")));
        assert!(warnings.iter().any(|w| w.contains("only 3 components")));
        assert!(warnings.iter().any(|w| w.contains("2 rich text")));
        assert!(warnings.iter().any(|w| w.contains("looks like markdown")));
    }

    #[test]
    fn test_review_accepts_well_formed_page() {
        let heroes = (0..7).map(|_| leaf("Hero", &[("Body", "<p>Hello</p>")])).collect();
        let page = PageResult {
            path: "/".to_string(),
            title: "Home".to_string(),
            description: String::new(),
            main: vec![container(heroes)],
        };
        assert!(review(&page, &catalog()).is_empty());
    }
}
