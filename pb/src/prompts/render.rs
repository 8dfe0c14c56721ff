//! Placeholder substitution for prompt templates

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};
use tracing::debug;

use super::Prompts;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("placeholder pattern is valid"));

/// Render a template against the prompts configuration plus extra values
///
/// `extra` wins over values from `prompts`. A placeholder with no value
/// anywhere is copied to the output unchanged.
pub fn render(template: &str, prompts: &Prompts, extra: &BTreeMap<String, String>) -> String {
    debug!(template_len = template.len(), extra_keys = extra.len(), "render: called");
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match extra.get(key).map(String::as_str).or_else(|| prompts.lookup(key)) {
                Some(value) => value.to_string(),
                None => {
                    debug!(%key, "render: unresolved placeholder left verbatim");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Time context injected as `{{timeContext}}`
pub fn time_context(now: DateTime<Utc>) -> String {
    format!("Current date and time: {}", now.to_rfc3339_opts(SecondsFormat::Secs, true))
}
