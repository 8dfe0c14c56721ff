//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to the
//! embedded defaults, and assembles the `Prompts` configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{embedded, render, time_context};
use crate::config::PromptsConfig;

/// System prompt of one model stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePrompt {
    pub system: String,
}

/// Prompt configuration of a chat
///
/// Recognized options: `chooseStep.system`, `generatePage.system`,
/// `globalContext`. `variables` adds further flat `{{name}}` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompts {
    pub choose_step: StagePrompt,
    pub generate_page: StagePrompt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_context: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            choose_step: StagePrompt {
                system: embedded::CHOOSE_STEP.to_string(),
            },
            generate_page: StagePrompt {
                system: embedded::GENERATE_PAGE.to_string(),
            },
            global_context: None,
            variables: BTreeMap::new(),
        }
    }
}

impl Prompts {
    /// Value of a flat placeholder key
    ///
    /// `globalContext` is always known; unset it resolves to "".
    pub fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "globalContext" => Some(self.global_context.as_deref().unwrap_or("")),
            other => self.variables.get(other).map(String::as_str),
        }
    }

    /// Rendered system prompt of the step decision stage
    pub fn choose_step_system(&self, now: DateTime<Utc>) -> String {
        debug!("Prompts::choose_step_system: called");
        render(&self.choose_step.system, self, &Self::runtime_values(now))
    }

    /// Rendered system prompt of the page generation stage
    pub fn generate_page_system(&self, now: DateTime<Utc>) -> String {
        debug!("Prompts::generate_page_system: called");
        render(&self.generate_page.system, self, &Self::runtime_values(now))
    }

    fn runtime_values(now: DateTime<Utc>) -> BTreeMap<String, String> {
        BTreeMap::from([("timeContext".to_string(), time_context(now))])
    }
}

/// Loads prompt templates
pub struct PromptLoader {
    /// User override directory
    user_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a new prompt loader looking into `dir` first
    pub fn new(dir: Option<impl AsRef<Path>>) -> Self {
        let user_dir = dir.map(|d| d.as_ref().to_path_buf()).filter(|d| d.exists());
        debug!(?user_dir, "PromptLoader::new: called");
        Self { user_dir }
    }

    /// Create a loader that only uses embedded prompts (for testing)
    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self { user_dir: None }
    }

    /// Load a template by name
    ///
    /// Checks in order:
    /// 1. User override: `{dir}/{name}.pmt`
    /// 2. Embedded fallback
    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref user_dir) = self.user_dir {
            let path = user_dir.join(format!("{}.pmt", name));
            if path.exists() {
                info!("Using prompt override {}", path.display());
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read user prompt {}: {}", path.display(), e));
            }
            debug!(?path, "PromptLoader::load_template: not found in user override");
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!(%name, "PromptLoader::load_template: found in embedded");
            return Ok(content.to_string());
        }

        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Assemble the prompts configuration for a chat
    pub fn load_prompts(&self, config: &PromptsConfig) -> Result<Prompts> {
        debug!("PromptLoader::load_prompts: called");
        Ok(Prompts {
            choose_step: StagePrompt {
                system: self.load_template("choose-step")?,
            },
            generate_page: StagePrompt {
                system: self.load_template("generate-page")?,
            },
            global_context: config.global_context.clone(),
            variables: config.variables.clone(),
        })
    }
}
