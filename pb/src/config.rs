//! PageBuilder configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Project-local config file name
const LOCAL_CONFIG: &str = ".pagebuilder.yml";

/// Main PageBuilder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Prompt template configuration
    pub prompts: PromptsConfig,

    /// Component catalog source
    pub catalog: CatalogConfig,

    /// Where generated pages and layouts are written
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Fail fast when the model API key is missing from the environment
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "No model API key: set {} (in the environment or a .env file)",
                self.llm.api_key_env
            ));
        }
        Ok(())
    }

    /// Implicit config locations, most specific first
    ///
    /// `./.pagebuilder.yml`, then `<config_dir>/pagebuilder/pagebuilder.yml`.
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("pagebuilder").join("pagebuilder.yml"));
        }
        paths
    }

    /// Load the explicit file, else the first readable implicit one, else defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for path in Self::search_paths().iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("Skipping config {}: {:#}", path.display(), e),
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed here; the full `load` reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let paths = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::search_paths(),
        };
        let content = paths.iter().find_map(|p| fs::read_to_string(p).ok())?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Invalid config YAML")?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "openai" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).context(format!("{} is not set", self.api_key_env))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4.1-nano".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// Prompt template configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory holding `choose-step.pmt` / `generate-page.pmt` overrides
    pub dir: Option<PathBuf>,

    /// Free text injected into the page generation prompt
    #[serde(rename = "global-context")]
    pub global_context: Option<String>,

    /// Extra `{{name}}` substitutions available to both templates
    pub variables: BTreeMap<String, String>,
}

/// Component catalog source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog file (YAML or JSON)
    pub path: PathBuf,

    /// Directory for the cached catalog copy (no disk cache when unset)
    #[serde(rename = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// Ignore the disk cache on the first fetch
    pub refresh: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("components.yml"),
            cache_dir: None,
            refresh: false,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving generated pages and layouts
    pub dir: PathBuf,

    /// Key the raw generated page is saved under
    #[serde(rename = "page-key")]
    pub page_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".pagebuilder/pages"),
            page_key: "page".to_string(),
        }
    }
}
