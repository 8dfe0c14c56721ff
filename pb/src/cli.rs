//! CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Seed message of a chat started without text
pub const DEFAULT_SEED: &str = "Generate a page for a blog about React development.";

/// PageBuilder - conversational page layout generator
#[derive(Debug, Parser)]
#[command(
    name = "pb",
    about = "Conversational page layout generator for component-based sites",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Component catalog file, overriding the config
    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Bypass the on-disk catalog cache
    #[arg(long, global = true)]
    pub refresh: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Chat interactively until a page is generated (default)
    Chat {
        /// First message of the conversation
        text: Option<String>,
    },

    /// Run a single turn and print every event as a JSON line
    Generate {
        /// Page brief
        text: String,
    },

    /// Print the page JSON Schema derived from the catalog
    Schema,

    /// List the components of the catalog
    Catalog,
}
