//! PageBuilder - conversational page layout generator
//!
//! CLI entry point for chatting, one-shot generation and catalog inspection.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use pagebuilder::catalog::{CachedComponentsProvider, ComponentsProvider, FileComponentsProvider};
use pagebuilder::chat::{ChatContext, UiMessage};
use pagebuilder::cli::{Cli, Command, DEFAULT_SEED};
use pagebuilder::config::Config;
use pagebuilder::events::StreamEvent;
use pagebuilder::llm::create_client;
use pagebuilder::orchestrator::{BuilderSettings, PageBuilder};
use pagebuilder::processor::LayoutProcessor;
use pagebuilder::prompts::{PromptLoader, Prompts};
use pagebuilder::repl::ChatRepl;
use pagebuilder::schema::PageSchema;
use pagebuilder::storage::{FileStorage, Storage};
use pagebuilder::transport::{ChatSession, StreamChatTransport};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagebuilder")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("pagebuilder.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Pick up OPENAI_API_KEY and friends from a .env in this or a parent directory
    let dotenv_path = dotenvy::dotenv().ok();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;
    debug!(?dotenv_path, "main: environment loaded");

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(path) = &cli.catalog {
        config.catalog.path = path.clone();
    }
    if cli.refresh {
        config.catalog.refresh = true;
    }
    info!("PageBuilder loaded config: model={}", config.llm.model);

    let command = cli.command.unwrap_or(Command::Chat { text: None });
    debug!(?command, "main: dispatching command");
    match command {
        Command::Chat { text } => cmd_chat(&config, text.as_deref().unwrap_or(DEFAULT_SEED)).await,
        Command::Generate { text } => cmd_generate(&config, &text).await,
        Command::Schema => cmd_schema(&config).await,
        Command::Catalog => cmd_catalog(&config).await,
    }
}

/// Catalog provider described by the config
fn components_provider(config: &Config) -> Arc<dyn ComponentsProvider> {
    let file: Arc<dyn ComponentsProvider> = Arc::new(FileComponentsProvider::new(&config.catalog.path));
    Arc::new(CachedComponentsProvider::new(
        file,
        config.catalog.cache_dir.clone(),
        config.catalog.refresh,
    ))
}

fn load_prompts(config: &Config) -> Result<Prompts> {
    PromptLoader::new(config.prompts.dir.as_ref())
        .load_prompts(&config.prompts)
        .context("Failed to load prompts")
}

/// Pipeline wired to the configured model, catalog and storage
fn page_builder(config: &Config) -> Result<Arc<PageBuilder>> {
    debug!("page_builder: called");
    config.validate()?;
    let llm = create_client(&config.llm).context("Failed to create LLM client")?;

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&config.storage.dir));
    let processor = Arc::new(LayoutProcessor::new(storage.clone()));
    let settings = BuilderSettings {
        max_tokens: config.llm.max_tokens,
        page_key: config.storage.page_key.clone(),
    };

    Ok(Arc::new(PageBuilder::new(
        llm,
        components_provider(config),
        storage,
        processor,
        settings,
    )))
}

/// Interactive chat
async fn cmd_chat(config: &Config, seed: &str) -> Result<()> {
    debug!(%seed, "cmd_chat: called");
    let builder = page_builder(config)?;
    let prompts = load_prompts(config)?;

    let transport = StreamChatTransport::new(move |messages| {
        builder.stream_page(ChatContext::new(messages, prompts.clone()))
    });
    let mut repl = ChatRepl::new(ChatSession::new(Arc::new(transport)));
    repl.run(seed).await
}

/// One turn, printing every event as a JSON line
async fn cmd_generate(config: &Config, text: &str) -> Result<()> {
    debug!(%text, "cmd_generate: called");
    let builder = page_builder(config)?;
    let prompts = load_prompts(config)?;

    let mut stream = builder.stream_page(ChatContext::new(vec![UiMessage::user(text)], prompts));
    let mut failure = None;
    while let Some(event) = stream.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if let StreamEvent::Error { message } = event {
            failure = Some(message);
        }
    }

    match failure {
        Some(message) => Err(eyre!(message)),
        None => Ok(()),
    }
}

/// Print the page JSON Schema
async fn cmd_schema(config: &Config) -> Result<()> {
    debug!("cmd_schema: called");
    let catalog = components_provider(config).get_components().await?;
    let schema = PageSchema::build(&catalog)?;
    println!("{}", serde_json::to_string_pretty(&schema.to_json_schema())?);
    Ok(())
}

/// List catalog components
async fn cmd_catalog(config: &Config) -> Result<()> {
    debug!("cmd_catalog: called");
    let catalog = components_provider(config).get_components().await?;

    println!("{} ({} components)", "Component catalog".bright_cyan().bold(), catalog.len());
    for component in catalog.components() {
        println!();
        match &component.description {
            Some(description) => println!("{} - {}", component.name.bold(), description),
            None => println!("{}", component.name.bold()),
        }
        for field in &component.fields {
            println!("  {} {} ({})", "field".dimmed(), field.name, field.field_type);
        }
        for placeholder in &component.placeholders {
            let allowed = if placeholder.allowed.is_empty() {
                "any".to_string()
            } else {
                placeholder.allowed.join(", ")
            };
            println!("  {} {} [{}]", "slot".dimmed(), placeholder.name, allowed);
        }
    }
    Ok(())
}
