//! Interactive chat REPL

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::chat::{UiMessage, UiRole};
use crate::events::Channel;
use crate::transport::{ChatSession, ChatSnapshot, ChatStatus};

/// Terminal front end of a [`ChatSession`]
pub struct ChatRepl {
    session: ChatSession,
}

impl ChatRepl {
    pub fn new(session: ChatSession) -> Self {
        Self { session }
    }

    /// Run the REPL, starting with `seed` as the first message
    pub async fn run(&mut self, seed: &str) -> Result<()> {
        debug!(%seed, "ChatRepl::run: called");
        self.print_welcome();

        println!("{} {}", ">".bright_green(), seed);
        self.turn(seed).await?;

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            match rl.readline(&format!("{} ", ">".bright_green())) {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    match input {
                        "/quit" | "/q" | "/exit" => break,
                        "/help" | "/h" => self.print_help(),
                        "/history" => self.print_history(),
                        _ if input.starts_with('/') => {
                            println!("{} Unknown command: {}", "?".yellow(), input);
                        }
                        _ => self.turn(input).await?,
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    /// Send one message, showing progress until the turn ends
    async fn turn(&mut self, text: &str) -> Result<()> {
        let progress = tokio::spawn(show_progress(self.session.subscribe()));
        let status = self.session.send_message(text).await;
        progress.abort();
        eprint!("\r\x1b[2K");

        let snapshot = self.session.snapshot();
        match status? {
            ChatStatus::Error => {
                let message = snapshot.error.as_deref().unwrap_or("An error occurred while processing the page.");
                println!("{} {}", "Error:".red().bold(), message.red());
                println!("{}", "Enter a message to retry.".dimmed());
            }
            _ => print_reply(snapshot.messages.last()),
        }
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "Page Builder".bright_cyan().bold());
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!();
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:14} Show this help", "/help".yellow());
        println!("  {:14} Show the conversation", "/history".yellow());
        println!("  {:14} Exit", "/quit".yellow());
        println!();
    }

    fn print_history(&self) {
        let snapshot = self.session.snapshot();
        println!();
        for message in &snapshot.messages {
            let role = match message.role {
                UiRole::User => "User".bright_green(),
                UiRole::Assistant => "Assistant".bright_blue(),
            };
            let parts = serde_json::to_string(&message.parts).unwrap_or_default();
            let preview: String = parts.chars().take(120).collect();
            println!("{}: {}", role, preview);
        }
        println!();
    }
}

/// Status line while a turn is running
async fn show_progress(mut rx: watch::Receiver<ChatSnapshot>) {
    while rx.changed().await.is_ok() {
        let line = progress_line(&rx.borrow_and_update());
        eprint!("\r\x1b[2K{}", line.dimmed());
    }
}

fn progress_line(snapshot: &ChatSnapshot) -> String {
    let Some(reply) = snapshot.messages.last().filter(|m| m.role == UiRole::Assistant) else {
        return format!("{}...", snapshot.status);
    };
    if let Some(partial) = reply.parts.iter().rev().find_map(|p| match p {
        crate::chat::MessagePart::Data { id: Channel::Page, data, .. } => Some(data),
        _ => None,
    }) {
        let count = partial.as_ref().map(count_components).unwrap_or(0);
        return format!("generating page... {} components", count);
    }
    "deciding next step...".to_string()
}

/// Placed components in a (partial) page
fn count_components(page: &Value) -> usize {
    page.get("main").map(count_nodes).unwrap_or(0)
}

fn count_nodes(nodes: &Value) -> usize {
    let Some(items) = nodes.as_array() else {
        return 0;
    };
    items
        .iter()
        .map(|node| {
            let children = node
                .get("children")
                .and_then(Value::as_object)
                .map(|slots| slots.values().map(count_nodes).sum())
                .unwrap_or(0);
            1 + children
        })
        .sum()
}

fn print_reply(reply: Option<&UiMessage>) {
    let Some(reply) = reply.filter(|m| m.role == UiRole::Assistant) else {
        return;
    };

    if let Some(page) = reply.done_data(Channel::Page) {
        let title = page.get("title").and_then(Value::as_str).unwrap_or_default();
        let path = page.get("path").and_then(Value::as_str).unwrap_or_default();
        println!("{} {} ({})", "Generated page:".bright_green().bold(), title, path);
        println!("  {} components", count_components(page));
        return;
    }

    if let Some(question) = reply
        .done_data(Channel::Step)
        .and_then(|d| d.get("question"))
        .and_then(Value::as_str)
    {
        println!("{} {}", "?".bright_blue().bold(), question);
    }
}
