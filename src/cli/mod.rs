//! Command-line interface for the pharmacy assistant.

use clap::{Parser, Subcommand};

/// Pharmacy assistant backend
#[derive(Parser, Debug)]
#[command(name = "dispensary", version, about = "Streaming pharmacy assistant backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Ask the assistant one question and stream the answer
    Chat(ChatArgs),
    /// Print the tool schemas sent to the model
    Tools,
}

/// Arguments for the `serve` subcommand.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind (overrides BIND_ADDR)
    #[arg(short, long)]
    pub bind: Option<std::net::SocketAddr>,
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Maximum tool rounds (overrides MAX_TOOL_ROUNDS)
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Print raw event JSON instead of formatted output
    #[arg(long)]
    pub json: bool,

    /// User prompt (positional)
    pub prompt: String,
}

/// Shorten `text` to at most `max` bytes on a character boundary.
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
