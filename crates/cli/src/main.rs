//! Kaputa CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write a default config file
//! - `chat`    — Interactive chat or single-message mode
//! - `models`  — List models that support content generation

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "kaputa",
    about = "Kaputa — chat with a hosted model, optionally grounded in a document, the web or a transcript",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Chat with the assistant
    Chat(commands::chat::ChatArgs),

    /// List models available to the configured API key
    Models,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so replies on stdout stay clean
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(cli.verbose)));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat(args) => commands::chat::run(args).await?,
        Commands::Models => commands::models::run().await?,
    }

    Ok(())
}

/// Log filter used when `RUST_LOG` is unset. Quiet by default so the
/// chat prompt is not interleaved with turn logs.
fn default_filter(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

/// Resolve `~`-relative paths given on the command line.
pub(crate) fn expand_path(path: PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            Some(home) => PathBuf::from(home).join(rest),
            None => path,
        },
        Err(_) => path,
    }
}
