//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use dockchat_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "dockchat")]
#[command(version)]
#[command(about = "Ask a knowledge-base chat service from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Ask a question and stream the answer
    Ask {
        /// The question to send
        #[arg(value_name = "QUESTION")]
        question: String,

        /// Do not append the feedback prompt to the answer
        #[arg(long = "no-feedback")]
        no_feedback: bool,

        /// Wrap width in columns
        #[arg(long, value_name = "N", env = "DOCKCHAT_WIDTH", default_value_t = 80)]
        width: usize,
    },

    /// Browse stored answers
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum HistoryCommands {
    /// Lists stored exchanges, oldest first
    List,
    /// Shows a stored exchange
    Show {
        /// Timestamp key from `history list`
        #[arg(value_name = "TS")]
        timestamp: i64,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Store the email sent with every question
    SetEmail {
        #[arg(value_name = "EMAIL")]
        email: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Dropping the guard flushes pending log lines.
    let _log_guard = logging::init(&config::paths::logs_dir()).context("init logging")?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ask {
            question,
            no_feedback,
            width,
        } => {
            let config = config::Config::load().context("load config")?;
            commands::ask::run(commands::ask::AskOptions {
                question: &question,
                config: &config,
                show_feedback: !no_feedback,
                width,
            })
            .await
        }
        Commands::History { command } => match command {
            HistoryCommands::List => commands::history::list(),
            HistoryCommands::Show { timestamp } => {
                let config = config::Config::load().context("load config")?;
                commands::history::show(timestamp, &config).await
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::SetEmail { email } => commands::config::set_email(&email),
        },
    }
}
