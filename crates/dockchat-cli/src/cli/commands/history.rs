//! History command handlers.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use dockchat_core::config::Config;
use dockchat_core::history::{HistoryStore, JsonlHistoryStore};

use super::ask::TerminalSession;

const SHOW_WIDTH: usize = 80;

pub fn list() -> Result<()> {
    let entries = JsonlHistoryStore::open_default()
        .list()
        .context("list history")?;
    if entries.is_empty() {
        println!("No history found.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {}  {}",
            entry.timestamp,
            format_timestamp(entry.timestamp),
            entry.question_preview
        );
    }
    Ok(())
}

pub async fn show(timestamp: i64, config: &Config) -> Result<()> {
    let mut terminal = TerminalSession::open(config, config.turn_settings(), SHOW_WIDTH)?;
    let found = terminal
        .session
        .show_history(timestamp)
        .await
        .with_context(|| format!("load history entry {timestamp}"))?;
    if !found {
        bail!("No history entry at {timestamp}");
    }
    terminal.finish()
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0).map_or_else(
        || "unknown".to_string(),
        |dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
    )
}
