//! Config command handlers.

use anyhow::{Context, Result};
use dockchat_core::config;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn set_email(email: &str) -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::save_email(email)
        .with_context(|| format!("save email to {}", config_path.display()))?;
    println!("Saved email to {}", config_path.display());
    Ok(())
}
