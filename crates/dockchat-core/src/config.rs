//! Configuration management for dockchat.
//!
//! Loads configuration from ${DOCKCHAT_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Version reported to the chat service with every request.
pub const CLIENT_VERSION: &str = "0.3";

/// Environment override for the chat service URL.
pub const BASE_URL_ENV: &str = "DOCKCHAT_BASE_URL";

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Merges user config values into the default template.
///
/// This ensures new comments/sections from the template are always present,
/// while preserving user's customized values.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;

    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    merge_items(doc.as_table_mut(), user_doc.as_table());

    Ok(doc.to_string())
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source.iter() {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Path resolution for dockchat configuration and data.
    //!
    //! DOCKCHAT_HOME resolution order:
    //! 1. DOCKCHAT_HOME environment variable (if set)
    //! 2. ~/.config/dockchat (default)

    use std::path::PathBuf;

    /// Returns the dockchat home directory.
    pub fn dockchat_home() -> PathBuf {
        if let Ok(home) = std::env::var("DOCKCHAT_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".dockchat"),
            |h| h.join(".config").join("dockchat"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        dockchat_home().join("config.toml")
    }

    /// Returns the path to the history file.
    pub fn history_path() -> PathBuf {
        dockchat_home().join("history.jsonl")
    }

    /// Returns the directory holding rolling log files.
    pub fn logs_dir() -> PathBuf {
        dockchat_home().join("logs")
    }
}

/// Chat service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub db_name: String,
    pub similarity_threshold: f32,
    pub chunk_cnt: u32,
    /// Bounded wait for stream cancellation (0 means do not wait).
    pub stop_wait_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.phoenix-gis.cn".to_string(),
            db_name: "QGIS".to_string(),
            similarity_threshold: 0.5,
            chunk_cnt: 5,
            stop_wait_ms: 3000,
        }
    }
}

/// Inline image fetch budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub connect_timeout_ms: u64,
    pub download_budget_ms: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            download_budget_ms: 3000,
        }
    }
}

impl ImagesConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn download_budget(&self) -> Duration {
        Duration::from_millis(self.download_budget_ms)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Email sent with each request
    pub email: String,

    /// Send previous exchanges of this session as context
    pub multi_turn: bool,

    /// Append the feedback prompt after each answer
    pub show_feedback: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub images: ImagesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            email: String::new(),
            multi_turn: false,
            show_feedback: true,
            server: ServerConfig::default(),
            images: ImagesConfig::default(),
        }
    }
}

/// Per-turn request parameters, passed explicitly into request construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    pub email: String,
    pub version: String,
    pub db_name: String,
    pub similarity_threshold: f32,
    pub chunk_cnt: u32,
    pub multi_turn: bool,
    pub show_feedback: bool,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Config::default().turn_settings()
    }
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Snapshot of the settings a turn needs.
    pub fn turn_settings(&self) -> TurnSettings {
        TurnSettings {
            email: self.email.trim().to_string(),
            version: CLIENT_VERSION.to_string(),
            db_name: self.server.db_name.clone(),
            similarity_threshold: self.server.similarity_threshold,
            chunk_cnt: self.server.chunk_cnt,
            multi_turn: self.multi_turn,
            show_feedback: self.show_feedback,
        }
    }

    /// Resolves the service URL with precedence: env > config.
    pub fn effective_base_url(&self) -> Result<String> {
        if let Ok(env_url) = std::env::var(BASE_URL_ENV) {
            let trimmed = env_url.trim();
            if !trimmed.is_empty() {
                validate_url(trimmed)?;
                return Ok(trimmed.trim_end_matches('/').to_string());
            }
        }

        let trimmed = self.server.base_url.trim();
        validate_url(trimmed)?;
        Ok(trimmed.trim_end_matches('/').to_string())
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_millis(self.server.stop_wait_ms)
    }

    /// Saves only the email field to the config file.
    pub fn save_email(email: &str) -> Result<()> {
        Self::save_email_to(&paths::config_path(), email)
    }

    /// Saves only the email field to a specific config file path.
    ///
    /// Creates the file with default template if it doesn't exist.
    /// If file exists, merges user values into the latest template.
    pub fn save_email_to(path: &Path, email: &str) -> Result<()> {
        use toml_edit::{DocumentMut, value};

        let contents = if path.exists() {
            let user_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            merge_with_template(&user_config)?
        } else {
            default_config_template().to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        doc["email"] = value(email.trim());

        Self::write_config(path, &doc.to_string())
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

fn validate_url(url: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid chat service URL: {url}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.email, "");
        assert!(config.show_feedback);
        assert_eq!(config.server.db_name, "QGIS");
        assert_eq!(config.server.chunk_cnt, 5);
        assert_eq!(config.images.download_budget(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(
            &config_path,
            "email = \"me@example.com\"\n[images]\ndownload_budget_ms = 500\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.email, "me@example.com");
        assert_eq!(config.images.download_budget(), Duration::from_millis(500));
        assert_eq!(config.images.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.server.similarity_threshold, 0.5);
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let parsed: Config = toml::from_str(default_config_template()).unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.server.base_url, defaults.server.base_url);
        assert_eq!(parsed.server.stop_wait_ms, defaults.server.stop_wait_ms);
        assert_eq!(
            parsed.images.connect_timeout_ms,
            defaults.images.connect_timeout_ms
        );
        assert_eq!(parsed.show_feedback, defaults.show_feedback);
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        assert!(config_path.exists());
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("db_name = \"QGIS\""));
        assert!(contents.contains("# Total download time allowed per image"));
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_save_email_preserves_other_values_and_comments() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "multi_turn = true\n[server]\nchunk_cnt = 9\n").unwrap();

        Config::save_email_to(&config_path, "  gis@example.com ").unwrap();

        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("# Email sent with every request"));

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.email, "gis@example.com");
        assert!(config.multi_turn);
        assert_eq!(config.server.chunk_cnt, 9);
    }

    #[test]
    fn test_turn_settings_carry_explicit_values() {
        let config = Config {
            email: " user@example.com ".to_string(),
            multi_turn: true,
            ..Default::default()
        };
        let settings = config.turn_settings();
        assert_eq!(settings.email, "user@example.com");
        assert_eq!(settings.version, CLIENT_VERSION);
        assert_eq!(settings.db_name, "QGIS");
        assert!(settings.multi_turn);
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let config = Config {
            server: ServerConfig {
                base_url: "not a url".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        // Only meaningful when the env override is absent.
        if std::env::var(BASE_URL_ENV).is_err() {
            assert!(config.effective_base_url().is_err());
        }
    }
}
