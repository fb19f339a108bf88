//! Configuration management

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub game: GameConfig,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub bind_addr: SocketAddr,

    /// Queued outbound messages per connection before deliveries are dropped
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            outbox_capacity: 256,
        }
    }
}

/// Rules applied to every session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seconds a round stays open before it expires without a winner
    pub round_time_limit_secs: u64,

    /// Guesses each player gets per round
    pub max_attempts: u32,

    /// Members required before the game master can start a round
    pub min_players: usize,

    /// Score credited to the player who guesses the answer
    pub points_per_win: u32,

    pub max_name_len: usize,
    pub max_question_len: usize,
    pub max_answer_len: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_time_limit_secs: 60,
            max_attempts: 3,
            min_players: 2,
            points_per_win: 10,
            max_name_len: 20,
            max_question_len: 200,
            max_answer_len: 100,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.outbox_capacity == 0 {
            bail!("server.outbox_capacity must be at least 1");
        }
        Ok(())
    }
}

impl GameConfig {
    /// Round time limit as a duration
    pub fn round_time_limit(&self) -> Duration {
        Duration::from_secs(self.round_time_limit_secs)
    }

    /// Reject rules under which no round could be played
    pub fn validate(&self) -> Result<()> {
        if self.round_time_limit_secs == 0 {
            bail!("game.round_time_limit_secs must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("game.max_attempts must be at least 1");
        }
        if self.min_players < 2 {
            bail!("game.min_players must be at least 2 (the game master cannot guess)");
        }
        for (key, value) in [
            ("max_name_len", self.max_name_len),
            ("max_question_len", self.max_question_len),
            ("max_answer_len", self.max_answer_len),
        ] {
            if value == 0 {
                bail!("game.{} must be at least 1", key);
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load config from the default location, or return defaults if not found
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Check both sections; called after loading and after CLI overrides
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.game.validate()
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("guessr")
            .join("config.toml")
    }
}
