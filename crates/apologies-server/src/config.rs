//! Server configuration.
//!
//! Configuration is resolved in three layers: built-in defaults, an
//! optional JSON file on disk, and `param:value` overrides from the
//! command line (strongest). A config path given explicitly must exist;
//! every field is optional in the file.

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

// Configuration defaults
const DEFAULT_SERVER_HOST: &str = "localhost";
const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_CLOSE_TIMEOUT_SEC: u64 = 10;
const DEFAULT_WEBSOCKET_LIMIT: usize = 50;
const DEFAULT_TOTAL_GAME_LIMIT: usize = 1000;
const DEFAULT_IN_PROGRESS_GAME_LIMIT: usize = 25;
const DEFAULT_REGISTERED_PLAYER_LIMIT: usize = 100;
const DEFAULT_WEBSOCKET_IDLE_THRESH_MIN: u64 = 2;
const DEFAULT_WEBSOCKET_INACTIVE_THRESH_MIN: u64 = 5;
const DEFAULT_PLAYER_IDLE_THRESH_MIN: u64 = 15;
const DEFAULT_PLAYER_INACTIVE_THRESH_MIN: u64 = 30;
const DEFAULT_GAME_IDLE_THRESH_MIN: u64 = 10;
const DEFAULT_GAME_INACTIVE_THRESH_MIN: u64 = 20;
const DEFAULT_GAME_RETENTION_THRESH_MIN: u64 = 2880; // 2 days
const DEFAULT_IDLE_WEBSOCKET_CHECK_PERIOD_SEC: u64 = 120;
const DEFAULT_IDLE_WEBSOCKET_CHECK_DELAY_SEC: u64 = 300;
const DEFAULT_IDLE_PLAYER_CHECK_PERIOD_SEC: u64 = 120;
const DEFAULT_IDLE_PLAYER_CHECK_DELAY_SEC: u64 = 300;
const DEFAULT_IDLE_GAME_CHECK_PERIOD_SEC: u64 = 120;
const DEFAULT_IDLE_GAME_CHECK_DELAY_SEC: u64 = 300;
const DEFAULT_OBSOLETE_GAME_CHECK_PERIOD_SEC: u64 = 300;
const DEFAULT_OBSOLETE_GAME_CHECK_DELAY_SEC: u64 = 300;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path to the log file on disk; stdout when unset.
    pub logfile_path: Option<String>,

    /// The hostname to bind to.
    pub server_host: String,

    /// The server port to listen on.
    pub server_port: u16,

    /// Graceful-shutdown drain limit, in seconds.
    pub close_timeout_sec: u64,

    /// Max concurrent connections.
    pub websocket_limit: usize,

    /// Limit on the total number of tracked games.
    pub total_game_limit: usize,

    /// Limit on ADVERTISED plus STARTED games.
    pub in_progress_game_limit: usize,

    /// Limit on the number of registered players.
    pub registered_player_limit: usize,

    /// Minutes without traffic before an unregistered connection is idle.
    pub websocket_idle_thresh_min: u64,

    /// Minutes without traffic before an unregistered connection is
    /// forcibly closed.
    pub websocket_inactive_thresh_min: u64,

    /// Minutes without activity before a player is considered idle.
    pub player_idle_thresh_min: u64,

    /// Minutes without activity before a player is considered inactive.
    pub player_inactive_thresh_min: u64,

    /// Minutes without activity before a game is considered idle.
    pub game_idle_thresh_min: u64,

    /// Minutes without activity before a game is cancelled as inactive.
    pub game_inactive_thresh_min: u64,

    /// Minutes to retain completed or cancelled games.
    pub game_retention_thresh_min: u64,

    pub idle_websocket_check_period_sec: u64,
    pub idle_websocket_check_delay_sec: u64,
    pub idle_player_check_period_sec: u64,
    pub idle_player_check_delay_sec: u64,
    pub idle_game_check_period_sec: u64,
    pub idle_game_check_delay_sec: u64,
    pub obsolete_game_check_period_sec: u64,
    pub obsolete_game_check_delay_sec: u64,

    /// When true, SEND_MESSAGE is restricted to fellow game
    /// participants; when false, it works server-wide.
    pub game_scoped_messages: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            logfile_path: None,
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            close_timeout_sec: DEFAULT_CLOSE_TIMEOUT_SEC,
            websocket_limit: DEFAULT_WEBSOCKET_LIMIT,
            total_game_limit: DEFAULT_TOTAL_GAME_LIMIT,
            in_progress_game_limit: DEFAULT_IN_PROGRESS_GAME_LIMIT,
            registered_player_limit: DEFAULT_REGISTERED_PLAYER_LIMIT,
            websocket_idle_thresh_min: DEFAULT_WEBSOCKET_IDLE_THRESH_MIN,
            websocket_inactive_thresh_min: DEFAULT_WEBSOCKET_INACTIVE_THRESH_MIN,
            player_idle_thresh_min: DEFAULT_PLAYER_IDLE_THRESH_MIN,
            player_inactive_thresh_min: DEFAULT_PLAYER_INACTIVE_THRESH_MIN,
            game_idle_thresh_min: DEFAULT_GAME_IDLE_THRESH_MIN,
            game_inactive_thresh_min: DEFAULT_GAME_INACTIVE_THRESH_MIN,
            game_retention_thresh_min: DEFAULT_GAME_RETENTION_THRESH_MIN,
            idle_websocket_check_period_sec: DEFAULT_IDLE_WEBSOCKET_CHECK_PERIOD_SEC,
            idle_websocket_check_delay_sec: DEFAULT_IDLE_WEBSOCKET_CHECK_DELAY_SEC,
            idle_player_check_period_sec: DEFAULT_IDLE_PLAYER_CHECK_PERIOD_SEC,
            idle_player_check_delay_sec: DEFAULT_IDLE_PLAYER_CHECK_DELAY_SEC,
            idle_game_check_period_sec: DEFAULT_IDLE_GAME_CHECK_PERIOD_SEC,
            idle_game_check_delay_sec: DEFAULT_IDLE_GAME_CHECK_DELAY_SEC,
            obsolete_game_check_period_sec: DEFAULT_OBSOLETE_GAME_CHECK_PERIOD_SEC,
            obsolete_game_check_delay_sec: DEFAULT_OBSOLETE_GAME_CHECK_DELAY_SEC,
            game_scoped_messages: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then the file at `path` (which
    /// must exist when given), then `param:value` overrides.
    pub fn load(path: Option<&Path>, overrides: &[String]) -> anyhow::Result<ServerConfig> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("config path does not exist: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid config file: {}", path.display()))?
            }
            None => ServerConfig::default(),
        };
        for entry in overrides {
            let (param, value) = entry
                .split_once(':')
                .with_context(|| format!("override must look like param:value, got: {}", entry))?;
            config.apply_override(param.trim(), value.trim())?;
        }
        Ok(config)
    }

    /// Apply a single `param:value` override.
    pub fn apply_override(&mut self, param: &str, value: &str) -> anyhow::Result<()> {
        match param {
            "logfile_path" => self.logfile_path = Some(value.to_string()),
            "server_host" => self.server_host = value.to_string(),
            "server_port" => self.server_port = parse(param, value)?,
            "close_timeout_sec" => self.close_timeout_sec = parse(param, value)?,
            "websocket_limit" => self.websocket_limit = parse(param, value)?,
            "total_game_limit" => self.total_game_limit = parse(param, value)?,
            "in_progress_game_limit" => self.in_progress_game_limit = parse(param, value)?,
            "registered_player_limit" => self.registered_player_limit = parse(param, value)?,
            "websocket_idle_thresh_min" => self.websocket_idle_thresh_min = parse(param, value)?,
            "websocket_inactive_thresh_min" => {
                self.websocket_inactive_thresh_min = parse(param, value)?
            }
            "player_idle_thresh_min" => self.player_idle_thresh_min = parse(param, value)?,
            "player_inactive_thresh_min" => self.player_inactive_thresh_min = parse(param, value)?,
            "game_idle_thresh_min" => self.game_idle_thresh_min = parse(param, value)?,
            "game_inactive_thresh_min" => self.game_inactive_thresh_min = parse(param, value)?,
            "game_retention_thresh_min" => self.game_retention_thresh_min = parse(param, value)?,
            "idle_websocket_check_period_sec" => {
                self.idle_websocket_check_period_sec = parse(param, value)?
            }
            "idle_websocket_check_delay_sec" => {
                self.idle_websocket_check_delay_sec = parse(param, value)?
            }
            "idle_player_check_period_sec" => {
                self.idle_player_check_period_sec = parse(param, value)?
            }
            "idle_player_check_delay_sec" => {
                self.idle_player_check_delay_sec = parse(param, value)?
            }
            "idle_game_check_period_sec" => self.idle_game_check_period_sec = parse(param, value)?,
            "idle_game_check_delay_sec" => self.idle_game_check_delay_sec = parse(param, value)?,
            "obsolete_game_check_period_sec" => {
                self.obsolete_game_check_period_sec = parse(param, value)?
            }
            "obsolete_game_check_delay_sec" => {
                self.obsolete_game_check_delay_sec = parse(param, value)?
            }
            "game_scoped_messages" => self.game_scoped_messages = parse(param, value)?,
            other => bail!("unknown config parameter: {}", other),
        }
        Ok(())
    }

    /// Convenience: `host:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse<T>(param: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("invalid value for {}: {}", param, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.registered_player_limit, 100);
        assert_eq!(config.game_retention_thresh_min, 2880);
        assert!(!config.game_scoped_messages);
    }

    #[test]
    fn overrides_win() {
        let overrides = vec![
            "server_port:9000".to_string(),
            "registered_player_limit:2".to_string(),
        ];
        let config = ServerConfig::load(None, &overrides).unwrap();
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.registered_player_limit, 2);
    }

    #[test]
    fn bad_override_value_fails() {
        let overrides = vec!["server_port:not-a-number".to_string()];
        assert!(ServerConfig::load(None, &overrides).is_err());
    }

    #[test]
    fn unknown_override_fails() {
        let overrides = vec!["bogus:1".to_string()];
        assert!(ServerConfig::load(None, &overrides).is_err());
    }

    #[test]
    fn missing_explicit_config_path_fails() {
        let missing = Path::new("/definitely/not/a/real/config.json");
        assert!(ServerConfig::load(Some(missing), &[]).is_err());
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let parsed: ServerConfig = serde_json::from_str(r#"{"server_port": 9100}"#).unwrap();
        assert_eq!(parsed.server_port, 9100);
        assert_eq!(parsed.server_host, "localhost");
    }
}
