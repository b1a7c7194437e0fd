use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";

const ENV_API_BASE_URL: &str = "SERVICEHUB_API_BASE_URL";
const ENV_WS_BASE_URL: &str = "SERVICEHUB_WS_BASE_URL";
const ENV_DATA_DIR: &str = "SERVICEHUB_DATA_DIR";

/// Client configuration, read from a JSON file and then from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub ws_base_url: String,
    /// Directory holding `session.db`.
    pub data_dir: PathBuf,
    pub reconnect_delay_secs: u64,
    pub unread_poll_secs: u64,
    pub history_page_size: u32,
    pub otp_resend_secs: u64,
    /// Where the user is sent when the session is irrecoverably lost.
    pub login_route: String,
    pub request_timeout_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            ws_base_url: "ws://localhost:8001".to_string(),
            data_dir: PathBuf::from("data"),
            reconnect_delay_secs: 3,
            unread_poll_secs: 30,
            history_page_size: 50,
            otp_resend_secs: 60,
            login_route: "/login".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl AppConfig {
    pub fn session_db_path(&self) -> PathBuf {
        self.data_dir.join("session.db")
    }

    /// Never below one second, so a refused connect cannot spin.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs.max(1))
    }

    pub fn unread_poll_interval(&self) -> Duration {
        Duration::from_secs(self.unread_poll_secs.max(1))
    }

    pub fn otp_resend_cooldown(&self) -> Duration {
        Duration::from_secs(self.otp_resend_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Applies `SERVICEHUB_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup(ENV_WS_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.ws_base_url = url;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    config.apply_env();
    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("absent.json");
        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.reconnect_delay_secs, 3);
        assert_eq!(config.unread_poll_secs, 30);
        assert_eq!(config.login_route, "/login");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("client.json");
        fs::write(&path, r#"{"reconnect_delay_secs": 7}"#).unwrap();

        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.reconnect_delay(), Duration::from_secs(7));
        assert_eq!(config.history_page_size, 50);
    }

    #[test]
    fn zero_durations_are_clamped() {
        let mut config = AppConfig::default();
        config.reconnect_delay_secs = 0;
        config.unread_poll_secs = 0;
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.unread_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn save_then_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/client.json");
        let mut config = AppConfig::default();
        config.unread_poll_secs = 5;
        save_config(path.to_str().unwrap(), &config).unwrap();

        let loaded = load_config(path.to_str().unwrap());
        assert_eq!(loaded.unread_poll_secs, 5);
    }

    #[test]
    fn overrides_ignore_blank_values() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            ENV_API_BASE_URL => Some("https://api.example.test/api".to_string()),
            ENV_WS_BASE_URL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://api.example.test/api");
        assert_eq!(config.ws_base_url, "ws://localhost:8001");
    }
}
