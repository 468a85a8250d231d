use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Username of the administrator seeded on first boot
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    /// Initial administrator password; only used when no user exists yet
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    /// Lifetime of a freshly issued session
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Every successful validation keeps the session alive for at least this long
    #[serde(default = "default_sliding_window_minutes")]
    pub sliding_window_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            admin_email: default_admin_email(),
            admin_password: default_admin_password(),
            session_ttl_hours: default_session_ttl_hours(),
            sliding_window_minutes: default_sliding_window_minutes(),
        }
    }
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_email() -> String {
    "admin@clinic.local".to_string()
}

pub(crate) fn default_admin_password() -> String {
    "ChangeMe-2024!".to_string()
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_sliding_window_minutes() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Run the background maintenance loops at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval between expired-session sweeps (default: 1 hour)
    #[serde(default = "default_session_sweep_interval")]
    pub session_sweep_interval_seconds: u64,
    /// Interval between automatic backups (default: 24 hours).
    /// The `autoBackup` setting can still switch them off at runtime.
    #[serde(default = "default_backup_interval")]
    pub backup_interval_seconds: u64,
    /// Interval between reminder and stock scans (default: 15 minutes)
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_sweep_interval_seconds: default_session_sweep_interval(),
            backup_interval_seconds: default_backup_interval(),
            reminder_interval_seconds: default_reminder_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_session_sweep_interval() -> u64 {
    3600
}

fn default_backup_interval() -> u64 {
    86400
}

fn default_reminder_interval() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            maintenance: MaintenanceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Configuration rooted at `data_dir` with maintenance loops disabled.
    pub fn for_data_dir(data_dir: &Path) -> Self {
        let mut config = Self::default();
        config.server.data_dir = data_dir.to_path_buf();
        config.maintenance.enabled = false;
        config
    }
}
