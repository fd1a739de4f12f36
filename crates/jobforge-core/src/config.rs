use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Main configuration structure for jobforge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub messaging: MessagingConfig,

    #[serde(default)]
    pub script_runner: ScriptRunnerConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
            webhooks: WebhookConfig::default(),
            email: EmailConfig::default(),
            messaging: MessagingConfig::default(),
            script_runner: ScriptRunnerConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from `JOBFORGE_CONFIG`, falling back to a couple
    /// of conventional paths, and finally the built-in defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(config_path) = std::env::var("JOBFORGE_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = ["./config/default.toml", "/etc/jobforge/config.toml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Validate configuration invariants that would otherwise surface as
    /// confusing runtime errors.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.database.path.is_empty() {
            return Err(Error::Config("database.path must not be empty".to_string()));
        }

        if self.supervisor.max_scale == 0 {
            return Err(Error::Config("supervisor.max_scale must be > 0".to_string()));
        }

        Ok(())
    }
}

/// Dispatch Coordinator (C6) HTTP bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_graceful_shutdown() -> u64 {
    10
}

/// Job Store / Worker Registry (C3/C4) primary database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the primary SQLite database holding `jobs` and `workers`.
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_database_path() -> String {
    "jobforge.db".to_string()
}

fn default_pool_size() -> u32 {
    5
}

/// Queue Transport / Rate Limiter (C2/C1) shared KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_redis_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            password: None,
            pool_size: default_redis_pool_size(),
            connect_timeout_ms: default_redis_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_key_prefix() -> String {
    "jobforge".to_string()
}

/// Rate Limiter (C1) token-bucket parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_rate_limit_refill_rate")]
    pub refill_rate: f64,

    #[serde(default = "default_rate_limit_key_expiry_secs")]
    pub key_expiry_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_rate_limit_max_tokens(),
            refill_rate: default_rate_limit_refill_rate(),
            key_expiry_secs: default_rate_limit_key_expiry_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn key_expiry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.key_expiry_secs)
    }
}

fn default_rate_limit_max_tokens() -> u32 {
    10
}

fn default_rate_limit_refill_rate() -> f64 {
    5.0
}

fn default_rate_limit_key_expiry_secs() -> u64 {
    60
}

/// Per-type webhook URLs (C7 dispatch for SMS/NOTIFICATION jobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub sms_url: Option<String>,

    #[serde(default)]
    pub notification_url: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            sms_url: None,
            notification_url: None,
        }
    }
}

/// Email Adapter (C8) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Path to the external per-module SMTP config database.
    #[serde(default = "default_email_config_db")]
    pub config_db_path: String,

    /// Path to the external SMTP send-log database.
    #[serde(default = "default_email_log_db")]
    pub log_db_path: String,

    #[serde(default = "default_true")]
    pub failover_enabled: bool,

    #[serde(default = "default_true")]
    pub notify_admin_on_failover: bool,

    #[serde(default)]
    pub admin_email: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            config_db_path: default_email_config_db(),
            log_db_path: default_email_log_db(),
            failover_enabled: true,
            notify_admin_on_failover: true,
            admin_email: None,
        }
    }
}

fn default_email_config_db() -> String {
    "email_config.db".to_string()
}

fn default_email_log_db() -> String {
    "email_log.db".to_string()
}

fn default_true() -> bool {
    true
}

/// Messaging Adapter (C9) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_messaging_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_messaging_delay_ms")]
    pub default_delay_ms: u64,

    #[serde(default)]
    pub secondary_gateway_url: Option<String>,

    #[serde(default)]
    pub secondary_gateway_token: Option<String>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_messaging_gateway_url(),
            default_delay_ms: default_messaging_delay_ms(),
            secondary_gateway_url: None,
            secondary_gateway_token: None,
        }
    }
}

fn default_messaging_gateway_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_messaging_delay_ms() -> u64 {
    1000
}

/// Script Runner (C10) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRunnerConfig {
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,

    #[serde(default = "default_task_scheduler_db")]
    pub task_scheduler_db_path: String,

    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold_pct: f64,

    #[serde(default = "default_mem_threshold")]
    pub mem_threshold_pct: f64,

    #[serde(default = "default_resource_check_interval_ms")]
    pub resource_check_interval_ms: u64,

    #[serde(default = "default_resource_check_retries")]
    pub resource_check_retries: u32,
}

impl Default for ScriptRunnerConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            task_scheduler_db_path: default_task_scheduler_db(),
            cpu_threshold_pct: default_cpu_threshold(),
            mem_threshold_pct: default_mem_threshold(),
            resource_check_interval_ms: default_resource_check_interval_ms(),
            resource_check_retries: default_resource_check_retries(),
        }
    }
}

impl ScriptRunnerConfig {
    pub fn resource_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.resource_check_interval_ms)
    }
}

fn default_scripts_dir() -> String {
    "./scripts".to_string()
}

fn default_task_scheduler_db() -> String {
    "task_scheduler.db".to_string()
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_mem_threshold() -> f64 {
    85.0
}

fn default_resource_check_interval_ms() -> u64 {
    5000
}

fn default_resource_check_retries() -> u32 {
    5
}

/// Worker Supervisor (C5) defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_workers_per_type")]
    pub workers_per_type: u32,

    #[serde(default = "default_max_scale")]
    pub max_scale: u32,

    /// Path to the worker-runtime binary the supervisor spawns.
    #[serde(default = "default_worker_binary")]
    pub worker_binary_path: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers_per_type: default_workers_per_type(),
            max_scale: default_max_scale(),
            worker_binary_path: default_worker_binary(),
        }
    }
}

fn default_workers_per_type() -> u32 {
    1
}

fn default_max_scale() -> u32 {
    16
}

fn default_worker_binary() -> String {
    "jobforge-worker".to_string()
}

/// Logging configuration shared by every binary in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_scale() {
        let mut config = Config::default();
        config.supervisor.max_scale = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
            [server]
            port = 9090
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.path, "jobforge.db");
    }
}
