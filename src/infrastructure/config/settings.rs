use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mailqueue: MailQueueConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    /// Deployment mode taken from `RUN_MODE` (`development`, `production`, ...)
    #[serde(default = "default_run_mode")]
    pub run_mode: String,
}

/// Ops HTTP surface served while the scheduler runs
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailQueueConfig {
    /// Store backend: `postgres` or `memory`
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Name of the database table holding the queue
    #[serde(default = "default_table")]
    pub table: String,
    /// Number of mails sent out per processing round
    #[serde(default = "default_mails_per_round")]
    pub mails_per_round: usize,
    /// Maximum number of attempts to send a mail
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Purge resolved mails at the end of every round
    #[serde(default = "default_auto_purge")]
    pub auto_purge: bool,
    /// Replaces every `To` address while running in development mode
    #[serde(default)]
    pub dev_override_recipient: Option<String>,
    /// Upper bound for a single transport send in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
    /// Interval between scheduled rounds in seconds
    #[serde(default = "default_round_interval")]
    pub round_interval_seconds: u64,
    /// Age after which an unfinished claim returns its item to the queue.
    /// Must exceed `send_timeout_seconds`.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// `log` (dry run) or `file`
    #[serde(default = "default_transport_kind")]
    pub kind: String,
    /// Output directory for the file transport
    #[serde(default = "default_file_path")]
    pub file_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_run_mode() -> String {
    "development".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8085
}

fn default_database_url() -> String {
    "postgres://localhost:5432/mailqueue".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_backend() -> String {
    "postgres".to_string()
}

fn default_table() -> String {
    "mail_queue".to_string()
}

fn default_mails_per_round() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_auto_purge() -> bool {
    true
}

fn default_send_timeout() -> u64 {
    30
}

fn default_round_interval() -> u64 {
    60 // 1 minute
}

fn default_claim_lease() -> u64 {
    600 // 10 minutes
}

fn default_transport_kind() -> String {
    "log".to_string()
}

fn default_file_path() -> String {
    "runtime/mail".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "mail-queue".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| default_run_mode());

        let builder = Config::builder()
            // Start with default values
            .set_default("mailqueue.table", default_table())?
            .set_default("mailqueue.mails_per_round", default_mails_per_round() as i64)?
            .set_default("mailqueue.max_attempts", default_max_attempts() as i64)?
            .set_default("mailqueue.auto_purge", default_auto_purge())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // MAILQUEUE__DATABASE__URL, MAILQUEUE__MAILQUEUE__MAX_ATTEMPTS, ...
            .add_source(
                Environment::with_prefix("MAILQUEUE")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override("run_mode", run_mode)?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings
            .mailqueue
            .validate()
            .map_err(ConfigError::Message)?;
        Ok(settings)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn is_development(&self) -> bool {
        matches!(self.run_mode.as_str(), "development" | "dev")
    }

    /// The `To` override, only honored in development mode.
    pub fn effective_override_recipient(&self) -> Option<String> {
        if !self.is_development() {
            return None;
        }
        self.mailqueue
            .dev_override_recipient
            .as_ref()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
    }
}

impl MailQueueConfig {
    /// Reject settings under which a round could send a mail twice or
    /// purge unsent mail.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 || self.max_attempts > i32::MAX as u32 {
            return Err(format!(
                "mailqueue.max_attempts must be between 1 and {}, got {}",
                i32::MAX,
                self.max_attempts
            ));
        }
        if self.claim_lease_seconds <= self.send_timeout_seconds {
            return Err(format!(
                "mailqueue.claim_lease_seconds ({}) must exceed mailqueue.send_timeout_seconds ({})",
                self.claim_lease_seconds, self.send_timeout_seconds
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for MailQueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            table: default_table(),
            mails_per_round: default_mails_per_round(),
            max_attempts: default_max_attempts(),
            auto_purge: default_auto_purge(),
            dev_override_recipient: None,
            send_timeout_seconds: default_send_timeout(),
            round_interval_seconds: default_round_interval(),
            claim_lease_seconds: default_claim_lease(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            file_path: default_file_path(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            mailqueue: MailQueueConfig::default(),
            transport: TransportConfig::default(),
            otel: OtelConfig::default(),
            run_mode: default_run_mode(),
        }
    }
}
