use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub uploads: UploadConfig,
    pub email: EmailConfig,
    pub feed: FeedConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL used to build links in emails
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum idle connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection acquire timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory backing the file proxy
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    /// Maximum size of a single file in bytes (default: 25MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Blobs with no attachment row older than this are swept
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_secs: u64,
    /// Orphan sweep interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Transactional email provider API base (e.g. https://api.resend.com)
    #[serde(default = "default_email_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_email_from")]
    pub from: String,
    /// Domain used for deterministic Message-IDs
    #[serde(default = "default_mail_domain")]
    pub mail_domain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Broadcast channel capacity
    #[serde(default = "default_feed_capacity")]
    pub channel_capacity: usize,
    /// Number of recent events kept for Last-Event-ID replay
    #[serde(default = "default_replay_buffer")]
    pub replay_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Allowed CORS origins for the API (comma-separated, or "*" for any).
    /// The file proxy is always permissive.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_site_url() -> String { "http://localhost:5173".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 30 }
fn default_storage_dir() -> String { "storage".to_string() }
fn default_max_file_size() -> usize { 25 * 1024 * 1024 } // 25MB
fn default_orphan_grace() -> u64 { 24 * 60 * 60 } // 1 day
fn default_cleanup_interval() -> u64 { 3600 }
fn default_email_api_base() -> String { "https://api.resend.com".to_string() }
fn default_email_from() -> String { "Fanboard <notifications@fanboard.local>".to_string() }
fn default_mail_domain() -> String { "fanboard.local".to_string() }
fn default_feed_capacity() -> usize { 1024 }
fn default_replay_buffer() -> usize { 512 }
fn default_cors_origins() -> String { "*".to_string() }

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl EmailConfig {
    /// Dispatch is skipped (and logged) without an API key
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or_else(|_| default_host()),
                port: env_parse("PORT").unwrap_or_else(default_port),
                site_url: std::env::var("SITE_URL").unwrap_or_else(|_| default_site_url()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(default_max_connections),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(default_min_connections),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or_else(default_connect_timeout),
            },
            uploads: UploadConfig {
                storage_dir: std::env::var("STORAGE_DIR").unwrap_or_else(|_| default_storage_dir()),
                max_file_size: env_parse("MAX_FILE_SIZE").unwrap_or_else(default_max_file_size),
                orphan_grace_secs: env_parse("ORPHAN_GRACE_SECS").unwrap_or_else(default_orphan_grace),
                cleanup_interval_secs: env_parse("CLEANUP_INTERVAL_SECS")
                    .unwrap_or_else(default_cleanup_interval),
            },
            email: EmailConfig {
                api_base: std::env::var("EMAIL_API_BASE").unwrap_or_else(|_| default_email_api_base()),
                api_key: std::env::var("EMAIL_API_KEY").unwrap_or_default(),
                from: std::env::var("EMAIL_FROM").unwrap_or_else(|_| default_email_from()),
                mail_domain: std::env::var("MAIL_DOMAIN").unwrap_or_else(|_| default_mail_domain()),
            },
            feed: FeedConfig {
                channel_capacity: env_parse("FEED_CHANNEL_CAPACITY").unwrap_or_else(default_feed_capacity),
                replay_buffer: env_parse("FEED_REPLAY_BUFFER").unwrap_or_else(default_replay_buffer),
            },
            security: SecurityConfig {
                cors_origins: std::env::var("CORS_ORIGINS").unwrap_or_else(|_| default_cors_origins()),
            },
        })
    }

    /// Defaults for everything, with the given database url. Used by tests
    /// and tooling that never read the environment.
    pub fn with_database_url(url: impl Into<String>) -> Self {
        Config {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                site_url: default_site_url(),
            },
            database: DatabaseConfig {
                url: url.into(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
            },
            uploads: UploadConfig {
                storage_dir: default_storage_dir(),
                max_file_size: default_max_file_size(),
                orphan_grace_secs: default_orphan_grace(),
                cleanup_interval_secs: default_cleanup_interval(),
            },
            email: EmailConfig {
                api_base: default_email_api_base(),
                api_key: String::new(),
                from: default_email_from(),
                mail_domain: default_mail_domain(),
            },
            feed: FeedConfig {
                channel_capacity: default_feed_capacity(),
                replay_buffer: default_replay_buffer(),
            },
            security: SecurityConfig {
                cors_origins: default_cors_origins(),
            },
        }
    }
}
