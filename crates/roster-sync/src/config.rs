//! # Engine Configuration
//!
//! Configuration management for the roster engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ROSTER_SHARING_URL=https://...                                     │
//! │     ROSTER_COMPOUND_DELAY_MS=250                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/engine/roster.toml (Linux)                               │
//! │     ~/Library/Application Support/com.roster.engine/roster.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # roster.toml
//! [service]
//! sharing_url = "https://contacts.msn.com/abservice/SharingService.asmx"
//! address_book_url = "https://contacts.msn.com/abservice/abservice.asmx"
//!
//! [sync]
//! max_load_retries = 1
//! max_resync_attempts = 1
//!
//! [mutation]
//! compound_step_delay_ms = 100
//!
//! [retry]
//! rate_limit_backoff_ms = 2000
//! max_rate_limit_retries = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::{ServiceKind, ServiceMethod};
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Service Settings
// =============================================================================

/// Default hosts of the two backend services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Membership (sharing) service URL.
    #[serde(default = "default_sharing_url")]
    pub sharing_url: String,

    /// Address book service URL.
    #[serde(default = "default_address_book_url")]
    pub address_book_url: String,
}

fn default_sharing_url() -> String {
    "https://contacts.msn.com/abservice/SharingService.asmx".to_string()
}

fn default_address_book_url() -> String {
    "https://contacts.msn.com/abservice/abservice.asmx".to_string()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            sharing_url: default_sharing_url(),
            address_book_url: default_address_book_url(),
        }
    }
}

impl ServiceSettings {
    /// Parsed default URL for a method's service.
    pub fn url_for(&self, method: ServiceMethod) -> SyncResult<Url> {
        let raw = match method.service() {
            ServiceKind::Sharing => &self.sharing_url,
            ServiceKind::AddressBook => &self.address_book_url,
        };
        Ok(Url::parse(raw)?)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Bounds on the synchronization state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Reloads after a failed or stale local load (records are discarded
    /// before each reload).
    #[serde(default = "default_one")]
    pub max_load_retries: u32,

    /// Full (non-delta) refetches per fetch step.
    #[serde(default = "default_one")]
    pub max_resync_attempts: u32,

    /// Address book creations per pass.
    #[serde(default = "default_one")]
    pub max_roster_create_attempts: u32,

    /// How long ApplyDefaults waits for the live session (seconds).
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

fn default_one() -> u32 {
    1
}

fn default_session_timeout() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_load_retries: default_one(),
            max_resync_attempts: default_one(),
            max_roster_create_attempts: default_one(),
            session_timeout_secs: default_session_timeout(),
        }
    }
}

// =============================================================================
// Mutation Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationSettings {
    /// Pause between the dependent steps of a compound mutation
    /// (milliseconds).
    #[serde(default = "default_compound_delay")]
    pub compound_step_delay_ms: u64,
}

fn default_compound_delay() -> u64 {
    100
}

impl Default for MutationSettings {
    fn default() -> Self {
        MutationSettings {
            compound_step_delay_ms: default_compound_delay(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Backend retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Fixed delay before retrying a rate-limited call (milliseconds).
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: u64,

    /// Retries of a rate-limited call before the fault surfaces.
    #[serde(default = "default_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Ticket renewals per membership mutation.
    #[serde(default = "default_one")]
    pub max_auth_refresh_attempts: u32,
}

fn default_rate_limit_backoff() -> u64 {
    2000
}

fn default_rate_limit_retries() -> u32 {
    3
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            rate_limit_backoff_ms: default_rate_limit_backoff(),
            max_rate_limit_retries: default_rate_limit_retries(),
            max_auth_refresh_attempts: default_one(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Record cache location. Defaults to `roster.db` in the platform data
    /// directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub mutation: MutationSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (roster.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, raw) in [
            ("sharing_url", &self.service.sharing_url),
            ("address_book_url", &self.service.address_book_url),
        ] {
            let url = Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "{} must use http:// or https://, got: {}",
                    name, raw
                )));
            }
            if url.host_str().is_none() {
                return Err(SyncError::InvalidUrl(format!("{} has no host: {}", name, raw)));
            }
        }

        if self.sync.session_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "session_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.retry.max_auth_refresh_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_auth_refresh_attempts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ROSTER_SHARING_URL") {
            debug!(url = %url, "Overriding sharing URL from environment");
            self.service.sharing_url = url;
        }

        if let Ok(url) = std::env::var("ROSTER_ADDRESS_BOOK_URL") {
            debug!(url = %url, "Overriding address book URL from environment");
            self.service.address_book_url = url;
        }

        if let Ok(path) = std::env::var("ROSTER_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Ok(delay) = std::env::var("ROSTER_COMPOUND_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(ms) => self.mutation.compound_step_delay_ms = ms,
                Err(_) => warn!(value = %delay, "Ignoring invalid ROSTER_COMPOUND_DELAY_MS"),
            }
        }

        if let Ok(backoff) = std::env::var("ROSTER_RATE_LIMIT_BACKOFF_MS") {
            match backoff.parse::<u64>() {
                Ok(ms) => self.retry.rate_limit_backoff_ms = ms,
                Err(_) => warn!(value = %backoff, "Ignoring invalid ROSTER_RATE_LIMIT_BACKOFF_MS"),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "roster", "engine")
    }

    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("roster.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Record cache path: configured, or `roster.db` in the data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage
            .database_path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("roster.db")))
    }

    pub fn compound_delay(&self) -> Duration {
        Duration::from_millis(self.mutation.compound_step_delay_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.retry.rate_limit_backoff_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.session_timeout_secs)
    }
}
