//! Configuration module for Warden.

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest lifetime a step-up token may be configured with.
pub const MAX_STEP_UP_TTL: Duration = Duration::from_secs(300);

/// Main configuration for a Warden process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// HTTP API configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Object storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Package signing key configuration.
    #[serde(default)]
    pub signing: SigningConfig,
    /// Retention purge configuration.
    #[serde(default)]
    pub purge: PurgeConfig,
    /// Background job configuration.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Step-up token configuration.
    #[serde(default)]
    pub step_up: StepUpConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl WardenConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            WardenError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.workers == 0 {
            return Err(WardenError::InvalidConfig {
                field: "jobs.workers".to_string(),
                reason: "At least one worker is required".to_string(),
            });
        }

        if self.jobs.max_attempts == 0 {
            return Err(WardenError::InvalidConfig {
                field: "jobs.max_attempts".to_string(),
                reason: "Jobs need at least one attempt".to_string(),
            });
        }

        if self.purge.batch_size == 0 {
            return Err(WardenError::InvalidConfig {
                field: "purge.batch_size".to_string(),
                reason: "Batch size must be non-zero".to_string(),
            });
        }

        if self.step_up.ttl.is_zero() || self.step_up.ttl > MAX_STEP_UP_TTL {
            return Err(WardenError::InvalidConfig {
                field: "step_up.ttl".to_string(),
                reason: format!("TTL must be within (0, {}s]", MAX_STEP_UP_TTL.as_secs()),
            });
        }

        if self.step_up.secret.len() < 32 {
            return Err(WardenError::InvalidConfig {
                field: "step_up.secret".to_string(),
                reason: "Token secret must be at least 32 bytes".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 8700)),
            },
            storage: StorageConfig {
                object_dir: Some(PathBuf::from("/tmp/warden/objects")),
            },
            signing: SigningConfig {
                key_path: None,
                generate_if_missing: true,
            },
            purge: PurgeConfig {
                enabled: true,
                interval: Duration::from_secs(60),
                batch_size: 200,
            },
            jobs: JobsConfig {
                workers: 2,
                ..JobsConfig::default()
            },
            step_up: StepUpConfig {
                secret: "development-step-up-secret-change-me!!".to_string(),
                ttl: Duration::from_secs(300),
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                log_level: "debug".to_string(),
                json_logs: false,
            },
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API binds to.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8700)),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store. In-memory when unset.
    pub object_dir: Option<PathBuf>,
}

/// Package signing key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// PKCS#8 Ed25519 private key file.
    pub key_path: Option<PathBuf>,
    /// Generate and persist a key when `key_path` does not exist yet.
    pub generate_if_missing: bool,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_path: Some(PathBuf::from("/var/lib/warden/signing.pk8")),
            generate_if_missing: false,
        }
    }
}

/// Retention purge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Run the recurring purge scheduler.
    pub enabled: bool,
    /// How often every family gets a purge job.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Maximum candidates examined per family per run.
    pub batch_size: usize,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
            batch_size: 200,
        }
    }
}

/// Background job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles for each further attempt.
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// How long a finished job's status stays queryable.
    #[serde(default = "default_finished_ttl", with = "humantime_serde")]
    pub finished_ttl: Duration,
}

fn default_finished_ttl() -> Duration {
    Duration::from_secs(3600)
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
            finished_ttl: default_finished_ttl(),
        }
    }
}

/// Step-up token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepUpConfig {
    /// HMAC secret used to sign step-up tokens.
    pub secret: String,
    /// Token lifetime.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for StepUpConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl: MAX_STEP_UP_TTL,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Expose Prometheus metrics on `/metrics`.
    pub metrics_enabled: bool,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else if let Some(h) = s.strip_suffix('h') {
            h.parse::<u64>()
                .map(|v| Duration::from_secs(v * 3600))
                .map_err(|e| e.to_string())
        } else if let Some(d) = s.strip_suffix('d') {
            d.parse::<u64>()
                .map(|v| Duration::from_secs(v * 86400))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
