//! Hierarchical configuration loader: defaults -> project YAML -> local
//! YAML -> env vars, following the teacher's `ConfigLoader` precedence
//! chain verbatim, renamed to the `CONCLAVE_` env prefix and this crate's
//! config schema (§6).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfigSchema {
    pub idle_timeout_secs: u64,
    pub client_buffer_bytes: usize,
}

impl Default for SessionConfigSchema {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            client_buffer_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfigSchema {
    pub id: String,
    pub requests_per_window: u64,
    pub tokens_per_window: u64,
    pub max_concurrent: u32,
    pub window_duration_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub retry_jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfigSchema {
    pub id: String,
    pub capabilities: Vec<String>,
    pub max_in_flight: u32,
    pub queue_capacity: usize,
    pub default_task_deadline_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultJoinMode {
    All,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigSchema {
    pub classification_enabled: bool,
    pub classification_capability: String,
    pub default_join_mode: DefaultJoinMode,
}

impl Default for OrchestratorConfigSchema {
    fn default() -> Self {
        Self {
            classification_enabled: true,
            classification_capability: "classify.intent".to_string(),
            default_join_mode: DefaultJoinMode::All,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    DropNewest,
    DropOldest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfigSchema {
    pub mailbox_capacity: usize,
    pub drop_policy_partial: DropPolicy,
}

impl Default for BusConfigSchema {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            drop_policy_partial: DropPolicy::DropNewest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfigSchema {
    pub path: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfigSchema {
    fn default() -> Self {
        Self {
            path: ".conclave/journal.db".to_string(),
            max_connections: 8,
            min_connections: 1,
            acquire_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfigSchema {
    pub level: String,
    pub format: LogFormat,
    pub file_directory: Option<String>,
}

impl Default for LoggingConfigSchema {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_directory: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub session: SessionConfigSchema,
    pub providers: Vec<ProviderConfigSchema>,
    pub supervisors: Vec<SupervisorConfigSchema>,
    pub orchestrator: OrchestratorConfigSchema,
    pub bus: BusConfigSchema,
    pub database: DatabaseConfigSchema,
    pub logging: LoggingConfigSchema,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for provider in &self.providers {
            if provider.retry_max_attempts == 0 || provider.retry_max_attempts > 10 {
                return Err(ConfigError::Invalid(format!(
                    "provider {} retry_max_attempts must be in 1..=10",
                    provider.id
                )));
            }
        }
        Ok(())
    }
}

/// Merges defaults, `.conclave/config.yaml`, `.conclave/local.yaml`, and
/// `CONCLAVE_`-prefixed environment variables, in that precedence order.
pub struct ConfigLoader {
    project_root: PathBuf,
}

impl ConfigLoader {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let project_yaml = self.project_root.join(".conclave/config.yaml");
        let local_yaml = self.project_root.join(".conclave/local.yaml");

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(project_yaml))
            .merge(Yaml::file(local_yaml))
            .merge(Env::prefixed("CONCLAVE_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_root
    }
}
