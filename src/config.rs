//! Layered configuration (§6.2): per-group moderation options plus
//! process-wide settings for dependency endpoints, timeouts and logging.
//!
//! Grounded on the teacher's `ServerConfig` (`from_env`/`validate`/CLI-override
//! layering via the `config` crate, `clap` for the binary's CLI surface) but
//! narrowed to the options spec.md §6.2 actually names — no database/JWT/file
//! upload settings survive here.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SaqshyError};
use crate::types::GroupType;

/// Per-group moderation options (§6.2 table). Settable per group; falls back
/// to these defaults when a group has no override on file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub group_type: GroupType,

    /// 1-10, 5 = neutral. See `RiskCalculator::new` for how this scales
    /// positive weights.
    pub sensitivity: u8,

    pub sandbox_enabled: bool,
    pub sandbox_duration_hours: i64,

    pub linked_channel_id: Option<i64>,
    pub link_whitelist: Vec<String>,

    /// Hint to `ContentAnalyzer` for tie-breaking (e.g. phrase-list selection).
    pub language: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            group_type: GroupType::General,
            sensitivity: 5,
            sandbox_enabled: true,
            sandbox_duration_hours: 24,
            linked_channel_id: None,
            link_whitelist: Vec::new(),
            language: "ru".to_string(),
        }
    }
}

impl GroupConfig {
    pub fn for_group_type(group_type: GroupType) -> Self {
        Self {
            group_type,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.sensitivity) {
            return Err(SaqshyError::out_of_range(
                "group_config.sensitivity",
                self.sensitivity,
                "1..=10",
            ));
        }
        if self.sandbox_duration_hours <= 0 {
            return Err(SaqshyError::out_of_range(
                "group_config.sandbox_duration_hours",
                self.sandbox_duration_hours,
                "> 0",
            ));
        }
        Ok(())
    }
}

/// `GroupConfigStore` is out of scope (§1); this in-process map stands in for
/// it wherever the core needs "the config for this group" without a real
/// store wired up (tests, the demo binary).
#[derive(Debug, Clone, Default)]
pub struct GroupConfigRegistry {
    overrides: HashMap<i64, GroupConfig>,
    defaults_by_type: HashMap<GroupType, GroupConfig>,
}

impl GroupConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, chat_id: i64, config: GroupConfig) {
        self.overrides.insert(chat_id, config);
    }

    pub fn get(&self, chat_id: i64, fallback_group_type: GroupType) -> GroupConfig {
        self.overrides.get(&chat_id).cloned().unwrap_or_else(|| {
            self.defaults_by_type
                .get(&fallback_group_type)
                .cloned()
                .unwrap_or_else(|| GroupConfig::for_group_type(fallback_group_type))
        })
    }
}

/// Process-wide settings (§6.2): dependency endpoints, timeouts, circuit
/// breaker parameters. Loaded once at startup, never per-group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub kv_url: String,
    pub messaging_platform_token: String,
    pub llm_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub spam_database_endpoint: Option<String>,

    pub log_level: String,
    pub log_format: LogFormat,

    pub timeouts: TimeoutConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub kv_pool: KvPoolConfig,
}

impl ProcessConfig {
    /// Loads process config from env/CLI, mirroring the teacher's
    /// defaults-then-file-then-env-then-CLI layering, but with a smaller
    /// surface (no DB/JWT/feature-flag layers — those belonged to the chat
    /// server, not this decision core).
    pub fn from_env() -> Result<Self> {
        let args = CliArgs::parse();

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::Environment::with_prefix("SAQSHY").separator("__"));

        if let Some(level) = args.log_level {
            builder = builder.set_override("log_level", level)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kv_url.is_empty() {
            return Err(SaqshyError::configuration_error("kv_url must not be empty"));
        }
        self.circuit_breaker.validate()?;
        Ok(())
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            kv_url: std::env::var("SAQSHY_KV_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            messaging_platform_token: std::env::var("SAQSHY_BOT_TOKEN").unwrap_or_default(),
            llm_endpoint: std::env::var("SAQSHY_LLM_ENDPOINT").ok(),
            llm_api_key: std::env::var("SAQSHY_LLM_API_KEY").ok(),
            spam_database_endpoint: std::env::var("SAQSHY_SPAM_DB_ENDPOINT").ok(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            timeouts: TimeoutConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            kv_pool: KvPoolConfig::default(),
        }
    }
}

/// Per-stage/total deadlines (§4.3, §5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub analyzer_soft_deadline_ms: u64,
    pub pipeline_hard_deadline_ms: u64,
    pub llm_deadline_ms: u64,
    pub outbound_call_deadline_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            analyzer_soft_deadline_ms: 500,
            pipeline_hard_deadline_ms: 5_000,
            llm_deadline_ms: 10_000,
            outbound_call_deadline_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn analyzer_soft_deadline(&self) -> Duration {
        Duration::from_millis(self.analyzer_soft_deadline_ms)
    }
    pub fn pipeline_hard_deadline(&self) -> Duration {
        Duration::from_millis(self.pipeline_hard_deadline_ms)
    }
    pub fn llm_deadline(&self) -> Duration {
        Duration::from_millis(self.llm_deadline_ms)
    }
    pub fn outbound_call_deadline(&self) -> Duration {
        Duration::from_millis(self.outbound_call_deadline_ms)
    }
}

/// §4.3/§9: N consecutive failures open a breaker for T seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_secs: 30,
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(SaqshyError::configuration_error(
                "circuit_breaker.failure_threshold must be > 0",
            ));
        }
        Ok(())
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_secs)
    }
}

/// §5: single bounded pool per process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KvPoolConfig {
    pub max_connections: u32,
    pub max_overflow: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for KvPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_overflow: 20,
            acquire_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "saqshy-core", version, about = "Spam-detection decision core")]
struct CliArgs {
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_group_config_validates() {
        assert!(GroupConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_sensitivity_out_of_range() {
        let mut cfg = GroupConfig::default();
        cfg.sensitivity = 0;
        assert!(cfg.validate().is_err());
        cfg.sensitivity = 11;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn registry_falls_back_to_type_default() {
        let registry = GroupConfigRegistry::new();
        let cfg = registry.get(42, GroupType::Crypto);
        assert_eq!(cfg.group_type, GroupType::Crypto);
    }

    #[test]
    fn registry_returns_explicit_override() {
        let mut registry = GroupConfigRegistry::new();
        registry.set(
            42,
            GroupConfig {
                sensitivity: 8,
                ..GroupConfig::for_group_type(GroupType::Deals)
            },
        );
        let cfg = registry.get(42, GroupType::General);
        assert_eq!(cfg.sensitivity, 8);
        assert_eq!(cfg.group_type, GroupType::Deals);
    }

    #[test]
    fn process_config_default_is_valid_shape() {
        let cfg = ProcessConfig::default();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
        assert_eq!(cfg.timeouts.pipeline_hard_deadline_ms, 5_000);
    }
}
