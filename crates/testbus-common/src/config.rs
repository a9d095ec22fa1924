//! ---
//! tb_section: "01-core-functionality"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Shared settings and tracing primitives for the broker simulation."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_segment_delimiter() -> char {
    '.'
}

fn default_max_republish_depth() -> usize {
    8
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Settings shared by every scope opened from one broker.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSettings {
    #[serde(default)]
    pub flavor: BrokerFlavor,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub competing_policy: CompetingPolicy,
    #[serde(default = "default_segment_delimiter")]
    pub segment_delimiter: char,
    #[serde(default)]
    pub codec: CodecKind,
    #[serde(default = "default_max_republish_depth")]
    pub max_republish_depth: usize,
    #[serde(default, rename = "handler_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub handler_timeout: Option<Duration>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`BrokerSettings`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedBrokerSettings {
    pub settings: BrokerSettings,
    pub source: PathBuf,
}

impl BrokerSettings {
    pub const ENV_CONFIG_PATH: &str = "TESTBUS_CONFIG";

    /// Default settings for the given flavour.
    pub fn for_flavor(flavor: BrokerFlavor) -> Self {
        Self {
            flavor,
            ..Self::default()
        }
    }

    /// Load settings from disk, respecting the `TESTBUS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.settings)
    }

    /// Load settings from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedBrokerSettings> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let settings = Self::from_path(path.clone())?;
                return Ok(LoadedBrokerSettings {
                    settings,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let settings = Self::from_path(path.clone())?;
                return Ok(LoadedBrokerSettings {
                    settings,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no broker settings found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading broker settings");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read settings file {}", path.display()))?;
        let settings = toml::from_str::<BrokerSettings>(&contents)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        let delimiter = self.segment_delimiter;
        if delimiter.is_whitespace() || matches!(delimiter, '*' | '#' | '>') {
            return Err(anyhow!(
                "segment delimiter {:?} collides with whitespace or wildcard tokens",
                delimiter
            ));
        }
        if self.max_republish_depth == 0 {
            return Err(anyhow!("max_republish_depth must be at least 1"));
        }
        if self.handler_timeout == Some(Duration::ZERO) {
            return Err(anyhow!("handler_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            flavor: BrokerFlavor::default(),
            error_policy: ErrorPolicy::default(),
            competing_policy: CompetingPolicy::default(),
            segment_delimiter: default_segment_delimiter(),
            codec: CodecKind::default(),
            max_republish_depth: default_max_republish_depth(),
            handler_timeout: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for BrokerSettings {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let settings: BrokerSettings =
            toml::from_str(content).with_context(|| "failed to parse broker settings")?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Real broker whose routing model and delivery context are emulated.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerFlavor {
    /// Topics; every subscriber of a topic sees each record.
    Kafka,
    /// Queues bound to exchanges; consumers of one queue compete.
    Rabbit,
    /// Subjects with token wildcards and queue groups.
    Nats,
    /// Flavour-neutral in-memory routing.
    #[default]
    Memory,
}

impl BrokerFlavor {
    /// Delivery mode used when a declaration does not pick one.
    pub fn default_mode(&self) -> DeliveryMode {
        match self {
            BrokerFlavor::Rabbit => DeliveryMode::Competing,
            BrokerFlavor::Kafka | BrokerFlavor::Nats | BrokerFlavor::Memory => {
                DeliveryMode::Broadcast
            }
        }
    }

    /// Whether wildcard tokens in channel names are patterns when no exchange is involved.
    ///
    /// RabbitMQ's default exchange routes by literal queue name, so `*` and `#`
    /// only carry meaning on topic exchanges.
    pub fn wildcard_names(&self) -> bool {
        !matches!(self, BrokerFlavor::Rabbit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerFlavor::Kafka => "kafka",
            BrokerFlavor::Rabbit => "rabbit",
            BrokerFlavor::Nats => "nats",
            BrokerFlavor::Memory => "memory",
        }
    }
}

impl std::str::FromStr for BrokerFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kafka" => Ok(BrokerFlavor::Kafka),
            "rabbit" | "rabbitmq" => Ok(BrokerFlavor::Rabbit),
            "nats" => Ok(BrokerFlavor::Nats),
            "memory" => Ok(BrokerFlavor::Memory),
            other => Err(format!("unknown broker flavor: {}", other)),
        }
    }
}

/// How the bindings matching one channel share a message.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Every matching binding receives the message.
    Broadcast,
    /// Exactly one binding among competitors receives the message.
    Competing,
}

/// What a publish does when a handler fails.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop delivery and return the failure to the publisher.
    #[default]
    Raise,
    /// Record the failure and keep delivering to the remaining handlers.
    Capture,
}

/// Selection among competing bindings.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompetingPolicy {
    /// Rotate through the group, starting at the first registered binding.
    #[default]
    RoundRobin,
    /// Always pick the first registered binding.
    FirstRegistered,
}

/// Wire encoding used between publish and delivery.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    Cbor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Filter directive used when neither `TESTBUS_LOG` nor `RUST_LOG` is set.
    #[serde(default)]
    pub filter: Option<String>,
    /// Optional directory receiving a daily rolling JSON log.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: None,
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_test_mode_expectations() {
        let settings = BrokerSettings::default();
        assert_eq!(settings.flavor, BrokerFlavor::Memory);
        assert_eq!(settings.error_policy, ErrorPolicy::Raise);
        assert_eq!(settings.competing_policy, CompetingPolicy::RoundRobin);
        assert_eq!(settings.segment_delimiter, '.');
        assert_eq!(settings.codec, CodecKind::Json);
        assert!(settings.handler_timeout.is_none());
    }

    #[test]
    fn parses_inline_toml() {
        let settings: BrokerSettings = r#"
            flavor = "rabbit"
            error_policy = "capture"
            competing_policy = "first_registered"
            segment_delimiter = "/"
            codec = "cbor"
            handler_timeout_ms = 250

            [logging]
            format = "structured-json"
        "#
        .parse()
        .expect("settings parse");
        assert_eq!(settings.flavor, BrokerFlavor::Rabbit);
        assert_eq!(settings.error_policy, ErrorPolicy::Capture);
        assert_eq!(settings.competing_policy, CompetingPolicy::FirstRegistered);
        assert_eq!(settings.segment_delimiter, '/');
        assert_eq!(settings.codec, CodecKind::Cbor);
        assert_eq!(settings.handler_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn rejects_wildcard_delimiter() {
        let err = "segment_delimiter = \"*\"".parse::<BrokerSettings>().unwrap_err();
        assert!(err.to_string().contains("delimiter"));
    }

    #[test]
    fn rejects_zero_timeout_and_depth() {
        assert!("handler_timeout_ms = 0".parse::<BrokerSettings>().is_err());
        assert!("max_republish_depth = 0".parse::<BrokerSettings>().is_err());
    }

    #[test]
    fn flavor_defaults() {
        assert_eq!(BrokerFlavor::Kafka.default_mode(), DeliveryMode::Broadcast);
        assert_eq!(BrokerFlavor::Rabbit.default_mode(), DeliveryMode::Competing);
        assert!(!BrokerFlavor::Rabbit.wildcard_names());
        assert!(BrokerFlavor::Nats.wildcard_names());
        assert_eq!("RabbitMQ".parse::<BrokerFlavor>(), Ok(BrokerFlavor::Rabbit));
        assert!("mqtt".parse::<BrokerFlavor>().is_err());
    }
}
