//! pulse.toml configuration parser.
//!
//! Every section is optional. Durations are strings like `"500ms"`,
//! `"5s"` or `"2m"`; a bare number means seconds.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::probe::{DEFAULT_DELAY, DEFAULT_ISOLATION_DEBOUNCE, DEFAULT_TIMEOUT, PersistenceSettings};
use crate::status::Signal;
use crate::supervisor::DEFAULT_RESTART_BACKOFF;
use crate::sync::DEFAULT_TRANSPORT_DEADLINE;

pub const DEFAULT_NODE_ID: &str = "pulse-node";
pub const DEFAULT_HTTP_PORT: u16 = 8558;
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub node: NodeConfig,
    pub http: HttpConfig,
    pub liveness: SignalConfig,
    pub readiness: SignalConfig,
    pub persistence: PersistenceConfig,
    pub cluster: ClusterConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_NODE_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub ask_timeout: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_HTTP_PORT,
            ask_timeout: None,
        }
    }
}

impl HttpConfig {
    pub fn ask_timeout(&self) -> Result<Duration, ConfigError> {
        duration_or(self.ask_timeout.as_deref(), DEFAULT_ASK_TIMEOUT)
    }
}

/// Provider and optional transport for one signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub provider: Option<String>,
    pub transport: Option<TransportSpec>,
    /// Readiness only: publish the AND of readiness and liveness.
    pub include_liveness: bool,
}

/// Where a signal is published besides HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSpec {
    File { path: PathBuf },
    Tcp { address: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub path: PathBuf,
    pub persistence_id: Option<String>,
    pub timeout: Option<String>,
    pub interval: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pulse-journal.redb"),
            persistence_id: None,
            timeout: None,
            interval: None,
        }
    }
}

impl PersistenceConfig {
    pub fn settings(&self, node: &str) -> Result<PersistenceSettings, ConfigError> {
        let mut settings = PersistenceSettings::for_node(node);
        if let Some(id) = &self.persistence_id {
            settings.persistence_id = id.clone();
        }
        settings.timeout = duration_or(self.timeout.as_deref(), DEFAULT_TIMEOUT)?;
        settings.delay = duration_or(self.interval.as_deref(), DEFAULT_DELAY)?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub isolation_debounce: Option<String>,
}

impl ClusterConfig {
    pub fn isolation_debounce(&self) -> Result<Duration, ConfigError> {
        duration_or(self.isolation_debounce.as_deref(), DEFAULT_ISOLATION_DEBOUNCE)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub deadline: Option<String>,
    pub restart_backoff: Option<String>,
}

impl TransportConfig {
    pub fn deadline(&self) -> Result<Duration, ConfigError> {
        duration_or(self.deadline.as_deref(), DEFAULT_TRANSPORT_DEADLINE)
    }

    pub fn restart_backoff(&self) -> Result<Duration, ConfigError> {
        duration_or(self.restart_backoff.as_deref(), DEFAULT_RESTART_BACKOFF)
    }
}

impl PulseConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PulseConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn signal(&self, signal: Signal) -> &SignalConfig {
        match signal {
            Signal::Liveness => &self.liveness,
            Signal::Readiness => &self.readiness,
        }
    }

    /// The configured provider name, or the signal's default.
    pub fn provider(&self, signal: Signal) -> &str {
        self.signal(signal)
            .provider
            .as_deref()
            .unwrap_or_else(|| ProviderKind::default_for(signal).as_str())
    }
}

/// Known probe providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Reports up unless told otherwise.
    Default,
    /// Membership driven.
    Cluster,
    /// Journal round trips. Liveness only.
    Persistence,
}

impl ProviderKind {
    pub fn default_for(signal: Signal) -> Self {
        match signal {
            Signal::Liveness => ProviderKind::Persistence,
            Signal::Readiness => ProviderKind::Cluster,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Default => "default",
            ProviderKind::Cluster => "cluster",
            ProviderKind::Persistence => "persistence",
        }
    }

    /// Resolve `value` for `signal`, rejecting unknown names and
    /// unsupported combinations.
    pub fn resolve(signal: Signal, value: &str) -> Result<Self, ConfigError> {
        let kind: ProviderKind = value.parse().map_err(|_| ConfigError::UnknownProvider {
            signal,
            value: value.to_string(),
        })?;
        if kind == ProviderKind::Persistence && signal == Signal::Readiness {
            return Err(ConfigError::UnsupportedProvider {
                signal,
                provider: kind.to_string(),
            });
        }
        Ok(kind)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(ProviderKind::Default),
            "cluster" => Ok(ProviderKind::Cluster),
            "persistence" => Ok(ProviderKind::Persistence),
            _ => Err(()),
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let trimmed = s.trim();
    let parsed = if let Some(secs) = trimmed.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = trimmed.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        trimmed.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| ConfigError::Duration(s.to_string()))
}

fn duration_or(value: Option<&str>, default: Duration) -> Result<Duration, ConfigError> {
    value.map(parse_duration).unwrap_or(Ok(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_takes_defaults() {
        let config: PulseConfig = toml::from_str("").unwrap();
        assert_eq!(config.node.id, DEFAULT_NODE_ID);
        assert_eq!(config.http.port, DEFAULT_HTTP_PORT);
        assert_eq!(config.provider(Signal::Liveness), "persistence");
        assert_eq!(config.provider(Signal::Readiness), "cluster");
        assert_eq!(config.transport.deadline().unwrap(), DEFAULT_TRANSPORT_DEADLINE);
        assert_eq!(config.cluster.isolation_debounce().unwrap(), DEFAULT_ISOLATION_DEBOUNCE);
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[node]
id = "node-a"

[http]
port = 9000

[liveness]
provider = "persistence"
transport = { kind = "file", path = "/tmp/pulse/alive" }

[readiness]
provider = "cluster"
transport = { kind = "tcp", address = "127.0.0.1:8559" }
include_liveness = true

[persistence]
path = "/var/lib/pulse/journal.redb"
timeout = "2s"
interval = "30s"

[cluster]
isolation_debounce = "500ms"

[transport]
deadline = "1s"
"#;
        let config: PulseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.id, "node-a");
        assert_eq!(config.http.port, 9000);
        assert_eq!(
            config.liveness.transport,
            Some(TransportSpec::File {
                path: PathBuf::from("/tmp/pulse/alive")
            })
        );
        assert_eq!(
            config.readiness.transport,
            Some(TransportSpec::Tcp {
                address: "127.0.0.1:8559".into()
            })
        );
        assert!(config.readiness.include_liveness);
        assert!(!config.liveness.include_liveness);

        let settings = config.persistence.settings(&config.node.id).unwrap();
        assert_eq!(settings.persistence_id, "pulse-liveness-node-a");
        assert_eq!(settings.timeout, Duration::from_secs(2));
        assert_eq!(settings.delay, Duration::from_secs(30));
        assert_eq!(
            config.cluster.isolation_debounce().unwrap(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn bad_duration_is_reported() {
        let config: PulseConfig = toml::from_str("[persistence]\ntimeout = \"soon\"").unwrap();
        assert_eq!(
            config.persistence.settings("a").unwrap_err(),
            ConfigError::Duration("soon".into())
        );
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_duration_rejects_overflowing_minutes() {
        let huge = format!("{}m", u64::MAX / 60 + 1);
        assert!(matches!(parse_duration(&huge), Err(ConfigError::Duration(_))));
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)).unwrap(),
            Duration::from_secs(u64::MAX / 60 * 60)
        );
    }

    #[test]
    fn provider_resolution() {
        assert_eq!(
            ProviderKind::resolve(Signal::Readiness, "Cluster").unwrap(),
            ProviderKind::Cluster
        );
        assert_eq!(
            ProviderKind::resolve(Signal::Liveness, "bogus").unwrap_err(),
            ConfigError::UnknownProvider {
                signal: Signal::Liveness,
                value: "bogus".into()
            }
        );
        assert!(matches!(
            ProviderKind::resolve(Signal::Readiness, "persistence"),
            Err(ConfigError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn missing_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PulseConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.node.id, DEFAULT_NODE_ID);
    }
}
