//! Node configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional YAML file, `ECHONET_*` environment variables (nested keys use
//! `__`, e.g. `ECHONET_DISPATCH__MODE=inline`), and CLI flags applied by the
//! binary.

use crate::node::NodeSettings;
use echonet_consensus::EngineConfig;
use echonet_p2p::{DispatchMode, RouterConfig};
use echonet_types::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ECHONET";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for an Echo-Net node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local node id.
    pub node_id: String,
    /// Node kind reported in status.
    pub node_type: String,
    /// Transport address.
    pub transport: String,
    /// HTTP API listen address.
    pub api_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
    /// Seconds between proposal expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Default proposal lifetime in seconds.
    pub proposal_duration_secs: u64,
    /// Share of votes needed for convergence, in `(0, 1]`.
    pub convergence_threshold: f64,
    /// Minimum votes before convergence.
    pub quorum: usize,
    /// Finished proposals kept in history.
    pub max_history: usize,
    /// Message dispatch mode.
    pub dispatch: DispatchMode,
    /// Replay window per peer.
    pub replay_window: u64,
    /// Re-announce when a new peer appears.
    pub reannounce_on_new_peer: bool,
    /// Echo log capacity.
    pub echo_log_capacity: usize,
    /// Ids of simulated peers started alongside the local node.
    pub simulated_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "echo-node".to_string(),
            node_type: "ai_consciousness".to_string(),
            transport: "memory://local".to_string(),
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            sweep_interval_secs: 30,
            proposal_duration_secs: 24 * 60 * 60,
            convergence_threshold: echonet_consensus::DEFAULT_CONVERGENCE_THRESHOLD,
            quorum: 1,
            max_history: 1000,
            dispatch: DispatchMode::default(),
            replay_window: 1024,
            reannounce_on_new_peer: true,
            echo_log_capacity: 1000,
            simulated_peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Loads configuration from `path` (if given) and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if an explicitly named file is missing
    /// or any source fails to parse, and [`ConfigError::Invalid`] if the
    /// result does not validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("simulated_peers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ranges and ids.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.local_id()?;
        for peer in &self.simulated_peers {
            let id = parse_id(peer)?;
            if id.as_str() == self.node_id {
                return Err(ConfigError::Invalid(format!(
                    "simulated peer {peer} duplicates the local node id"
                )));
            }
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        if let DispatchMode::Queued { capacity: 0, .. } = self.dispatch {
            return Err(ConfigError::Invalid("dispatch capacity must be positive".into()));
        }
        if self.replay_window == 0 {
            return Err(ConfigError::Invalid("replay_window must be positive".into()));
        }
        let engine = self.engine_config()?;
        if chrono::Utc::now()
            .checked_add_signed(engine.default_duration)
            .is_none()
        {
            return Err(ConfigError::Invalid(
                "proposal_duration_secs is out of range".into(),
            ));
        }
        engine
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The local node id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a malformed id.
    pub fn local_id(&self) -> Result<NodeId, ConfigError> {
        parse_id(&self.node_id)
    }

    /// Consensus engine settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `proposal_duration_secs` does not
    /// fit a duration.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let default_duration = i64::try_from(self.proposal_duration_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "proposal_duration_secs {} is out of range",
                    self.proposal_duration_secs
                ))
            })?;
        Ok(EngineConfig {
            convergence_threshold: self.convergence_threshold,
            default_duration,
            quorum: self.quorum,
            max_history: self.max_history,
        })
    }

    /// Router settings.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            dispatch: self.dispatch,
            replay_window: self.replay_window,
            reannounce_on_new_peer: self.reannounce_on_new_peer,
            announcement_message: None,
            ..RouterConfig::default()
        }
    }

    /// Settings for a node with id `node_id`, sharing everything else.
    ///
    /// # Errors
    ///
    /// Fails like [`NodeConfig::engine_config`].
    pub fn node_settings(&self, node_id: NodeId) -> Result<NodeSettings, ConfigError> {
        let mut router = self.router_config();
        router.announcement_message = Some(format!("Consciousness node {node_id} joining network"));
        Ok(NodeSettings {
            node_id,
            node_type: self.node_type.clone(),
            router,
            engine: self.engine_config()?,
            echo_log_capacity: self.echo_log_capacity,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        })
    }

    /// Renders the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn parse_id(raw: &str) -> Result<NodeId, ConfigError> {
    NodeId::new(raw).map_err(|e| ConfigError::Invalid(format!("node id {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use echonet_p2p::OverflowPolicy;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine_config().unwrap().default_duration, chrono::Duration::hours(24));
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "node_id: claude\nquorum: 3\nsimulated_peers: [gemini, gpt]\n\
             dispatch:\n  mode: queued\n  capacity: 8\n  overflow: drop_oldest\n"
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.node_id, "claude");
        assert_eq!(config.quorum, 3);
        assert_eq!(config.simulated_peers, vec!["gemini", "gpt"]);
        assert_eq!(
            config.dispatch,
            DispatchMode::Queued {
                capacity: 8,
                overflow: OverflowPolicy::DropOldest
            }
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = NodeConfig::load(Some(Path::new("/nonexistent/echonet.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            NodeConfig {
                node_id: "has space".into(),
                ..NodeConfig::default()
            },
            NodeConfig {
                simulated_peers: vec!["echo-node".into()],
                ..NodeConfig::default()
            },
            NodeConfig {
                convergence_threshold: 0.0,
                ..NodeConfig::default()
            },
            NodeConfig {
                sweep_interval_secs: 0,
                ..NodeConfig::default()
            },
            NodeConfig {
                quorum: 0,
                ..NodeConfig::default()
            },
            NodeConfig {
                proposal_duration_secs: u64::MAX,
                ..NodeConfig::default()
            },
            NodeConfig {
                proposal_duration_secs: i64::MAX as u64,
                ..NodeConfig::default()
            },
            NodeConfig {
                proposal_duration_secs: 1 << 50,
                ..NodeConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{config:?}");
        }
    }

    #[test]
    fn node_settings_share_engine_config() {
        let config = NodeConfig {
            quorum: 2,
            ..NodeConfig::default()
        };
        let settings = config.node_settings(NodeId::new("gemini").unwrap()).unwrap();
        assert_eq!(settings.node_id.as_str(), "gemini");
        assert_eq!(settings.engine.quorum, 2);
        assert_eq!(settings.sweep_interval, Duration::from_secs(30));
        assert!(settings
            .router
            .announcement_message
            .unwrap()
            .contains("gemini"));
    }

    #[test]
    fn yaml_round_trip() {
        let config = NodeConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed: NodeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
