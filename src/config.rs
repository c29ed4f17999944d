//! # Node configuration
//!
//! TOML configuration for the depth map node. Every field has a default, so an empty file (or
//! no file at all) yields the stock setup: the PS3 stereo rig topics, latest-wins pairing, and
//! replay directories under the working directory.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::*;
use crate::sync::PairingPolicy;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub endpoints: Endpoints,
    pub pairing: PairingConfig,
    pub replay: ReplayConfig,
}

/// Names of the two input endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Endpoints {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PairingConfig {
    pub policy: PolicyKind,
    /// Only used by `max_skew`.
    pub max_skew_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    LatestWins,
    MaxSkew,
}

/// Directory replay transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayConfig {
    pub left_dir: PathBuf,
    pub right_dir: PathBuf,
    pub output_dir: PathBuf,
    pub frame_interval_ms: u64,
    /// Watched parameter control file.
    pub params_file: Option<PathBuf>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        content.parse()
    }

    pub fn pairing_policy(&self) -> PairingPolicy {
        match self.pairing.policy {
            PolicyKind::LatestWins => PairingPolicy::LatestWins,
            PolicyKind::MaxSkew => {
                PairingPolicy::MaxSkew(Duration::from_millis(self.pairing.max_skew_ms))
            }
        }
    }
}

impl std::str::FromStr for NodeConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("TOML parse error: {}", e)))
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            left: "/ps3_stereo/left/image_rect".to_string(),
            right: "/ps3_stereo/right/image_rect".to_string(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            left_dir: PathBuf::from("left"),
            right_dir: PathBuf::from("right"),
            output_dir: PathBuf::from("depthmap"),
            frame_interval_ms: 33,
            params_file: None,
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: NodeConfig = "".parse().unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.endpoints.left, "/ps3_stereo/left/image_rect");
        assert_eq!(config.pairing_policy(), PairingPolicy::LatestWins);
    }

    #[test]
    fn full_config_parses() {
        let content = r#"
[endpoints]
left = "/cam/left"
right = "/cam/right"

[pairing]
policy = "max_skew"
max_skew_ms = 20

[replay]
left_dir = "data/l"
right_dir = "data/r"
output_dir = "out"
frame_interval_ms = 10
params_file = "params.toml"
"#;
        let config: NodeConfig = content.parse().unwrap();
        assert_eq!(config.endpoints.right, "/cam/right");
        assert_eq!(
            config.pairing_policy(),
            PairingPolicy::MaxSkew(Duration::from_millis(20))
        );
        assert_eq!(config.replay.frame_interval_ms, 10);
        assert_eq!(config.replay.params_file, Some(PathBuf::from("params.toml")));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res: Result<NodeConfig> = "[endpoints]\ncenter = \"/cam\"".parse();
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let res = NodeConfig::from_file("/nonexistent/depthmap.toml");
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
