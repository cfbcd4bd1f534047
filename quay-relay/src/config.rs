use std::path::{Path, PathBuf};
use std::time::Duration;

use quay_types::addr::LogicAddr;
use quay_types::constants::{HANDSHAKE_TIMEOUT, MAX_LOGIN_FRAME_SIZE, SEND_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// File name [`RelayConfig::init`] writes.
pub const CONFIG_FILE_NAME: &str = "quay.toml";

/// Configuration for a mesh node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local logical address, "cluster.type.server".
    pub logic_addr: String,
    /// Address to listen on; must match what the registry holds for us.
    pub net_addr: String,
    /// Shared handshake secret.
    pub secret: String,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_max_login_frame")]
    pub max_login_frame: usize,
}

fn default_handshake_timeout_ms() -> u64 {
    HANDSHAKE_TIMEOUT.as_millis() as u64
}

fn default_send_timeout_ms() -> u64 {
    SEND_TIMEOUT.as_millis() as u64
}

fn default_max_login_frame() -> usize {
    MAX_LOGIN_FRAME_SIZE
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            logic_addr: "1.1.0".to_string(),
            net_addr: "127.0.0.1:8010".to_string(),
            secret: "quay_secret".to_string(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            max_login_frame: default_max_login_frame(),
        }
    }
}

impl RelayConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Read a mesh config from `path`. The logical address is checked here
    /// so a typo fails at load rather than at [`crate::MeshNode::new`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| RelayError::ConfigError {
            reason: format!("cannot read mesh config {}: {}", path.display(), e),
        })?;
        let config: RelayConfig = toml::from_str(&raw).map_err(|e| RelayError::ConfigError {
            reason: format!("invalid mesh config {}: {}", path.display(), e),
        })?;
        config
            .logic_addr
            .parse::<LogicAddr>()
            .map_err(|e| RelayError::ConfigError {
                reason: format!("mesh config {}: logic_addr: {}", path.display(), e),
            })?;
        Ok(config)
    }

    /// Write the default mesh config to `dir/quay.toml`, creating `dir` if
    /// needed. Returns the written path.
    pub fn init(dir: impl AsRef<Path>) -> Result<PathBuf, RelayError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let body = toml::to_string_pretty(&RelayConfig::default()).map_err(|e| {
            RelayError::ConfigError {
                reason: format!("cannot encode default mesh config: {}", e),
            }
        })?;
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.handshake_timeout(), Duration::from_millis(1000));
        assert_eq!(config.send_timeout(), Duration::from_millis(1000));
        assert_eq!(config.max_login_frame, MAX_LOGIN_FRAME_SIZE);
    }

    #[test]
    fn test_optional_fields_default() {
        let config: RelayConfig = toml::from_str(
            r#"
            logic_addr = "1.2.3"
            net_addr = "10.0.0.1:9000"
            secret = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(config.logic_addr, "1.2.3");
        assert_eq!(config.handshake_timeout_ms, 1000);
        assert_eq!(config.max_login_frame, MAX_LOGIN_FRAME_SIZE);
    }

    fn reason(result: Result<RelayConfig, RelayError>) -> String {
        match result {
            Err(RelayError::ConfigError { reason }) => reason,
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_init_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let path = RelayConfig::init(&dir).unwrap();
        assert_eq!(path, dir.join(CONFIG_FILE_NAME));

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.net_addr, RelayConfig::default().net_addr);
        assert_eq!(config.handshake_timeout(), HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let reason = reason(RelayConfig::load("/nonexistent/path/quay.toml"));
        assert!(reason.starts_with("cannot read mesh config /nonexistent/path/quay.toml"));
    }

    #[test]
    fn test_load_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "logic_addr = ").unwrap();
        let reason = reason(RelayConfig::load(&path));
        assert!(reason.starts_with("invalid mesh config "));
    }

    #[test]
    fn test_load_rejects_bad_logic_addr() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "logic_addr = \"1.2\"\nnet_addr = \"10.0.0.1:9000\"\nsecret = \"s\"\n",
        )
        .unwrap();
        let reason = reason(RelayConfig::load(&path));
        assert!(reason.contains("logic_addr"), "{}", reason);
    }
}
