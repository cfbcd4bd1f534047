use serde::{Deserialize, Serialize};

use crate::addr::LogicAddr;
use crate::error::QuayError;

/// Login request sent once by the connecting side of a handshake.
///
/// Serialized as JSON with the field names `LogicAddr`, `NetAddr` and
/// `IsStream`, then encrypted with the shared handshake cipher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequest {
    /// Raw packed logical address claimed by the peer.
    pub logic_addr: u32,
    /// Network address the peer claims to be registered under.
    pub net_addr: String,
    /// `true` for a stream-multiplexed connection, `false` for message mode.
    pub is_stream: bool,
}

impl LoginRequest {
    pub fn new(logic_addr: LogicAddr, net_addr: impl Into<String>, is_stream: bool) -> Self {
        Self {
            logic_addr: logic_addr.as_u32(),
            net_addr: net_addr.into(),
            is_stream,
        }
    }

    /// The claimed logical address, validated.
    pub fn logic_addr(&self) -> Result<LogicAddr, QuayError> {
        LogicAddr::from_u32(self.logic_addr)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, QuayError> {
        serde_json::to_vec(self).map_err(|e| QuayError::SerializationError {
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, QuayError> {
        serde_json::from_slice(data).map_err(|e| QuayError::DeserializationError {
            reason: e.to_string(),
        })
    }
}

/// An application message travelling between two nodes.
///
/// The payload is opaque at this layer; `kind` selects the handler on the
/// receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: u16,
    pub from: LogicAddr,
    pub to: LogicAddr,
    pub payload: Vec<u8>,
}

/// One node as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub logic_addr: LogicAddr,
    pub net_addr: String,
    /// Whether the node is visible to other clusters through a harbor.
    #[serde(default)]
    pub export: bool,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> LoginRequest {
        LoginRequest::new("1.2.3".parse().unwrap(), "10.0.0.1:9000", false)
    }

    #[test]
    fn test_login_request_field_names() {
        let json = String::from_utf8(sample_request().to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"LogicAddr\""));
        assert!(json.contains("\"NetAddr\":\"10.0.0.1:9000\""));
        assert!(json.contains("\"IsStream\":false"));
    }

    #[test]
    fn test_login_request_roundtrip() {
        let req = sample_request();
        let decoded = LoginRequest::from_bytes(&req.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.logic_addr().unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn test_login_request_wrong_shape() {
        assert!(LoginRequest::from_bytes(b"{\"LogicAddr\":1}").is_err());
        assert!(LoginRequest::from_bytes(b"not json").is_err());
        assert!(LoginRequest::from_bytes(b"").is_err());
    }

    #[test]
    fn test_login_request_invalid_addr() {
        let req = LoginRequest {
            logic_addr: 0,
            net_addr: "10.0.0.1:9000".to_string(),
            is_stream: true,
        };
        assert!(matches!(
            req.logic_addr(),
            Err(QuayError::InvalidAddr { .. })
        ));
    }

    #[test]
    fn test_node_info_defaults() {
        let addr: LogicAddr = "1.2.3".parse().unwrap();
        let json = format!(
            "{{\"logic_addr\":{},\"net_addr\":\"10.0.0.1:9000\"}}",
            addr.as_u32()
        );
        let info: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info.logic_addr, addr);
        assert!(!info.export);
        assert!(info.available);
    }
}
