use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::constants::{
    CLUSTER_MASK, CLUSTER_SHIFT, HARBOR_TYPE, MAX_CLUSTER, MAX_SERVER, MAX_TYPE, SERVER_MASK,
    TYPE_MASK, TYPE_SHIFT,
};
use crate::error::QuayError;

/// A node's 32-bit logical address.
///
/// Layout (most significant bit first): `[cluster:14][type:8][server:10]`.
/// Valid ranges are cluster `1..=16383`, type `1..=255` and server `0..=1023`.
/// Type 255 is reserved for harbor nodes.
///
/// Both constructors validate every field; an out-of-range value is an error,
/// never a clamped address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct LogicAddr(u32);

impl LogicAddr {
    /// Build an address from its three fields.
    pub fn new(cluster: u32, node_type: u32, server: u32) -> Result<Self, QuayError> {
        validate(cluster, node_type, server)?;
        Ok(LogicAddr(
            (node_type << TYPE_SHIFT) | (cluster << CLUSTER_SHIFT) | server,
        ))
    }

    /// Decode a packed raw value.
    pub fn from_u32(raw: u32) -> Result<Self, QuayError> {
        let cluster = (raw & CLUSTER_MASK) >> CLUSTER_SHIFT;
        let node_type = (raw & TYPE_MASK) >> TYPE_SHIFT;
        let server = raw & SERVER_MASK;
        validate(cluster, node_type, server)?;
        Ok(LogicAddr(raw))
    }

    pub fn cluster(&self) -> u32 {
        (self.0 & CLUSTER_MASK) >> CLUSTER_SHIFT
    }

    pub fn node_type(&self) -> u32 {
        (self.0 & TYPE_MASK) >> TYPE_SHIFT
    }

    pub fn server(&self) -> u32 {
        self.0 & SERVER_MASK
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this address names a harbor (cross-cluster bridge) node.
    pub fn is_harbor(&self) -> bool {
        self.node_type() == HARBOR_TYPE
    }
}

fn validate(cluster: u32, node_type: u32, server: u32) -> Result<(), QuayError> {
    if cluster == 0 || cluster > MAX_CLUSTER {
        return Err(QuayError::invalid_addr(format!(
            "cluster {} out of range 1..={}",
            cluster, MAX_CLUSTER
        )));
    }
    if node_type == 0 || node_type > MAX_TYPE {
        return Err(QuayError::invalid_addr(format!(
            "type {} out of range 1..={}",
            node_type, MAX_TYPE
        )));
    }
    if server > MAX_SERVER {
        return Err(QuayError::invalid_addr(format!(
            "server {} out of range 0..={}",
            server, MAX_SERVER
        )));
    }
    Ok(())
}

impl TryFrom<u32> for LogicAddr {
    type Error = QuayError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        LogicAddr::from_u32(raw)
    }
}

impl From<LogicAddr> for u32 {
    fn from(addr: LogicAddr) -> u32 {
        addr.0
    }
}

impl FromStr for LogicAddr {
    type Err = QuayError;

    /// Parse the dotted `"cluster.type.server"` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(QuayError::invalid_addr(format!(
                "'{}' is not in 'cluster.type.server' format",
                s
            )));
        }

        let mut fields = [0u32; 3];
        for (field, part) in fields.iter_mut().zip(&parts) {
            *field = part.parse::<u32>().map_err(|_| {
                QuayError::invalid_addr(format!("non-numeric segment '{}' in '{}'", part, s))
            })?;
        }

        LogicAddr::new(fields[0], fields[1], fields[2])
    }
}

impl fmt::Display for LogicAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.cluster(), self.node_type(), self.server())
    }
}

/// A logical address paired with the network address it is reachable at.
///
/// The logical half never changes. The network half is rewritten by the node
/// registry whenever discovery reports a move, so it sits behind a lock and is
/// only reachable through [`Addr::net_addr`] and [`Addr::set_net_addr`].
#[derive(Debug)]
pub struct Addr {
    logic_addr: LogicAddr,
    net_addr: Mutex<String>,
}

impl Addr {
    pub fn new(logic_addr: LogicAddr, net_addr: impl Into<String>) -> Self {
        Self {
            logic_addr,
            net_addr: Mutex::new(net_addr.into()),
        }
    }

    /// Build from the dotted logical form, e.g. `Addr::parse("1.2.3", "10.0.0.1:9000")`.
    pub fn parse(logic_addr: &str, net_addr: impl Into<String>) -> Result<Self, QuayError> {
        Ok(Self::new(logic_addr.parse()?, net_addr))
    }

    pub fn logic_addr(&self) -> LogicAddr {
        self.logic_addr
    }

    /// Snapshot of the current network address.
    pub fn net_addr(&self) -> String {
        self.net_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the network address. An empty update is ignored.
    pub fn set_net_addr(&self, net_addr: &str) {
        if net_addr.is_empty() {
            return;
        }
        let mut guard = self.net_addr.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = net_addr.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_encode_layout() {
        let addr = LogicAddr::new(1, 2, 3).unwrap();
        assert_eq!(addr.as_u32(), (1 << 18) | (2 << 10) | 3);
        assert_eq!(addr.cluster(), 1);
        assert_eq!(addr.node_type(), 2);
        assert_eq!(addr.server(), 3);
    }

    #[test]
    fn test_parse_string() {
        let addr: LogicAddr = "16383.255.1023".parse().unwrap();
        assert_eq!(addr.cluster(), 16383);
        assert_eq!(addr.node_type(), 255);
        assert_eq!(addr.server(), 1023);
        assert!(addr.is_harbor());
        assert_eq!(addr.to_string(), "16383.255.1023");
    }

    #[test]
    fn test_reject_out_of_range_fields() {
        assert!(LogicAddr::new(0, 1, 0).is_err());
        assert!(LogicAddr::new(16384, 1, 0).is_err());
        assert!(LogicAddr::new(1, 0, 0).is_err());
        assert!(LogicAddr::new(1, 256, 0).is_err());
        assert!(LogicAddr::new(1, 1, 1024).is_err());

        assert!("0.1.0".parse::<LogicAddr>().is_err());
        assert!("16384.1.0".parse::<LogicAddr>().is_err());
        assert!("1.0.0".parse::<LogicAddr>().is_err());
        assert!("1.256.0".parse::<LogicAddr>().is_err());
        assert!("1.1.1024".parse::<LogicAddr>().is_err());
    }

    #[test]
    fn test_reject_malformed_strings() {
        for s in ["", "1.2", "1.2.3.4", "a.2.3", "1..3", "1.2.-3", " 1.2.3"] {
            let err = s.parse::<LogicAddr>().unwrap_err();
            assert!(matches!(err, QuayError::InvalidAddr { .. }), "{}", s);
        }
    }

    #[test]
    fn test_reject_raw_with_zero_fields() {
        // cluster bits empty
        assert!(LogicAddr::from_u32(1 << 10).is_err());
        // type bits empty
        assert!(LogicAddr::from_u32(1 << 18).is_err());
        assert!(LogicAddr::from_u32(0).is_err());
    }

    #[test]
    fn test_equality_by_raw_value() {
        let a: LogicAddr = "7.8.9".parse().unwrap();
        let b = LogicAddr::from_u32(a.as_u32()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, "7.8.10".parse().unwrap());
    }

    #[test]
    fn test_serde_as_u32() {
        let addr = LogicAddr::new(1, 2, 3).unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, addr.as_u32().to_string());
        let back: LogicAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<LogicAddr>("0").is_err());
    }

    #[test]
    fn test_addr_net_addr_update() {
        let addr = Addr::parse("1.2.3", "10.0.0.1:9000").unwrap();
        assert_eq!(addr.logic_addr().to_string(), "1.2.3");
        assert_eq!(addr.net_addr(), "10.0.0.1:9000");

        addr.set_net_addr("10.0.0.2:9000");
        assert_eq!(addr.net_addr(), "10.0.0.2:9000");

        // Empty update is a no-op.
        addr.set_net_addr("");
        assert_eq!(addr.net_addr(), "10.0.0.2:9000");
    }

    #[test]
    fn test_addr_concurrent_updates() {
        let addr = Arc::new(Addr::parse("1.2.3", "0").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let addr = Arc::clone(&addr);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        addr.set_net_addr(&format!("10.0.0.{}:9000", i));
                        let _ = addr.net_addr();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(addr.net_addr().starts_with("10.0.0."));
    }

    #[test]
    fn test_parse_invalid_logic_addr_for_addr() {
        assert!(Addr::parse("1.2", "10.0.0.1:9000").is_err());
    }

    proptest! {
        #[test]
        fn prop_u32_roundtrip(cluster in 1u32..=16383, ty in 1u32..=255, server in 0u32..=1023) {
            let addr = LogicAddr::new(cluster, ty, server).unwrap();
            let again = LogicAddr::from_u32(addr.as_u32()).unwrap();
            prop_assert_eq!(again, addr);
            prop_assert_eq!(again.cluster(), cluster);
            prop_assert_eq!(again.node_type(), ty);
            prop_assert_eq!(again.server(), server);
        }

        #[test]
        fn prop_string_roundtrip(cluster in 1u32..=16383, ty in 1u32..=255, server in 0u32..=1023) {
            let addr = LogicAddr::new(cluster, ty, server).unwrap();
            let parsed: LogicAddr = addr.to_string().parse().unwrap();
            prop_assert_eq!(parsed, addr);
        }
    }
}
