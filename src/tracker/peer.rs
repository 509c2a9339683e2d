use super::PeerId;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Represents a peer in the swarm, as reported by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub ip: IpAddr,
    pub port: u16,
    /// File names the peer advertised when announcing
    #[serde(default)]
    pub files: Vec<String>,
}

impl PeerInfo {
    pub fn new(peer_id: PeerId, addr: SocketAddr, files: Vec<String>) -> Self {
        Self {
            peer_id,
            ip: addr.ip(),
            port: addr.port(),
            files,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let peer = PeerInfo::new(
            PeerId::from("-SW0001-abcdefghijkl"),
            "127.0.0.1:6881".parse().unwrap(),
            vec!["a.txt".to_string()],
        );

        let value = serde_json::to_value(&peer).unwrap();
        assert_eq!(value["ip"], "127.0.0.1");
        assert_eq!(value["port"], 6881);
        assert_eq!(value["peer_id"], "-SW0001-abcdefghijkl");

        let parsed: PeerInfo = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.addr(), "127.0.0.1:6881".parse().unwrap());
    }
}
