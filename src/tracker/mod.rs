mod client;
mod peer;
mod registry;
mod request;
mod server;

pub use client::TrackerClient;
pub use peer::PeerInfo;
pub use registry::{Registry, RegistryEntry};
pub use request::AnnounceRequest;
pub use server::{Tracker, TrackerConfig};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Entries older than this are evicted by the sweep
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(300);

/// How often the tracker sweeps stale entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const PEER_ID_PREFIX: &str = "-SW0001-";

/// Opaque identifier a peer presents to trackers and other peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a random peer ID
    /// Format: -SW0001-<12 random alphanumerics>
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();

        Self(format!("{}{}", PEER_ID_PREFIX, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
