use crate::tracker::PeerInfo;

/// Peers a download rotates through, one attempt each in turn
#[derive(Debug, Clone)]
pub struct PeerPool {
    peers: Vec<PeerInfo>,
    cursor: usize,
}

impl PeerPool {
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self { peers, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Next peer in round-robin order; the cursor carries over between pieces
    pub fn next_peer(&mut self) -> Option<&PeerInfo> {
        if self.peers.is_empty() {
            return None;
        }

        let peer = &self.peers[self.cursor % self.peers.len()];
        self.cursor = (self.cursor + 1) % self.peers.len();
        Some(peer)
    }

    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }
}
