use super::PeerId;
use crate::descriptor::ContentId;
use serde::{Deserialize, Serialize};

/// Parameters a peer sends when registering with the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRequest {
    /// Unique peer ID
    pub peer_id: PeerId,
    /// Swarm being joined
    pub content_id: ContentId,
    /// Port this peer is listening on
    pub port: u16,
    /// File names served for this content
    #[serde(default)]
    pub files: Vec<String>,
}

impl AnnounceRequest {
    pub fn new(peer_id: PeerId, content_id: ContentId, port: u16) -> Self {
        Self {
            peer_id,
            content_id,
            port,
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }
}
