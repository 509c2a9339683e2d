use super::{AnnounceRequest, PeerId, PeerInfo};
use crate::descriptor::ContentId;
use crate::error::{Result, SwarmError};
use crate::wire::{Connection, Request, Response, Timeouts};
use tracing::{debug, info};

/// Client for talking to a swarm tracker
///
/// Each call opens a fresh connection, sends one request and closes.
#[derive(Debug, Clone, Default)]
pub struct TrackerClient {
    timeouts: Timeouts,
}

impl TrackerClient {
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }

    /// Register (or refresh) this peer for a content id
    pub async fn announce(&self, tracker: &str, request: &AnnounceRequest) -> Result<()> {
        info!(
            "Announcing {} to tracker {} on port {}",
            request.content_id, tracker, request.port
        );

        let response = self.exchange(tracker, Request::Announce(request.clone())).await?;
        match response {
            Response::Ack { .. } => Ok(()),
            other => Err(unexpected(tracker, &other)),
        }
    }

    /// Every other peer the tracker knows for `content_id`
    pub async fn get_peers(
        &self,
        tracker: &str,
        content_id: &ContentId,
        peer_id: &PeerId,
    ) -> Result<Vec<PeerInfo>> {
        let request = Request::GetPeers {
            content_id: *content_id,
            peer_id: peer_id.clone(),
        };

        match self.exchange(tracker, request).await? {
            Response::Peers { peers } => {
                info!("Received {} peers from tracker {}", peers.len(), tracker);
                Ok(peers)
            }
            other => Err(unexpected(tracker, &other)),
        }
    }

    async fn exchange(&self, tracker: &str, request: Request) -> Result<Response> {
        let mut conn = Connection::connect(tracker, &self.timeouts).await?;
        let response = conn.request(&request).await;
        conn.close().await;

        debug!("Tracker {} answered {} request", tracker, request.kind());
        response
    }
}

fn unexpected(tracker: &str, response: &Response) -> SwarmError {
    SwarmError::Protocol(format!(
        "unexpected reply from tracker {}: {:?}",
        tracker, response
    ))
}
