use crate::error::{Result, SwarmError};
use crate::tracker::PeerId;
use crate::wire::{Connection, FileInfo, Frame, Request, Response, Timeouts};
use bytes::Bytes;
use tracing::debug;

/// Outbound view of another node; every call is one short connection
#[derive(Debug, Clone)]
pub struct RemotePeer {
    addr: String,
    timeouts: Timeouts,
}

impl RemotePeer {
    pub fn new(addr: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            addr: addr.into(),
            timeouts,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Exchange peer ids; returns the remote node's id
    pub async fn handshake(&self, own_id: &PeerId) -> Result<PeerId> {
        let request = Request::Handshake {
            peer_id: own_id.clone(),
        };
        match self.exchange(&request).await? {
            Response::Handshake { peer_id } => Ok(peer_id),
            other => Err(self.unexpected(&other)),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        match self.exchange(&Request::List).await? {
            Response::Files { files } => Ok(files),
            other => Err(self.unexpected(&other)),
        }
    }

    pub async fn info(&self, filename: &str) -> Result<FileInfo> {
        let request = Request::Info {
            filename: filename.to_string(),
        };
        match self.exchange(&request).await? {
            Response::Info(info) => Ok(info),
            other => Err(self.unexpected(&other)),
        }
    }

    /// Fetch one piece; the payload is not verified here
    pub async fn piece(&self, filename: &str, piece_index: u64) -> Result<Bytes> {
        let mut conn = Connection::connect(&self.addr, &self.timeouts).await?;
        let request = Request::PieceRequest {
            filename: filename.to_string(),
            piece_index,
        };

        let reply = match conn.send_request(&request).await {
            Ok(()) => conn.receive_frame().await,
            Err(e) => Err(e),
        };
        conn.close().await;

        match reply? {
            Frame::Piece(data) => {
                debug!(
                    "Received piece {} of {} from {} ({} bytes)",
                    piece_index,
                    filename,
                    self.addr,
                    data.len()
                );
                Ok(data)
            }
            Frame::Message(payload) => {
                let response = Response::decode(&payload)?.into_result()?;
                Err(self.unexpected(&response))
            }
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Response> {
        let mut conn = Connection::connect(&self.addr, &self.timeouts).await?;
        let response = conn.request(request).await;
        conn.close().await;
        response
    }

    fn unexpected(&self, response: &Response) -> SwarmError {
        SwarmError::Protocol(format!(
            "unexpected reply from peer {}: {:?}",
            self.addr, response
        ))
    }
}
