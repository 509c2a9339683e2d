use crate::descriptor::{ContentId, FileHash, PieceHash};
use crate::error::{Result, SwarmError};
use crate::tracker::{AnnounceRequest, PeerId, PeerInfo};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Requests understood by trackers and peer nodes
///
/// Decoding is schema-checked: an unknown `type`, a missing field or a
/// mistyped value is rejected as `InvalidRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Register or refresh a peer for a content id (tracker)
    Announce(AnnounceRequest),
    /// Ask for every other peer serving a content id (tracker)
    GetPeers {
        content_id: ContentId,
        peer_id: PeerId,
    },
    /// Names in the share index (peer)
    List,
    /// Metadata for one shared file (peer)
    Info { filename: String },
    /// One piece of a shared file (peer)
    PieceRequest { filename: String, piece_index: u64 },
    /// Exchange peer identifiers (peer)
    Handshake { peer_id: PeerId },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Announce(_) => "announce",
            Request::GetPeers { .. } => "get_peers",
            Request::List => "list",
            Request::Info { .. } => "info",
            Request::PieceRequest { .. } => "piece_request",
            Request::Handshake { .. } => "handshake",
        }
    }

    pub fn to_frame_payload(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| SwarmError::InvalidRequest(e.to_string()))
    }
}

/// Metadata a peer publishes for one shared file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub size: u64,
    /// Whole-file SHA-256
    pub hash: FileHash,
    pub piece_length: u64,
    pub pieces: Vec<PieceHash>,
    pub num_pieces: u64,
}

/// Machine-readable failure class carried in error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    IndexOutOfRange,
    FileMissing,
    InvalidRequest,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_pieces: Option<u64>,
}

impl ErrorReply {
    pub fn from_error(err: &SwarmError) -> Self {
        let (kind, index, num_pieces) = match err {
            SwarmError::NotFound(_) => (ErrorKind::NotFound, None, None),
            SwarmError::IndexOutOfRange { index, num_pieces } => {
                (ErrorKind::IndexOutOfRange, Some(*index), Some(*num_pieces))
            }
            SwarmError::FileMissing(_) => (ErrorKind::FileMissing, None, None),
            SwarmError::InvalidRequest(_) => (ErrorKind::InvalidRequest, None, None),
            _ => (ErrorKind::Internal, None, None),
        };

        Self {
            kind,
            message: err.to_string(),
            index,
            num_pieces,
        }
    }

    pub fn into_error(self) -> SwarmError {
        match self.kind {
            ErrorKind::NotFound => SwarmError::NotFound(self.message),
            ErrorKind::IndexOutOfRange => SwarmError::IndexOutOfRange {
                index: self.index.unwrap_or_default(),
                num_pieces: self.num_pieces.unwrap_or_default(),
            },
            ErrorKind::FileMissing => SwarmError::FileMissing(self.message),
            ErrorKind::InvalidRequest => SwarmError::InvalidRequest(self.message),
            ErrorKind::Internal => SwarmError::Protocol(format!("remote error: {}", self.message)),
        }
    }
}

/// Replies sent in message frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ack { status: String },
    Peers { peers: Vec<PeerInfo> },
    Files { files: Vec<String> },
    Info(FileInfo),
    Handshake { peer_id: PeerId },
    Error(ErrorReply),
}

impl Response {
    pub fn ack() -> Self {
        Response::Ack {
            status: "ok".to_string(),
        }
    }

    pub fn error(err: &SwarmError) -> Self {
        Response::Error(ErrorReply::from_error(err))
    }

    pub fn to_frame_payload(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| SwarmError::Protocol(format!("Malformed response: {}", e)))
    }

    /// Turn an error reply into the matching local error
    pub fn into_result(self) -> Result<Self> {
        match self {
            Response::Error(reply) => Err(reply.into_error()),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_tagged_requests() {
        let request = Request::decode(br#"{"type":"list"}"#).unwrap();
        assert_eq!(request, Request::List);

        let request =
            Request::decode(br#"{"type":"piece_request","filename":"a.txt","piece_index":2}"#)
                .unwrap();
        assert_eq!(
            request,
            Request::PieceRequest {
                filename: "a.txt".to_string(),
                piece_index: 2
            }
        );
    }

    #[test]
    fn test_announce_wire_shape() {
        let content_id = ContentId::of(b"x");
        let request = Request::Announce(AnnounceRequest {
            peer_id: PeerId::from("peer-a"),
            content_id,
            port: 6881,
            files: vec!["a.txt".to_string()],
        });

        let value: serde_json::Value =
            serde_json::from_slice(&request.to_frame_payload().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "announce",
                "peer_id": "peer-a",
                "content_id": content_id.to_hex(),
                "port": 6881,
                "files": ["a.txt"],
            })
        );
    }

    #[test]
    fn test_malformed_requests_are_invalid() {
        for payload in [
            &br#"{"type":"announce","peer_id":"p","port":1}"#[..],
            br#"{"content_id":"00"}"#,
            br#"{"type":"exec","code":"rm -rf /"}"#,
            br#"{"type":"piece_request","filename":"a","piece_index":-1}"#,
            b"not json",
        ] {
            let err = Request::decode(payload).unwrap_err();
            assert!(matches!(err, SwarmError::InvalidRequest(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_error_reply_maps_back() {
        let original = SwarmError::IndexOutOfRange {
            index: 99,
            num_pieces: 3,
        };
        let response = Response::error(&original);
        let payload = response.to_frame_payload().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["kind"], "index_out_of_range");

        let err = Response::decode(&payload).unwrap().into_result().unwrap_err();
        assert!(matches!(
            err,
            SwarmError::IndexOutOfRange {
                index: 99,
                num_pieces: 3
            }
        ));
    }

    #[test]
    fn test_ack_shape() {
        let value = serde_json::to_value(Response::ack()).unwrap();
        assert_eq!(value, json!({"type": "ack", "status": "ok"}));
    }
}
