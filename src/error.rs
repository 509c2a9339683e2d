use std::fmt;
use thiserror::Error;

/// Which integrity check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Piece,
    WholeFile,
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKind::Piece => write!(f, "piece"),
            HashKind::WholeFile => write!(f, "whole file"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("No peers available")]
    NoPeersAvailable,

    #[error("Piece {0} unavailable from every peer")]
    PieceUnavailable(usize),

    #[error("{0} hash mismatch")]
    HashMismatch(HashKind),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Piece index {index} out of range ({num_pieces} pieces)")]
    IndexOutOfRange { index: u64, num_pieces: u64 },

    #[error("Backing file missing: {0}")]
    FileMissing(String),

    #[error("Connection timed out: {0}")]
    ConnectionTimeout(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
