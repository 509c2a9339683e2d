use super::info::validate_piece_length;
use super::{ContentInfo, Descriptor, FileHash, FileHasher, PieceHash};
use crate::error::{Result, SwarmError};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Piece hashes and whole-file hash gathered in one pass over a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedContent {
    pub length: u64,
    pub pieces: Vec<PieceHash>,
    pub whole_file_hash: FileHash,
}

/// Build a descriptor for `path`, announcing to `tracker`
pub async fn build_descriptor<P: AsRef<Path>>(
    path: P,
    piece_length: u64,
    tracker: &str,
) -> Result<Descriptor> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            SwarmError::MalformedDescriptor(format!("{} has no usable file name", path.display()))
        })?
        .to_string();

    let hashed = hash_file(path, piece_length).await?;

    let info = ContentInfo {
        name,
        piece_length,
        pieces: hashed.pieces,
        length: hashed.length,
    };

    Descriptor::new(info, tracker.to_string(), hashed.whole_file_hash)
}

/// Stream a file once, hashing every piece and the whole content
pub async fn hash_file<P: AsRef<Path>>(path: P, piece_length: u64) -> Result<HashedContent> {
    validate_piece_length(piece_length)?;

    let path = path.as_ref();
    let mut file = File::open(path).await?;
    let hashed = hash_reader(&mut file, piece_length).await?;

    if hashed.length == 0 {
        return Err(SwarmError::EmptyInput(path.display().to_string()));
    }

    debug!(
        "Hashed {}: {} bytes, {} pieces",
        path.display(),
        hashed.length,
        hashed.pieces.len()
    );

    Ok(hashed)
}

async fn hash_reader<R: AsyncRead + Unpin>(reader: &mut R, piece_length: u64) -> Result<HashedContent> {
    let mut buffer = vec![0u8; piece_length as usize];
    let mut pieces = Vec::new();
    let mut whole = FileHasher::new();
    let mut length = 0u64;

    loop {
        let filled = fill_buffer(reader, &mut buffer).await?;
        if filled == 0 {
            break;
        }

        let piece = &buffer[..filled];
        pieces.push(PieceHash::of(piece));
        whole.update(piece);
        length += filled as u64;

        if filled < buffer.len() {
            break;
        }
    }

    Ok(HashedContent {
        length,
        pieces,
        whole_file_hash: whole.finalize(),
    })
}

/// Read until `buffer` is full or the reader is exhausted
async fn fill_buffer<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
