/// Default piece size (256 KiB)
pub const DEFAULT_PIECE_LENGTH: u64 = 256 * 1024;

/// Largest piece size a descriptor may declare (32 MiB)
pub const MAX_PIECE_LENGTH: u64 = 32 * 1024 * 1024;

/// How a content item of `total_length` bytes is cut into pieces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    piece_length: u64,
    total_length: u64,
}

impl PieceLayout {
    /// `piece_length` must be non-zero; callers validate it first.
    pub fn new(piece_length: u64, total_length: u64) -> Self {
        debug_assert!(piece_length > 0, "piece length must be positive");
        Self {
            piece_length,
            total_length,
        }
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn num_pieces(&self) -> u64 {
        self.total_length.div_ceil(self.piece_length)
    }

    /// Absolute byte offset and length of a piece, or `None` past the end
    pub fn bounds(&self, piece_index: u64) -> Option<(u64, u64)> {
        if piece_index >= self.num_pieces() {
            return None;
        }

        let offset = piece_index * self.piece_length;
        // Last piece might be smaller
        let length = std::cmp::min(self.piece_length, self.total_length - offset);

        Some((offset, length))
    }

    pub fn piece_len(&self, piece_index: u64) -> Option<u64> {
        self.bounds(piece_index).map(|(_, length)| length)
    }
}
