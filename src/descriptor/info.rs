use super::{ContentId, FileHash, PieceHash};
use crate::error::{Result, SwarmError};
use crate::piece::{PieceLayout, MAX_PIECE_LENGTH};
use serde::{Deserialize, Serialize};

/// Identity and piece hashes of a content item; the part covered by the content id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// Suggested file name
    pub name: String,
    /// Number of bytes in each piece
    #[serde(rename = "piece length")]
    pub piece_length: u64,
    /// SHA-1 hashes of all pieces, in order
    pub pieces: Vec<PieceHash>,
    /// Total length of the content
    pub length: u64,
}

impl ContentInfo {
    pub fn layout(&self) -> PieceLayout {
        PieceLayout::new(self.piece_length, self.length)
    }

    /// Hash of the sorted-key, whitespace-free JSON form of this record.
    ///
    /// Routing through `serde_json::Value` sorts object keys, so the result
    /// does not depend on struct field order.
    pub fn content_id(&self) -> Result<ContentId> {
        let value = serde_json::to_value(self)?;
        let canonical = serde_json::to_vec(&value)?;
        Ok(ContentId::of(&canonical))
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_piece_length(self.piece_length)?;

        if self.length == 0 {
            return Err(SwarmError::MalformedDescriptor(
                "'length' must be positive".to_string(),
            ));
        }

        let expected = self.layout().num_pieces();
        if self.pieces.len() as u64 != expected {
            return Err(SwarmError::MalformedDescriptor(format!(
                "{} piece hashes for {} pieces",
                self.pieces.len(),
                expected
            )));
        }

        Ok(())
    }
}

/// Top-level descriptor, the JSON counterpart of a .torrent file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub info: ContentInfo,
    /// Tracker address (`host:port`)
    pub announce: String,
    pub content_id: ContentId,
    pub whole_file_hash: FileHash,
}

impl Descriptor {
    pub fn new(info: ContentInfo, announce: String, whole_file_hash: FileHash) -> Result<Self> {
        info.validate()?;
        let content_id = info.content_id()?;

        Ok(Self {
            info,
            announce,
            content_id,
            whole_file_hash,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let descriptor: Descriptor = serde_json::from_str(text)
            .map_err(|e| SwarmError::MalformedDescriptor(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<()> {
        self.info.validate()?;

        if self.announce.trim().is_empty() {
            return Err(SwarmError::MalformedDescriptor(
                "Missing 'announce' address".to_string(),
            ));
        }

        let computed = self.info.content_id()?;
        if computed != self.content_id {
            return Err(SwarmError::MalformedDescriptor(format!(
                "content id {} does not match info record ({})",
                self.content_id, computed
            )));
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn total_length(&self) -> u64 {
        self.info.length
    }

    pub fn piece_length(&self) -> u64 {
        self.info.piece_length
    }

    pub fn num_pieces(&self) -> usize {
        self.info.pieces.len()
    }

    pub fn piece_hash(&self, index: usize) -> Option<&PieceHash> {
        self.info.pieces.get(index)
    }

    pub fn layout(&self) -> PieceLayout {
        self.info.layout()
    }
}

/// A shareable name is a single path component
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(SwarmError::MalformedDescriptor(format!(
            "invalid file name '{}'",
            name
        )));
    }
    Ok(())
}

pub fn validate_piece_length(piece_length: u64) -> Result<()> {
    if piece_length == 0 || piece_length > MAX_PIECE_LENGTH {
        return Err(SwarmError::MalformedDescriptor(format!(
            "piece length {} outside 1..={}",
            piece_length, MAX_PIECE_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ContentInfo {
        ContentInfo {
            name: "letters.txt".to_string(),
            piece_length: 4,
            pieces: vec![
                PieceHash::of(b"ABCD"),
                PieceHash::of(b"EFGH"),
                PieceHash::of(b"IJ"),
            ],
            length: 10,
        }
    }

    fn sample() -> Descriptor {
        Descriptor::new(
            sample_info(),
            "127.0.0.1:8000".to_string(),
            FileHash::of(b"ABCDEFGHIJ"),
        )
        .unwrap()
    }

    #[test]
    fn test_json_roundtrip() {
        let descriptor = sample();
        let json = descriptor.to_json().unwrap();
        assert_eq!(Descriptor::from_json(&json).unwrap(), descriptor);
    }

    #[test]
    fn test_persisted_field_names() {
        let value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(value["info"]["piece length"], 4);
        assert_eq!(value["info"]["length"], 10);
        assert_eq!(value["info"]["pieces"].as_array().unwrap().len(), 3);
        assert_eq!(value["announce"], "127.0.0.1:8000");
        assert!(value["content_id"].is_string());
        assert!(value["whole_file_hash"].is_string());
    }

    #[test]
    fn test_content_id_ignores_tracker_and_field_order() {
        let a = sample();
        let b = Descriptor::new(
            sample_info(),
            "tracker.example:9000".to_string(),
            FileHash::of(b"ABCDEFGHIJ"),
        )
        .unwrap();
        assert_eq!(a.content_id, b.content_id);

        // Same record written with keys in a different order
        let reordered = format!(
            r#"{{"whole_file_hash":"{}","content_id":"{}","announce":"127.0.0.1:8000",
                "info":{{"length":10,"pieces":["{}","{}","{}"],"piece length":4,"name":"letters.txt"}}}}"#,
            a.whole_file_hash, a.content_id, a.info.pieces[0], a.info.pieces[1], a.info.pieces[2],
        );
        assert_eq!(Descriptor::from_json(&reordered).unwrap(), a);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["info"].as_object_mut().unwrap().remove("pieces");

        let err = Descriptor::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, SwarmError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_piece_count_mismatch_is_malformed() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["info"]["pieces"].as_array_mut().unwrap().pop();

        let err = Descriptor::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, SwarmError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_tampered_content_id_is_malformed() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["content_id"] = serde_json::Value::String("00".repeat(20));

        let err = Descriptor::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, SwarmError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_rejects_path_like_names() {
        for name in ["", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(validate_name(name).is_err(), "{:?} accepted", name);
        }
        assert!(validate_name("report.pdf").is_ok());
    }

    #[test]
    fn test_rejects_zero_piece_length() {
        let mut info = sample_info();
        info.piece_length = 0;
        let err = Descriptor::new(info, "t:1".to_string(), FileHash::of(b"")).unwrap_err();
        assert!(matches!(err, SwarmError::MalformedDescriptor(_)));
    }
}
