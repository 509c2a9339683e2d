use crate::error::{Result, SwarmError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

/// Fixed-size digest rendered as lowercase hex on the wire and on disk
macro_rules! hex_digest {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_hex(s: &str) -> Result<Self> {
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(s, &mut bytes).map_err(|e| {
                    SwarmError::MalformedDescriptor(format!(
                        "invalid {} '{}': {}",
                        stringify!($name),
                        s,
                        e
                    ))
                })?;
                Ok(Self(bytes))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = SwarmError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_digest!(
    /// SHA-1 digest of a single piece
    PieceHash,
    20
);

hex_digest!(
    /// SHA-1 digest of the canonical info record; the swarm lookup key
    ContentId,
    20
);

hex_digest!(
    /// SHA-256 digest of a complete file
    FileHash,
    32
);

impl PieceHash {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        Self::of(data) == *self
    }
}

impl ContentId {
    pub fn of(canonical: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(canonical);
        Self(hasher.finalize().into())
    }
}

/// Incremental SHA-256 over a byte stream
#[derive(Default)]
pub struct FileHasher {
    inner: Sha256,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> FileHash {
        FileHash(self.inner.finalize().into())
    }
}

impl FileHash {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = FileHasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_hash_known_vector() {
        // sha1("abc")
        let hash = PieceHash::of(b"abc");
        assert_eq!(hash.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert!(hash.matches(b"abc"));
        assert!(!hash.matches(b"abd"));
    }

    #[test]
    fn test_file_hash_known_vector() {
        // sha256("abc")
        assert_eq!(
            FileHash::of(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = FileHasher::new();
        hasher.update(b"ABCD");
        hasher.update(b"EFGH");
        hasher.update(b"IJ");
        assert_eq!(hasher.finalize(), FileHash::of(b"ABCDEFGHIJ"));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let hash = PieceHash::of(b"abc");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"a9993e364706816aba3e25717850c26c9cd0d89d\"");

        let parsed: PieceHash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_rejects_wrong_length_hex() {
        assert!(PieceHash::from_hex("abcd").is_err());
        assert!(serde_json::from_str::<FileHash>("\"zz\"").is_err());
        assert!("not hex at all".parse::<ContentId>().is_err());
    }
}
