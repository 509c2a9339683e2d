mod builder;
mod hash;
mod info;

pub use builder::{build_descriptor, hash_file, HashedContent};
pub use hash::{ContentId, FileHash, FileHasher, PieceHash};
pub use info::{validate_name, ContentInfo, Descriptor};

use crate::error::Result;
use std::path::Path;
use tokio::fs;
use tracing::info;

/// Load and validate a descriptor file
pub async fn load_descriptor_file<P: AsRef<Path>>(path: P) -> Result<Descriptor> {
    let text = fs::read_to_string(path).await?;
    Descriptor::from_json(&text)
}

/// Write a descriptor as pretty-printed JSON
pub async fn save_descriptor_file<P: AsRef<Path>>(descriptor: &Descriptor, path: P) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, descriptor.to_json()?).await?;
    info!("Descriptor for {} saved to {}", descriptor.name(), path.display());
    Ok(())
}
