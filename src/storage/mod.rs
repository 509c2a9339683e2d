use crate::descriptor::{FileHash, FileHasher};
use crate::error::{HashKind, Result, SwarmError};
use crate::piece::PieceLayout;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use rand::Rng;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hidden scratch file a download is assembled in; the random tag keeps
/// concurrent downloads of the same name apart
fn temp_path_for(output_dir: &Path, name: &str) -> PathBuf {
    let tag: u32 = rand::thread_rng().gen();
    output_dir.join(format!(".{}.{:08x}.part", name, tag))
}

/// Writes verified pieces at their absolute offsets into a pre-sized
/// temporary file, then publishes it by rename.
///
/// Dropping a writer that was never published removes the temporary file.
pub struct PieceWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    layout: PieceLayout,
    file: Option<File>,
    bytes_written: u64,
    published: bool,
}

impl PieceWriter {
    pub async fn create<P: AsRef<Path>>(output_dir: P, name: &str, layout: PieceLayout) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir).await?;

        let temp_path = temp_path_for(output_dir, name);
        let final_path = output_dir.join(name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        file.set_len(layout.total_length()).await?;

        debug!(
            "Pre-sized {} to {} bytes",
            temp_path.display(),
            layout.total_length()
        );

        Ok(Self {
            temp_path,
            final_path,
            layout,
            file: Some(file),
            bytes_written: 0,
            published: false,
        })
    }

    /// Write a piece at its absolute offset
    pub async fn write_piece(&mut self, piece_index: usize, data: &[u8]) -> Result<()> {
        let (offset, length) = self.layout.bounds(piece_index as u64).ok_or(
            SwarmError::IndexOutOfRange {
                index: piece_index as u64,
                num_pieces: self.layout.num_pieces(),
            },
        )?;

        if data.len() as u64 != length {
            return Err(SwarmError::Protocol(format!(
                "piece {} is {} bytes, expected {}",
                piece_index,
                data.len(),
                length
            )));
        }

        let file = self.file.as_mut().ok_or_else(|| {
            SwarmError::Protocol("piece writer already finished".to_string())
        })?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        self.bytes_written += length;

        debug!(
            "Wrote piece {} at offset {} ({} bytes)",
            piece_index, offset, length
        );
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Hash the assembled file and, only if it matches, rename it into place
    pub async fn publish(mut self, expected: &FileHash) -> Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        let actual = hash_whole_file(&self.temp_path).await?;
        if actual != *expected {
            warn!(
                "Whole-file hash mismatch for {}: expected {}, got {}",
                self.final_path.display(),
                expected,
                actual
            );
            self.discard().await;
            return Err(SwarmError::HashMismatch(HashKind::WholeFile));
        }

        if fs::try_exists(&self.final_path).await.unwrap_or(false) {
            warn!("Replacing existing {}", self.final_path.display());
        }
        fs::rename(&self.temp_path, &self.final_path).await?;
        self.published = true;

        info!("Published {}", self.final_path.display());
        Ok(self.final_path.clone())
    }

    /// Remove the temporary output
    pub async fn discard(mut self) {
        self.file.take();
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => debug!("Discarded {}", self.temp_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.temp_path.display(), e),
        }
        // Already cleaned up; nothing left for Drop to do
        self.published = true;
    }
}

impl Drop for PieceWriter {
    fn drop(&mut self) {
        if !self.published {
            self.file.take();
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Read exactly `length` bytes at `offset`.
///
/// A missing or truncated file maps to `FileMissing`: the caller's index no
/// longer describes what is on disk.
pub async fn read_piece_at(path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
    let missing = |e: std::io::Error| match e.kind() {
        ErrorKind::NotFound | ErrorKind::UnexpectedEof => {
            SwarmError::FileMissing(path.display().to_string())
        }
        _ => SwarmError::Io(e),
    };

    let mut file = File::open(path).await.map_err(missing)?;
    file.seek(SeekFrom::Start(offset)).await.map_err(missing)?;

    let mut buffer = vec![0u8; length as usize];
    file.read_exact(&mut buffer).await.map_err(missing)?;

    Ok(buffer)
}

/// SHA-256 over a file's full contents
pub async fn hash_whole_file(path: &Path) -> Result<FileHash> {
    let mut file = File::open(path).await?;
    let mut hasher = FileHasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}
