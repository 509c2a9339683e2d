use crate::descriptor::{hash_file, validate_name, Descriptor, FileHash, PieceHash};
use crate::error::Result;
use crate::piece::PieceLayout;
use crate::wire::FileInfo;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A file this node serves, with the hashes computed when it was indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub path: PathBuf,
    pub size: u64,
    pub piece_length: u64,
    pub pieces: Vec<PieceHash>,
    pub whole_file_hash: FileHash,
    /// Modification time seen at indexing; unchanged files are not rehashed
    pub modified: Option<SystemTime>,
}

impl SharedFile {
    /// Hash a file on disk
    pub async fn from_disk<P: AsRef<Path>>(path: P, piece_length: u64) -> Result<Self> {
        let path = path.as_ref();
        let modified = fs::metadata(path).await?.modified().ok();
        let hashed = hash_file(path, piece_length).await?;

        Ok(Self {
            path: path.to_path_buf(),
            size: hashed.length,
            piece_length,
            pieces: hashed.pieces,
            whole_file_hash: hashed.whole_file_hash,
            modified,
        })
    }

    /// Entry for a freshly verified download; the descriptor already holds every hash
    pub async fn from_descriptor(descriptor: &Descriptor, path: PathBuf) -> Result<Self> {
        let modified = fs::metadata(&path).await?.modified().ok();

        Ok(Self {
            path,
            size: descriptor.total_length(),
            piece_length: descriptor.piece_length(),
            pieces: descriptor.info.pieces.clone(),
            whole_file_hash: descriptor.whole_file_hash,
            modified,
        })
    }

    pub fn layout(&self) -> PieceLayout {
        PieceLayout::new(self.piece_length, self.size)
    }

    pub fn num_pieces(&self) -> u64 {
        self.pieces.len() as u64
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            size: self.size,
            hash: self.whole_file_hash,
            piece_length: self.piece_length,
            pieces: self.pieces.clone(),
            num_pieces: self.num_pieces(),
        }
    }
}

/// Immutable view of the shared directory, keyed by file name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareIndex {
    files: BTreeMap<String, SharedFile>,
}

impl ShareIndex {
    /// Build an index from the regular files directly inside `dir`.
    ///
    /// Hidden files (including in-progress `.part` downloads) and empty files
    /// are skipped. Entries of `previous` whose size and modification time
    /// are unchanged are reused as-is; changed files keep their previous
    /// piece length so descriptors already handed out stay valid.
    pub async fn scan(dir: &Path, piece_length: u64, previous: &ShareIndex) -> Result<Self> {
        let mut files = BTreeMap::new();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if name.starts_with('.') || validate_name(&name).is_err() {
                continue;
            }

            let path = entry.path();
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if !metadata.is_file() || metadata.len() == 0 {
                continue;
            }

            let known = previous.get(&name);
            if let Some(known) = known {
                let modified = metadata.modified().ok();
                if known.size == metadata.len() && modified.is_some() && known.modified == modified
                {
                    files.insert(name, known.clone());
                    continue;
                }
            }

            let piece_length = known.map_or(piece_length, |f| f.piece_length);
            match SharedFile::from_disk(&path, piece_length).await {
                Ok(file) => {
                    debug!("Indexed {} ({} bytes)", name, file.size);
                    files.insert(name, file);
                }
                Err(e) => warn!("Failed to index {}: {}", path.display(), e),
            }
        }

        Ok(Self { files })
    }

    pub fn get(&self, name: &str) -> Option<&SharedFile> {
        self.files.get(name)
    }

    /// File names in ascending order
    pub fn names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SharedFile)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn with_file(&self, name: String, file: SharedFile) -> Self {
        let mut files = self.files.clone();
        files.insert(name, file);
        Self { files }
    }

    pub fn without(&self, name: &str) -> Self {
        let mut files = self.files.clone();
        files.remove(name);
        Self { files }
    }
}

/// A write made through `SharedIndex` while a rescan was in flight
#[derive(Debug, Clone)]
enum Change {
    Insert(String, SharedFile),
    Evict(String),
}

#[derive(Debug, Default)]
struct Current {
    index: Arc<ShareIndex>,
    /// Present while a rescan runs; replayed over the scan result
    journal: Option<Vec<Change>>,
}

impl Current {
    fn record(&mut self, change: Change) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change);
        }
    }
}

/// The node's current share index.
///
/// Readers take a cheap `Arc` snapshot and never hold the lock while
/// reading file data; writers build a new index and swap it in. A rescan
/// scans without the lock, so inserts and evictions that land meanwhile
/// are journaled and replayed onto its result.
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Current>,
    rescanning: Mutex<()>,
}

impl SharedIndex {
    pub async fn snapshot(&self) -> Arc<ShareIndex> {
        self.current.read().await.index.clone()
    }

    /// Rebuild the index with `scan`, which receives the index as it stood
    /// when the rescan began. Returns that starting index and the new one.
    pub async fn rescan<F, Fut>(&self, scan: F) -> Result<(Arc<ShareIndex>, Arc<ShareIndex>)>
    where
        F: FnOnce(Arc<ShareIndex>) -> Fut,
        Fut: Future<Output = Result<ShareIndex>>,
    {
        let _rescanning = self.rescanning.lock().await;

        let previous = {
            let mut current = self.current.write().await;
            current.journal = Some(Vec::new());
            current.index.clone()
        };

        let scanned = scan(previous.clone()).await;

        let mut current = self.current.write().await;
        let journal = current.journal.take().unwrap_or_default();
        let mut files = scanned?.files;
        for change in journal {
            match change {
                Change::Insert(name, file) => {
                    files.insert(name, file);
                }
                Change::Evict(name) => {
                    files.remove(&name);
                }
            }
        }

        current.index = Arc::new(ShareIndex { files });
        Ok((previous, current.index.clone()))
    }

    pub async fn insert(&self, name: String, file: SharedFile) {
        let mut current = self.current.write().await;
        info!("Sharing {}", name);
        current.index = Arc::new(current.index.with_file(name.clone(), file.clone()));
        current.record(Change::Insert(name, file));
    }

    /// Drop an entry whose backing file went away; returns whether it was present
    pub async fn evict(&self, name: &str) -> bool {
        let mut current = self.current.write().await;
        if current.index.get(name).is_none() {
            return false;
        }

        warn!("Evicting {} from the share index", name);
        current.index = Arc::new(current.index.without(name));
        current.record(Change::Evict(name.to_string()));
        true
    }
}
