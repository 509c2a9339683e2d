use super::PeerPool;
use crate::descriptor::{load_descriptor_file, ContentId, Descriptor};
use crate::error::{Result, SwarmError};
use crate::node::RemotePeer;
use crate::storage::PieceWriter;
use crate::tracker::{PeerId, PeerInfo, TrackerClient};
use crate::wire::Timeouts;
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Lifecycle of a single download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Init,
    FetchingPeers,
    DownloadingPieces,
    Verifying,
    Complete,
    Failed,
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadState::Init => "init",
            DownloadState::FetchingPeers => "fetching peers",
            DownloadState::DownloadingPieces => "downloading pieces",
            DownloadState::Verifying => "verifying",
            DownloadState::Complete => "complete",
            DownloadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a download learns which peers hold a content id
#[allow(async_fn_in_trait)]
pub trait PeerDirectory {
    async fn lookup(
        &self,
        tracker: &str,
        content_id: &ContentId,
        peer_id: &PeerId,
    ) -> Result<Vec<PeerInfo>>;
}

/// Where a download fetches raw piece bytes from
#[allow(async_fn_in_trait)]
pub trait PieceSource {
    async fn fetch_piece(&self, peer: &PeerInfo, filename: &str, piece_index: u64)
        -> Result<Bytes>;
}

impl PeerDirectory for TrackerClient {
    async fn lookup(
        &self,
        tracker: &str,
        content_id: &ContentId,
        peer_id: &PeerId,
    ) -> Result<Vec<PeerInfo>> {
        self.get_peers(tracker, content_id, peer_id).await
    }
}

/// Fetches pieces from other nodes over TCP
#[derive(Debug, Clone, Default)]
pub struct RemotePieces {
    timeouts: Timeouts,
}

impl RemotePieces {
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }
}

impl PieceSource for RemotePieces {
    async fn fetch_piece(
        &self,
        peer: &PeerInfo,
        filename: &str,
        piece_index: u64,
    ) -> Result<Bytes> {
        RemotePeer::new(peer.addr().to_string(), self.timeouts)
            .piece(filename, piece_index)
            .await
    }
}

/// One descriptor-driven download into `output_dir`
pub struct Download<D, S> {
    descriptor: Descriptor,
    peer_id: PeerId,
    output_dir: PathBuf,
    directory: D,
    source: S,
    state: DownloadState,
}

impl<D: PeerDirectory, S: PieceSource> Download<D, S> {
    pub fn new(
        descriptor: Descriptor,
        peer_id: PeerId,
        output_dir: impl Into<PathBuf>,
        directory: D,
        source: S,
    ) -> Self {
        Self {
            descriptor,
            peer_id,
            output_dir: output_dir.into(),
            directory,
            source,
            state: DownloadState::Init,
        }
    }

    /// Init: load and validate the descriptor file
    pub async fn init<P: AsRef<Path>>(
        descriptor_path: P,
        peer_id: PeerId,
        output_dir: impl Into<PathBuf>,
        directory: D,
        source: S,
    ) -> Result<Self> {
        let descriptor_path = descriptor_path.as_ref();
        let descriptor = load_descriptor_file(descriptor_path).await?;
        debug!(
            "Loaded descriptor {} for {}",
            descriptor_path.display(),
            descriptor.name()
        );

        Ok(Self::new(descriptor, peer_id, output_dir, directory, source))
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Drive every remaining state; returns the published path
    pub async fn run(&mut self) -> Result<PathBuf> {
        info!(
            "Downloading {} ({} bytes, {} pieces)",
            self.descriptor.name(),
            self.descriptor.total_length(),
            self.descriptor.num_pieces()
        );

        match self.run_states().await {
            Ok(path) => {
                self.state = DownloadState::Complete;
                info!("Download of {} complete: {}", self.descriptor.name(), path.display());
                Ok(path)
            }
            Err(e) => {
                error!(
                    "Download of {} failed while {}: {}",
                    self.descriptor.name(),
                    self.state,
                    e
                );
                self.state = DownloadState::Failed;
                Err(e)
            }
        }
    }

    async fn run_states(&mut self) -> Result<PathBuf> {
        let mut pool = self.fetch_peers().await?;
        let writer = self.download_pieces(&mut pool).await?;
        self.verify(writer).await
    }

    /// FetchingPeers: ask the descriptor's tracker who serves this content
    pub async fn fetch_peers(&mut self) -> Result<PeerPool> {
        self.state = DownloadState::FetchingPeers;

        let peers = self
            .directory
            .lookup(
                &self.descriptor.announce,
                &self.descriptor.content_id,
                &self.peer_id,
            )
            .await?;

        if peers.is_empty() {
            return Err(SwarmError::NoPeersAvailable);
        }

        info!("Found {} peers for {}", peers.len(), self.descriptor.name());
        Ok(PeerPool::new(peers))
    }

    /// DownloadingPieces: fetch, verify and place every piece in index order.
    ///
    /// On error the returned writer is dropped, which removes the temporary file.
    pub async fn download_pieces(&mut self, pool: &mut PeerPool) -> Result<PieceWriter> {
        self.state = DownloadState::DownloadingPieces;

        let layout = self.descriptor.layout();
        let mut writer =
            PieceWriter::create(&self.output_dir, self.descriptor.name(), layout).await?;

        let total = self.descriptor.num_pieces();
        for piece_index in 0..total {
            let data = self.fetch_verified(pool, piece_index).await?;
            writer.write_piece(piece_index, &data).await?;
            info!(
                "Piece {}/{} of {} verified",
                piece_index + 1,
                total,
                self.descriptor.name()
            );
        }

        Ok(writer)
    }

    /// Try peers in turn until one returns a piece matching its hash
    async fn fetch_verified(&self, pool: &mut PeerPool, piece_index: usize) -> Result<Bytes> {
        let expected_hash =
            self.descriptor
                .piece_hash(piece_index)
                .ok_or(SwarmError::IndexOutOfRange {
                    index: piece_index as u64,
                    num_pieces: self.descriptor.num_pieces() as u64,
                })?;
        let expected_len = self
            .descriptor
            .layout()
            .piece_len(piece_index as u64)
            .unwrap_or_default();
        let name = self.descriptor.name();

        let budget = pool.len() * 2;
        for attempt in 1..=budget {
            let peer = match pool.next_peer() {
                Some(peer) => peer.clone(),
                None => break,
            };

            match self.source.fetch_piece(&peer, name, piece_index as u64).await {
                Ok(data) if data.len() as u64 != expected_len => warn!(
                    "Piece {} from {} is {} bytes, expected {} (attempt {}/{})",
                    piece_index,
                    peer.addr(),
                    data.len(),
                    expected_len,
                    attempt,
                    budget
                ),
                Ok(data) if !expected_hash.matches(&data) => warn!(
                    "Piece {} from {} failed hash check (attempt {}/{})",
                    piece_index,
                    peer.addr(),
                    attempt,
                    budget
                ),
                Ok(data) => return Ok(data),
                Err(e) => warn!(
                    "Piece {} from {} failed: {} (attempt {}/{})",
                    piece_index,
                    peer.addr(),
                    e,
                    attempt,
                    budget
                ),
            }
        }

        Err(SwarmError::PieceUnavailable(piece_index))
    }

    /// Verifying: whole-file hash, then rename into place
    pub async fn verify(&mut self, writer: PieceWriter) -> Result<PathBuf> {
        self.state = DownloadState::Verifying;
        writer.publish(&self.descriptor.whole_file_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ContentInfo, FileHash, PieceHash};
    use crate::error::HashKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    const CONTENT: &[u8] = b"ABCDEFGHIJ";

    fn descriptor_with_hash(whole_file_hash: FileHash) -> Descriptor {
        let info = ContentInfo {
            name: "abc.txt".to_string(),
            piece_length: 4,
            pieces: CONTENT.chunks(4).map(PieceHash::of).collect(),
            length: CONTENT.len() as u64,
        };
        Descriptor::new(info, "127.0.0.1:1".to_string(), whole_file_hash).unwrap()
    }

    fn descriptor() -> Descriptor {
        descriptor_with_hash(FileHash::of(CONTENT))
    }

    fn peer(id: &str, port: u16) -> PeerInfo {
        PeerInfo::new(PeerId::from(id), ([127, 0, 0, 1], port).into(), Vec::new())
    }

    struct FixedPeers(Vec<PeerInfo>);

    impl PeerDirectory for FixedPeers {
        async fn lookup(&self, _: &str, _: &ContentId, _: &PeerId) -> Result<Vec<PeerInfo>> {
            Ok(self.0.clone())
        }
    }

    /// Serves `CONTENT`, corrupting the first `corrupt[index]` replies for a piece
    #[derive(Default)]
    struct FlakySource {
        corrupt: Mutex<HashMap<u64, usize>>,
        calls: AtomicUsize,
        served_by: Mutex<Vec<u16>>,
    }

    impl FlakySource {
        fn corrupting(piece_index: u64, times: usize) -> Self {
            let source = Self::default();
            source.corrupt.lock().unwrap().insert(piece_index, times);
            source
        }
    }

    impl PieceSource for Arc<FlakySource> {
        async fn fetch_piece(&self, peer: &PeerInfo, _: &str, piece_index: u64) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.served_by.lock().unwrap().push(peer.port);

            let start = (piece_index * 4) as usize;
            let end = (start + 4).min(CONTENT.len());
            let mut data = CONTENT[start..end].to_vec();

            let mut corrupt = self.corrupt.lock().unwrap();
            if let Some(remaining) = corrupt.get_mut(&piece_index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    data[0] ^= 0xff;
                }
            }
            Ok(Bytes::from(data))
        }
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_corrupt_piece_is_retried_on_next_peer() {
        let out = tempdir().unwrap();
        let source = Arc::new(FlakySource::corrupting(1, 1));
        let mut download = Download::new(
            descriptor(),
            PeerId::from("me"),
            out.path(),
            FixedPeers(vec![peer("a", 1), peer("b", 2)]),
            source.clone(),
        );

        let path = download.run().await.unwrap();

        assert_eq!(download.state(), DownloadState::Complete);
        assert_eq!(std::fs::read(&path).unwrap(), CONTENT);
        assert_eq!(dir_entries(out.path()), vec!["abc.txt".to_string()]);
        // Three pieces plus one retry, alternating peers
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(*source.served_by.lock().unwrap(), vec![1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn test_persistently_corrupt_piece_is_unavailable() {
        let out = tempdir().unwrap();
        let source = Arc::new(FlakySource::corrupting(1, usize::MAX));
        let mut download = Download::new(
            descriptor(),
            PeerId::from("me"),
            out.path(),
            FixedPeers(vec![peer("a", 1), peer("b", 2)]),
            source.clone(),
        );

        let err = download.run().await.unwrap_err();

        assert!(matches!(err, SwarmError::PieceUnavailable(1)));
        assert_eq!(download.state(), DownloadState::Failed);
        // One good fetch for piece 0, then a budget of 2 * pool size for piece 1
        assert_eq!(source.calls.load(Ordering::SeqCst), 1 + 4);
        assert!(dir_entries(out.path()).is_empty());
    }

    #[tokio::test]
    async fn test_no_peers() {
        let out = tempdir().unwrap();
        let source = Arc::new(FlakySource::default());
        let mut download = Download::new(
            descriptor(),
            PeerId::from("me"),
            out.path(),
            FixedPeers(Vec::new()),
            source.clone(),
        );

        let err = download.run().await.unwrap_err();

        assert!(matches!(err, SwarmError::NoPeersAvailable));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(dir_entries(out.path()).is_empty());
    }

    #[tokio::test]
    async fn test_whole_file_mismatch_leaves_nothing() {
        let out = tempdir().unwrap();
        let mut download = Download::new(
            descriptor_with_hash(FileHash::of(b"something else")),
            PeerId::from("me"),
            out.path(),
            FixedPeers(vec![peer("a", 1)]),
            Arc::new(FlakySource::default()),
        );

        let err = download.run().await.unwrap_err();

        assert!(matches!(err, SwarmError::HashMismatch(HashKind::WholeFile)));
        assert!(dir_entries(out.path()).is_empty());
    }

    #[tokio::test]
    async fn test_init_rejects_malformed_descriptor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.torrent");
        std::fs::write(&path, "{\"info\": 42}").unwrap();

        let result = Download::init(
            &path,
            PeerId::from("me"),
            dir.path(),
            FixedPeers(Vec::new()),
            Arc::new(FlakySource::default()),
        )
        .await;

        assert!(matches!(result, Err(SwarmError::MalformedDescriptor(_))));
    }
}
