mod download;
mod pool;

pub use download::{Download, DownloadState, PeerDirectory, PieceSource, RemotePieces};
pub use pool::PeerPool;

use crate::descriptor::{build_descriptor, save_descriptor_file, ContentId, Descriptor};
use crate::error::{Result, SwarmError};
use crate::node::{Node, NodeConfig, SharedFile, RESCAN_INTERVAL};
use crate::piece::DEFAULT_PIECE_LENGTH;
use crate::shutdown::Shutdown;
use crate::tracker::{AnnounceRequest, PeerId, PeerInfo, TrackerClient};
use crate::wire::Timeouts;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// How often a seeding client refreshes its tracker entries; well under
/// the tracker's staleness threshold
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(120);

/// Configuration for the swarm client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Files served to others; downloads land here too
    pub shared_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub piece_length: u64,
    pub rescan_interval: Duration,
    pub timeouts: Timeouts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("./shared"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6881)),
            piece_length: DEFAULT_PIECE_LENGTH,
            rescan_interval: RESCAN_INTERVAL,
            timeouts: Timeouts::default(),
        }
    }
}

/// One hit from `search`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub filename: String,
    pub size: u64,
    /// `None` for files in our own share index
    pub peer: Option<String>,
}

/// A peer node plus the client operations built on it
pub struct SwarmClient {
    node: Node,
    tracker: TrackerClient,
    timeouts: Timeouts,
}

impl SwarmClient {
    /// Start the local node with a fresh peer id
    pub async fn start(config: ClientConfig, shutdown: Shutdown) -> Result<Self> {
        let peer_id = PeerId::generate();
        info!("Client initialized with peer_id: {}", peer_id);

        let node_config = NodeConfig {
            shared_dir: config.shared_dir,
            bind_addr: config.listen_addr,
            piece_length: config.piece_length,
            rescan_interval: config.rescan_interval,
            timeouts: config.timeouts,
        };
        let node = Node::start(node_config, peer_id, shutdown).await?;

        Ok(Self {
            node,
            tracker: TrackerClient::new(config.timeouts),
            timeouts: config.timeouts,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        self.node.peer_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.node.local_addr()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Register with `tracker` as a holder of `content_id`
    pub async fn announce(
        &self,
        tracker: &str,
        content_id: &ContentId,
        files: Vec<String>,
    ) -> Result<()> {
        let request = AnnounceRequest::new(
            self.peer_id().clone(),
            *content_id,
            self.local_addr().port(),
        )
        .with_files(files);
        self.tracker.announce(tracker, &request).await
    }

    pub async fn get_peers(&self, tracker: &str, content_id: &ContentId) -> Result<Vec<PeerInfo>> {
        self.tracker
            .get_peers(tracker, content_id, self.peer_id())
            .await
    }

    /// Hash `path` and write its descriptor to `output`, or `<name>.torrent`
    /// in the working directory
    pub async fn create_descriptor<P: AsRef<Path>>(
        &self,
        path: P,
        tracker: &str,
        output: Option<&Path>,
    ) -> Result<(Descriptor, PathBuf)> {
        let descriptor = build_descriptor(path, self.node.piece_length(), tracker).await?;

        let output = match output {
            Some(output) => output.to_path_buf(),
            None => PathBuf::from(format!("{}.torrent", descriptor.name())),
        };
        save_descriptor_file(&descriptor, &output).await?;

        Ok((descriptor, output))
    }

    /// Make `path` available: copy it into the shared directory if needed,
    /// index it, write its descriptor beside it and announce to `tracker`
    pub async fn share<P: AsRef<Path>>(&self, path: P, tracker: &str) -> Result<(Descriptor, PathBuf)> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SwarmError::NotFound(path.display().to_string()))?;

        let shared_path = self.node.shared_dir().join(name);
        if !same_file(path, &shared_path).await {
            fs::copy(path, &shared_path).await?;
            info!("Copied {} into {}", path.display(), self.node.shared_dir().display());
        }

        let descriptor =
            build_descriptor(&shared_path, self.node.piece_length(), tracker).await?;

        let descriptor_path = self
            .node
            .shared_dir()
            .join(format!(".{}.torrent", descriptor.name()));
        save_descriptor_file(&descriptor, &descriptor_path).await?;

        let file = SharedFile::from_descriptor(&descriptor, shared_path).await?;
        self.node
            .index()
            .insert(descriptor.name().to_string(), file)
            .await;

        self.announce(
            tracker,
            &descriptor.content_id,
            vec![descriptor.name().to_string()],
        )
        .await?;

        Ok((descriptor, descriptor_path))
    }

    /// Refresh the tracker entry of every shared descriptor; failures are logged
    pub async fn reannounce(&self, shares: &[Descriptor]) {
        for descriptor in shares {
            let files = vec![descriptor.name().to_string()];
            if let Err(e) = self
                .announce(&descriptor.announce, &descriptor.content_id, files)
                .await
            {
                warn!("Re-announce of {} failed: {}", descriptor.name(), e);
            }
        }
    }

    pub async fn connect(&self, addr: &str) -> bool {
        self.node.connect_to_peer(addr).await
    }

    pub async fn peers(&self) -> Vec<(String, PeerId)> {
        self.node.peers().await
    }

    /// Names in our own share index
    pub async fn list(&self) -> Vec<String> {
        self.node.index().snapshot().await.names()
    }

    /// Case-insensitive substring search over our index and every known peer.
    ///
    /// Peers that fail to answer are logged and skipped.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let needle = query.to_lowercase();
        let is_hit = |name: &str| name.to_lowercase().contains(&needle);

        let mut results: Vec<SearchResult> = self
            .node
            .index()
            .snapshot()
            .await
            .iter()
            .filter(|(name, _)| is_hit(name.as_str()))
            .map(|(name, file)| SearchResult {
                filename: name.clone(),
                size: file.size,
                peer: None,
            })
            .collect();

        for (addr, _) in self.peers().await {
            let remote = self.node.remote(&addr);
            let names = match remote.list().await {
                Ok(names) => names,
                Err(e) => {
                    warn!("Search: peer {} did not answer: {}", addr, e);
                    continue;
                }
            };

            for name in names.into_iter().filter(|name| is_hit(name.as_str())) {
                match remote.info(&name).await {
                    Ok(info) => results.push(SearchResult {
                        filename: name,
                        size: info.size,
                        peer: Some(addr.clone()),
                    }),
                    Err(e) => warn!("Search: no info for {} from {}: {}", name, addr, e),
                }
            }
        }

        results
    }

    /// Download the content a descriptor file describes into the shared directory
    pub async fn download<P: AsRef<Path>>(&self, descriptor_path: P) -> Result<PathBuf> {
        let download = Download::init(
            descriptor_path,
            self.peer_id().clone(),
            self.node.shared_dir(),
            self.tracker.clone(),
            RemotePieces::new(self.timeouts),
        )
        .await?;
        self.complete(download).await
    }

    /// Same as `download` for a descriptor already in memory
    pub async fn download_descriptor(&self, descriptor: Descriptor) -> Result<PathBuf> {
        let download = Download::new(
            descriptor,
            self.peer_id().clone(),
            self.node.shared_dir(),
            self.tracker.clone(),
            RemotePieces::new(self.timeouts),
        );
        self.complete(download).await
    }

    /// Run a download, then serve the result and announce it
    async fn complete(
        &self,
        mut download: Download<TrackerClient, RemotePieces>,
    ) -> Result<PathBuf> {
        let path = download.run().await?;
        let descriptor = download.descriptor();

        let file = SharedFile::from_descriptor(descriptor, path.clone()).await?;
        self.node
            .index()
            .insert(descriptor.name().to_string(), file)
            .await;

        if let Err(e) = self
            .announce(
                &descriptor.announce,
                &descriptor.content_id,
                vec![descriptor.name().to_string()],
            )
            .await
        {
            warn!("Failed to announce {} after download: {}", descriptor.name(), e);
        }

        Ok(path)
    }

    pub async fn stop(self) {
        self.node.stop().await;
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::load_descriptor_file;
    use crate::tracker::{Tracker, TrackerConfig};
    use tempfile::{tempdir, TempDir};

    async fn start_tracker() -> Tracker {
        let config = TrackerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..TrackerConfig::default()
        };
        Tracker::start(config, Shutdown::new()).await.unwrap()
    }

    fn part_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "part"))
            .collect()
    }

    async fn start_client() -> (TempDir, SwarmClient) {
        let dir = tempdir().unwrap();
        let config = ClientConfig {
            shared_dir: dir.path().to_path_buf(),
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            piece_length: 4,
            rescan_interval: Duration::from_secs(3600),
            timeouts: Timeouts::default(),
        };
        let client = SwarmClient::start(config, Shutdown::new()).await.unwrap();
        (dir, client)
    }

    #[tokio::test]
    async fn test_share_then_download_end_to_end() {
        let tracker = start_tracker().await;
        let tracker_addr = tracker.local_addr().to_string();

        let source_dir = tempdir().unwrap();
        let source = source_dir.path().join("abc.txt");
        fs::write(&source, b"ABCDEFGHIJ").await.unwrap();

        let (_seed_dir, seeder) = start_client().await;
        let (descriptor, _) = seeder.share(&source, &tracker_addr).await.unwrap();
        assert_eq!(descriptor.num_pieces(), 3);
        assert_eq!(seeder.list().await, vec!["abc.txt".to_string()]);

        let (leech_dir, leecher) = start_client().await;
        let descriptor_path = leech_dir.path().join("abc.txt.torrent");
        save_descriptor_file(&descriptor, &descriptor_path)
            .await
            .unwrap();

        let path = leecher.download(&descriptor_path).await.unwrap();
        assert_eq!(path, leech_dir.path().join("abc.txt"));
        assert_eq!(fs::read(&path).await.unwrap(), b"ABCDEFGHIJ");
        assert!(part_files(leech_dir.path()).is_empty());

        // The leecher now serves the file and is registered for it
        assert!(leecher.list().await.contains(&"abc.txt".to_string()));
        let peers = seeder
            .get_peers(&tracker_addr, &descriptor.content_id)
            .await
            .unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(&peers[0].peer_id, leecher.peer_id());

        seeder.stop().await;
        leecher.stop().await;
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_download_without_peers_fails_cleanly() {
        let tracker = start_tracker().await;
        let tracker_addr = tracker.local_addr().to_string();

        let source_dir = tempdir().unwrap();
        let source = source_dir.path().join("lonely.bin");
        fs::write(&source, b"nobody has this").await.unwrap();
        let descriptor = build_descriptor(&source, 4, &tracker_addr).await.unwrap();

        let (dir, client) = start_client().await;
        let err = client.download_descriptor(descriptor).await.unwrap_err();

        assert!(matches!(err, SwarmError::NoPeersAvailable));
        assert!(!dir.path().join("lonely.bin").exists());
        assert!(part_files(dir.path()).is_empty());

        client.stop().await;
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_search_local_and_remote() {
        let (seed_dir, seeder) = start_client().await;
        fs::write(seed_dir.path().join("Holiday-Photos.zip"), b"zipzipzip")
            .await
            .unwrap();
        fs::write(seed_dir.path().join("notes.txt"), b"notes").await.unwrap();
        seeder.node().rescan().await.unwrap();

        let (own_dir, searcher) = start_client().await;
        fs::write(own_dir.path().join("photos-2023.tar"), b"tar").await.unwrap();
        searcher.node().rescan().await.unwrap();

        let seeder_addr = seeder.local_addr().to_string();
        assert!(searcher.connect(&seeder_addr).await);

        let mut results = searcher.search("PHOTOS").await;
        results.sort_by(|a, b| a.filename.cmp(&b.filename));

        assert_eq!(
            results,
            vec![
                SearchResult {
                    filename: "Holiday-Photos.zip".to_string(),
                    size: 9,
                    peer: Some(seeder_addr.clone()),
                },
                SearchResult {
                    filename: "photos-2023.tar".to_string(),
                    size: 3,
                    peer: None,
                },
            ]
        );

        seeder.stop().await;
        searcher.stop().await;
    }

    #[tokio::test]
    async fn test_create_descriptor_writes_loadable_file() {
        let (dir, client) = start_client().await;
        let source = dir.path().join("abc.txt");
        fs::write(&source, b"ABCDEFGHIJ").await.unwrap();
        let output = dir.path().join("abc.txt.torrent");

        let (descriptor, written) = client
            .create_descriptor(&source, "127.0.0.1:8000", Some(&output))
            .await
            .unwrap();

        assert_eq!(written, output);
        assert_eq!(load_descriptor_file(&output).await.unwrap(), descriptor);

        client.stop().await;
    }
}
