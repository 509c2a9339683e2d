mod index;
mod remote;
mod server;

pub use index::{ShareIndex, SharedFile, SharedIndex};
pub use remote::RemotePeer;

use crate::error::Result;
use crate::piece::DEFAULT_PIECE_LENGTH;
use crate::shutdown::Shutdown;
use crate::tracker::PeerId;
use crate::wire::Timeouts;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How often the shared directory is re-indexed
pub const RESCAN_INTERVAL: Duration = Duration::from_secs(15);

/// Configuration for a peer node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub shared_dir: PathBuf,
    /// Port 0 picks a free ephemeral port
    pub bind_addr: SocketAddr,
    /// Piece length for files indexed for the first time
    pub piece_length: u64,
    pub rescan_interval: Duration,
    pub timeouts: Timeouts,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("./shared"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            piece_length: DEFAULT_PIECE_LENGTH,
            rescan_interval: RESCAN_INTERVAL,
            timeouts: Timeouts::default(),
        }
    }
}

/// State shared between the node handle, its accept loop and its maintenance loop
pub(crate) struct NodeState {
    peer_id: PeerId,
    shared_dir: PathBuf,
    piece_length: u64,
    timeouts: Timeouts,
    index: SharedIndex,
    /// Outbound peers we handshook with, keyed by the address we dialed
    known_peers: Mutex<BTreeMap<String, PeerId>>,
    /// Inbound handshakes, keyed by caller id, with the connection's source address
    callers: Mutex<BTreeMap<PeerId, SocketAddr>>,
}

impl NodeState {
    /// Re-index the shared directory off-lock, then swap the result in
    async fn rescan(&self) -> Result<usize> {
        let (previous, current) = self
            .index
            .rescan(|previous| async move {
                ShareIndex::scan(&self.shared_dir, self.piece_length, &previous).await
            })
            .await?;

        let count = current.len();
        if current.names() != previous.names() {
            info!("Share index now holds {} files", count);
        }
        Ok(count)
    }
}

/// A running peer node serving files from its shared directory
pub struct Node {
    local_addr: SocketAddr,
    state: Arc<NodeState>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Index the shared directory, bind, and start serving
    pub async fn start(config: NodeConfig, peer_id: PeerId, shutdown: Shutdown) -> Result<Self> {
        fs::create_dir_all(&config.shared_dir).await?;

        let state = Arc::new(NodeState {
            peer_id,
            shared_dir: config.shared_dir.clone(),
            piece_length: config.piece_length,
            timeouts: config.timeouts,
            index: SharedIndex::default(),
            known_peers: Mutex::new(BTreeMap::new()),
            callers: Mutex::new(BTreeMap::new()),
        });
        let indexed = state.rescan().await?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "Node {} listening on {}, sharing {} files from {}",
            state.peer_id,
            local_addr,
            indexed,
            config.shared_dir.display()
        );

        let tasks = vec![
            tokio::spawn(server::accept_loop(
                listener,
                state.clone(),
                shutdown.clone(),
            )),
            tokio::spawn(server::maintenance_loop(
                state.clone(),
                shutdown.clone(),
                config.rescan_interval,
            )),
        ];

        Ok(Self {
            local_addr,
            state,
            shutdown,
            tasks,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.state.peer_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shared_dir(&self) -> &Path {
        &self.state.shared_dir
    }

    pub fn piece_length(&self) -> u64 {
        self.state.piece_length
    }

    pub fn timeouts(&self) -> Timeouts {
        self.state.timeouts
    }

    pub fn index(&self) -> &SharedIndex {
        &self.state.index
    }

    /// Re-index now instead of waiting for the next tick
    pub async fn rescan(&self) -> Result<usize> {
        self.state.rescan().await
    }

    pub fn remote(&self, addr: &str) -> RemotePeer {
        RemotePeer::new(addr, self.state.timeouts)
    }

    /// Handshake with `addr` and remember it on success
    pub async fn connect_to_peer(&self, addr: &str) -> bool {
        match self.remote(addr).handshake(&self.state.peer_id).await {
            Ok(peer_id) => {
                info!("Connected to peer {} at {}", peer_id, addr);
                self.add_peer(addr.to_string(), peer_id).await;
                true
            }
            Err(e) => {
                warn!("Failed to connect to peer {}: {}", addr, e);
                false
            }
        }
    }

    pub async fn add_peer(&self, addr: String, peer_id: PeerId) {
        self.state.known_peers.lock().await.insert(addr, peer_id);
    }

    pub async fn remove_peer(&self, addr: &str) -> bool {
        self.state.known_peers.lock().await.remove(addr).is_some()
    }

    /// Known peers as `(address, peer id)`, ordered by address
    pub async fn peers(&self) -> Vec<(String, PeerId)> {
        self.state
            .known_peers
            .lock()
            .await
            .iter()
            .map(|(addr, id)| (addr.clone(), id.clone()))
            .collect()
    }

    /// Peers that handshook with us
    pub async fn callers(&self) -> Vec<(PeerId, SocketAddr)> {
        self.state
            .callers
            .lock()
            .await
            .iter()
            .map(|(id, addr)| (id.clone(), *addr))
            .collect()
    }

    /// Stop accepting and rescanning; in-flight connections finish on their own
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Node task failed: {}", e);
            }
        }
        info!("Node on {} stopped", self.local_addr);
    }
}
