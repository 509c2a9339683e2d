use super::{PeerId, PeerInfo};
use crate::descriptor::ContentId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// What the tracker remembers about one peer in one swarm
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub addr: SocketAddr,
    pub last_announce: Instant,
    pub files: Vec<String>,
}

type Bucket = HashMap<PeerId, RegistryEntry>;

/// Directory of which peers serve which content id.
///
/// A bucket exists only while it holds at least one peer. No method holds
/// the lock across I/O.
pub struct Registry {
    buckets: RwLock<HashMap<ContentId, Bucket>>,
    staleness_threshold: Duration,
}

impl Registry {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            staleness_threshold,
        }
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// Insert or refresh a peer; a re-announce replaces the previous entry
    pub async fn announce(
        &self,
        content_id: ContentId,
        peer_id: PeerId,
        addr: SocketAddr,
        files: Vec<String>,
    ) {
        self.announce_at(content_id, peer_id, addr, files, Instant::now())
            .await;
    }

    pub async fn announce_at(
        &self,
        content_id: ContentId,
        peer_id: PeerId,
        addr: SocketAddr,
        files: Vec<String>,
        now: Instant,
    ) {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(content_id).or_default();

        let refreshed = bucket
            .insert(
                peer_id.clone(),
                RegistryEntry {
                    addr,
                    last_announce: now,
                    files,
                },
            )
            .is_some();

        debug!(
            "{} peer {} at {} for {} ({} peers)",
            if refreshed { "Refreshed" } else { "Registered" },
            peer_id,
            addr,
            content_id,
            bucket.len()
        );
    }

    /// Every peer in the swarm except the requester, ordered by peer id
    pub async fn get_peers(&self, content_id: &ContentId, requester: &PeerId) -> Vec<PeerInfo> {
        let buckets = self.buckets.read().await;

        let mut peers: Vec<PeerInfo> = buckets
            .get(content_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|(peer_id, _)| *peer_id != requester)
                    .map(|(peer_id, entry)| {
                        PeerInfo::new(peer_id.clone(), entry.addr, entry.files.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();

        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Evict stale entries and drop empty buckets; returns how many entries went
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// Ages are measured against `started`, so an entry refreshed at or after
    /// that instant is never evicted by this pass.
    pub async fn sweep_at(&self, started: Instant) -> usize {
        let threshold = self.staleness_threshold;
        let mut buckets = self.buckets.write().await;
        let mut evicted = 0;

        for bucket in buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|_, entry| started.saturating_duration_since(entry.last_announce) <= threshold);
            evicted += before - bucket.len();
        }
        buckets.retain(|_, bucket| !bucket.is_empty());

        evicted
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn peer_count(&self, content_id: &ContentId) -> usize {
        self.buckets
            .read()
            .await
            .get(content_id)
            .map_or(0, |bucket| bucket.len())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(super::STALENESS_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_reannounce_replaces_entry() {
        let registry = Registry::default();
        let content = ContentId::of(b"content");
        let peer = PeerId::from("peer-a");

        registry
            .announce(content, peer.clone(), addr(1000), vec!["old.txt".into()])
            .await;
        registry
            .announce(content, peer.clone(), addr(2000), vec!["new.txt".into()])
            .await;

        assert_eq!(registry.peer_count(&content).await, 1);

        let peers = registry.get_peers(&content, &PeerId::from("someone")).await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].port, 2000);
        assert_eq!(peers[0].files, vec!["new.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_get_peers_excludes_requester() {
        let registry = Registry::default();
        let content = ContentId::of(b"content");

        registry
            .announce(content, PeerId::from("peer-a"), addr(1), vec![])
            .await;
        registry
            .announce(content, PeerId::from("peer-b"), addr(2), vec![])
            .await;

        let peers = registry.get_peers(&content, &PeerId::from("peer-a")).await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, PeerId::from("peer-b"));
    }

    #[tokio::test]
    async fn test_unknown_content_returns_empty() {
        let registry = Registry::default();
        let peers = registry
            .get_peers(&ContentId::of(b"unknown"), &PeerId::from("peer-a"))
            .await;
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_stale_entries() {
        let registry = Registry::new(Duration::from_secs(300));
        let content = ContentId::of(b"content");
        let observer = PeerId::from("observer");
        let start = Instant::now();

        registry
            .announce_at(content, PeerId::from("old"), addr(1), vec![], start)
            .await;
        registry
            .announce_at(
                content,
                PeerId::from("fresh"),
                addr(2),
                vec![],
                start + Duration::from_secs(200),
            )
            .await;

        // Before any sweep both are listed
        assert_eq!(registry.get_peers(&content, &observer).await.len(), 2);

        // At t=301s only "old" is past the threshold
        let evicted = registry.sweep_at(start + Duration::from_secs(301)).await;
        assert_eq!(evicted, 1);

        let peers = registry.get_peers(&content, &observer).await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, PeerId::from("fresh"));
    }

    #[tokio::test]
    async fn test_sweep_drops_empty_buckets() {
        let registry = Registry::new(Duration::from_secs(300));
        let start = Instant::now();

        registry
            .announce_at(ContentId::of(b"a"), PeerId::from("p"), addr(1), vec![], start)
            .await;
        registry
            .announce_at(ContentId::of(b"b"), PeerId::from("p"), addr(1), vec![], start)
            .await;
        assert_eq!(registry.bucket_count().await, 2);

        registry.sweep_at(start + Duration::from_secs(600)).await;
        assert_eq!(registry.bucket_count().await, 0);
    }

    #[tokio::test]
    async fn test_entry_refreshed_after_sweep_start_survives() {
        let registry = Registry::new(Duration::from_secs(300));
        let content = ContentId::of(b"content");
        let start = Instant::now();

        let sweep_start = start + Duration::from_secs(400);
        registry
            .announce_at(
                content,
                PeerId::from("late"),
                addr(1),
                vec![],
                sweep_start + Duration::from_millis(5),
            )
            .await;

        assert_eq!(registry.sweep_at(sweep_start).await, 0);
        assert_eq!(registry.peer_count(&content).await, 1);
    }
}
