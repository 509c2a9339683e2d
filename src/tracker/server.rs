use super::{Registry, SWEEP_INTERVAL, STALENESS_THRESHOLD};
use crate::error::{Result, SwarmError};
use crate::shutdown::Shutdown;
use crate::wire::{Connection, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Configuration for the tracker
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub bind_addr: SocketAddr,
    pub staleness_threshold: Duration,
    pub sweep_interval: Duration,
    pub io_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            staleness_threshold: STALENESS_THRESHOLD,
            sweep_interval: SWEEP_INTERVAL,
            io_timeout: Duration::from_secs(5),
        }
    }
}

/// A running tracker: accept loop plus periodic sweep
pub struct Tracker {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Tracker {
    pub async fn start(config: TrackerConfig, shutdown: Shutdown) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let registry = Arc::new(Registry::new(config.staleness_threshold));

        info!("Tracker listening on {}", local_addr);

        let tasks = vec![
            tokio::spawn(accept_loop(
                listener,
                registry.clone(),
                shutdown.clone(),
                config.io_timeout,
            )),
            tokio::spawn(sweep_loop(
                registry.clone(),
                shutdown.clone(),
                config.sweep_interval,
            )),
        ];

        Ok(Self {
            local_addr,
            registry,
            shutdown,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Signal shutdown and wait for the accept and sweep loops to exit
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Tracker task failed: {}", e);
            }
        }
        info!("Tracker on {} stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: Shutdown,
    io_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        let conn = Connection::accepted(stream, addr, io_timeout);
                        if let Err(e) = handle_connection(conn, &registry).await {
                            warn!("Tracker request from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn sweep_loop(registry: Arc<Registry>, shutdown: Shutdown, interval: Duration) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = sleep(interval) => {}
        }

        let evicted = registry.sweep().await;
        if evicted > 0 {
            info!("Swept {} stale peers", evicted);
        }
    }
}

/// One request, one reply, then close
async fn handle_connection(mut conn: Connection, registry: &Registry) -> Result<()> {
    let request = match conn.receive_request().await {
        Ok(request) => request,
        Err(e @ SwarmError::InvalidRequest(_)) => {
            conn.send_response(&Response::error(&e)).await?;
            conn.close().await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    debug!("{} request from {}", request.kind(), conn.peer_addr());

    let response = match request {
        Request::Announce(announce) => {
            // Reachable address: the connection's source IP plus the announced port
            let addr = SocketAddr::new(conn.peer_addr().ip(), announce.port);
            registry
                .announce(announce.content_id, announce.peer_id, addr, announce.files)
                .await;
            Response::ack()
        }
        Request::GetPeers {
            content_id,
            peer_id,
        } => Response::Peers {
            peers: registry.get_peers(&content_id, &peer_id).await,
        },
        other => Response::error(&SwarmError::InvalidRequest(format!(
            "tracker does not serve '{}' requests",
            other.kind()
        ))),
    };

    conn.send_response(&response).await?;
    conn.close().await;
    Ok(())
}
