use super::NodeState;
use crate::error::{Result, SwarmError};
use crate::shutdown::Shutdown;
use crate::storage::read_piece_at;
use crate::wire::{Connection, Request, Response};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub(super) async fn accept_loop(listener: TcpListener, state: Arc<NodeState>, shutdown: Shutdown) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        let conn = Connection::accepted(stream, addr, state.timeouts.io);
                        if let Err(e) = handle_connection(conn, &state).await {
                            warn!("Request from {} failed: {}", addr, e);
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

/// Rebuild the share index on every tick until shutdown
pub(super) async fn maintenance_loop(state: Arc<NodeState>, shutdown: Shutdown, interval: Duration) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = sleep(interval) => {}
        }

        if let Err(e) = state.rescan().await {
            warn!("Rescan of {} failed: {}", state.shared_dir.display(), e);
        }
    }
}

enum Reply {
    Message(Response),
    Piece(Bytes),
}

async fn handle_connection(mut conn: Connection, state: &NodeState) -> Result<()> {
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

    let reply = match dispatch(request, &conn, state).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!("Replying with error to {}: {}", conn.peer_addr(), e);
            Reply::Message(Response::error(&e))
        }
    };

    match reply {
        Reply::Message(response) => conn.send_response(&response).await?,
        Reply::Piece(data) => conn.send_piece(data).await?,
    }
    conn.close().await;
    Ok(())
}

async fn dispatch(request: Request, conn: &Connection, state: &NodeState) -> Result<Reply> {
    match request {
        Request::List => {
            let files = state.index.snapshot().await.names();
            Ok(Reply::Message(Response::Files { files }))
        }

        Request::Info { filename } => {
            let index = state.index.snapshot().await;
            let file = index
                .get(&filename)
                .ok_or_else(|| SwarmError::NotFound(filename.clone()))?;
            Ok(Reply::Message(Response::Info(file.info())))
        }

        Request::PieceRequest {
            filename,
            piece_index,
        } => serve_piece(state, &filename, piece_index).await.map(Reply::Piece),

        Request::Handshake { peer_id } => {
            info!("Handshake from {} ({})", peer_id, conn.peer_addr());
            state
                .callers
                .lock()
                .await
                .insert(peer_id, conn.peer_addr());
            Ok(Reply::Message(Response::Handshake {
                peer_id: state.peer_id.clone(),
            }))
        }

        other => Err(SwarmError::InvalidRequest(format!(
            "peer does not serve '{}' requests",
            other.kind()
        ))),
    }
}

async fn serve_piece(state: &NodeState, filename: &str, piece_index: u64) -> Result<Bytes> {
    // Resolve against a snapshot, then read without any lock held
    let (path, layout) = {
        let index = state.index.snapshot().await;
        let file = index
            .get(filename)
            .ok_or_else(|| SwarmError::NotFound(filename.to_string()))?;
        (file.path.clone(), file.layout())
    };

    let (offset, length) = layout
        .bounds(piece_index)
        .ok_or(SwarmError::IndexOutOfRange {
            index: piece_index,
            num_pieces: layout.num_pieces(),
        })?;

    match read_piece_at(&path, offset, length).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e @ SwarmError::FileMissing(_)) => {
            state.index.evict(filename).await;
            Err(e)
        }
        Err(e) => Err(e),
    }
}
