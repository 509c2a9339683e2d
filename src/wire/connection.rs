use super::{Frame, Request, Response, Timeouts};
use crate::error::{Result, SwarmError};
use bytes::Bytes;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// A framed TCP connection where every read and write is time-bounded
pub struct Connection {
    addr: SocketAddr,
    stream: TcpStream,
    io_timeout: Duration,
}

impl Connection {
    /// Connect to `addr` (`host:port`)
    pub async fn connect(addr: &str, timeouts: &Timeouts) -> Result<Self> {
        debug!("Connecting to {}", addr);

        let stream = match timeout(timeouts.connect, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                return Err(SwarmError::ConnectionRefused(addr.to_string()));
            }
            Ok(Err(e)) => return Err(SwarmError::Io(e)),
            Err(_) => {
                return Err(SwarmError::ConnectionTimeout(format!(
                    "connect to {} after {:?}",
                    addr, timeouts.connect
                )));
            }
        };

        let peer_addr = stream.peer_addr()?;
        Ok(Self::accepted(stream, peer_addr, timeouts.io))
    }

    /// Wrap a stream returned by `accept`
    pub fn accepted(stream: TcpStream, addr: SocketAddr, io_timeout: Duration) -> Self {
        Self {
            addr,
            stream,
            io_timeout,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let fut = frame.write_to(&mut self.stream);
        bounded(self.io_timeout, "write to", self.addr, fut).await
    }

    pub async fn receive_frame(&mut self) -> Result<Frame> {
        let fut = Frame::read_from(&mut self.stream);
        bounded(self.io_timeout, "read from", self.addr, fut).await
    }

    pub async fn send_request(&mut self, request: &Request) -> Result<()> {
        debug!("Sending {} request to {}", request.kind(), self.addr);
        self.send_frame(&Frame::Message(request.to_frame_payload()?))
            .await
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<()> {
        self.send_frame(&Frame::Message(response.to_frame_payload()?))
            .await
    }

    pub async fn send_piece(&mut self, data: Bytes) -> Result<()> {
        self.send_frame(&Frame::Piece(data)).await
    }

    /// Read and schema-check one request.
    ///
    /// A bad frame (empty, oversized, unknown kind) is an `InvalidRequest`
    /// so servers answer it; timeouts and I/O errors pass through.
    pub async fn receive_request(&mut self) -> Result<Request> {
        let frame = match self.receive_frame().await {
            Err(SwarmError::Protocol(reason)) => return Err(SwarmError::InvalidRequest(reason)),
            other => other?,
        };

        match frame {
            Frame::Message(payload) => Request::decode(&payload),
            Frame::Piece(_) => Err(SwarmError::InvalidRequest(
                "expected a request, got piece data".to_string(),
            )),
        }
    }

    /// Read one response; error replies come back as `Err`
    pub async fn receive_response(&mut self) -> Result<Response> {
        match self.receive_frame().await? {
            Frame::Message(payload) => Response::decode(&payload)?.into_result(),
            Frame::Piece(_) => Err(SwarmError::Protocol(format!(
                "unexpected piece data from {}",
                self.addr
            ))),
        }
    }

    /// Send a request and wait for its response
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        self.send_request(request).await?;
        self.receive_response().await
    }

    /// Half-close our side so the peer sees a clean end of stream
    pub async fn close(mut self) {
        let stream = &mut self.stream;
        let fut = async move { stream.shutdown().await.map_err(SwarmError::from) };
        if let Err(e) = bounded(self.io_timeout, "close", self.addr, fut).await {
            debug!("Close of {} failed: {}", self.addr, e);
        }
    }
}

/// Run an I/O future, turning expiry of `deadline` into `ConnectionTimeout`
async fn bounded<T, F>(deadline: Duration, what: &str, addr: SocketAddr, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(SwarmError::ConnectionTimeout(format!(
            "{} {} after {:?}",
            what, addr, deadline
        ))),
    }
}
