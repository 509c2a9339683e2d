mod connection;
mod frame;
mod message;

pub use connection::Connection;
pub use frame::{Frame, MAX_FRAME_LEN};
pub use message::{ErrorKind, ErrorReply, FileInfo, Request, Response};

use std::time::Duration;

/// Socket deadlines applied at every network boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            io: Duration::from_secs(10),
        }
    }
}
