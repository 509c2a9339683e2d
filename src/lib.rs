//! Peer-to-peer file distribution: descriptors, a tracker, serving nodes
//! and a verifying download client.

pub mod cli;
pub mod client;
pub mod descriptor;
pub mod error;
pub mod node;
pub mod piece;
pub mod shutdown;
pub mod storage;
pub mod tracker;
pub mod wire;

pub use client::{ClientConfig, SwarmClient};
pub use descriptor::Descriptor;
pub use error::{Result, SwarmError};
pub use node::{Node, NodeConfig};
pub use tracker::{Tracker, TrackerConfig};
