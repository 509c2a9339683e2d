use crate::client::{ClientConfig, SwarmClient, ANNOUNCE_INTERVAL};
use crate::descriptor::{build_descriptor, load_descriptor_file, save_descriptor_file, Descriptor};
use crate::error::Result;
use crate::node::{RemotePeer, ShareIndex};
use crate::piece::DEFAULT_PIECE_LENGTH;
use crate::shutdown::Shutdown;
use crate::tracker::{PeerId, Tracker, TrackerClient, TrackerConfig};
use crate::wire::Timeouts;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "swarmshare")]
#[command(about = "Peer-to-peer file sharing with a central tracker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tracker until Ctrl-C
    Tracker {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },

    /// Create a descriptor for a file
    CreateTorrent {
        /// File to describe
        file: PathBuf,

        /// Tracker address (host:port)
        #[arg(short, long)]
        tracker: String,

        /// Bytes per piece
        #[arg(long, default_value_t = DEFAULT_PIECE_LENGTH)]
        piece_length: u64,

        /// Where to write the descriptor (default: <name>.torrent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show information about a descriptor file
    Info {
        /// Path to the descriptor
        descriptor: PathBuf,
    },

    /// Share files and serve them until Ctrl-C
    Seed {
        /// Files to share
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Tracker address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        tracker: String,

        /// Directory served to other peers
        #[arg(short, long, default_value = "./shared")]
        shared_dir: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "6881")]
        port: u16,

        /// Bytes per piece
        #[arg(long, default_value_t = DEFAULT_PIECE_LENGTH)]
        piece_length: u64,
    },

    /// Download the content a descriptor describes
    Download {
        /// Path to the descriptor
        descriptor: PathBuf,

        /// Download directory, also served to other peers
        #[arg(short, long, default_value = "./shared")]
        shared_dir: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "6881")]
        port: u16,
    },

    /// Search the given peers' shared files by name
    Search {
        /// Case-insensitive name fragment
        query: String,

        /// Peer addresses (host:port) to search
        #[arg(long = "peer", required = true)]
        peers: Vec<String>,
    },

    /// Handshake with a peer and list what it shares
    Connect {
        /// Peer address (host:port)
        addr: String,
    },

    /// Ask a descriptor's tracker who has its content
    Peers {
        /// Path to the descriptor
        descriptor: PathBuf,
    },

    /// List the files in a shared directory
    List {
        #[arg(short, long, default_value = "./shared")]
        shared_dir: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Tracker { host, port } => {
                let config = TrackerConfig {
                    bind_addr: SocketAddr::new(*host, *port),
                    ..TrackerConfig::default()
                };

                let shutdown = Shutdown::new();
                let tracker = Tracker::start(config, shutdown).await?;
                wait_for_ctrl_c().await;
                tracker.stop().await;
            }

            Commands::CreateTorrent {
                file,
                tracker,
                piece_length,
                output,
            } => {
                let descriptor = build_descriptor(file, *piece_length, tracker).await?;
                let output = output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(format!("{}.torrent", descriptor.name())));
                save_descriptor_file(&descriptor, &output).await?;

                println!("Descriptor written to {}", output.display());
                println!("Content ID: {}", descriptor.content_id);
            }

            Commands::Info { descriptor } => {
                self.show_descriptor_info(descriptor).await?;
            }

            Commands::Seed {
                files,
                tracker,
                shared_dir,
                port,
                piece_length,
            } => {
                let config = ClientConfig {
                    shared_dir: shared_dir.clone(),
                    listen_addr: SocketAddr::from(([0, 0, 0, 0], *port)),
                    piece_length: *piece_length,
                    ..ClientConfig::default()
                };
                let client = SwarmClient::start(config, Shutdown::new()).await?;

                let mut shares = Vec::new();
                for file in files {
                    let (descriptor, descriptor_path) = client.share(file, tracker).await?;
                    println!(
                        "Sharing {} ({}), descriptor at {}",
                        descriptor.name(),
                        descriptor.content_id,
                        descriptor_path.display()
                    );
                    shares.push(descriptor);
                }

                println!("Seeding on port {}; press Ctrl-C to stop", client.local_addr().port());
                loop {
                    tokio::select! {
                        _ = wait_for_ctrl_c() => break,
                        _ = sleep(ANNOUNCE_INTERVAL) => client.reannounce(&shares).await,
                    }
                }
                client.stop().await;
            }

            Commands::Download {
                descriptor,
                shared_dir,
                port,
            } => {
                let config = ClientConfig {
                    shared_dir: shared_dir.clone(),
                    listen_addr: SocketAddr::from(([0, 0, 0, 0], *port)),
                    ..ClientConfig::default()
                };
                let client = SwarmClient::start(config, Shutdown::new()).await?;

                let result = client.download(descriptor).await;
                client.stop().await;

                let path = result?;
                println!("Downloaded to {}", path.display());
            }

            Commands::Search { query, peers } => {
                let config = ClientConfig {
                    shared_dir: std::env::temp_dir().join("swarmshare-search"),
                    listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                    ..ClientConfig::default()
                };
                let client = SwarmClient::start(config, Shutdown::new()).await?;

                for peer in peers {
                    if !client.connect(peer).await {
                        warn!("Skipping unreachable peer {}", peer);
                    }
                }

                let results = client.search(query).await;
                client.stop().await;

                if results.is_empty() {
                    println!("No files matching '{}'", query);
                }
                for result in results {
                    let source = result.peer.as_deref().unwrap_or("local");
                    println!("{:<40} {:>12} bytes  {}", result.filename, result.size, source);
                }
            }

            Commands::Connect { addr } => {
                let remote = RemotePeer::new(addr.clone(), Timeouts::default());
                let peer_id = remote.handshake(&PeerId::generate()).await?;
                let files = remote.list().await?;

                println!("Connected to {} ({})", peer_id, addr);
                for name in files {
                    println!("  {}", name);
                }
            }

            Commands::Peers { descriptor } => {
                let descriptor = load_descriptor_file(descriptor).await?;
                let tracker = TrackerClient::new(Timeouts::default());
                let peers = tracker
                    .get_peers(
                        &descriptor.announce,
                        &descriptor.content_id,
                        &PeerId::generate(),
                    )
                    .await?;

                println!("{} peers for {}", peers.len(), descriptor.name());
                for peer in peers {
                    println!("  {} {} {}", peer.peer_id, peer.addr(), peer.files.join(","));
                }
            }

            Commands::List { shared_dir } => {
                let index =
                    ShareIndex::scan(shared_dir, DEFAULT_PIECE_LENGTH, &ShareIndex::default())
                        .await?;
                for (name, file) in index.iter() {
                    println!("{:<40} {:>12} bytes  {}", name, file.size, file.whole_file_hash);
                }
            }
        }

        Ok(())
    }

    async fn show_descriptor_info(&self, path: &Path) -> Result<()> {
        let descriptor: Descriptor = load_descriptor_file(path).await?;

        println!("Descriptor Information");
        println!("======================");
        println!("Name: {}", descriptor.name());
        println!("Tracker: {}", descriptor.announce);
        println!("Total Size: {} bytes", descriptor.total_length());
        println!("Piece Length: {} bytes", descriptor.piece_length());
        println!("Number of Pieces: {}", descriptor.num_pieces());
        println!("Content ID: {}", descriptor.content_id);
        println!("SHA-256: {}", descriptor.whole_file_hash);

        Ok(())
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
