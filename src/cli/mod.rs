use crate::client::{ClientConfig, TorrentClient};
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "swarmfetch")]
#[command(about = "Downloads torrents from a swarm of peers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a torrent file
    Download {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Download directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Port reported to the tracker
        #[arg(short, long)]
        port: Option<u16>,

        /// Maximum number of peers to connect to
        #[arg(short, long)]
        max_peers: Option<usize>,

        /// Seconds allowed for a TCP connect
        #[arg(long)]
        connect_timeout: Option<u64>,

        /// Seconds before an unanswered block request is cancelled
        #[arg(long)]
        request_timeout: Option<u64>,

        /// TOML file with configuration overrides
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Download {
                torrent,
                output,
                port,
                max_peers,
                connect_timeout,
                request_timeout,
                config,
            } => {
                // Flags win over the file, the file over defaults
                let mut settings = match config {
                    Some(path) => ClientConfig::load(path).await?,
                    None => ClientConfig::default(),
                };
                if let Some(output) = output {
                    settings.download_dir = output.clone();
                }
                if let Some(port) = port {
                    settings.listen_port = *port;
                }
                if let Some(max_peers) = max_peers {
                    settings.max_peers = *max_peers;
                }
                if let Some(secs) = connect_timeout {
                    settings.connect_timeout_secs = *secs;
                }
                if let Some(secs) = request_timeout {
                    settings.scheduler.request_timeout_secs = *secs;
                }

                let client = TorrentClient::new(settings);
                client.download(torrent).await?;
            }

            Commands::Info { torrent } => {
                self.show_torrent_info(torrent).await?;
            }
        }

        Ok(())
    }

    async fn show_torrent_info(&self, torrent_path: &Path) -> Result<()> {
        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;

        println!("Torrent Information");
        println!("==================");
        println!("Name: {}", metainfo.info.name);
        if let Some(announce) = &metainfo.announce {
            println!("Tracker: {}", announce);
        }
        println!("Total Size: {} bytes", metainfo.info.total_length);
        println!("Piece Length: {} bytes", metainfo.info.piece_length);
        println!("Number of Pieces: {}", metainfo.info.pieces.len());
        println!("Info Hash: {}", metainfo.info_hash_hex());
        println!("\nFiles:");

        for (i, file) in metainfo.info.files.iter().enumerate() {
            println!(
                "  {}: {} ({} bytes)",
                i + 1,
                file.path.join("/"),
                file.length
            );
        }

        if let Some(announce_list) = &metainfo.announce_list {
            println!("\nAdditional Trackers:");
            for (tier, trackers) in announce_list.iter().enumerate() {
                println!("  Tier {}:", tier + 1);
                for tracker in trackers {
                    println!("    - {}", tracker);
                }
            }
        }

        Ok(())
    }
}
