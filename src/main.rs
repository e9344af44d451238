use std::{
    net::SocketAddrV4,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use bittorrent_peer::{
    announce, bencode, config, download, ClientConfig, Connection, Metainfo, PeerId, Target,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Port announced to the tracker.
    #[arg(long, global = true, env = "BT_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for a peer before giving up.
    #[arg(long, global = true, env = "BT_TIMEOUT", default_value_t = config::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a bencoded value and print it as JSON.
    Decode { value: String },
    /// Print the metadata of a torrent file.
    Info { torrent: PathBuf },
    /// Print the peers the tracker knows for a torrent.
    Peers { torrent: PathBuf },
    /// Handshake with a peer and print its id.
    Handshake { torrent: PathBuf, peer: SocketAddrV4 },
    /// Download and verify a single piece.
    #[command(name = "download_piece")]
    DownloadPiece {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
        piece: u32,
    },
    /// Download and verify the whole file.
    Download {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
    },
}

impl Args {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            port: self.port,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let config = args.config();

    match args.command {
        Command::Decode { value } => {
            let value = bencode::decode_all(value.as_bytes()).context("decode value")?;
            println!("{}", value.to_json());
        }
        Command::Info { torrent } => {
            let meta = read_torrent(&torrent)?;
            println!("Tracker URL: {}", meta.announce);
            println!("Length: {}", meta.length);
            println!("Info Hash: {}", meta.info_hash.to_hex());
            println!("Piece Length: {}", meta.piece_length);
            if let Some(name) = &meta.name {
                println!("Name: {name}");
            }
            println!("Piece Hashes:");
            for hash in &meta.pieces.0 {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let meta = read_torrent(&torrent)?;
            let peers = announce(&meta, &PeerId::random(), config.port)
                .await
                .context("query tracker")?;
            for peer in peers {
                println!("{peer}");
            }
        }
        Command::Handshake { torrent, peer } => {
            let meta = read_torrent(&torrent)?;
            let conn = Connection::connect(peer, meta.info_hash, PeerId::random(), config.timeout)
                .await
                .with_context(|| format!("handshake with {peer}"))?;
            let remote = conn
                .remote_peer_id()
                .context("peer sent no handshake")?;
            println!("Peer ID: {}", hex::encode(remote));
        }
        Command::DownloadPiece {
            output,
            torrent,
            piece,
        } => {
            let meta = read_torrent(&torrent)?;
            let bytes = fetch(&meta, Target::Piece(piece), &config).await?;
            tokio::fs::write(&output, bytes)
                .await
                .with_context(|| format!("write piece to {}", output.display()))?;
            println!("Piece {piece} downloaded to {}.", output.display());
        }
        Command::Download { output, torrent } => {
            let meta = read_torrent(&torrent)?;
            let bytes = fetch(&meta, Target::File, &config).await?;
            tokio::fs::write(&output, bytes)
                .await
                .with_context(|| format!("write file to {}", output.display()))?;
            println!("Downloaded {} to {}.", torrent.display(), output.display());
        }
    }
    Ok(())
}

fn read_torrent(path: &Path) -> anyhow::Result<Metainfo> {
    Metainfo::read_from_file(path).with_context(|| format!("load torrent {}", path.display()))
}

/// Announces, then downloads `target` from the first peer the tracker returns.
async fn fetch(meta: &Metainfo, target: Target, config: &ClientConfig) -> anyhow::Result<Vec<u8>> {
    let peer_id = PeerId::random();
    let peers = announce(meta, &peer_id, config.port)
        .await
        .context("query tracker")?;
    let peer = *peers.first().context("tracker returned no peers")?;
    download(meta, peer, peer_id, target, config)
        .await
        .with_context(|| format!("download from {peer}"))
}
