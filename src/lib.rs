//! A single-peer BitTorrent client.
//!
//! Parses a torrent, asks its tracker for peers, then downloads one piece or
//! the whole file from a single peer, verifying every piece against its SHA-1.

pub mod bencode;
pub mod config;
pub mod download;
pub mod messages;
pub mod peer;
pub mod torrent;
pub mod tracker;

pub use config::ClientConfig;
pub use download::{download, Target};
pub use peer::{Connection, PeerId};
pub use torrent::{InfoHash, Metainfo};
pub use tracker::{announce, TrackerRequest};

/// Largest block requested from a peer, in bytes.
pub const BLOCK_MAX: u32 = 1 << 14;
