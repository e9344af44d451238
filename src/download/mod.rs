//! Drives one peer connection until the scheduled pieces are verified.

use std::{collections::BTreeMap, net::SocketAddrV4};

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    config::ClientConfig,
    messages::{RequestPiecePayload, ResponsePiecePayload},
    peer::{error::PeerError, Connection, PeerId},
    torrent::Metainfo,
};

pub mod piece;

pub use piece::{PieceAssembly, PieceError};

/// What to fetch from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Piece(u32),
    File,
}

/// The pieces scheduled for one download, pending and verified.
#[derive(Debug, Clone, Default)]
pub struct PieceSet {
    pending: BTreeMap<u32, PieceAssembly>,
    verified: BTreeMap<u32, Vec<u8>>,
}

impl PieceSet {
    pub fn new(metainfo: &Metainfo, target: Target) -> Result<Self, DownloadError> {
        let indices = match target {
            Target::Piece(index) => {
                if index >= metainfo.piece_count() {
                    return Err(DownloadError::PieceOutOfRange {
                        index,
                        count: metainfo.piece_count(),
                    });
                }
                index..index + 1
            }
            Target::File => 0..metainfo.piece_count(),
        };

        let mut pending = BTreeMap::new();
        for index in indices {
            let size = metainfo.piece_size(index);
            let size = u32::try_from(size).map_err(|_| DownloadError::PieceTooLarge(size))?;
            let Some(hash) = metainfo.piece_hash(index) else {
                return Err(DownloadError::PieceOutOfRange {
                    index,
                    count: metainfo.piece_count(),
                });
            };
            pending.insert(index, PieceAssembly::new(index, size, *hash));
        }
        Ok(Self {
            pending,
            verified: BTreeMap::new(),
        })
    }

    /// Requests for every block still missing, piece by piece.
    pub fn requests(&self) -> Vec<RequestPiecePayload> {
        self.pending
            .values()
            .flat_map(PieceAssembly::missing_requests)
            .collect()
    }

    /// Stores a received block. Returns the piece index once that piece is
    /// complete and verified.
    pub fn store_block(&mut self, block: ResponsePiecePayload) -> Result<Option<u32>, PieceError> {
        let Some(piece) = self.pending.get_mut(&block.index) else {
            debug!(index = block.index, "block for a piece we don't want");
            return Ok(None);
        };
        if !piece.insert(block.begin, block.block) {
            debug!(
                index = block.index,
                begin = block.begin,
                "block does not fit the piece"
            );
            return Ok(None);
        }
        if !piece.is_complete() {
            return Ok(None);
        }

        let bytes = piece.verify()?;
        let index = piece.index();
        self.pending.remove(&index);
        self.verified.insert(index, bytes);
        Ok(Some(index))
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn verified_count(&self) -> usize {
        self.verified.len()
    }

    /// The verified pieces joined in index order.
    pub fn into_bytes(self) -> Vec<u8> {
        self.verified.into_values().flatten().collect()
    }
}

/// Downloads `target` from `peer` and returns the verified bytes.
#[instrument(skip(metainfo, peer_id, config), fields(info_hash = %metainfo.info_hash.to_hex()))]
pub async fn download(
    metainfo: &Metainfo,
    peer: SocketAddrV4,
    peer_id: PeerId,
    target: Target,
    config: &ClientConfig,
) -> Result<Vec<u8>, DownloadError> {
    let mut pieces = PieceSet::new(metainfo, target)?;
    let mut conn = Connection::connect(peer, metainfo.info_hash, peer_id, config.timeout).await?;
    conn.download(&mut pieces).await?;
    info!(pieces = pieces.verified_count(), "download finished");
    Ok(pieces.into_bytes())
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Piece {index} does not exist, the torrent has {count} pieces")]
    PieceOutOfRange { index: u32, count: u32 },
    #[error("Piece size {0} does not fit the wire protocol")]
    PieceTooLarge(u64),
    #[error(transparent)]
    Peer(#[from] PeerError),
}

impl DownloadError {
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, DownloadError::Peer(error) if error.is_hash_mismatch())
    }
}
