use std::{io, net::SocketAddrV4, time::Duration};

use thiserror::Error;

use crate::{download::piece::PieceError, torrent::InfoHash};

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Failed to establish a tcp connection to the address `{addr}` with error: `{error:?}`")]
    FailedToConnect {
        error: io::Error,
        addr: SocketAddrV4,
    },
    #[error("The connection to the peer failed with the error: `{0}`")]
    Io(#[from] io::Error),
    #[error("The peer sent nothing for {0:?}.")]
    Timeout(Duration),
    #[error("The peer unexpectedly disconnected.")]
    PeerDisconnected,
    #[error("The peer answered with an unknown protocol header: length {length}, protocol `{protocol}`")]
    InvalidHandshake { length: u8, protocol: String },
    #[error("The peer is serving info hash {received:?}, expected {expected:?}")]
    HandshakeMismatch {
        expected: InfoHash,
        received: InfoHash,
    },
    #[error("The peer sent message {id} with a payload of {length} bytes, which is the wrong length.")]
    InvalidPayload { id: u8, length: usize },
    #[error("The peer sent a frame of length {0}, which is too large.")]
    FrameTooLarge(u32),
    #[error("Failed to decode the handshake received from the peer with the error: `{0}`")]
    DecodeHandshake(#[from] bincode::error::DecodeError),
    #[error("Failed to encode our handshake with the error: `{0}`")]
    EncodeHandshake(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Piece(#[from] PieceError),
}

impl PeerError {
    /// Whether the session ended because downloaded content was corrupt
    /// rather than because of the transport.
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, PeerError::Piece(PieceError::HashMismatch { .. }))
    }
}
