use tracing::{debug, info, warn};

use crate::{
    download::PieceSet,
    messages::{Frame, PeerMessage},
    peer::{error::PeerError, handshake::Handshake, states::ConnectionState, PeerId},
    torrent::InfoHash,
};

/// The protocol side of a peer connection, without any I/O.
///
/// Frames go in, the messages to send back come out. The connection that owns
/// the socket feeds it one complete frame at a time.
#[derive(Debug, Clone)]
pub struct Session {
    state: ConnectionState,
    info_hash: InfoHash,
    peer_id: PeerId,
    remote_peer_id: Option<[u8; 20]>,
}

impl Session {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            state: ConnectionState::Connecting,
            info_hash,
            peer_id,
            remote_peer_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The peer id from the remote handshake, once received.
    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.remote_peer_id
    }

    /// The stream is up: returns our handshake to send.
    pub fn connected(&mut self) -> Handshake {
        self.state = ConnectionState::AwaitingHandshake;
        Handshake::new(self.info_hash.0, self.peer_id.0)
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Handles one inbound frame. Any error closes the session.
    pub fn on_frame(
        &mut self,
        frame: Frame,
        pieces: &mut PieceSet,
    ) -> Result<Vec<PeerMessage>, PeerError> {
        let result = match frame {
            Frame::Handshake(handshake) => self.on_handshake(handshake).map(|()| Vec::new()),
            Frame::Message(msg) => self.on_message(msg, pieces),
        };
        if result.is_err() {
            self.close();
        }
        result
    }

    pub fn on_handshake(&mut self, handshake: Handshake) -> Result<(), PeerError> {
        if self.state != ConnectionState::AwaitingHandshake {
            warn!(state = ?self.state, "unexpected handshake");
            return Ok(());
        }
        if handshake.info_hash != self.info_hash.0 {
            self.close();
            return Err(PeerError::HandshakeMismatch {
                expected: self.info_hash,
                received: InfoHash(handshake.info_hash),
            });
        }
        self.remote_peer_id = Some(handshake.peer_id);
        self.state = ConnectionState::AwaitingBitfield;
        debug!(peer_id = %hex::encode(handshake.peer_id), "handshake accepted");
        Ok(())
    }

    pub fn on_message(
        &mut self,
        msg: PeerMessage,
        pieces: &mut PieceSet,
    ) -> Result<Vec<PeerMessage>, PeerError> {
        let mut outbound = Vec::new();
        match (self.state, msg) {
            (ConnectionState::AwaitingBitfield, PeerMessage::Bitfield(_)) => {
                // the peer is assumed to have every piece
                outbound.push(PeerMessage::Interested);
                self.state = ConnectionState::Interested;
            }
            (ConnectionState::Interested, PeerMessage::Unchoke) => {
                self.state = ConnectionState::Unchoked;
                outbound.extend(pieces.requests().into_iter().map(PeerMessage::Request));
                debug!(requests = outbound.len(), "unchoked");
            }
            (ConnectionState::Unchoked, PeerMessage::Choke) => {
                // outstanding requests are dropped by the peer, ask again once unchoked
                self.state = ConnectionState::Interested;
                debug!("choked");
            }
            (ConnectionState::Unchoked, PeerMessage::Piece(block)) => {
                match pieces.store_block(block) {
                    Ok(Some(index)) => info!(index, "piece verified"),
                    Ok(None) => {}
                    Err(error) => {
                        warn!(%error, "piece verification failed");
                        return Err(error.into());
                    }
                }
            }
            (ConnectionState::Closed, msg) => {
                debug!(?msg, "message after close");
            }
            (state, PeerMessage::Unknown { id, .. }) => {
                debug!(?state, id, "ignoring unknown message");
            }
            (state, msg) => {
                debug!(?state, id = ?msg.id(), "ignoring message");
            }
        }
        Ok(outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        download::{PieceError, Target},
        messages::{BitfieldPayload, RequestPiecePayload, ResponsePiecePayload},
        torrent::{tests::torrent_bytes, Metainfo},
        BLOCK_MAX,
    };

    fn setup(data: &[u8], piece_length: u64) -> (Session, PieceSet) {
        let meta = Metainfo::from_bytes(&torrent_bytes(data, piece_length, "http://t/a")).unwrap();
        let pieces = PieceSet::new(&meta, Target::File).unwrap();
        (Session::new(meta.info_hash, PeerId([9; 20])), pieces)
    }

    fn handshake_with(session: &mut Session) -> Handshake {
        let ours = session.connected();
        Handshake::new(ours.info_hash, [1; 20])
    }

    fn bitfield() -> Frame {
        Frame::Message(PeerMessage::Bitfield(BitfieldPayload::from_be_bytes(&[0xff])))
    }

    #[test]
    fn walks_through_the_states() {
        let data: Vec<u8> = (0..BLOCK_MAX + 5).map(|i| i as u8).collect();
        let (mut session, mut pieces) = setup(&data, 2 * BLOCK_MAX as u64);
        assert_eq!(session.state(), ConnectionState::Connecting);

        let theirs = handshake_with(&mut session);
        assert_eq!(session.state(), ConnectionState::AwaitingHandshake);

        let out = session.on_frame(theirs.into(), &mut pieces).unwrap();
        assert!(out.is_empty());
        assert_eq!(session.state(), ConnectionState::AwaitingBitfield);
        assert_eq!(session.remote_peer_id(), Some([1; 20]));

        // unchoke before bitfield is not acted on
        let out = session
            .on_frame(PeerMessage::Unchoke.into(), &mut pieces)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(session.state(), ConnectionState::AwaitingBitfield);

        let out = session.on_frame(bitfield(), &mut pieces).unwrap();
        assert_eq!(out, vec![PeerMessage::Interested]);
        assert_eq!(session.state(), ConnectionState::Interested);

        let out = session
            .on_frame(PeerMessage::Unchoke.into(), &mut pieces)
            .unwrap();
        assert_eq!(
            out,
            vec![
                PeerMessage::Request(RequestPiecePayload::new(0, 0, BLOCK_MAX)),
                PeerMessage::Request(RequestPiecePayload::new(0, BLOCK_MAX, 5)),
            ]
        );
        assert_eq!(session.state(), ConnectionState::Unchoked);

        let blocks = [
            (0, &data[..BLOCK_MAX as usize]),
            (BLOCK_MAX, &data[BLOCK_MAX as usize..]),
        ];
        for (begin, block) in blocks {
            let msg = PeerMessage::Piece(ResponsePiecePayload {
                index: 0,
                begin,
                block: block.to_vec(),
            });
            session.on_frame(msg.into(), &mut pieces).unwrap();
        }
        assert!(pieces.is_finished());
        assert_eq!(pieces.into_bytes(), data);
    }

    #[test]
    fn wrong_info_hash_closes() {
        let (mut session, mut pieces) = setup(b"abc", 16);
        session.connected();
        let theirs = Handshake::new([0xee; 20], [1; 20]);
        assert!(matches!(
            session.on_frame(theirs.into(), &mut pieces),
            Err(PeerError::HandshakeMismatch { .. })
        ));
        assert!(session.state().is_closed());
    }

    #[test]
    fn choke_then_unchoke_requests_what_is_missing() {
        let data: Vec<u8> = vec![3; 2 * BLOCK_MAX as usize];
        let (mut session, mut pieces) = setup(&data, 2 * BLOCK_MAX as u64);
        let theirs = handshake_with(&mut session);
        session.on_frame(theirs.into(), &mut pieces).unwrap();
        session.on_frame(bitfield(), &mut pieces).unwrap();
        session
            .on_frame(PeerMessage::Unchoke.into(), &mut pieces)
            .unwrap();

        let block = PeerMessage::Piece(ResponsePiecePayload {
            index: 0,
            begin: BLOCK_MAX,
            block: data[..BLOCK_MAX as usize].to_vec(),
        });
        session.on_frame(block.into(), &mut pieces).unwrap();
        session
            .on_frame(PeerMessage::Choke.into(), &mut pieces)
            .unwrap();
        assert_eq!(session.state(), ConnectionState::Interested);

        let out = session
            .on_frame(PeerMessage::Unchoke.into(), &mut pieces)
            .unwrap();
        assert_eq!(
            out,
            vec![PeerMessage::Request(RequestPiecePayload::new(0, 0, BLOCK_MAX))]
        );
    }

    #[test]
    fn corrupt_piece_closes_with_a_distinct_error() {
        let data = vec![1u8; 10];
        let (mut session, mut pieces) = setup(&data, 16);
        let theirs = handshake_with(&mut session);
        session.on_frame(theirs.into(), &mut pieces).unwrap();
        session.on_frame(bitfield(), &mut pieces).unwrap();
        session
            .on_frame(PeerMessage::Unchoke.into(), &mut pieces)
            .unwrap();

        let block = PeerMessage::Piece(ResponsePiecePayload {
            index: 0,
            begin: 0,
            block: vec![2u8; 10],
        });
        let error = session.on_frame(block.into(), &mut pieces).unwrap_err();
        assert!(error.is_hash_mismatch());
        assert!(matches!(
            error,
            PeerError::Piece(PieceError::HashMismatch { index: 0 })
        ));
        assert!(session.state().is_closed());
    }

    #[test]
    fn unknown_and_keep_alive_messages_are_ignored() {
        let (mut session, mut pieces) = setup(b"abc", 16);
        let theirs = handshake_with(&mut session);
        session.on_frame(theirs.into(), &mut pieces).unwrap();
        for msg in [
            PeerMessage::KeepAlive,
            PeerMessage::Unknown {
                id: 20,
                payload: vec![0],
            },
        ] {
            assert!(session.on_frame(msg.into(), &mut pieces).unwrap().is_empty());
        }
        assert_eq!(session.state(), ConnectionState::AwaitingBitfield);
    }
}
