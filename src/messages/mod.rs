//! Peer wire messages and the incremental framer that cuts them out of the
//! TCP byte stream.
//!
//! The framer never assumes chunk boundaries line up with messages: it only
//! yields a frame once all of its bytes are buffered and leaves any partial
//! frame in the buffer for the next read.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::peer::{error::PeerError, handshake::Handshake, handshake::HANDSHAKE_LEN};

pub mod payloads;

pub use payloads::{BitfieldPayload, HavePayload, RequestPiecePayload, ResponsePiecePayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(HavePayload),
    Bitfield(BitfieldPayload),
    Request(RequestPiecePayload),
    Piece(ResponsePiecePayload),
    Cancel(RequestPiecePayload),
    /// An id we don't speak. Kept so the stream stays in sync.
    Unknown { id: u8, payload: Vec<u8> },
}

impl PeerMessage {
    /// The message id, `None` for keep-alives which have none.
    pub fn id(&self) -> Option<u8> {
        match self {
            PeerMessage::KeepAlive => None,
            PeerMessage::Choke => Some(0),
            PeerMessage::Unchoke => Some(1),
            PeerMessage::Interested => Some(2),
            PeerMessage::NotInterested => Some(3),
            PeerMessage::Have(_) => Some(4),
            PeerMessage::Bitfield(_) => Some(5),
            PeerMessage::Request(_) => Some(6),
            PeerMessage::Piece(_) => Some(7),
            PeerMessage::Cancel(_) => Some(8),
            PeerMessage::Unknown { id, .. } => Some(*id),
        }
    }

    pub fn payload_to_be_bytes(&self) -> Vec<u8> {
        match self {
            PeerMessage::KeepAlive
            | PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => Vec::new(),
            PeerMessage::Have(payload) => payload.to_be_bytes(),
            PeerMessage::Bitfield(payload) => payload.to_be_bytes(),
            PeerMessage::Request(payload) | PeerMessage::Cancel(payload) => payload.to_be_bytes(),
            PeerMessage::Piece(payload) => payload.to_be_bytes(),
            PeerMessage::Unknown { payload, .. } => payload.clone(),
        }
    }

    fn from_parts(id: u8, data: &[u8]) -> Result<Self, PeerError> {
        let invalid = |_| PeerError::InvalidPayload {
            id,
            length: data.len(),
        };
        let msg = match id {
            0 => PeerMessage::Choke,
            1 => PeerMessage::Unchoke,
            2 => PeerMessage::Interested,
            3 => PeerMessage::NotInterested,
            4 => PeerMessage::Have(HavePayload::from_be_bytes(data).map_err(invalid)?),
            5 => PeerMessage::Bitfield(BitfieldPayload::from_be_bytes(data)),
            6 => PeerMessage::Request(RequestPiecePayload::from_be_bytes(data).map_err(invalid)?),
            7 => PeerMessage::Piece(ResponsePiecePayload::from_be_bytes(data).map_err(invalid)?),
            8 => PeerMessage::Cancel(RequestPiecePayload::from_be_bytes(data).map_err(invalid)?),
            id => PeerMessage::Unknown {
                id,
                payload: data.to_vec(),
            },
        };
        Ok(msg)
    }
}

/// Everything that can travel over a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(Handshake),
    Message(PeerMessage),
}

impl From<PeerMessage> for Frame {
    fn from(msg: PeerMessage) -> Self {
        Frame::Message(msg)
    }
}

impl From<Handshake> for Frame {
    fn from(handshake: Handshake) -> Self {
        Frame::Handshake(handshake)
    }
}

/// Largest length prefix we accept or send.
pub const MAX: u32 = 8 * 1024 * 1024;

/// Splits the byte stream into [`Frame`]s: first the 68-byte handshake, then
/// length-prefixed messages.
#[derive(Debug, Clone)]
pub struct MessageFramer {
    awaiting_handshake: bool,
}

impl MessageFramer {
    /// A framer for a fresh connection, expecting the peer's handshake first.
    pub fn new() -> Self {
        Self {
            awaiting_handshake: true,
        }
    }

    /// A framer for a stream whose handshake has already been consumed.
    pub fn after_handshake() -> Self {
        Self {
            awaiting_handshake: false,
        }
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageFramer {
    type Item = Frame;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.awaiting_handshake {
            if src.len() < HANDSHAKE_LEN {
                src.reserve(HANDSHAKE_LEN - src.len());
                return Ok(None);
            }
            let handshake = Handshake::from_bytes(&src[..HANDSHAKE_LEN])?;
            src.advance(HANDSHAKE_LEN);
            self.awaiting_handshake = false;
            return Ok(Some(Frame::Handshake(handshake)));
        }

        if src.len() < 4 {
            // Not enough data to read the length marker.
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes);

        if length == 0 {
            src.advance(4);
            return Ok(Some(Frame::Message(PeerMessage::KeepAlive)));
        }

        // Check that the length is not too large to avoid a denial of
        // service attack where we run out of memory.
        if length > MAX {
            return Err(PeerError::FrameTooLarge(length));
        }

        let frame_len = 4 + length as usize;
        if src.len() < frame_len {
            // The full frame has not yet arrived.
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let msg_type = src[4];
        let msg = PeerMessage::from_parts(msg_type, &src[5..frame_len])?;
        src.advance(frame_len);
        Ok(Some(Frame::Message(msg)))
    }
}

impl Encoder<Frame> for MessageFramer {
    type Error = PeerError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let msg = match item {
            Frame::Handshake(handshake) => {
                dst.extend_from_slice(&handshake.to_bytes()?);
                return Ok(());
            }
            Frame::Message(msg) => msg,
        };

        let Some(id) = msg.id() else {
            dst.put_u32(0);
            return Ok(());
        };
        let payload = msg.payload_to_be_bytes();
        let length = payload.len() as u32 + 1;
        // Don't send a message longer than the other end will accept.
        if length > MAX {
            return Err(PeerError::FrameTooLarge(length));
        }

        dst.reserve(4 + length as usize);
        dst.put_u32(length);
        dst.put_u8(id);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: PeerMessage) -> Vec<u8> {
        let mut buf = BytesMut::new();
        MessageFramer::after_handshake()
            .encode(Frame::Message(msg), &mut buf)
            .unwrap();
        buf.to_vec()
    }

    /// Feeds `chunks` one after another, collecting every frame produced.
    fn feed(framer: &mut MessageFramer, chunks: &[&[u8]]) -> Vec<Frame> {
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            while let Some(frame) = framer.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
        }
        assert!(buf.is_empty());
        frames
    }

    fn sample_stream() -> Vec<u8> {
        let mut bytes = encode(PeerMessage::Bitfield(BitfieldPayload::from_be_bytes(&[0xff])));
        bytes.extend(encode(PeerMessage::Unchoke));
        bytes.extend(encode(PeerMessage::KeepAlive));
        bytes.extend(encode(PeerMessage::Piece(ResponsePiecePayload {
            index: 3,
            begin: 16_384,
            block: (0..=255).collect(),
        })));
        bytes
    }

    #[test]
    fn interested_and_request_layout() {
        assert_eq!(encode(PeerMessage::Interested), [0, 0, 0, 1, 2]);
        assert_eq!(
            encode(PeerMessage::Request(RequestPiecePayload::new(0, 16_384, 16_384))),
            [0, 0, 0, 13, 6, 0, 0, 0, 0, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
        );
        assert_eq!(encode(PeerMessage::KeepAlive), [0, 0, 0, 0]);
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let stream = sample_stream();
        let whole = feed(&mut MessageFramer::after_handshake(), &[&stream]);
        assert_eq!(whole.len(), 4);

        for split in 1..stream.len() {
            let (a, b) = stream.split_at(split);
            assert_eq!(feed(&mut MessageFramer::after_handshake(), &[a, b]), whole);
        }

        let bytes: Vec<&[u8]> = stream.chunks(1).collect();
        assert_eq!(feed(&mut MessageFramer::after_handshake(), &bytes), whole);

        let sevens: Vec<&[u8]> = stream.chunks(7).collect();
        assert_eq!(feed(&mut MessageFramer::after_handshake(), &sevens), whole);
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let stream = encode(PeerMessage::Have(HavePayload { piece_index: 9 }));
        let mut framer = MessageFramer::after_handshake();
        let mut buf = BytesMut::from(&stream[..6]);
        assert!(framer.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 6);
        buf.extend_from_slice(&stream[6..]);
        assert_eq!(
            framer.decode(&mut buf).unwrap(),
            Some(Frame::Message(PeerMessage::Have(HavePayload { piece_index: 9 })))
        );
    }

    #[test]
    fn handshake_comes_first() {
        let handshake = Handshake::new([4; 20], [5; 20]);
        let mut stream = handshake.to_bytes().unwrap().to_vec();
        stream.extend(encode(PeerMessage::Unchoke));

        let chunks: Vec<&[u8]> = stream.chunks(10).collect();
        let frames = feed(&mut MessageFramer::new(), &chunks);
        assert_eq!(
            frames,
            vec![
                Frame::Handshake(handshake),
                Frame::Message(PeerMessage::Unchoke)
            ]
        );
    }

    #[test]
    fn unknown_ids_are_kept() {
        let frames = feed(&mut MessageFramer::after_handshake(), &[&[0, 0, 0, 3, 20, 1, 2]]);
        assert_eq!(
            frames,
            vec![Frame::Message(PeerMessage::Unknown {
                id: 20,
                payload: vec![1, 2]
            })]
        );
    }

    #[test]
    fn wrong_payload_length_is_a_protocol_error() {
        let cases: &[&[u8]] = &[
            &[0, 0, 0, 3, 4, 0, 1],
            &[0, 0, 0, 6, 6, 0, 0, 0, 0, 0],
            &[0, 0, 0, 14, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            &[0, 0, 0, 5, 7, 0, 0, 0, 1],
        ];
        for frame in cases {
            let mut buf = BytesMut::from(*frame);
            let error = MessageFramer::after_handshake()
                .decode(&mut buf)
                .unwrap_err();
            assert!(
                matches!(error, PeerError::InvalidPayload { id, length } if id == frame[4] && length == frame.len() - 5),
                "{error}"
            );
        }
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut buf = BytesMut::from(&(MAX + 1).to_be_bytes()[..]);
        assert!(matches!(
            MessageFramer::after_handshake().decode(&mut buf),
            Err(PeerError::FrameTooLarge(_))
        ));
    }
}
