use crate::peer::error::PeerError;

pub const HANDSHAKE_LEN: usize = 68;
const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

#[derive(Debug, Copy, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Handshake {
    length: u8,
    protocol: [u8; 19],
    reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

fn config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<HANDSHAKE_LEN>()
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            length: 19,
            protocol: *PROTOCOL,
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> Result<[u8; HANDSHAKE_LEN], PeerError> {
        let mut bytes = [0u8; HANDSHAKE_LEN];
        let len = bincode::encode_into_slice(*self, &mut bytes, config())?;
        debug_assert_eq!(len, HANDSHAKE_LEN);
        Ok(bytes)
    }

    /// Decodes the first 68 bytes of `bytes`. The protocol header must match.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PeerError> {
        let (handshake, _len) = bincode::decode_from_slice::<Handshake, _>(bytes, config())?;
        if handshake.length != 19 || &handshake.protocol != PROTOCOL {
            return Err(PeerError::InvalidHandshake {
                length: handshake.length,
                protocol: String::from_utf8_lossy(&handshake.protocol).into_owned(),
            });
        }
        Ok(handshake)
    }
}
