use std::io;

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn bad_length(what: &str, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{what} payload of {len} bytes has the wrong length"),
    )
}

/// `request` and `cancel` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPiecePayload {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl RequestPiecePayload {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }

    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 12];
        bytes[0..4].copy_from_slice(&self.index.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.begin.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    pub fn from_be_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != 12 {
            return Err(bad_length("request", bytes.len()));
        }
        Ok(Self::new(
            read_u32(bytes, 0),
            read_u32(bytes, 4),
            read_u32(bytes, 8),
        ))
    }
}

/// `piece` payload: one block of a piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePiecePayload {
    pub index: u32,
    pub begin: u32,
    pub block: Vec<u8>,
}

impl ResponsePiecePayload {
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.block.len());
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes.extend_from_slice(&self.begin.to_be_bytes());
        bytes.extend_from_slice(&self.block);
        bytes
    }

    pub fn from_be_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < 8 {
            return Err(bad_length("piece", bytes.len()));
        }
        Ok(Self {
            index: read_u32(bytes, 0),
            begin: read_u32(bytes, 4),
            block: bytes[8..].to_vec(),
        })
    }
}

/// `have` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HavePayload {
    pub piece_index: u32,
}

impl HavePayload {
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.piece_index.to_be_bytes().to_vec()
    }

    pub fn from_be_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != 4 {
            return Err(bad_length("have", bytes.len()));
        }
        Ok(Self {
            piece_index: read_u32(bytes, 0),
        })
    }
}

/// `bitfield` payload, one bit per piece, high bit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldPayload {
    pub pieces_available: Vec<bool>,
}

impl BitfieldPayload {
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.pieces_available
            .chunks(8)
            .map(|bits| {
                bits.iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, &has)| byte | ((has as u8) << (7 - i)))
            })
            .collect()
    }

    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let pieces_available = bytes
            .iter()
            .flat_map(|byte| (0..8).map(move |i| byte & (1 << (7 - i)) != 0))
            .collect();
        Self { pieces_available }
    }
}
