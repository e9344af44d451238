#![allow(dead_code)]

use sha1::{Digest, Sha1};

/// A single-file torrent over `content`, announcing to `announce`.
pub fn torrent_bytes(content: &[u8], piece_length: u64, announce: &str) -> Vec<u8> {
    let pieces: Vec<u8> = content
        .chunks(piece_length as usize)
        .flat_map(|chunk| <[u8; 20]>::from(Sha1::digest(chunk)))
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(format!("d8:announce{}:{}", announce.len(), announce).as_bytes());
    out.extend_from_slice(b"4:infod");
    out.extend_from_slice(format!("6:lengthi{}e", content.len()).as_bytes());
    out.extend_from_slice(b"4:name8:file.bin");
    out.extend_from_slice(format!("12:piece lengthi{piece_length}e").as_bytes());
    out.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
    out.extend_from_slice(&pieces);
    out.extend_from_slice(b"ee");
    out
}

/// Deterministic content that doesn't repeat at block boundaries.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
