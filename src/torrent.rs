use std::{fmt, path::Path};

use serde::Deserialize;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode::{self, locate_value_span, BencodeError};

pub use hashes::Hashes;

/// SHA-1 of the raw `info` dictionary bytes. Identifies the torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

mod hashes {
    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer};
    use std::fmt;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Hashes(pub Vec<[u8; 20]>);
    struct HashesVisitor;

    impl<'de> Visitor<'de> for HashesVisitor {
        type Value = Hashes;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("Bytes which length is a multiple of 20")
        }

        fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.len() % 20 != 0 {
                return Err(de::Error::custom(format!(
                    "Bytes which length is a multiple of 20. Got {:?}",
                    v.len()
                )));
            }
            Ok(Hashes(
                v.chunks_exact(20)
                    .map(|chunk| {
                        let mut hash = [0u8; 20];
                        hash.copy_from_slice(chunk);
                        hash
                    })
                    .collect(),
            ))
        }
    }

    impl<'de> Deserialize<'de> for Hashes {
        fn deserialize<D>(deserializer: D) -> Result<Hashes, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_bytes(HashesVisitor)
        }
    }
}

/// The fields of a metainfo file we read. Everything else is ignored.
#[derive(Debug, Deserialize)]
struct RawTorrent {
    /// The url of the tracker.
    announce: String,
    info: RawInfo,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    /// In the single file case, the name of the file. Not necessarily UTF-8.
    name: Option<serde_bytes::ByteBuf>,
    /// Single-file torrents only.
    length: u64,
    /// `piece length` maps to the number of bytes in each piece the file is split into.
    #[serde(rename = "piece length")]
    piece_length: u64,
    /// pieces is to be subdivided into strings of length 20,
    /// each of which is the SHA1 hash of the piece at the corresponding index.
    pieces: Hashes,
}

/// Typed, validated view of a single-file torrent.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub name: Option<String>,
    /// Total length of the file in bytes.
    pub length: u64,
    pub piece_length: u64,
    pub pieces: Hashes,
    pub info_hash: InfoHash,
}

impl Metainfo {
    /// Parses and validates a torrent file.
    ///
    /// The info hash is taken over the exact bytes of the `info` value in
    /// `raw`, not over a re-encoding of it.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, TorrentError> {
        if !matches!(bencode::decode_all(raw)?, bencode::Value::Dict(_)) {
            return Err(TorrentError::Invalid(
                "top-level value is not a dictionary".to_string(),
            ));
        }
        let info_span = locate_value_span(raw, &[b"info"])?
            .ok_or_else(|| TorrentError::Invalid("missing field `info`".to_string()))?;
        let info_hash = InfoHash(Sha1::digest(&raw[info_span]).into());

        let torrent = serde_bencode::from_bytes::<RawTorrent>(raw)
            .map_err(|error| TorrentError::Invalid(error.to_string()))?;

        if torrent.info.piece_length == 0 {
            return Err(TorrentError::Invalid("`piece length` is zero".to_string()));
        }
        let metainfo = Self {
            announce: torrent.announce,
            name: torrent
                .info
                .name
                .map(|name| String::from_utf8_lossy(&name).into_owned()),
            length: torrent.info.length,
            piece_length: torrent.info.piece_length,
            pieces: torrent.info.pieces,
            info_hash,
        };
        if metainfo.pieces.0.len() as u64 != metainfo.length.div_ceil(metainfo.piece_length) {
            return Err(TorrentError::Invalid(format!(
                "{} piece hashes for {} bytes in pieces of {}",
                metainfo.pieces.0.len(),
                metainfo.length,
                metainfo.piece_length
            )));
        }
        Ok(metainfo)
    }

    pub fn read_from_file(path: &Path) -> Result<Self, TorrentError> {
        let bytes = std::fs::read(path).map_err(|error| TorrentError::IOReadError {
            error,
            path: path.to_path_buf(),
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn piece_count(&self) -> u32 {
        self.pieces.0.len() as u32
    }

    /// Size of piece `index`; the last piece may be shorter.
    pub fn piece_size(&self, index: u32) -> u64 {
        let offset = index as u64 * self.piece_length;
        self.piece_length.min(self.length.saturating_sub(offset))
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.pieces.0.get(index as usize)
    }
}

#[derive(Error, Debug)]
pub enum TorrentError {
    #[error("Failed with error `{error}` to read file with path `{path}`")]
    IOReadError {
        error: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("Failed to decode the torrent bencode: `{0}`")]
    Bencode(#[from] BencodeError),
    #[error("Invalid torrent: {0}")]
    Invalid(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a single-file torrent for `content`.
    pub(crate) fn torrent_bytes(content: &[u8], piece_length: u64, announce: &str) -> Vec<u8> {
        let pieces: Vec<u8> = content
            .chunks(piece_length as usize)
            .flat_map(|piece| <[u8; 20]>::from(Sha1::digest(piece)))
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

    #[test]
    fn parses_single_file_torrent() {
        let content = vec![7u8; 40_000];
        let raw = torrent_bytes(&content, 16_384, "http://127.0.0.1:8080/announce");
        let metainfo = Metainfo::from_bytes(&raw).unwrap();

        assert_eq!(metainfo.announce, "http://127.0.0.1:8080/announce");
        assert_eq!(metainfo.name.as_deref(), Some("file.bin"));
        assert_eq!(metainfo.length, 40_000);
        assert_eq!(metainfo.piece_count(), 3);
        assert_eq!(metainfo.piece_size(0), 16_384);
        assert_eq!(metainfo.piece_size(2), 40_000 - 2 * 16_384);
        assert_eq!(
            metainfo.piece_hash(2).unwrap(),
            &<[u8; 20]>::from(Sha1::digest(&content[32_768..]))
        );
    }

    #[test]
    fn info_hash_covers_the_raw_info_bytes() {
        let raw = torrent_bytes(b"hello world", 8, "http://t/a");
        let span = locate_value_span(&raw, &[b"info"]).unwrap().unwrap();
        let expected: [u8; 20] = Sha1::digest(&raw[span]).into();
        assert_eq!(Metainfo::from_bytes(&raw).unwrap().info_hash.0, expected);
    }

    #[test]
    fn info_hash_ignores_keys_outside_info() {
        let base = torrent_bytes(b"hello world", 8, "http://t/a");
        let hash = Metainfo::from_bytes(&base).unwrap().info_hash;

        // same info dict, a different announce and an extra key placed first
        let other = torrent_bytes(b"hello world", 8, "http://other/announce");
        let mut reordered = b"d7:comment2:hi".to_vec();
        reordered.extend_from_slice(&other[1..]);
        assert_eq!(Metainfo::from_bytes(&reordered).unwrap().info_hash, hash);
    }

    #[test]
    fn info_hash_changes_with_info_bytes() {
        let raw = torrent_bytes(b"hello world", 8, "http://t/a");
        let hash = Metainfo::from_bytes(&raw).unwrap().info_hash;

        let mut changed = raw.clone();
        let name_at = changed
            .windows(8)
            .position(|w| w == b"file.bin")
            .unwrap();
        changed[name_at] = b'g';
        assert_ne!(Metainfo::from_bytes(&changed).unwrap().info_hash, hash);
    }

    #[test]
    fn info_hash_is_not_a_reencoding() {
        // unsorted keys come back sorted, so hashing a re-encoding would differ
        let raw = b"d8:announce3:x:y4:infod6:pieces20:aaaaaaaaaaaaaaaaaaaa6:lengthi7e12:piece lengthi8eee";
        let metainfo = Metainfo::from_bytes(raw).unwrap();
        let span = locate_value_span(raw, &[b"info"]).unwrap().unwrap();
        let reencoded = bencode::encode(&bencode::decode_all(&raw[span.clone()]).unwrap());
        assert_ne!(reencoded.as_slice(), &raw[span.clone()]);
        assert_eq!(metainfo.info_hash.0, <[u8; 20]>::from(Sha1::digest(&raw[span])));
    }

    #[test]
    fn rejects_invalid_torrents() {
        let cases: &[&[u8]] = &[
            b"i42e",
            b"d8:announce3:x:ye",
            b"d4:infod6:lengthi1e12:piece lengthi1e6:pieces20:aaaaaaaaaaaaaaaaaaaaee",
            b"d8:announce3:x:y4:infod12:piece lengthi1e6:pieces20:aaaaaaaaaaaaaaaaaaaaee",
            b"d8:announce3:x:y4:infod6:lengthi1e6:pieces20:aaaaaaaaaaaaaaaaaaaaee",
            b"d8:announce3:x:y4:infod6:lengthi1e12:piece lengthi1ee",
            b"d8:announce3:x:y4:infod6:lengthi1e12:piece lengthi1e6:pieces3:abcee",
        ];
        for raw in cases {
            assert!(
                matches!(Metainfo::from_bytes(raw), Err(TorrentError::Invalid(_))),
                "{}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn malformed_bencode_is_reported_as_such() {
        assert!(matches!(
            Metainfo::from_bytes(b"d8:announce"),
            Err(TorrentError::Bencode(_))
        ));
        assert!(matches!(
            Metainfo::from_bytes(b"x"),
            Err(TorrentError::Bencode(_))
        ));
    }

    #[test]
    fn malformed_bytes_after_info_are_a_bencode_error() {
        let raw = torrent_bytes(b"hello world", 8, "http://t/a");

        let unterminated = &raw[..raw.len() - 1];
        assert!(matches!(
            Metainfo::from_bytes(unterminated),
            Err(TorrentError::Bencode(BencodeError::UnexpectedEof(_)))
        ));

        let mut trailing = raw.clone();
        trailing.extend_from_slice(b"JUNK");
        assert!(matches!(
            Metainfo::from_bytes(&trailing),
            Err(TorrentError::Bencode(BencodeError::TrailingData(4)))
        ));

        let mut bad_tail = raw[..raw.len() - 1].to_vec();
        bad_tail.extend_from_slice(b"5:extrai1xe");
        assert!(matches!(
            Metainfo::from_bytes(&bad_tail),
            Err(TorrentError::Bencode(_))
        ));
    }

    #[test]
    fn name_need_not_be_utf8() {
        let raw = torrent_bytes(b"hello world", 8, "http://t/a");
        let name_at = raw.windows(16).position(|w| w == b"4:name8:file.bin").unwrap();
        let mut binary_name = raw[..name_at].to_vec();
        binary_name.extend_from_slice(b"4:name2:\xff\xfe");
        binary_name.extend_from_slice(&raw[name_at + 16..]);

        let metainfo = Metainfo::from_bytes(&binary_name).unwrap();
        assert_eq!(metainfo.name.as_deref(), Some("\u{fffd}\u{fffd}"));
        assert_eq!(metainfo.length, 11);
    }
}
