use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    peer::PeerId,
    torrent::{InfoHash, Metainfo},
};

#[derive(Debug, Clone)]
pub struct TrackerRequest<'a> {
    /// the info hash of the torrent
    info_hash: &'a InfoHash,
    /// a unique identifier for your client
    peer_id: &'a PeerId,
    /// the port your client is listening on
    port: u16,
    /// the total amount uploaded so far
    uploaded: u64,
    /// the total amount downloaded so far
    downloaded: u64,
    /// the number of bytes left to download
    left: u64,
    /// whether the peer list should use the compact representation
    compact: u8,
}

impl<'a> TrackerRequest<'a> {
    pub fn new(info_hash: &'a InfoHash, peer_id: &'a PeerId, port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            compact: 1,
        }
    }

    /// The query string. Hash and peer id are escaped byte by byte.
    pub fn to_url_encoded(&self) -> String {
        let mut url_encoded = String::new();
        url_encoded.push_str(&format!(
            "info_hash={}",
            escape_bytes_url(&self.info_hash.0)
        ));
        url_encoded.push_str(&format!("&peer_id={}", escape_bytes_url(&self.peer_id.0)));
        url_encoded.push_str(&format!("&port={}", self.port));
        url_encoded.push_str(&format!("&uploaded={}", self.uploaded));
        url_encoded.push_str(&format!("&downloaded={}", self.downloaded));
        url_encoded.push_str(&format!("&left={}", self.left));
        url_encoded.push_str(&format!("&compact={}", self.compact));
        url_encoded
    }

    /// Builds the full announce url, keeping any query the tracker url already has.
    pub fn url(&self, announce: &str) -> Result<url::Url, TrackerError> {
        let mut url = url::Url::parse(announce)?;
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => {
                format!("{existing}&{}", self.to_url_encoded())
            }
            _ => self.to_url_encoded(),
        };
        url.set_query(Some(&query));
        Ok(url)
    }

    pub async fn get_response(&self, announce: &str) -> Result<Vec<SocketAddrV4>, TrackerError> {
        let url = self.url(announce)?;
        debug!(%url, "announcing");
        let response = reqwest::get(url).await?.error_for_status()?;
        let body: Bytes = response.bytes().await?;
        parse_response(&body)
    }
}

/// Announces `metainfo` to its tracker and returns the peers it knows of.
#[instrument(skip_all, fields(announce = %metainfo.announce))]
pub async fn announce(
    metainfo: &Metainfo,
    peer_id: &PeerId,
    port: u16,
) -> Result<Vec<SocketAddrV4>, TrackerError> {
    let request = TrackerRequest::new(&metainfo.info_hash, peer_id, port, metainfo.length);
    let peers = request.get_response(&metainfo.announce).await?;
    debug!(count = peers.len(), "tracker returned peers");
    Ok(peers)
}

fn escape_bytes_url(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("%{:02x}", b)).collect()
}

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    /// An integer, indicating how often your client should make a request to the tracker, in seconds.
    #[allow(dead_code)]
    interval: Option<i64>,
    /// Each peer is represented using 6 bytes.
    /// The first 4 bytes are the peer's IP address and the last 2 bytes are the peer's port number.
    /// Kept generic so a non-compact list is reported as a bad peer list.
    peers: Option<serde_bencode::value::Value>,
}

/// Decodes a tracker response body into peer addresses.
pub fn parse_response(body: &[u8]) -> Result<Vec<SocketAddrV4>, TrackerError> {
    let response = serde_bencode::from_bytes::<TrackerResponse>(body).map_err(|error| {
        TrackerError::InvalidResponse {
            error,
            response: Bytes::copy_from_slice(body),
        }
    })?;
    if let Some(reason) = response.failure_reason {
        return Err(TrackerError::Failure(reason));
    }
    match response.peers {
        Some(serde_bencode::value::Value::Bytes(peers)) => parse_compact_peers(&peers),
        Some(_) => Err(TrackerError::MalformedPeerList(
            "`peers` is not a compact byte string".to_string(),
        )),
        None => Err(TrackerError::MalformedPeerList("`peers` is missing".to_string())),
    }
}

fn parse_compact_peers(bytes: &[u8]) -> Result<Vec<SocketAddrV4>, TrackerError> {
    if bytes.is_empty() || bytes.len() % 6 != 0 {
        return Err(TrackerError::MalformedPeerList(format!(
            "{} bytes is not a non-empty multiple of 6",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            SocketAddrV4::new(
                Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                u16::from_be_bytes([chunk[4], chunk[5]]),
            )
        })
        .collect())
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to parse announce url: `{0}`")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Failed with error: `{error}` to deserialize tracker response: `{response:?}`")]
    InvalidResponse {
        error: serde_bencode::Error,
        response: Bytes,
    },
    #[error("The tracker refused the announce: `{0}`")]
    Failure(String),
    #[error("The tracker sent a malformed peer list: {0}")]
    MalformedPeerList(String),
    #[error("Something failed with requesting the tracker-response: `{0}`")]
    Http(#[from] reqwest::Error),
}
