use std::{net::SocketAddrV4, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument};

use crate::{
    download::PieceSet,
    messages::{Frame, MessageFramer},
    peer::{error::PeerError, session::Session, PeerId},
    torrent::InfoHash,
};

/// A handshaken connection to one peer.
///
/// Owns the stream and its receive buffer. Every read and every write is
/// bounded by `timeout`.
pub struct Connection<S = TcpStream> {
    addr: SocketAddrV4,
    framed: Framed<S, MessageFramer>,
    session: Session,
    timeout: Duration,
}

impl Connection<TcpStream> {
    /// Connects to `addr` and exchanges handshakes.
    #[instrument(skip(info_hash, peer_id), name = "peer::connect")]
    pub async fn connect(
        addr: SocketAddrV4,
        info_hash: InfoHash,
        peer_id: PeerId,
        timeout: Duration,
    ) -> Result<Self, PeerError> {
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout(timeout))?
            .map_err(|error| PeerError::FailedToConnect { error, addr })?;
        Self::handshake(tcp, addr, info_hash, peer_id, timeout).await
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the handshake over an already established stream.
    pub async fn handshake(
        stream: S,
        addr: SocketAddrV4,
        info_hash: InfoHash,
        peer_id: PeerId,
        timeout: Duration,
    ) -> Result<Self, PeerError> {
        let mut conn = Self {
            addr,
            framed: Framed::new(stream, MessageFramer::new()),
            session: Session::new(info_hash, peer_id),
            timeout,
        };

        let handshake = conn.session.connected();
        conn.send_all(vec![Frame::Handshake(handshake)]).await?;
        // the framer yields the peer's handshake before any message
        if let Frame::Handshake(theirs) = conn.next_frame().await? {
            conn.session.on_handshake(theirs)?;
        }
        info!(addr = %conn.addr, "peer connected");
        Ok(conn)
    }

    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.session.remote_peer_id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Reads frames and answers them until every piece in `pieces` is verified.
    #[instrument(skip_all, name = "peer::download", fields(addr = %self.addr))]
    pub async fn download(&mut self, pieces: &mut PieceSet) -> Result<(), PeerError> {
        while !pieces.is_finished() {
            let frame = self.next_frame().await?;
            let outbound = self.session.on_frame(frame, pieces)?;
            self.send_all(outbound.into_iter().map(Frame::Message).collect())
                .await?;
        }
        self.session.close();
        debug!("all pieces verified, closing");
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, PeerError> {
        let result = match tokio::time::timeout(self.timeout, self.framed.next()).await {
            Err(_) => Err(PeerError::Timeout(self.timeout)),
            Ok(None) => Err(PeerError::PeerDisconnected),
            Ok(Some(frame)) => frame,
        };
        if result.is_err() {
            self.session.close();
        }
        result
    }

    /// Writes `frames` and flushes them. A peer that stops reading runs into
    /// the timeout.
    async fn send_all(&mut self, frames: Vec<Frame>) -> Result<(), PeerError> {
        if frames.is_empty() {
            return Ok(());
        }
        let timeout = self.timeout;
        let framed = &mut self.framed;
        let sent = tokio::time::timeout(timeout, async move {
            for frame in frames {
                framed.feed(frame).await?;
            }
            framed.flush().await?;
            Ok::<_, PeerError>(())
        })
        .await;
        let result = match sent {
            Err(_) => Err(PeerError::Timeout(timeout)),
            Ok(result) => result,
        };
        if result.is_err() {
            self.session.close();
        }
        result
    }
}
