/// Where a session stands with its peer. Decides which inbound messages are
/// acted on and what we may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// TCP connection not established yet.
    #[default]
    Connecting,
    /// Our handshake is sent, waiting for the peer's.
    AwaitingHandshake,
    /// Handshake matched, waiting for the peer's bitfield.
    AwaitingBitfield,
    /// We sent `interested` and wait to be unchoked.
    Interested,
    /// Requests are out, blocks are coming in.
    Unchoked,
    Closed,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        *self == ConnectionState::Closed
    }
}
