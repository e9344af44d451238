use std::time::Duration;

/// Port announced to the tracker.
pub const DEFAULT_PORT: u16 = 6881;
/// Inactivity allowed on a peer connection before the session is dropped.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime knobs shared by the tracker client and the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub port: u16,
    /// Applies to connecting and to every read from the peer.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
