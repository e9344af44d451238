pub mod conn;
pub mod error;
pub mod handshake;
mod peer_id;
pub mod session;
pub mod states;

pub use conn::Connection;
pub use error::PeerError;
pub use handshake::Handshake;
pub use peer_id::PeerId;
pub use session::Session;
pub use states::ConnectionState;
