use std::fmt;

use rand::{distributions::Alphanumeric, Rng};

/// Client prefix in the Azureus style: `-` + client code + version + `-`.
const PREFIX: &[u8; 8] = b"-BP0100-";

/// Our 20-byte identity, sent to the tracker and in the handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Generates an id from `rng`. Pass a seeded rng for reproducible ids.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PREFIX);
        for byte in &mut id[8..] {
            *byte = rng.sample(Alphanumeric);
        }
        Self(id)
    }

    pub fn random() -> Self {
        Self::generate(&mut rand::thread_rng())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}
