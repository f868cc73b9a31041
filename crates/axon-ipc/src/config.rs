use std::path::PathBuf;

use crate::codec::MAX_FRAME_LEN;

/// Well-known endpoint shared by convention between broker and peers.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/axon-attendance.sock";

/// Broker configuration.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub socket_path: PathBuf,
    pub max_frame_len: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Peer configuration.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub socket_path: PathBuf,
    pub max_frame_len: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}
