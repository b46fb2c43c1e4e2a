//! The state document broadcast to every control channel.

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of the server, rebuilt for every broadcast.
///
/// Sent as bare JSON text with no framing; receivers must tolerate
/// back-to-back documents on one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDoc {
    pub active_listeners: usize,
    pub song_library: Vec<String>,
    pub song_queue: Vec<String>,
}
