use serde::{Deserialize, Serialize};

/// Resumable gateway session.
///
/// Present once a handshake completed; cleared when the remote service says
/// the session cannot be resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub last_sequence: u64,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, last_sequence: u64) -> Self {
        Self {
            session_id: session_id.into(),
            last_sequence,
        }
    }

    /// Record a dispatch sequence number. Sequences never move backwards.
    pub fn observe(&mut self, sequence: u64) {
        if sequence > self.last_sequence {
            self.last_sequence = sequence;
        }
    }
}
