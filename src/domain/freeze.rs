use super::ids::Timestamp;
use serde::{Deserialize, Serialize};

/// Escrow state of one authorized payment: when its escrow period started
/// and whether a freeze is holding its release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeRecord {
    pub authorized_at: Timestamp,
    pub frozen: bool,
    /// Zero means the freeze holds until explicitly lifted.
    pub freeze_expires_at: Timestamp,
}

impl FreezeRecord {
    pub fn new(authorized_at: Timestamp) -> Self {
        Self {
            authorized_at,
            frozen: false,
            freeze_expires_at: Timestamp::ZERO,
        }
    }

    /// Whether the freeze is in force at `now`; a timed freeze lapses on its
    /// own.
    pub fn is_frozen_at(&self, now: Timestamp) -> bool {
        self.frozen && (self.freeze_expires_at == Timestamp::ZERO || now < self.freeze_expires_at)
    }
}
