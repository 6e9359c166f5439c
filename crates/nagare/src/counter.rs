use crate::sequence_number::SequenceNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of the last eid issued for a channel.
///
/// At most one counter exists per distinct `name`, and `value` never
/// decreases over the row's lifetime. Counters are created on first append
/// to a channel and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Store-assigned identity. 0 until persisted; carries no ordering.
    pub id: i64,
    /// Channel name, unique across all counters.
    pub name: String,
    /// Last sequence number issued for the channel.
    pub value: SequenceNumber,
    /// Last modification time, informational only.
    pub updated: DateTime<Utc>,
}

impl Counter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            value: 0,
            updated: Utc::now(),
        }
    }
}
