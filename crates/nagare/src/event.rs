use crate::sequence_number::SequenceNumber;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub type Stream<'a, T, Err> = BoxStream<'a, Result<T, Err>>;

/// Range selector for reading a channel's history in ascending eid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EidSelect {
    All,
    /// Events with `eid >= n`. `From(0)` anchors at the placeholder row,
    /// which exists for every channel that ever saw a real append.
    From(SequenceNumber),
}

/// A persisted event row.
///
/// `(channel, eid)` is unique. Real events carry `eid >= 1`, assigned
/// consecutively per channel in append order; eid 0 is the per-channel
/// placeholder. Rows are never mutated or deleted by this subsystem once
/// written through the append path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned identity. 0 until persisted; carries no ordering.
    pub id: i64,
    pub channel: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque serialized payload, supplied by the caller.
    pub data: String,
    /// Position within `channel`. 0 on a draft means "not yet allocated".
    pub eid: SequenceNumber,
    pub created: DateTime<Utc>,
}

impl Event {
    /// A draft event awaiting sequence allocation.
    pub fn draft(channel: impl Into<String>, event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: 0,
            channel: channel.into(),
            event_type: event_type.into(),
            data: data.into(),
            eid: 0,
            created: Utc::now(),
        }
    }

    /// The placeholder row that lets range queries address eid 0.
    pub(crate) fn sentinel(channel: &str) -> Self {
        Self::draft(channel, "", "")
    }

    /// True for a persisted placeholder row.
    pub fn is_sentinel(&self) -> bool {
        self.id != 0 && self.eid == 0
    }
}
