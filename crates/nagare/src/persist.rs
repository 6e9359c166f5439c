use crate::sequence_number::SequenceNumber;

/// Failures surfaced by stores and the append protocol.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// A counter for the name was created first by a concurrent writer.
    /// Consumed internally by the get-or-create fallback; never reaches
    /// callers of the append path.
    #[error("counter already exists")]
    CounterExists,
    /// The store's `(channel, eid)` uniqueness backstop fired. When this
    /// escapes an append, the allocated eid is abandoned and the channel's
    /// sequence keeps a permanent gap.
    #[error("event already exists for channel {channel} at eid {eid}")]
    DuplicateEvent { channel: String, eid: SequenceNumber },
    #[error("{0}")]
    ConnectionError(Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("{0}")]
    UnknownError(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl PersistenceError {
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::UnknownError(message.into().into())
    }
}
