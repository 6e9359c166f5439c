/// Position of an event within its channel's history. 0 is reserved for the
/// placeholder row that anchors range queries at the start of a stream.
pub type SequenceNumber = i64;
