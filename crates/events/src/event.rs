use chrono::{DateTime, Utc};

/// A recorded fact about a fiscal record.
///
/// Events are immutable, carry a schema version and are only ever appended.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name (e.g. "sequencing.range.activated").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time at which the event happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
