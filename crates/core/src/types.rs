/// Database row identifier type matching BIGSERIAL columns.
pub type DbId = i64;

/// Epoch-millisecond timestamp.
///
/// All queue and scheduling arithmetic is done in whole milliseconds so
/// lease expiry, retry delays, and idle-shutdown deadlines stay exact and
/// reproducible under a fixed test clock.
pub type TimestampMs = i64;
