use std::sync::OnceLock;
use std::time::Instant;

/// Milliseconds since process start. Every engine decision uses this
/// monotonic clock; wall time only appears in payloads humans read.
pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
