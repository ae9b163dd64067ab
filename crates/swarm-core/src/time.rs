use crate::types::TimestampNs;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds since the Unix epoch.
///
/// Audit records and lease bookkeeping use this; protocol ordering never
/// depends on it (that is the Lamport clock's job).
pub fn now_ns() -> TimestampNs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as TimestampNs)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        // 2020-01-01 in nanoseconds.
        assert!(now_ns() > 1_577_836_800_000_000_000);
    }
}
