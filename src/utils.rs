use std::time::{Duration, Instant};

/// Format a `Duration` for log fields, e.g. `1.94ms` or `2.34s`.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn when an operation that began at `start` took longer than `threshold`.
///
/// Returns the elapsed time so callers can reuse it in their own logging.
pub fn log_if_slow(start: Instant, threshold: Duration, operation: &str) -> Duration {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            operation,
            duration = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            "slow operation"
        );
    }
    elapsed
}
