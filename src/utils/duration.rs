use std::time::Duration;

use crate::error::BenchError;

/// Parses a duration literal such as `1m10s`, `1m 10s`, `500ms` or `2h`.
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, BenchError> {
    let literal = input.trim();
    if let Ok(secs) = literal.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(literal)
        .map_err(|e| BenchError::InvalidDuration(format!("{input:?}: {e}")))
}
