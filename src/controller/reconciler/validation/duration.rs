//! # Duration Validation
//!
//! Handles parsing Kubernetes duration strings.

use super::ValidationError;
use crate::observability::metrics;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+(?:ms|s|m|h|d))+$")
        .expect("Failed to compile duration regex - this should never happen")
});

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>ms|s|m|h|d)")
        .expect("Failed to compile duration segment regex - this should never happen")
});

/// Parse Kubernetes duration string into `std::time::Duration`
///
/// Supports single and compound forms: "30s", "5m", "1h30m", "1d", "500ms".
/// A bare "0" or any zero total returns `None`, meaning disabled.
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Option<Duration>, ValidationError> {
    let trimmed = duration_str.trim();
    let invalid = |message: &str| {
        metrics::increment_duration_parsing_errors();
        ValidationError::InvalidDuration {
            value: duration_str.to_string(),
            message: message.to_string(),
        }
    };

    if trimmed.is_empty() {
        return Err(invalid("duration string cannot be empty"));
    }
    if trimmed == "0" {
        return Ok(None);
    }

    let lower = trimmed.to_lowercase();
    if !DURATION.is_match(&lower) {
        return Err(invalid(
            "expected <number><unit> segments with units ms, s, m, h or d (e.g. '1h30m')",
        ));
    }

    let mut total = Duration::ZERO;
    for captures in SEGMENT.captures_iter(&lower) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|e| invalid(&format!("duration number out of range: {e}")))?;
        let segment = match &captures["unit"] {
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number.saturating_mul(60)),
            "h" => Duration::from_secs(number.saturating_mul(3600)),
            _ => Duration::from_secs(number.saturating_mul(86_400)),
        };
        total = total.saturating_add(segment);
    }

    Ok((!total.is_zero()).then_some(total))
}
