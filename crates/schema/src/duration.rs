//! Prometheus-style duration strings (`1h30m`, `5m`, `250ms`, `0`).
//!
//! Units must appear in descending order and at most once each:
//! `y` (365d), `w`, `d`, `h`, `m`, `s`, and `ms` where milliseconds are allowed.
//! A bare integer is read as seconds.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {input:?}: {reason}")]
    Malformed { input: String, reason: &'static str },
}

// (suffix, millis), longest suffix first so "ms" wins over "m"
const UNITS: [(&str, u128); 7] = [
    ("ms", 1),
    ("y", 365 * 24 * 3_600_000),
    ("w", 7 * 24 * 3_600_000),
    ("d", 24 * 3_600_000),
    ("h", 3_600_000),
    ("m", 60_000),
    ("s", 1_000),
];

// Position of each unit in the required descending order.
fn rank(suffix: &str) -> usize {
    match suffix { "y" => 0, "w" => 1, "d" => 2, "h" => 3, "m" => 4, "s" => 5, _ => 6 }
}

/// Parse a duration without a millisecond component.
pub fn parse_prom_duration(s: &str) -> Result<Duration, DurationError> { parse(s, false) }

/// Parse a duration that may end in a `ms` component.
pub fn parse_prom_duration_with_millis(s: &str) -> Result<Duration, DurationError> { parse(s, true) }

fn parse(s: &str, allow_ms: bool) -> Result<Duration, DurationError> {
    let bad = |reason| DurationError::Malformed { input: s.to_string(), reason };
    if s.is_empty() { return Err(DurationError::Empty); }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = s.parse().map_err(|_| bad("out of range"))?;
        return Ok(Duration::from_secs(secs));
    }

    let mut rest = s;
    let mut total: u128 = 0;
    let mut last_rank: Option<usize> = None;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 { return Err(bad("expected a number")); }
        let n: u128 = rest[..digits].parse().map_err(|_| bad("out of range"))?;
        rest = &rest[digits..];
        let (suffix, unit_ms) = UNITS
            .iter()
            .find(|(suffix, _)| rest.starts_with(suffix))
            .copied()
            .ok_or_else(|| bad("unknown unit"))?;
        if suffix == "ms" && !allow_ms { return Err(bad("milliseconds not allowed")); }
        let r = rank(suffix);
        if let Some(prev) = last_rank {
            if r <= prev { return Err(bad("units out of order")); }
        }
        last_rank = Some(r);
        rest = &rest[suffix.len()..];
        total = n.checked_mul(unit_ms).and_then(|ms| total.checked_add(ms)).ok_or_else(|| bad("out of range"))?;
    }
    let millis = u64::try_from(total).map_err(|_| bad("out of range"))?;
    Ok(Duration::from_millis(millis))
}
