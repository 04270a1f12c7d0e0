use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Cheap pseudo-random fraction in `[0, 1)` taken from the clock.
pub(crate) fn jitter_ratio() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

pub(crate) fn parse_retry_after(resp: &ureq::Response) -> Option<f64> {
    resp.header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

/// First `max` characters, for log previews.
pub(crate) fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
