//! Human-friendly duration flags.

use std::time::Duration;

use anyhow::{Context, Result};

/// Parse a duration like "500ms", "5s", "2m", "1h", or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let duration = if let Some(ms) = s.strip_suffix("ms") {
        let n: u64 = ms.parse().with_context(|| "Invalid milliseconds value")?;
        Duration::from_millis(n)
    } else if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().with_context(|| "Invalid hours value")?;
        Duration::from_secs(n.checked_mul(3600).context("Duration too large")?)
    } else if let Some(mins) = s.strip_suffix('m') {
        let n: u64 = mins.parse().with_context(|| "Invalid minutes value")?;
        Duration::from_secs(n.checked_mul(60).context("Duration too large")?)
    } else if let Some(secs) = s.strip_suffix('s') {
        let n: u64 = secs.parse().with_context(|| "Invalid seconds value")?;
        Duration::from_secs(n)
    } else {
        let n: u64 = s
            .parse()
            .with_context(|| "Invalid duration. Use formats like 500ms, 5s, 2m or 1h")?;
        Duration::from_secs(n)
    };

    if duration.is_zero() {
        anyhow::bail!("Duration must be greater than zero");
    }
    Ok(duration)
}
