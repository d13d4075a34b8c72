//! Runtime configuration shared by the scan loop.

use crate::beacon::BeaconFamily;
use crate::calibration::Calibration;
use std::collections::BTreeSet;
use std::time::Duration;

/// Everything the scheduler needs, assembled once at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// How long each listen window stays open
    pub scan_window: Duration,
    /// Idle time between the end of one cycle and the next window
    pub sleep_interval: Duration,
    /// Close the window early once all of these have produced a reading
    pub expected: BTreeSet<BeaconFamily>,
    /// Topic segment used for RAPT Pill readings
    pub pill_name: String,
    pub calibration: Calibration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(75),
            sleep_interval: Duration::from_secs(300),
            expected: BTreeSet::new(),
            pill_name: "unknown".to_string(),
            calibration: Calibration::default(),
        }
    }
}

/// Parse a duration such as `75s`, `5m`, `500ms`, `1h` or a bare number of seconds.
///
/// # Examples
/// ```
/// use hydrometer_listener::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("75s").unwrap(), Duration::from_secs(75));
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s"
    let units: [(&str, fn(u64) -> Option<Duration>); 4] = [
        ("ms", |n| Some(Duration::from_millis(n))),
        ("h", |n| n.checked_mul(3600).map(Duration::from_secs)),
        ("m", |n| n.checked_mul(60).map(Duration::from_secs)),
        ("s", |n| Some(Duration::from_secs(n))),
    ];
    let (number, to_duration) = units
        .iter()
        .find_map(|(suffix, unit)| src.strip_suffix(suffix).map(|n| (n, *unit)))
        .unwrap_or((src, units[3].1));

    let n = number
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid duration: {src}"))?;
    to_duration(n).ok_or_else(|| format!("duration out of range: {src}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration(" 75s ").unwrap(), Duration::from_secs(75));
        assert_eq!(parse_duration("3 m").unwrap(), Duration::from_secs(180));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1.5m").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(parse_duration("5124095576030432h").is_err());
        assert!(parse_duration("307445734561825861m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_default_cadence() {
        let config = Config::default();
        assert_eq!(config.scan_window, Duration::from_secs(75));
        assert_eq!(config.sleep_interval, Duration::from_secs(300));
        assert_eq!(config.pill_name, "unknown");
    }
}
