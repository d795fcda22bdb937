//! Provides formatting and parsing helpers for durations.
use std::fmt::Write;
use std::time::Duration;

/// Formats a duration given in microseconds.
///
/// This function determines the ideal unit (ranging from microseconds to seconds) to provide
/// a concise representation.
///
/// # Examples
///
/// ```
/// # use callisto::fmt::format_micros;
/// let mut result = String::new();
/// format_micros(8_192, &mut result).unwrap();
/// assert_eq!(result, "8.19 ms");
/// ```
pub fn format_micros(micros: u64, f: &mut dyn Write) -> std::fmt::Result {
    let (value, unit) = if micros < 1_000 {
        return write!(f, "{} us", micros);
    } else if micros < 1_000_000 {
        (micros as f64 / 1_000., "ms")
    } else {
        (micros as f64 / 1_000_000., "s")
    };

    if value < 10. {
        write!(f, "{:.2} {}", value, unit)
    } else if value < 100. {
        write!(f, "{:.1} {}", value, unit)
    } else {
        write!(f, "{} {}", value as u64, unit)
    }
}

/// Formats a duration given in microseconds and returns a String representation.
///
/// # Examples
///
/// ```
/// assert_eq!(callisto::fmt::format_short_duration(100), "100 us");
/// assert_eq!(callisto::fmt::format_short_duration(8_192), "8.19 ms");
/// assert_eq!(callisto::fmt::format_short_duration(32_768), "32.8 ms");
/// assert_eq!(callisto::fmt::format_short_duration(128_123), "128 ms");
/// assert_eq!(callisto::fmt::format_short_duration(1_128_123), "1.13 s");
/// assert_eq!(callisto::fmt::format_short_duration(10_128_123), "10.1 s");
/// assert_eq!(callisto::fmt::format_short_duration(101_000_000), "101 s");
/// ```
pub fn format_short_duration(duration_in_micros: u64) -> String {
    let mut result = String::new();
    let _ = format_micros(duration_in_micros, &mut result);
    result
}

/// Parses a duration from a given string.
///
/// This string can have the following suffixes:
/// * **ms** or **MS**: treats the value as milliseconds
/// * **s** or **S**: treats the value as seconds
/// * **m** or **M**: treats the value as minutes
/// * **h** or **H**: treats the value as hours
/// * **d** or **D**: treats the value as days
///
/// A value without suffix is treated as milliseconds. Returns an **Err** if either a non-integer
/// value or an unknown suffix is given.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(callisto::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(callisto::fmt::parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(callisto::fmt::parse_duration("12 s").unwrap(), Duration::from_secs(12));
/// assert_eq!(callisto::fmt::parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(callisto::fmt::parse_duration("2 H").unwrap(), Duration::from_secs(2 * 60 * 60));
/// assert_eq!(callisto::fmt::parse_duration("5 d").unwrap(), Duration::from_secs(5 * 24 * 60 * 60));
///
/// // An invalid suffix results in an error...
/// assert_eq!(callisto::fmt::parse_duration("3 Y").is_err(), true);
///
/// // Decimal numbers result in an error...
/// assert_eq!(callisto::fmt::parse_duration("1.2s").is_err(), true);
///
/// // Negative numbers result in an error...
/// assert_eq!(callisto::fmt::parse_duration("-1m").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *(ms|s|m|h|d|MS|S|M|H|D)? *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration expression. \
             Expected a positive number and optionally 'ms', 's', 'm', 'h' or 'd' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<u64>()?;
    let seconds_per_unit = match captures.get(2).map(|unit| unit.as_str()) {
        Some("s") | Some("S") => 1,
        Some("m") | Some("M") => 60,
        Some("h") | Some("H") => 60 * 60,
        Some("d") | Some("D") => 60 * 60 * 24,
        _ => return Ok(Duration::from_millis(number)),
    };

    number
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("The duration '{}' is too large.", str.as_ref()))
}

/// Formats a duration into a string like "5d 3h 17m 2s 12ms".
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(callisto::fmt::format_duration(Duration::from_millis(0)), "0ms");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_secs(60 * 61)), "1h 1m");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_secs(24 * 60 * 60 + 59)), "1d 59s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u128, &str); 5] = [
        (1000 * 60 * 60 * 24, "d"),
        (1000 * 60 * 60, "h"),
        (1000 * 60, "m"),
        (1000, "s"),
        (1, "ms"),
    ];

    let mut result = String::new();
    let mut value = duration.as_millis();
    for (millis_per_unit, unit) in UNITS {
        let amount = value / millis_per_unit;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            value %= millis_per_unit;
        }
    }

    if result.is_empty() {
        result.push_str("0ms");
    }

    result
}
