//! Timestamp parsing and the interval grammar used for binning.
//!
//! Intervals are written as an integer followed by a unit: `min`, `h` or `d`
//! (for example `5min`, `1h`, `2d`). Merge tolerances additionally accept
//! seconds (`5s`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Errors from timestamp and duration parsing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeError {
    #[error("cannot parse '{0}' as a datetime")]
    InvalidTimestamp(String),

    #[error("invalid duration '{0}': expected <integer><unit>, unit one of {1}")]
    InvalidDuration(String, &'static str),

    #[error("duration must be positive: '{0}'")]
    NonPositive(String),

    #[error("duration '{0}' is too large")]
    OutOfRange(String),
}

/// Naive datetime layouts accepted by [`parse_timestamp`], tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Parse a timestamp cell.
///
/// Offsets (RFC 3339 / `Z` suffixes) are normalised to UTC and dropped;
/// everything downstream works on naive UTC time.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, TimeError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(TimeError::InvalidTimestamp(raw.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%z") {
        return Ok(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }

    Err(TimeError::InvalidTimestamp(raw.to_string()))
}

/// Seconds since the Unix epoch, with sub-second precision.
#[inline]
pub fn epoch_seconds(t: NaiveDateTime) -> f64 {
    t.and_utc().timestamp_millis() as f64 / 1000.0
}

/// Unit of a duration literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "s" | "sec" => Some(Self::Seconds),
            "min" | "t" => Some(Self::Minutes),
            "h" => Some(Self::Hours),
            "d" => Some(Self::Days),
            _ => None,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Seconds => "s",
            Self::Minutes => "min",
            Self::Hours => "h",
            Self::Days => "d",
        }
    }

    fn millis(self) -> i64 {
        match self {
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }

    /// `None` when `amount` does not fit a `Duration`.
    fn to_duration(self, amount: i64) -> Option<Duration> {
        match self {
            Self::Seconds => Duration::try_seconds(amount),
            Self::Minutes => Duration::try_minutes(amount),
            Self::Hours => Duration::try_hours(amount),
            Self::Days => Duration::try_days(amount),
        }
    }

    fn max_amount(self) -> i64 {
        i64::MAX / self.millis()
    }
}

fn split_literal(text: &str) -> Option<(i64, DurationUnit)> {
    let s = text.trim().to_ascii_lowercase();
    let digits_end = s.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let amount: i64 = s[..digits_end].parse().ok()?;
    let unit = DurationUnit::parse(s[digits_end..].trim())?;
    Some((amount, unit))
}

const INTERVAL_UNITS: &str = "min, h, d";

/// Fixed-width binning interval (`5min`, `1h`, `1d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    amount: i64,
    unit: DurationUnit,
}

impl Interval {
    /// Checked constructor: minutes, hours or days, a positive amount, and
    /// a width that fits a `Duration`.
    pub fn new(amount: i64, unit: DurationUnit) -> Result<Self, TimeError> {
        Self::checked(amount, unit, &format!("{}{}", amount, unit.suffix()))
    }

    fn checked(amount: i64, unit: DurationUnit, literal: &str) -> Result<Self, TimeError> {
        if unit == DurationUnit::Seconds {
            return Err(TimeError::InvalidDuration(literal.to_string(), INTERVAL_UNITS));
        }
        if amount <= 0 {
            return Err(TimeError::NonPositive(literal.to_string()));
        }
        if amount > unit.max_amount() || unit.to_duration(amount).is_none() {
            return Err(TimeError::OutOfRange(literal.to_string()));
        }
        Ok(Self { amount, unit })
    }

    /// Amounts outside the representable range are clamped; the smallest
    /// interval is one unit.
    fn clamped(amount: i64, unit: DurationUnit) -> Self {
        Self {
            amount: amount.clamp(1, unit.max_amount()),
            unit,
        }
    }

    pub fn minutes(amount: i64) -> Self {
        Self::clamped(amount, DurationUnit::Minutes)
    }

    pub fn hours(amount: i64) -> Self {
        Self::clamped(amount, DurationUnit::Hours)
    }

    pub fn days(amount: i64) -> Self {
        Self::clamped(amount, DurationUnit::Days)
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        // amount <= max_amount keeps the product in range
        Duration::milliseconds(self.amount * self.unit.millis())
    }

    /// Floor `t` onto the bin grid anchored at `origin`.
    ///
    /// Bins are left-closed: `t` equal to a bin edge belongs to the bin
    /// starting at that edge.
    pub fn floor(&self, origin: NaiveDateTime, t: NaiveDateTime) -> NaiveDateTime {
        let width = self.duration().num_milliseconds();
        let offset = (t - origin).num_milliseconds();
        let index = offset.div_euclid(width);
        index
            .checked_mul(width)
            .and_then(Duration::try_milliseconds)
            .and_then(|step| origin.checked_add_signed(step))
            .unwrap_or(origin)
    }

    /// Bin grid origin for a series: midnight of the earliest day.
    pub fn origin(timestamps: &[NaiveDateTime]) -> Option<NaiveDateTime> {
        timestamps
            .iter()
            .min()
            .and_then(|t| t.date().and_hms_opt(0, 0, 0))
    }
}

impl FromStr for Interval {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (amount, unit) = split_literal(s)
            .ok_or_else(|| TimeError::InvalidDuration(s.to_string(), INTERVAL_UNITS))?;
        Self::checked(amount, unit, s)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// Parse a general duration (`5s`, `10min`, `2h`, `1d`), used for merge
/// tolerances and time-based rolling windows. Zero is allowed.
pub fn parse_duration(text: &str) -> Result<Duration, TimeError> {
    let (amount, unit) = split_literal(text)
        .ok_or_else(|| TimeError::InvalidDuration(text.to_string(), "s, min, h, d"))?;
    if amount < 0 {
        return Err(TimeError::NonPositive(text.to_string()));
    }
    unit.to_duration(amount).ok_or_else(|| TimeError::OutOfRange(text.to_string()))
}

/// Hours elapsed since the earliest timestamp of a series.
pub(crate) fn elapsed_hours(timestamps: &[NaiveDateTime]) -> Vec<f64> {
    let Some(start) = timestamps.iter().min().map(|&t| epoch_seconds(t)) else {
        return Vec::new();
    };
    timestamps.iter().map(|&t| (epoch_seconds(t) - start) / 3600.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 10, 23)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2023-10-23 00:21:14").unwrap(), at(0, 21, 14));
        assert_eq!(parse_timestamp("2023-10-23T00:21:14").unwrap(), at(0, 21, 14));
        assert_eq!(parse_timestamp("2023-10-23T02:21:14+02:00").unwrap(), at(0, 21, 14));
        assert_eq!(parse_timestamp("2023-10-23").unwrap(), at(0, 0, 0));
        assert!(parse_timestamp("not a time").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_parse_timestamp_fractional_seconds() {
        let t = parse_timestamp("2023-10-23 00:21:14.250").unwrap();
        assert_eq!(t, at(0, 21, 14) + Duration::milliseconds(250));
    }

    #[test]
    fn test_interval_grammar() {
        assert_eq!("5min".parse::<Interval>().unwrap(), Interval::minutes(5));
        assert_eq!("1h".parse::<Interval>().unwrap(), Interval::hours(1));
        assert_eq!("2d".parse::<Interval>().unwrap(), Interval::days(2));
        assert_eq!("10MIN".parse::<Interval>().unwrap().to_string(), "10min");
        assert!("5s".parse::<Interval>().is_err());
        assert!("0min".parse::<Interval>().is_err());
        assert!("min".parse::<Interval>().is_err());
        assert!("five minutes".parse::<Interval>().is_err());
    }

    #[test]
    fn test_parse_duration_accepts_seconds() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::seconds(5));
        assert_eq!(parse_duration("0s").unwrap(), Duration::zero());
        assert_eq!(parse_duration("3h").unwrap(), Duration::hours(3));
        assert!(parse_duration("s5").is_err());
    }

    #[test]
    fn test_interval_floor_left_closed() {
        let interval = Interval::minutes(5);
        let origin = Interval::origin(&[at(0, 21, 14)]).unwrap();
        assert_eq!(origin, at(0, 0, 0));
        assert_eq!(interval.floor(origin, at(0, 21, 14)), at(0, 20, 0));
        assert_eq!(interval.floor(origin, at(0, 25, 0)), at(0, 25, 0));
        assert_eq!(interval.floor(origin, at(0, 24, 59)), at(0, 20, 0));
    }

    #[test]
    fn test_oversized_durations_are_errors() {
        assert_eq!(
            parse_duration("200000000000d").unwrap_err(),
            TimeError::OutOfRange("200000000000d".to_string())
        );
        assert!(matches!(
            "200000000000d".parse::<Interval>(),
            Err(TimeError::OutOfRange(_))
        ));
        assert!(parse_duration("9999999999999999999s").is_err());
        assert!("100000000d".parse::<Interval>().is_ok());
    }

    #[test]
    fn test_interval_constructors_stay_valid() {
        assert_eq!(Interval::minutes(0), Interval::minutes(1));
        assert_eq!(Interval::hours(-3).duration(), Duration::hours(1));
        assert!(Interval::days(i64::MAX).duration() > Duration::days(100_000_000));
        assert_eq!(
            Interval::new(0, DurationUnit::Minutes).unwrap_err(),
            TimeError::NonPositive("0min".to_string())
        );
        assert!(matches!(
            Interval::new(i64::MAX, DurationUnit::Hours),
            Err(TimeError::OutOfRange(_))
        ));
        assert_eq!(Interval::new(15, DurationUnit::Minutes).unwrap(), Interval::minutes(15));
        assert!(Interval::new(30, DurationUnit::Seconds).is_err());

        let origin = at(0, 0, 0);
        assert_eq!(Interval::minutes(0).floor(origin, at(0, 21, 14)), at(0, 21, 0));
        assert_eq!(Interval::days(i64::MAX).floor(origin, at(0, 21, 14)), origin);
    }

    #[test]
    fn test_elapsed_hours() {
        assert!(elapsed_hours(&[]).is_empty());
        let hours = elapsed_hours(&[at(1, 30, 0), at(1, 0, 0), at(3, 0, 0)]);
        assert_eq!(hours, vec![0.5, 0.0, 2.0]);
    }

    #[test]
    fn test_epoch_seconds() {
        let t = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 1, 500)
            .unwrap();
        assert!((epoch_seconds(t) - 1.5).abs() < 1e-9);
    }
}
