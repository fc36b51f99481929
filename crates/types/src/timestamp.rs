//! Second-resolution timestamps used to name dated storage files.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Textual layout of a timestamp, also the suffix of every dated file.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Error returned when a string is not a valid `YYYYMMDD_HHMMSS` timestamp.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid timestamp '{value}': expected YYYYMMDD_HHMMSS")]
pub struct TimestampParseError {
    pub value: String,
}

/// Local wall-clock time truncated to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Current local time.
    pub fn now() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    /// Build a timestamp from a datetime, dropping sub-second precision.
    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self(datetime.with_nanosecond(0).unwrap_or(datetime))
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// The timestamp one second later.
    pub fn next_second(self) -> Self {
        Self(self.0 + Duration::seconds(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
            .map(Self::from_datetime)
            .map_err(|_| TimestampParseError { value: value.to_string() })
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Timestamp {
        let datetime = NaiveDate::from_ymd_opt(2020, 3, 14)
            .and_then(|date| date.and_hms_opt(9, 26, 53))
            .unwrap();
        Timestamp::from_datetime(datetime)
    }

    #[test]
    fn formats_with_file_suffix_layout() {
        assert_eq!(sample().to_string(), "20200314_092653");
    }

    #[test]
    fn parses_its_own_output() {
        let parsed: Timestamp = "20200314_092653".parse().unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn rejects_malformed_values() {
        let error = "2020-03-14".parse::<Timestamp>().unwrap_err();
        assert_eq!(error.value, "2020-03-14");
    }

    #[test]
    fn next_second_rolls_over_minutes() {
        let timestamp: Timestamp = "20200314_092659".parse().unwrap();
        assert_eq!(timestamp.next_second().to_string(), "20200314_092700");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, "\"20200314_092653\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }
}
