use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::str::FromStr;

/// Wall-clock format the upstream expects: no zone suffix, no fraction.
pub const UPSTREAM_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Which wall clock zone-less upstream timestamps are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeConvention {
    /// Upstream's documented convention.
    #[default]
    Utc,
    /// The offset of the machine running the proxy.
    ServerLocal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown time convention {0:?}")]
pub struct UnknownTimeConvention(pub String);

impl FromStr for TimeConvention {
    type Err = UnknownTimeConvention;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "utc" | "z" => Ok(Self::Utc),
            "local" | "server-local" | "server_local" => Ok(Self::ServerLocal),
            other => Err(UnknownTimeConvention(other.to_string())),
        }
    }
}

impl TimeConvention {
    pub fn now(self) -> NaiveDateTime {
        match self {
            Self::Utc => Utc::now().naive_utc(),
            Self::ServerLocal => Local::now().naive_local(),
        }
    }

    /// Maps a caller timestamp onto this convention's wall clock. Zone-less
    /// input is assumed to already be in the convention and passes through.
    pub fn wall_clock(self, parsed: ParsedTimestamp) -> NaiveDateTime {
        match parsed {
            ParsedTimestamp::Naive(naive) => naive,
            ParsedTimestamp::Zoned(zoned) => match self {
                Self::Utc => zoned.naive_utc(),
                Self::ServerLocal => zoned.with_timezone(&Local).naive_local(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedTimestamp {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

pub fn parse_timestamp(raw: &str) -> Option<ParsedTimestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        return Some(ParsedTimestamp::Zoned(zoned));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ParsedTimestamp::Naive(naive));
        }
    }
    // A bare date means midnight UTC, not midnight on the caller's wall clock.
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| ParsedTimestamp::Zoned(midnight.and_utc().fixed_offset()))
}

/// Record timestamps: zoned values are normalised to UTC wall clock so that
/// mixed representations still compare correctly.
pub fn parse_record_time(raw: &str) -> Option<NaiveDateTime> {
    parse_timestamp(raw).map(|parsed| TimeConvention::Utc.wall_clock(parsed))
}

pub fn truncate_to_minute(value: NaiveDateTime) -> NaiveDateTime {
    value
        .with_second(0)
        .and_then(|value| value.with_nanosecond(0))
        .unwrap_or(value)
}

pub fn format_upstream(value: NaiveDateTime) -> String {
    value.format(UPSTREAM_FORMAT).to_string()
}

/// serde adapter rendering `NaiveDateTime` in the upstream wall-clock format.
pub mod upstream_format {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_upstream(*value))
    }
}
