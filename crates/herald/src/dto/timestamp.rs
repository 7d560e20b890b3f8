//! timestamp

use std::io;
use std::time::SystemTime;

use time::format_description::FormatItem;
use time::macros::format_description;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(time::OffsetDateTime);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// RFC 3339 with millisecond precision and `Z` suffix, the S3 XML form.
    DateTime,
    /// RFC 1123 (`Last-Modified` and friends).
    HttpDate,
    /// Swift JSON listing form: ISO 8601 with microseconds and no zone,
    /// e.g. `2014-01-15T16:41:49.390270`. Always UTC.
    SwiftDateTime,
}

impl From<time::OffsetDateTime> for Timestamp {
    fn from(value: time::OffsetDateTime) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for time::OffsetDateTime {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl From<SystemTime> for Timestamp {
    fn from(value: SystemTime) -> Self {
        Self(time::OffsetDateTime::from(value))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseTimestampError {
    #[error("time: {0}")]
    Time(#[from] time::error::Parse),
}

#[derive(Debug, thiserror::Error)]
pub enum FormatTimestampError {
    #[error("time: {0}")]
    Time(#[from] time::error::Format),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// See <https://github.com/time-rs/time/issues/498>
const RFC1123: &[FormatItem<'_>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

/// See <https://github.com/minio/minio-java/issues/1419>
const RFC3339_MS: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

const SWIFT_ISO: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self(time::OffsetDateTime::now_utc())
    }

    /// Parses `Timestamp` from string
    pub fn parse(format: TimestampFormat, s: &str) -> Result<Self, ParseTimestampError> {
        let ans = match format {
            TimestampFormat::DateTime => {
                time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)?
            }
            TimestampFormat::HttpDate => time::PrimitiveDateTime::parse(s, RFC1123)?.assume_utc(),
            TimestampFormat::SwiftDateTime => time::PrimitiveDateTime::parse(s, SWIFT_ISO)?.assume_utc(),
        };
        Ok(Self(ans))
    }

    /// Formats `Timestamp` into a writer
    pub fn format(&self, format: TimestampFormat, w: &mut impl io::Write) -> Result<(), FormatTimestampError> {
        match format {
            TimestampFormat::DateTime => self.0.format_into(w, RFC3339_MS)?,
            TimestampFormat::HttpDate => self.0.format_into(w, RFC1123)?,
            TimestampFormat::SwiftDateTime => self.0.format_into(w, SWIFT_ISO)?,
        };
        Ok(())
    }

    /// Formats into an owned string.
    #[must_use]
    pub fn to_string_format(&self, format: TimestampFormat) -> String {
        let mut buf = Vec::new();
        // formatting into a Vec cannot fail on io
        self.format(format, &mut buf).expect("timestamp format");
        String::from_utf8(buf).expect("timestamp is ascii")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_repr() {
        let cases = [
            (TimestampFormat::DateTime, "1985-04-12T23:20:50.520Z"),
            (TimestampFormat::HttpDate, "Tue, 29 Apr 2014 18:30:38 GMT"),
            (TimestampFormat::HttpDate, "Wed, 21 Oct 2015 07:28:00 GMT"),
            (TimestampFormat::SwiftDateTime, "2014-01-15T16:41:49.390270"),
        ];

        for (fmt, expected) in cases {
            let time = Timestamp::parse(fmt, expected).unwrap();
            assert_eq!(time.to_string_format(fmt), expected);
        }
    }

    #[test]
    fn cross_format() {
        let ts = Timestamp::parse(TimestampFormat::SwiftDateTime, "2014-01-15T16:41:49.390270").unwrap();
        assert_eq!(ts.to_string_format(TimestampFormat::DateTime), "2014-01-15T16:41:49.390Z");
        assert_eq!(ts.to_string_format(TimestampFormat::HttpDate), "Wed, 15 Jan 2014 16:41:49 GMT");
    }
}
