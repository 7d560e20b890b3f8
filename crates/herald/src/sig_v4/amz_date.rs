//! `X-Amz-Date` parsing and formatting.

use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

const COMPACT: &[FormatItem<'_>] = format_description!("[year][month][day]T[hour][minute][second]Z");
const DATE_STAMP: &[FormatItem<'_>] = format_description!("[year][month][day]");

/// A SigV4 timestamp.
///
/// Accepts both the compact ISO 8601 form (`20130524T000000Z`) and the
/// dotted RFC 3339 form (`2013-05-24T00:00:00Z`) some clients emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmzDate(OffsetDateTime);

#[derive(Debug, thiserror::Error)]
#[error("invalid amz date")]
pub struct ParseAmzDateError {
    _priv: (),
}

impl AmzDate {
    pub fn parse(s: &str) -> Result<Self, ParseAmzDateError> {
        let err = || ParseAmzDateError { _priv: () };
        if s.contains('-') {
            let dt = OffsetDateTime::parse(s, &Rfc3339).map_err(|_| err())?;
            return Ok(Self(dt));
        }
        let dt = PrimitiveDateTime::parse(s, COMPACT).map_err(|_| err())?;
        Ok(Self(dt.assume_utc()))
    }

    #[must_use]
    pub fn now() -> Self {
        // SigV4 works at second precision
        Self(OffsetDateTime::now_utc().replace_nanosecond(0).unwrap_or_else(|_| OffsetDateTime::now_utc()))
    }

    /// `yyyymmdd`, the credential-scope date stamp.
    #[must_use]
    pub fn fmt_date(&self) -> String {
        self.0.format(DATE_STAMP).expect("date stamp format")
    }

    /// `yyyymmddThhmmssZ`.
    #[must_use]
    pub fn fmt_iso8601(&self) -> String {
        self.0.format(COMPACT).expect("iso8601 compact format")
    }

    #[must_use]
    pub fn to_time(&self) -> OffsetDateTime {
        self.0
    }
}

impl From<OffsetDateTime> for AmzDate {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_forms() {
        let compact = AmzDate::parse("20130524T000000Z").unwrap();
        let dotted = AmzDate::parse("2013-05-24T00:00:00Z").unwrap();
        assert_eq!(compact, dotted);
        assert_eq!(compact.fmt_date(), "20130524");
        assert_eq!(compact.fmt_iso8601(), "20130524T000000Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(AmzDate::parse("yesterday").is_err());
        assert!(AmzDate::parse("2013-05-24").is_err());
    }
}
