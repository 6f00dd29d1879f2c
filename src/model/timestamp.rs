use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{invalid_request_body, ApiResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        let mut timestamp = Self { seconds, nanos };
        timestamp.normalize();
        timestamp
    }

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));
        Self {
            seconds: duration.as_secs() as i64,
            nanos: duration.subsec_nanos() as i32,
        }
    }

    pub fn parse_rfc3339(value: &str) -> ApiResult<Self> {
        let datetime = DateTime::parse_from_rfc3339(value)
            .map_err(|err| invalid_request_body(format!("Invalid timestamp: {err}")))?;
        let datetime_utc = datetime.with_timezone(&Utc);
        Ok(Self::new(
            datetime_utc.timestamp(),
            datetime_utc.timestamp_subsec_nanos() as i32,
        ))
    }

    fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds, self.nanos as u32)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("zero timestamp"))
    }

    /// RFC3339 with millisecond precision, the rendering used for
    /// `createTime`/`updateTime`/`readTime` metadata fields.
    pub fn to_rfc3339(self) -> String {
        self.to_datetime().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// RFC3339 with nanosecond precision, the rendering used inside typed
    /// `timestampValue` envelopes.
    pub fn to_rfc3339_nanos(self) -> String {
        self.to_datetime().to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn normalize(&mut self) {
        let extra_seconds = self.nanos.div_euclid(1_000_000_000);
        self.seconds += extra_seconds as i64;
        self.nanos = self.nanos.rem_euclid(1_000_000_000);
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.seconds.cmp(&other.seconds) {
            Ordering::Equal => self.nanos.cmp(&other.nanos),
            ordering => ordering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_nanoseconds() {
        let timestamp = Timestamp::new(1, 1_500_000_000);
        assert_eq!(timestamp.seconds, 2);
        assert_eq!(timestamp.nanos, 500_000_000);
    }

    #[test]
    fn ordering() {
        let earlier = Timestamp::new(1, 0);
        let later = Timestamp::new(2, 0);
        assert!(earlier < later);
    }

    #[test]
    fn parses_offset_timestamps_to_utc() {
        let timestamp = Timestamp::parse_rfc3339("2025-04-01T06:00:00-05:00").unwrap();
        assert_eq!(timestamp, Timestamp::parse_rfc3339("2025-04-01T11:00:00Z").unwrap());
    }

    #[test]
    fn renders_millisecond_metadata() {
        let timestamp = Timestamp::parse_rfc3339("2025-06-18T12:00:00Z").unwrap();
        assert_eq!(timestamp.to_rfc3339(), "2025-06-18T12:00:00.000Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Timestamp::parse_rfc3339("not a date").is_err());
    }
}
