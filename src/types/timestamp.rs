//! Timestamp encoding shared by storage and audit hashing.
//!
//! RFC 3339, UTC, fixed microsecond precision: strings sort lexically in
//! time order and survive a database round trip unchanged.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn encode(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_lossless_at_micros() {
        let t = now();
        assert_eq!(decode(&encode(&t)).unwrap(), t);
        assert!(encode(&t).ends_with('Z'));
    }
}
