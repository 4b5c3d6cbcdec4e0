use bytestring::ByteString;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp representation used across resource representations and
/// notification payloads.
pub type Timestamp = DateTime<Utc>;

/// Wire format for creation datetimes, second resolution UTC.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[inline]
pub fn now() -> Timestamp {
    Utc::now()
}

#[inline]
pub fn format_datetime(t: &Timestamp) -> String {
    t.format(DATETIME_FORMAT).to_string()
}

/// Generates a resource name: `{prefix}-{yyyymmddhhmmss}-{8 hex chars}`.
///
/// Pure, no persisted counter; the random suffix makes collisions
/// negligible, not impossible.
#[inline]
pub fn generate_name(prefix: &str) -> ByteString {
    let ts = Utc::now().format("%Y%m%d%H%M%S");
    let id = Uuid::new_v4().simple().to_string();
    ByteString::from(format!("{}-{}-{}", prefix, ts, &id[..8]))
}

/// Maps characters that are unsafe in file names to `_`.
#[inline]
pub fn sanitize_file_name(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Serde adapter for [`Timestamp`] fields in wire representations.
pub mod datetime_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    use super::DATETIME_FORMAT;

    pub fn serialize<S>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&t.format(DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(serde::de::Error::custom)?;
        Ok(naive.and_utc())
    }
}
