/// Job and photo identifiers are UUID-v4 strings.
pub type Id = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
