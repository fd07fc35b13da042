/// Primary correlation key for a generation job. Assigned by the
/// start-API, or defaulted to the owning conversation's id.
pub type ProjectId = String;

/// Secondary, finer-grained correlation key. Known only once the
/// start-API has responded.
pub type RequestId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
