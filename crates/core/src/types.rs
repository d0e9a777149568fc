/// Project identifiers are opaque strings assigned by the external store.
pub type ProjectId = String;

/// Node identifiers are opaque strings, unique within their project.
pub type NodeId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
