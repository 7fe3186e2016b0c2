pub mod claims;
pub mod error;
pub mod models;
pub mod rate_limit;

pub use error::{Error, Result};

/// All entities are addressed by a sortable 128-bit id.
pub type Id = ulid::Ulid;

/// A monotonic UTC instant at second precision, as required by the data model.
pub type Instant = chrono::DateTime<chrono::Utc>;

/// Truncates a [`chrono::DateTime`] to second precision, as the data model requires.
pub fn now() -> Instant {
    let now = chrono::Utc::now();
    now - chrono::Duration::nanoseconds(now.timestamp_subsec_nanos() as i64)
}
