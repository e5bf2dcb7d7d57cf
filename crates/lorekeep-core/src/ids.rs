//! Identifier helpers.
//!
//! Internal row ids are UUIDv7 (time-ordered, index friendly). Upload jobs
//! additionally carry an external id handed to clients:
//!
//! ```text
//! upload_<unix seconds>_<8 lowercase hex chars>
//! ```

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use uuid::Uuid;

const UPLOAD_JOB_PREFIX: &str = "upload_";

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Generate an external upload job id for a job created at `now`.
pub fn new_upload_job_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}{}_{:08x}", UPLOAD_JOB_PREFIX, now.timestamp(), suffix)
}

/// Recover the creation time embedded in an external upload job id.
///
/// Returns `None` for ids that do not follow the `upload_<ts>_<hex>` shape.
pub fn upload_job_timestamp(job_id: &str) -> Option<DateTime<Utc>> {
    let rest = job_id.strip_prefix(UPLOAD_JOB_PREFIX)?;
    let (secs, suffix) = rest.split_once('_')?;
    if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let secs: i64 = secs.parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}
