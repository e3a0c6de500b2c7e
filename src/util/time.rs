//! Time helpers shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_msec() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("clock before Unix epoch")
		.as_millis() as u64
}

/// Render a millisecond Unix timestamp as RFC 3339, for human-readable
/// dumps such as `metaSave`.
pub fn msec_to_rfc3339(msec: u64) -> String {
	let secs = (msec / 1000) as i64;
	let nsec = ((msec % 1000) * 1_000_000) as u32;
	match chrono::DateTime::from_timestamp(secs, nsec) {
		Some(dt) => dt.to_rfc3339(),
		None => "invalid-timestamp".into(),
	}
}
