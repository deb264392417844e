use std::time::Duration;

use chrono::{DateTime, Utc};
use pastebin_lite_common::TestNow;

pub const FIVE_SECONDS: Duration = Duration::from_secs(5);
pub const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);

/// The instant a request is evaluated at. Test mode lets callers pin it with
/// the `x-test-now-ms` header; otherwise the header is ignored.
pub fn request_time(test_mode: bool, header: Option<TestNow>) -> DateTime<Utc> {
    match header {
        Some(TestNow(now)) if test_mode => now,
        _ => Utc::now(),
    }
}
