use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Absolute expiry of a token issued now and valid for `expires_in` seconds.
///
/// `None` when the instant is not representable.
pub fn expires_at(expires_in: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in).and_then(|lifetime| now().checked_add_signed(lifetime))
}

pub fn get_instant() -> Instant {
    Instant::now()
}
