//! Session snapshot model and its on-disk shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::driver::{CookieRecord, StorageState};

/// Cookies plus client-side storage captured from one authenticated browser.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Browser cookies, forwarded verbatim to the driver on restore.
    pub cookies: Vec<CookieRecord>,
    /// `localStorage` and `sessionStorage` entries.
    pub storage: StorageState,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Creates a snapshot captured now.
    #[must_use]
    pub fn new(cookies: Vec<CookieRecord>, storage: StorageState) -> Self {
        Self::captured_at(cookies, storage, Utc::now())
    }

    /// Creates a snapshot with an explicit capture time.
    #[must_use]
    pub fn captured_at(
        cookies: Vec<CookieRecord>,
        storage: StorageState,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cookies,
            storage,
            captured_at,
        }
    }

    /// Age relative to `now`; a capture time in the future counts as zero.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        age_between(self.captured_at, now)
    }
}

pub(crate) fn age_between(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - captured_at).max(Duration::zero())
}

/// Storage half of a snapshot as written to `auth-state-<kind>.json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredSession {
    #[serde(default)]
    pub(crate) local_storage: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) session_storage: BTreeMap<String, String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub(crate) timestamp: DateTime<Utc>,
}

impl StoredSession {
    pub(crate) fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            local_storage: snapshot.storage.local.clone(),
            session_storage: snapshot.storage.session.clone(),
            timestamp: snapshot.captured_at,
        }
    }

    pub(crate) fn into_snapshot(self, cookies: Vec<CookieRecord>) -> SessionSnapshot {
        SessionSnapshot {
            cookies,
            storage: StorageState {
                local: self.local_storage,
                session: self.session_storage,
            },
            captured_at: self.timestamp,
        }
    }
}

/// Human-readable age ("just now", "5m ago", "3h ago", "2d ago").
///
/// Hours and days round half up, so 1h 30m shows as "2h ago".
#[must_use]
pub fn format_age(age: Duration) -> String {
    let minutes = age.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{hours}h ago")
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{days}d ago")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_stored_session_uses_epoch_millis_and_camel_case() {
        let captured_at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let mut storage = StorageState::default();
        storage.local.insert("token".into(), "abc".into());
        let snapshot = SessionSnapshot::captured_at(Vec::new(), storage, captured_at);

        let value = serde_json::to_value(StoredSession::from_snapshot(&snapshot)).unwrap();
        assert_eq!(
            value,
            json!({
                "localStorage": {"token": "abc"},
                "sessionStorage": {},
                "timestamp": 1_700_000_000_123_i64,
            })
        );
    }

    #[test]
    fn test_stored_session_tolerates_missing_storage_maps() {
        let stored: StoredSession = serde_json::from_str(r#"{"timestamp": 0}"#).unwrap();
        let snapshot = stored.into_snapshot(Vec::new());
        assert!(snapshot.storage.is_empty());
        assert_eq!(snapshot.captured_at.timestamp_millis(), 0);
    }

    #[test]
    fn test_age_in_future_is_zero() {
        let now = Utc::now();
        let snapshot = SessionSnapshot::captured_at(
            Vec::new(),
            StorageState::default(),
            now + Duration::hours(1),
        );
        assert_eq!(snapshot.age_at(now), Duration::zero());
    }

    #[test]
    fn test_format_age_buckets() {
        assert_eq!(format_age(Duration::seconds(20)), "just now");
        assert_eq!(format_age(Duration::minutes(5)), "5m ago");
        assert_eq!(format_age(Duration::minutes(70)), "1h ago");
        assert_eq!(format_age(Duration::minutes(90)), "2h ago");
        assert_eq!(format_age(Duration::hours(25)), "1d ago");
        assert_eq!(format_age(Duration::hours(36)), "2d ago");
    }
}
