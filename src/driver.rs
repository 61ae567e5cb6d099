//! Browser driver capability consumed by the validator and the manager.
//!
//! The concrete automation backend lives outside this crate and implements
//! [`BrowserDriver`]. The trait covers page navigation plus cookie and storage
//! access; visibility checks are bounded by a caller-supplied timeout.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page-load condition a navigation or reload waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// The `load` event fired.
    Load,
    /// The `DOMContentLoaded` event fired.
    DomContentLoaded,
    /// No network activity for a short quiet period.
    #[default]
    NetworkIdle,
}

impl WaitPolicy {
    /// Returns the stable label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle => "networkidle",
        }
    }
}

/// A single browser cookie, kept opaque.
///
/// Records are captured from the driver and handed back to it verbatim; this
/// layer only peeks at `name` and `domain` for logging. The `value` field is
/// redacted in Debug output to prevent accidental logging of session secrets.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieRecord(serde_json::Value);

impl CookieRecord {
    /// Wraps a raw cookie object as produced by the driver.
    #[must_use]
    pub fn new(raw: serde_json::Value) -> Self {
        Self(raw)
    }

    /// Cookie name, when the record carries one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(serde_json::Value::as_str)
    }

    /// Cookie domain, when the record carries one.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.0.get("domain").and_then(serde_json::Value::as_str)
    }

    /// Borrows the raw record.
    #[must_use]
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieRecord")
            .field("name", &self.name())
            .field("domain", &self.domain())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Client-side key/value storage of one page origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageState {
    /// `localStorage` entries.
    pub local: BTreeMap<String, String>,
    /// `sessionStorage` entries.
    pub session: BTreeMap<String, String>,
}

impl StorageState {
    /// Returns true when both maps are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.session.is_empty()
    }
}

/// Errors reported by a [`BrowserDriver`] implementation.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Navigation or reload did not reach the requested wait condition.
    #[error("navigation to {url} failed: {reason}")]
    Navigation {
        /// Target URL.
        url: String,
        /// Backend-provided reason.
        reason: String,
    },

    /// Operation exceeded its time budget.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: &'static str,
        /// Budget that was exceeded.
        after: Duration,
    },

    /// The browser context rejected a cookie or storage operation.
    #[error("browser context error: {0}")]
    Context(String),
}

/// Capability interface over a live browser page.
///
/// # Object Safety
///
/// This trait uses `async_trait` so the manager can hold `&dyn BrowserDriver`.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigates the page to `url`.
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), DriverError>;

    /// Returns every cookie of the browser context.
    async fn cookies(&self) -> Result<Vec<CookieRecord>, DriverError>;

    /// Adds cookies to the browser context.
    async fn add_cookies(&self, cookies: &[CookieRecord]) -> Result<(), DriverError>;

    /// Reads `localStorage` and `sessionStorage` of the current origin.
    async fn read_storage(&self) -> Result<StorageState, DriverError>;

    /// Clears both storages of the current origin, then writes `state`.
    async fn write_storage(&self, state: &StorageState) -> Result<(), DriverError>;

    /// Returns true if the first element matching `selector` becomes visible
    /// within `timeout`. Never fails: a timeout or a bad selector is `false`.
    async fn is_visible(&self, selector: &str, timeout: Duration) -> bool;

    /// Returns the URL the page currently shows.
    async fn current_url(&self) -> String;

    /// Reloads the current page.
    async fn reload(&self, wait: WaitPolicy) -> Result<(), DriverError>;
}
