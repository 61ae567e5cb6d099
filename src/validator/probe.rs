//! Ordered "first visible wins" probing.

use std::time::Duration;

use tracing::trace;

use crate::driver::BrowserDriver;

/// Extra time a driver gets beyond a probe's own timeout before the probe is
/// abandoned.
pub const PROBE_GRACE: Duration = Duration::from_millis(250);

/// One selector and its visibility budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Element selector.
    pub selector: String,
    /// Visibility budget.
    pub timeout: Duration,
}

impl Probe {
    /// Creates a probe.
    #[must_use]
    pub fn new(selector: impl Into<String>, timeout: Duration) -> Self {
        Self {
            selector: selector.into(),
            timeout,
        }
    }

    /// Builds an ordered probe list sharing one timeout.
    #[must_use]
    pub fn list<I, S>(selectors: I, timeout: Duration) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        selectors
            .into_iter()
            .map(|selector| Self::new(selector, timeout))
            .collect()
    }
}

/// Runs `probes` in order and returns the first whose element is visible.
///
/// Probes are sequential, never raced. A driver that does not answer within
/// `timeout + PROBE_GRACE` counts as "not visible".
pub async fn first_visible<'a>(driver: &dyn BrowserDriver, probes: &'a [Probe]) -> Option<&'a Probe> {
    for probe in probes {
        let visible = tokio::time::timeout(
            probe.timeout + PROBE_GRACE,
            driver.is_visible(&probe.selector, probe.timeout),
        )
        .await
        .unwrap_or(false);

        trace!(selector = %probe.selector, visible, "probe");
        if visible {
            return Some(probe);
        }
    }
    None
}
