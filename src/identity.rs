//! Test-identity helpers: sequential sign-up addresses and run stamps.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Default local-part prefix for generated addresses.
pub const DEFAULT_EMAIL_PREFIX: &str = "phoenix.newslettersNtkPapers_auto";

/// Default mail domain for generated addresses.
pub const DEFAULT_EMAIL_DOMAIN: &str = "pslqa.testinator.com";

/// Upper bound (exclusive) of the random run id.
const RUN_ID_RANGE: u32 = 10_000;

/// Sequential unique-address generator.
///
/// Each sequence owns its counter, so two suites running in one process do not
/// disturb each other. The counter starts at 1 and is incremented before each
/// address is produced; the first address therefore ends in `2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSequence {
    prefix: String,
    domain: String,
    counter: u64,
}

impl EmailSequence {
    /// Creates a sequence with the given prefix and domain.
    #[must_use]
    pub fn new(prefix: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            domain: domain.into(),
            counter: 1,
        }
    }

    /// Advances the counter and returns the next address.
    pub fn next_email(&mut self) -> String {
        self.counter += 1;
        format!("{}{}@{}", self.prefix, self.counter, self.domain)
    }

    /// Returns the current counter value.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.counter
    }

    /// Resets the counter to 1.
    pub fn reset(&mut self) {
        self.counter = 1;
        tracing::debug!(prefix = %self.prefix, "email sequence reset");
    }
}

impl Default for EmailSequence {
    fn default() -> Self {
        Self::new(DEFAULT_EMAIL_PREFIX, DEFAULT_EMAIL_DOMAIN)
    }
}

impl Iterator for EmailSequence {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        Some(self.next_email())
    }
}

/// Random id in `0..10000`, used to make one run's data distinct from others.
#[must_use]
pub fn random_run_id() -> u32 {
    rand::thread_rng().gen_range(0..RUN_ID_RANGE)
}

/// Formats `now` as a filename-safe stamp such as `2024-05-01T13-45-09`.
#[must_use]
pub fn run_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%S").to_string()
}
