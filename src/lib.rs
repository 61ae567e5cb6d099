//! AuthCache core library
//!
//! Decides, per browser test and per target site, whether a previously
//! captured login session can be reused instead of running a full login flow,
//! and falls back safely when it cannot.
//!
//! # Architecture
//!
//! - [`site`] - test identifier to site profile resolution
//! - [`freshness`] - when cached auth must be bypassed
//! - [`store`] - on-disk session snapshots
//! - [`validator`] - DOM probing for login state
//! - [`manager`] - orchestration; the entry point for test code
//! - [`driver`] - browser capability trait consumed by the above
//! - [`config`] - layered configuration
//! - [`identity`] - unique test addresses and run stamps

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod driver;
pub mod freshness;
pub mod identity;
pub mod manager;
pub mod site;
pub mod store;
pub mod validator;

// Re-export commonly used types
pub use config::{AuthCacheConfig, ConfigError, LoadedConfig, SiteConfig};
pub use driver::{BrowserDriver, CookieRecord, DriverError, StorageState, WaitPolicy};
pub use freshness::{FreshnessDecision, FreshnessPolicy};
pub use identity::{EmailSequence, random_run_id, run_timestamp};
pub use manager::{
    AuthCacheManager, AuthError, AuthOutcome, AuthState, CLEAR_ALL, FreshAuthError, FreshAuthFlow,
    OutcomeReason,
};
pub use site::{DetectionRules, SiteKind, SiteProfile, SiteResolver, UrlGuard};
pub use store::{
    AuthInfo, AuthStateStore, ClearReport, LoadOutcome, SessionSnapshot, SnapshotFormat,
    SnapshotStatus, StoreError, format_age,
};
pub use validator::{AuthStatus, AuthValidator, Detection, DetectionSource, Probe, first_visible};
