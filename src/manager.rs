//! Authentication orchestration.
//!
//! [`AuthCacheManager::handle_authentication`] walks a small state machine:
//!
//! ```text
//! Start ─┬─> FreshRequired ───────────────────────────┐
//!        └─> TryRestore ─┬─> Restored                 │
//!                        └─> ProbeLive ─┬─> AlreadyAuthenticated
//!                                       └─> NeedsFresh ┴─> FreshOk | FreshFailed | NoCallback
//! ```
//!
//! Every internal failure (missing files, stale snapshots, driver errors,
//! failed saves) is absorbed and logged where it is detected; only the final
//! [`AuthOutcome`] reaches the caller. Nothing is retried.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::AuthCacheConfig;
use crate::driver::{BrowserDriver, DriverError, WaitPolicy};
use crate::freshness::{FreshnessDecision, FreshnessPolicy};
use crate::site::{SiteKind, SiteProfile, SiteResolver};
use crate::store::{AuthInfo, AuthStateStore, ClearReport, LoadOutcome, SessionSnapshot};
use crate::validator::AuthValidator;

/// Target accepted by [`AuthCacheManager::clear`] that clears every known site.
pub const CLEAR_ALL: &str = "all";

/// Error raised by a caller-supplied fresh login flow.
#[derive(Debug, Error)]
pub enum FreshAuthError {
    /// The flow reached a state it could not recover from.
    #[error("fresh authentication failed: {0}")]
    Flow(String),

    /// A browser operation inside the flow failed.
    #[error("browser error during fresh authentication: {0}")]
    Driver(#[from] DriverError),
}

impl FreshAuthError {
    /// Creates a [`FreshAuthError::Flow`] from any message.
    #[must_use]
    pub fn flow(message: impl Into<String>) -> Self {
        Self::Flow(message.into())
    }
}

/// A full login flow (email entry, OTP, and so on) run when cached auth
/// cannot be used.
#[async_trait]
pub trait FreshAuthFlow: Send + Sync {
    /// Logs the browser in.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser is not signed in when the flow ends.
    async fn authenticate(&self, driver: &dyn BrowserDriver) -> Result<(), FreshAuthError>;
}

/// States visited by [`AuthCacheManager::handle_authentication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthState {
    /// Site resolved; policy not yet evaluated.
    Start,
    /// Policy vetoed reuse.
    FreshRequired,
    /// Attempting to restore a saved snapshot.
    TryRestore,
    /// Saved snapshot restored and confirmed. Terminal.
    Restored,
    /// Checking whether the live browser is already signed in.
    ProbeLive,
    /// Live browser was signed in. Terminal.
    AlreadyAuthenticated,
    /// Cached and live auth both unusable.
    NeedsFresh,
    /// Fresh flow succeeded. Terminal.
    FreshOk,
    /// Fresh flow returned an error. Terminal.
    FreshFailed,
    /// Fresh auth needed but no flow supplied. Terminal.
    NoCallback,
}

impl AuthState {
    /// Returns the outcome reason for terminal states.
    #[must_use]
    pub fn terminal_reason(self) -> Option<OutcomeReason> {
        match self {
            Self::Restored => Some(OutcomeReason::Restored),
            Self::AlreadyAuthenticated => Some(OutcomeReason::AlreadyAuthenticated),
            Self::FreshOk => Some(OutcomeReason::FreshAuthPerformed),
            Self::FreshFailed => Some(OutcomeReason::FreshAuthFailed),
            Self::NoCallback => Some(OutcomeReason::NoCallback),
            Self::Start
            | Self::FreshRequired
            | Self::TryRestore
            | Self::ProbeLive
            | Self::NeedsFresh => None,
        }
    }
}

/// Why an authentication call ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeReason {
    /// A saved snapshot was restored and confirmed.
    Restored,
    /// The browser was already signed in.
    AlreadyAuthenticated,
    /// The fresh flow ran and succeeded.
    FreshAuthPerformed,
    /// The fresh flow ran and failed.
    FreshAuthFailed,
    /// Fresh auth was needed but no flow was supplied.
    NoCallback,
}

impl OutcomeReason {
    /// Returns the stable reason code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restored => "restored",
            Self::AlreadyAuthenticated => "already-authenticated",
            Self::FreshAuthPerformed => "fresh-auth-performed",
            Self::FreshAuthFailed => "fresh-auth-failed",
            Self::NoCallback => "no-callback",
        }
    }

    /// Returns true for reasons that leave the browser signed in.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::Restored | Self::AlreadyAuthenticated | Self::FreshAuthPerformed
        )
    }
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`AuthOutcome::into_result`].
#[derive(Debug, Error)]
#[error("authentication failed for site '{site}': {reason}")]
pub struct AuthError {
    /// Site the call resolved to.
    pub site: SiteKind,
    /// Failure reason.
    pub reason: OutcomeReason,
}

/// Result of one [`AuthCacheManager::handle_authentication`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Whether the browser ended signed in.
    pub success: bool,
    /// Why.
    pub reason: OutcomeReason,
    /// Site kind the identifier resolved to.
    pub site: SiteKind,
    /// States visited, in order, starting with [`AuthState::Start`].
    pub trace: Vec<AuthState>,
}

impl AuthOutcome {
    /// Converts a failed outcome into an error so tests can abort with `?`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when `success` is false.
    pub fn into_result(self) -> Result<Self, AuthError> {
        if self.success {
            Ok(self)
        } else {
            Err(AuthError {
                site: self.site,
                reason: self.reason,
            })
        }
    }
}

/// Decides per test whether cached auth is reused and drives the fallback.
#[derive(Debug)]
pub struct AuthCacheManager {
    config: AuthCacheConfig,
    resolver: SiteResolver,
    policy: FreshnessPolicy,
    store: AuthStateStore,
    validator: AuthValidator,
}

impl AuthCacheManager {
    /// Builds a manager and its components from configuration.
    #[must_use]
    pub fn from_config(config: AuthCacheConfig) -> Self {
        let resolver = SiteResolver::from_config(&config);
        let policy = FreshnessPolicy::from_config(&config);
        let store = AuthStateStore::new(config.max_age()).with_lock_timeout(config.lock_timeout());
        let validator = AuthValidator::from_config(&config);
        Self {
            config,
            resolver,
            policy,
            store,
            validator,
        }
    }

    /// Returns the configuration in effect.
    #[must_use]
    pub fn config(&self) -> &AuthCacheConfig {
        &self.config
    }

    /// Returns the snapshot store.
    #[must_use]
    pub fn store(&self) -> &AuthStateStore {
        &self.store
    }

    /// Resolves a test identifier to its site profile.
    #[must_use]
    pub fn resolve_site(&self, test_identifier: &str) -> SiteProfile {
        self.resolver.resolve(test_identifier)
    }

    /// Profiles of every registered site, in priority order.
    #[must_use]
    pub fn known_sites(&self) -> Vec<SiteProfile> {
        self.resolver.known_profiles()
    }

    /// Explains whether `test_identifier` must authenticate fresh.
    #[must_use]
    pub fn freshness(&self, test_identifier: &str) -> FreshnessDecision {
        self.policy.decide(test_identifier, self.config.force_fresh)
    }

    /// Reports the cached-auth status of the site `test_identifier` resolves to.
    #[must_use]
    pub fn auth_info(&self, test_identifier: &str) -> AuthInfo {
        self.store.info(&self.resolve_site(test_identifier))
    }

    /// Deletes cached auth for one site, or for every known site when
    /// `target` is [`CLEAR_ALL`].
    pub fn clear(&self, target: &str) -> ClearReport {
        if target.eq_ignore_ascii_case(CLEAR_ALL) {
            info!("clearing cached auth for all sites");
            self.store.clear_all(&self.known_sites())
        } else {
            let profile = self.resolve_site(target);
            info!(site = %profile.name, "clearing cached auth");
            self.store.clear(&profile)
        }
    }

    /// Ensures the browser is signed in to the site `test_identifier` targets.
    ///
    /// Tries, in order: a saved snapshot (unless policy forbids reuse), the
    /// live browser session, then `fresh_auth`. The returned outcome carries
    /// the visited states.
    #[instrument(level = "debug", skip(self, driver, fresh_auth))]
    pub async fn handle_authentication(
        &self,
        driver: &dyn BrowserDriver,
        test_identifier: &str,
        fresh_auth: Option<&dyn FreshAuthFlow>,
    ) -> AuthOutcome {
        let profile = self.resolve_site(test_identifier);
        info!(test = test_identifier, site = %profile.name, "handling authentication");

        let mut state = AuthState::Start;
        let mut trace = vec![state];

        let reason = loop {
            if let Some(reason) = state.terminal_reason() {
                break reason;
            }

            state = match state {
                AuthState::Start => {
                    let decision = self.freshness(test_identifier);
                    if decision.requires_fresh() {
                        info!(site = %profile.name, %decision, "fresh authentication required");
                        AuthState::FreshRequired
                    } else {
                        AuthState::TryRestore
                    }
                }
                AuthState::TryRestore => {
                    if self.try_restore(driver, &profile).await {
                        AuthState::Restored
                    } else {
                        AuthState::ProbeLive
                    }
                }
                AuthState::ProbeLive => {
                    if self.probe_live(driver, &profile).await {
                        AuthState::AlreadyAuthenticated
                    } else {
                        AuthState::NeedsFresh
                    }
                }
                AuthState::FreshRequired | AuthState::NeedsFresh => {
                    self.run_fresh(driver, &profile, fresh_auth).await
                }
                terminal => terminal,
            };
            trace.push(state);
        };

        info!(site = %profile.name, reason = reason.as_str(), "authentication finished");
        AuthOutcome {
            success: reason.is_success(),
            reason,
            site: profile.kind,
            trace,
        }
    }

    async fn try_restore(&self, driver: &dyn BrowserDriver, profile: &SiteProfile) -> bool {
        if !self.store.exists(profile) {
            info!(site = %profile.name, "no saved auth state");
            return false;
        }

        match self.store.load(profile) {
            LoadOutcome::Loaded { snapshot, format } => {
                debug!(site = %profile.name, ?format, cookies = snapshot.cookies.len(), "restoring snapshot");
                match self.restore(driver, profile, &snapshot).await {
                    Ok(restored) => restored,
                    Err(e) => {
                        warn!(site = %profile.name, error = %e, "restore failed");
                        false
                    }
                }
            }
            LoadOutcome::Stale { age, .. } => {
                info!(
                    site = %profile.name,
                    age_hours = age.num_hours(),
                    "saved auth state expired"
                );
                false
            }
            LoadOutcome::Unreadable { reason } => {
                warn!(site = %profile.name, reason = %reason, "saved auth state unreadable");
                false
            }
            LoadOutcome::NotFound => false,
        }
    }

    async fn restore(
        &self,
        driver: &dyn BrowserDriver,
        profile: &SiteProfile,
        snapshot: &SessionSnapshot,
    ) -> Result<bool, DriverError> {
        driver.add_cookies(&snapshot.cookies).await?;
        driver.navigate(&profile.base_url, WaitPolicy::NetworkIdle).await?;
        driver.write_storage(&snapshot.storage).await?;
        driver.reload(WaitPolicy::NetworkIdle).await?;

        let current_url = driver.current_url().await;
        if !profile.url_guard.accepts(&current_url) {
            warn!(site = %profile.name, url = %current_url, "restored session landed on wrong site");
            return Ok(false);
        }

        let detection = self.validator.confirm(driver, profile).await;
        if detection.is_authenticated() {
            info!(site = %profile.name, "authentication restored");
        }
        Ok(detection.is_authenticated())
    }

    async fn probe_live(&self, driver: &dyn BrowserDriver, profile: &SiteProfile) -> bool {
        if let Err(e) = driver.navigate(&profile.base_url, WaitPolicy::NetworkIdle).await {
            warn!(site = %profile.name, error = %e, "live probe navigation failed");
            return false;
        }

        if !self.validator.confirm(driver, profile).await.is_authenticated() {
            return false;
        }

        info!(site = %profile.name, "browser already authenticated; caching live session");
        self.capture(driver, profile).await;
        true
    }

    async fn run_fresh(
        &self,
        driver: &dyn BrowserDriver,
        profile: &SiteProfile,
        fresh_auth: Option<&dyn FreshAuthFlow>,
    ) -> AuthState {
        let Some(flow) = fresh_auth else {
            warn!(site = %profile.name, "fresh authentication needed but no flow supplied");
            return AuthState::NoCallback;
        };

        match flow.authenticate(driver).await {
            Ok(()) => {
                self.capture(driver, profile).await;
                AuthState::FreshOk
            }
            Err(e) => {
                warn!(site = %profile.name, error = %e, "fresh authentication failed");
                AuthState::FreshFailed
            }
        }
    }

    /// Saves the browser's current cookies and storage. Failures are logged.
    async fn capture(&self, driver: &dyn BrowserDriver, profile: &SiteProfile) {
        let cookies = match driver.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(site = %profile.name, error = %e, "could not read cookies; auth not cached");
                return;
            }
        };
        let storage = match driver.read_storage().await {
            Ok(storage) => storage,
            Err(e) => {
                warn!(site = %profile.name, error = %e, "could not read storage; auth not cached");
                return;
            }
        };

        if !self.store.save(profile, &cookies, &storage) {
            warn!(site = %profile.name, "auth state not cached");
        }
    }
}
