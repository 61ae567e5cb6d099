//! DOM-based authentication detection.
//!
//! A visible login form is an authoritative negative: navigation elements that
//! look signed-in can appear briefly while the pre-login shell renders. Only
//! "no login indicator visible" plus "an authenticated indicator visible"
//! counts as signed in.
//!
//! Probes run one at a time in priority order and stop at the first visible
//! element. Each probe is bounded by its timeout; one that does not answer in
//! time is treated as not visible.

mod probe;

pub use probe::{PROBE_GRACE, Probe, first_visible};

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::AuthCacheConfig;
use crate::driver::BrowserDriver;
use crate::site::SiteProfile;

/// Generic login-form selectors used when a site has no rules.
pub const LEGACY_LOGIN_INDICATORS: [&str; 4] = [
    r#"input[type="email"]"#,
    r#"[placeholder*="email"], [placeholder*="Email"]"#,
    r#"button:has-text("Continue with email"), button:has-text("continue with email")"#,
    r#"text="Please provide your email to sign up""#,
];

/// Generic signed-in selectors used when a site has no rules.
pub const LEGACY_AUTHENTICATED_INDICATORS: [&str; 2] = [
    r#"button:has-text("All"), button:has-text("News"), button:has-text("Papers"), button:has-text("Digital"), button:has-text("Courses"), button:has-text("COVID-19")"#,
    r#".user-menu, .profile-menu, .dashboard, [data-testid*="user"]"#,
];

/// Authentication state read from the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStatus {
    /// No login form, and a signed-in element is visible.
    Authenticated,
    /// A login form is visible, or no signed-in element is.
    NotAuthenticated,
    /// The site has no rules; run the legacy probe.
    Unknown,
}

/// Which selector set produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    /// Site-specific rules.
    Rules,
    /// Generic legacy selectors.
    Legacy,
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Detected state.
    pub status: AuthStatus,
    /// Selector set used.
    pub source: DetectionSource,
    /// Selector that decided the result, if one matched.
    pub matched: Option<String>,
}

impl Detection {
    /// Returns true only for a positive detection.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }
}

/// Probes a live page for login and signed-in indicators.
#[derive(Debug, Clone)]
pub struct AuthValidator {
    probe_timeout: Duration,
    legacy_probe_timeout: Duration,
    settle_delay: Duration,
}

impl AuthValidator {
    /// Creates a validator with explicit budgets.
    #[must_use]
    pub fn new(probe_timeout: Duration, legacy_probe_timeout: Duration, settle_delay: Duration) -> Self {
        Self {
            probe_timeout,
            legacy_probe_timeout,
            settle_delay,
        }
    }

    /// Creates a validator from configuration.
    #[must_use]
    pub fn from_config(config: &AuthCacheConfig) -> Self {
        Self::new(
            config.probe_timeout(),
            config.legacy_probe_timeout(),
            config.settle_delay(),
        )
    }

    /// Detects state with the profile's rules; `Unknown` when it has none.
    pub async fn detect(&self, driver: &dyn BrowserDriver, profile: &SiteProfile) -> Detection {
        let Some(rules) = &profile.detection_rules else {
            debug!(site = %profile.kind, "no detection rules; legacy probe required");
            return Detection {
                status: AuthStatus::Unknown,
                source: DetectionSource::Rules,
                matched: None,
            };
        };

        let login = Probe::list(&rules.login_indicators, self.probe_timeout);
        let authenticated = Probe::list(&rules.authenticated_indicators, self.probe_timeout);
        two_phase(driver, &login, &authenticated, DetectionSource::Rules).await
    }

    /// Detects state with the generic legacy selector set.
    pub async fn detect_legacy(&self, driver: &dyn BrowserDriver) -> Detection {
        let login = Probe::list(LEGACY_LOGIN_INDICATORS, self.legacy_probe_timeout);
        let authenticated = Probe::list(LEGACY_AUTHENTICATED_INDICATORS, self.legacy_probe_timeout);
        two_phase(driver, &login, &authenticated, DetectionSource::Legacy).await
    }

    /// Waits for the page to settle, then runs [`detect`](Self::detect) and,
    /// if the result is `Unknown`, [`detect_legacy`](Self::detect_legacy).
    pub async fn confirm(&self, driver: &dyn BrowserDriver, profile: &SiteProfile) -> Detection {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let detection = self.detect(driver, profile).await;
        let detection = if detection.status == AuthStatus::Unknown {
            self.detect_legacy(driver).await
        } else {
            detection
        };

        info!(
            site = %profile.kind,
            status = ?detection.status,
            source = ?detection.source,
            matched = detection.matched.as_deref().unwrap_or("-"),
            "authentication detection"
        );
        detection
    }
}

impl Default for AuthValidator {
    fn default() -> Self {
        Self::from_config(&AuthCacheConfig::default())
    }
}

async fn two_phase(
    driver: &dyn BrowserDriver,
    login: &[Probe],
    authenticated: &[Probe],
    source: DetectionSource,
) -> Detection {
    if let Some(probe) = first_visible(driver, login).await {
        debug!(selector = %probe.selector, "login indicator visible");
        return Detection {
            status: AuthStatus::NotAuthenticated,
            source,
            matched: Some(probe.selector.clone()),
        };
    }

    match first_visible(driver, authenticated).await {
        Some(probe) => {
            debug!(selector = %probe.selector, "authenticated indicator visible");
            Detection {
                status: AuthStatus::Authenticated,
                source,
                matched: Some(probe.selector.clone()),
            }
        }
        None => Detection {
            status: AuthStatus::NotAuthenticated,
            source,
            matched: None,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::driver::{CookieRecord, DriverError, StorageState, WaitPolicy};
    use crate::site::{DetectionRules, SiteKind};

    /// Page whose visible selectors are fixed; records probe order.
    struct StaticPage {
        visible: HashSet<String>,
        probed: Mutex<Vec<String>>,
    }

    impl StaticPage {
        fn showing(selectors: &[&str]) -> Self {
            Self {
                visible: selectors.iter().map(|s| (*s).to_string()).collect(),
                probed: Mutex::new(Vec::new()),
            }
        }

        fn probed(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrowserDriver for StaticPage {
        async fn navigate(&self, _url: &str, _wait: WaitPolicy) -> Result<(), DriverError> {
            Ok(())
        }
        async fn cookies(&self) -> Result<Vec<CookieRecord>, DriverError> {
            Ok(Vec::new())
        }
        async fn add_cookies(&self, _cookies: &[CookieRecord]) -> Result<(), DriverError> {
            Ok(())
        }
        async fn read_storage(&self) -> Result<StorageState, DriverError> {
            Ok(StorageState::default())
        }
        async fn write_storage(&self, _state: &StorageState) -> Result<(), DriverError> {
            Ok(())
        }
        async fn is_visible(&self, selector: &str, _timeout: Duration) -> bool {
            self.probed.lock().unwrap().push(selector.to_string());
            self.visible.contains(selector)
        }
        async fn current_url(&self) -> String {
            "https://site.example.org/".to_string()
        }
        async fn reload(&self, _wait: WaitPolicy) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn validator() -> AuthValidator {
        AuthValidator::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::ZERO,
        )
    }

    fn profile_with_rules() -> SiteProfile {
        SiteProfile::new(SiteKind::new("portal"), "Portal", "https://site.example.org/", Path::new("/s"))
            .with_detection_rules(Some(DetectionRules {
                login_indicators: vec!["#login".into(), "#email".into()],
                authenticated_indicators: vec![".nav".into(), ".avatar".into()],
            }))
    }

    #[tokio::test]
    async fn test_login_indicator_wins_over_authenticated_indicator() {
        let page = StaticPage::showing(&["#email", ".avatar"]);
        let detection = validator().detect(&page, &profile_with_rules()).await;
        assert_eq!(detection.status, AuthStatus::NotAuthenticated);
        assert_eq!(detection.matched.as_deref(), Some("#email"));
        assert_eq!(page.probed(), vec!["#login", "#email"]);
    }

    #[tokio::test]
    async fn test_authenticated_indicator_without_login_form_is_positive() {
        let page = StaticPage::showing(&[".avatar"]);
        let detection = validator().detect(&page, &profile_with_rules()).await;
        assert!(detection.is_authenticated());
        assert_eq!(detection.source, DetectionSource::Rules);
        assert_eq!(page.probed(), vec!["#login", "#email", ".nav", ".avatar"]);
    }

    #[tokio::test]
    async fn test_probing_stops_at_first_match() {
        let page = StaticPage::showing(&[".nav", ".avatar"]);
        let detection = validator().detect(&page, &profile_with_rules()).await;
        assert_eq!(detection.matched.as_deref(), Some(".nav"));
        assert_eq!(page.probed(), vec!["#login", "#email", ".nav"]);
    }

    #[tokio::test]
    async fn test_nothing_visible_is_negative() {
        let page = StaticPage::showing(&[]);
        let detection = validator().detect(&page, &profile_with_rules()).await;
        assert_eq!(detection.status, AuthStatus::NotAuthenticated);
        assert!(detection.matched.is_none());
    }

    #[tokio::test]
    async fn test_profile_without_rules_is_unknown() {
        let page = StaticPage::showing(&[".avatar"]);
        let profile = SiteProfile::fallback("https://site.example.org/", Path::new("/s"));
        let detection = validator().detect(&page, &profile).await;
        assert_eq!(detection.status, AuthStatus::Unknown);
        assert!(page.probed().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_falls_back_to_legacy_selectors() {
        let page = StaticPage::showing(&[LEGACY_AUTHENTICATED_INDICATORS[1]]);
        let profile = SiteProfile::fallback("https://site.example.org/", Path::new("/s"));
        let detection = validator().confirm(&page, &profile).await;
        assert!(detection.is_authenticated());
        assert_eq!(detection.source, DetectionSource::Legacy);
    }

    #[tokio::test]
    async fn test_legacy_login_form_vetoes_nav_buttons() {
        let page = StaticPage::showing(&[
            LEGACY_LOGIN_INDICATORS[0],
            LEGACY_AUTHENTICATED_INDICATORS[0],
        ]);
        let detection = validator().detect_legacy(&page).await;
        assert_eq!(detection.status, AuthStatus::NotAuthenticated);
        assert_eq!(detection.source, DetectionSource::Legacy);
    }
}
