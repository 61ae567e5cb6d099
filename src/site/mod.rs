//! Site profiles: which application a test targets and where its auth lives.
//!
//! # Architecture
//!
//! - [`SiteProfile`] - static descriptor of one target application
//! - [`SiteResolver`] - ordered dispatch table from test identifier to profile
//! - [`DetectionRules`] - optional per-site login/authenticated selectors
//! - [`UrlGuard`] - post-restore check that the page landed on the right site

mod registry;

pub use registry::{SiteEntry, SiteResolver};

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use url::{Position, Url};

/// Shared session file name used before per-site separation existed.
pub const LEGACY_SESSION_FILE: &str = "auth-state.json";

/// Shared cookie file name used before per-site separation existed.
pub const LEGACY_COOKIE_FILE: &str = "cookies.json";

/// Identifies the kind of target application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SiteKind(Cow<'static, str>);

impl SiteKind {
    /// Fallback kind for identifiers that match no site.
    pub const DEFAULT: Self = Self(Cow::Borrowed("default"));
    /// The papers portal.
    pub const NTK_PAPERS: Self = Self(Cow::Borrowed("ntkpapers"));
    /// The institute main site.
    pub const NTK: Self = Self(Cow::Borrowed("ntk"));

    /// Creates a kind for a configured site.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(Cow::Owned(kind.into().to_lowercase()))
    }

    /// Returns the kind label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the fallback kind.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered selectors that reveal authentication state for one site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionRules {
    /// Visible login form elements; any match means signed out.
    pub login_indicators: Vec<String>,
    /// Visible signed-in elements; checked only when no login indicator shows.
    pub authenticated_indicators: Vec<String>,
}

impl DetectionRules {
    /// Builds rules; returns `None` when both lists are empty.
    #[must_use]
    pub fn from_lists(login: Vec<String>, authenticated: Vec<String>) -> Option<Self> {
        if login.is_empty() && authenticated.is_empty() {
            return None;
        }
        Some(Self {
            login_indicators: login,
            authenticated_indicators: authenticated,
        })
    }
}

/// Case-insensitive URL sanity rule applied after a restore.
///
/// Matching looks at scheme, host and path only; query strings and fragments
/// are ignored so a `?redirect=` parameter cannot satisfy the rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UrlGuard {
    /// Every entry must appear in the URL.
    pub require: Vec<String>,
    /// No entry may appear in the URL.
    pub forbid: Vec<String>,
}

impl UrlGuard {
    /// Creates a guard, lower-casing all patterns.
    #[must_use]
    pub fn new(require: Vec<String>, forbid: Vec<String>) -> Self {
        Self {
            require: require.into_iter().map(|s| s.to_lowercase()).collect(),
            forbid: forbid.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Returns true if `current_url` belongs to the expected site.
    #[must_use]
    pub fn accepts(&self, current_url: &str) -> bool {
        let haystack = match Url::parse(current_url) {
            Ok(parsed) => parsed[..Position::AfterPath].to_lowercase(),
            Err(_) => current_url.to_lowercase(),
        };
        self.require.iter().all(|needle| haystack.contains(needle.as_str()))
            && !self.forbid.iter().any(|needle| haystack.contains(needle.as_str()))
    }
}

/// Static descriptor of one target application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteProfile {
    /// Site kind.
    pub kind: SiteKind,
    /// Display name.
    pub name: String,
    /// Page restore and live probing navigate to.
    pub base_url: String,
    /// Current-format storage snapshot file.
    pub session_file: PathBuf,
    /// Current-format cookie file.
    pub cookie_file: PathBuf,
    /// Backward-compatible storage snapshot file.
    pub legacy_session_file: PathBuf,
    /// Backward-compatible cookie file.
    pub legacy_cookie_file: PathBuf,
    /// Whether the legacy pair may stand in for a missing current pair.
    pub legacy_fallback: bool,
    /// Post-restore URL check.
    pub url_guard: UrlGuard,
    /// Optional site-specific detection rules.
    pub detection_rules: Option<DetectionRules>,
}

impl SiteProfile {
    /// Builds a profile whose current files are `auth-state-<kind>.json` and
    /// `cookies-<kind>.json` under `state_dir`.
    #[must_use]
    pub fn new(
        kind: SiteKind,
        name: impl Into<String>,
        base_url: impl Into<String>,
        state_dir: &Path,
    ) -> Self {
        Self {
            session_file: state_dir.join(format!("auth-state-{kind}.json")),
            cookie_file: state_dir.join(format!("cookies-{kind}.json")),
            legacy_session_file: state_dir.join(LEGACY_SESSION_FILE),
            legacy_cookie_file: state_dir.join(LEGACY_COOKIE_FILE),
            legacy_fallback: true,
            url_guard: UrlGuard::default(),
            detection_rules: None,
            kind,
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    /// Builds the fallback profile, which reads and writes the legacy pair.
    #[must_use]
    pub fn fallback(base_url: impl Into<String>, state_dir: &Path) -> Self {
        let mut profile = Self::new(SiteKind::DEFAULT, "Default Site", base_url, state_dir);
        profile.session_file = profile.legacy_session_file.clone();
        profile.cookie_file = profile.legacy_cookie_file.clone();
        profile
    }

    /// Forbids or allows the legacy pair.
    #[must_use]
    pub fn with_legacy_fallback(mut self, allowed: bool) -> Self {
        self.legacy_fallback = allowed;
        self
    }

    /// Sets the URL guard.
    #[must_use]
    pub fn with_url_guard(mut self, guard: UrlGuard) -> Self {
        self.url_guard = guard;
        self
    }

    /// Sets detection rules.
    #[must_use]
    pub fn with_detection_rules(mut self, rules: Option<DetectionRules>) -> Self {
        self.detection_rules = rules;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_kind_new_lowercases() {
        assert_eq!(SiteKind::new("Portal").as_str(), "portal");
        assert!(SiteKind::DEFAULT.is_default());
        assert!(!SiteKind::NTK.is_default());
    }

    #[test]
    fn test_profile_paths_are_per_kind() {
        let profile = SiteProfile::new(SiteKind::NTK, "NTK", "https://a/", Path::new("/s"));
        assert_eq!(profile.session_file, PathBuf::from("/s/auth-state-ntk.json"));
        assert_eq!(profile.cookie_file, PathBuf::from("/s/cookies-ntk.json"));
        assert_eq!(profile.legacy_session_file, PathBuf::from("/s/auth-state.json"));
        assert_eq!(profile.legacy_cookie_file, PathBuf::from("/s/cookies.json"));
    }

    #[test]
    fn test_fallback_profile_uses_legacy_pair_as_current() {
        let profile = SiteProfile::fallback("https://a/", Path::new("/s"));
        assert_eq!(profile.session_file, profile.legacy_session_file);
        assert_eq!(profile.cookie_file, profile.legacy_cookie_file);
        assert!(profile.kind.is_default());
    }

    #[test]
    fn test_url_guard_require_and_forbid() {
        let papers = UrlGuard::new(vec!["ntkpapers".into()], Vec::new());
        assert!(papers.accepts("https://staging-ntkpapers.ntk-institute.org/home"));
        assert!(!papers.accepts("https://staging.ntk-institute.org/"));

        let main = UrlGuard::new(Vec::new(), vec!["NTKPapers".into()]);
        assert!(main.accepts("https://staging.ntk-institute.org/"));
        assert!(!main.accepts("https://staging-ntkpapers.ntk-institute.org/"));
    }

    #[test]
    fn test_url_guard_ignores_query_string() {
        let papers = UrlGuard::new(vec!["ntkpapers".into()], Vec::new());
        assert!(!papers.accepts("https://sso.example.org/login?next=ntkpapers"));
    }

    #[test]
    fn test_empty_url_guard_accepts_anything() {
        assert!(UrlGuard::default().accepts("about:blank"));
    }

    #[test]
    fn test_detection_rules_from_empty_lists_is_none() {
        assert!(DetectionRules::from_lists(Vec::new(), Vec::new()).is_none());
        assert!(DetectionRules::from_lists(vec!["#email".into()], Vec::new()).is_some());
    }
}
