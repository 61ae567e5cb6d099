//! Freshness policy: when cached auth must be bypassed.
//!
//! Tests that exercise the login path itself (their identifier contains a
//! keyword such as `login` or `signup`) must never short-circuit it with a
//! restored session. The decision is made before any I/O.

use std::fmt;

use crate::config::AuthCacheConfig;

/// Why cached auth may or may not be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessDecision {
    /// The global force-fresh override is set.
    Forced,
    /// Auth reuse is disabled in configuration.
    ReuseDisabled,
    /// The identifier contains an auth-sensitive keyword.
    Keyword(String),
    /// Cached auth may be reused.
    Reusable,
}

impl FreshnessDecision {
    /// Returns true if cached auth must be bypassed.
    #[must_use]
    pub fn requires_fresh(&self) -> bool {
        !matches!(self, Self::Reusable)
    }
}

impl fmt::Display for FreshnessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => f.write_str("force-fresh override set"),
            Self::ReuseDisabled => f.write_str("auth reuse disabled"),
            Self::Keyword(keyword) => write!(f, "identifier contains keyword '{keyword}'"),
            Self::Reusable => f.write_str("cached auth may be reused"),
        }
    }
}

/// Keyword-based freshness rules.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    keywords: Vec<String>,
    reuse_enabled: bool,
}

impl FreshnessPolicy {
    /// Creates a policy from a keyword list; keywords are lower-cased.
    #[must_use]
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|keyword| keyword.as_ref().to_lowercase())
                .collect(),
            reuse_enabled: true,
        }
    }

    /// Creates a policy from configuration.
    #[must_use]
    pub fn from_config(config: &AuthCacheConfig) -> Self {
        let mut policy = Self::new(&config.fresh_keywords);
        policy.reuse_enabled = config.reuse_enabled;
        policy
    }

    /// Returns the configured keywords.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Explains whether `test_identifier` requires fresh authentication.
    #[must_use]
    pub fn decide(&self, test_identifier: &str, force_fresh: bool) -> FreshnessDecision {
        if force_fresh {
            return FreshnessDecision::Forced;
        }
        if !self.reuse_enabled {
            return FreshnessDecision::ReuseDisabled;
        }

        let lowered = test_identifier.to_lowercase();
        self.keywords
            .iter()
            .find(|keyword| lowered.contains(keyword.as_str()))
            .map_or(FreshnessDecision::Reusable, |keyword| {
                FreshnessDecision::Keyword(keyword.clone())
            })
    }

    /// Returns true if cached auth must be bypassed for `test_identifier`.
    #[must_use]
    pub fn requires_fresh_auth(&self, test_identifier: &str, force_fresh: bool) -> bool {
        self.decide(test_identifier, force_fresh).requires_fresh()
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_config(&AuthCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_in_any_casing_requires_fresh() {
        let policy = FreshnessPolicy::default();
        for id in [
            "Login_SiteA_Test",
            "LOGIN",
            "user SignIn flow",
            "NTKPapers_SignUp_Improved",
            "register-new-account",
            "OAuth callback",
            "Email Verification",
            "PASSWORD change",
            "reset flow",
        ] {
            assert!(policy.requires_fresh_auth(id, false), "{id} should be fresh");
        }
    }

    #[test]
    fn test_identifier_without_keyword_is_reusable() {
        let policy = FreshnessPolicy::default();
        for id in ["Staging_NTK_ArticleNavigation", "scroll", "checkout totals"] {
            assert!(!policy.requires_fresh_auth(id, false), "{id} should reuse");
            assert_eq!(policy.decide(id, false), FreshnessDecision::Reusable);
        }
    }

    #[test]
    fn test_force_flag_overrides_everything() {
        let policy = FreshnessPolicy::default();
        assert_eq!(policy.decide("scroll", true), FreshnessDecision::Forced);
        assert!(policy.requires_fresh_auth("scroll", true));
    }

    #[test]
    fn test_keyword_decision_names_matched_keyword() {
        let policy = FreshnessPolicy::default();
        assert_eq!(
            policy.decide("Staging_NTKPapers_LoginVerification", false),
            FreshnessDecision::Keyword("login".to_string())
        );
    }

    #[test]
    fn test_reuse_disabled_requires_fresh() {
        let config = AuthCacheConfig {
            reuse_enabled: false,
            ..AuthCacheConfig::default()
        };
        let policy = FreshnessPolicy::from_config(&config);
        assert_eq!(policy.decide("scroll", false), FreshnessDecision::ReuseDisabled);
    }

    #[test]
    fn test_custom_keywords_are_lowercased() {
        let policy = FreshnessPolicy::new(["MFA"]);
        assert_eq!(policy.keywords(), ["mfa".to_string()]);
        assert!(policy.requires_fresh_auth("setup mfa device", false));
        assert!(!policy.requires_fresh_auth("login", false));
    }
}
