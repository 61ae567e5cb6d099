//! Ordered site dispatch table.
//!
//! The [`SiteResolver`] holds `(matcher, profile factory)` entries and returns
//! the profile of the first entry whose keyword occurs in the test identifier.
//! Compound keywords (`ntkpapers`) are registered before the generic keyword
//! they contain (`ntk`). Adding a site means appending an entry.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{AuthCacheConfig, SiteConfig};

use super::{DetectionRules, SiteKind, SiteProfile, UrlGuard};

const NTK_PAPERS_URL: &str = "https://staging-ntkpapers.ntk-institute.org/";
const NTK_URL: &str = "https://staging.ntk-institute.org/";

const NTK_LOGIN_SELECTORS: [&str; 4] = [
    r#"input[type="email"]"#,
    r#"[placeholder*="email"], [placeholder*="Email"]"#,
    r#"button:has-text("Continue with email"), button:has-text("continue with email")"#,
    r#"text="Please provide your email to sign up""#,
];

const NTK_AUTHENTICATED_SELECTORS: [&str; 2] = [
    r#"button:has-text("All"), button:has-text("News"), button:has-text("Papers"), button:has-text("Digital"), button:has-text("Courses"), button:has-text("COVID-19")"#,
    r#".user-menu, .profile-menu, .dashboard, [data-testid*="user"], [data-testid*="profile"]"#,
];

type ProfileFactory = Box<dyn Fn(&Path) -> SiteProfile + Send + Sync>;

/// One row of the dispatch table.
pub struct SiteEntry {
    keyword: String,
    factory: ProfileFactory,
}

impl SiteEntry {
    /// Creates an entry matching `keyword` case-insensitively.
    pub fn new(
        keyword: impl Into<String>,
        factory: impl Fn(&Path) -> SiteProfile + Send + Sync + 'static,
    ) -> Self {
        Self {
            keyword: keyword.into().to_lowercase(),
            factory: Box::new(factory),
        }
    }

    /// Returns the lower-cased keyword.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    fn matches(&self, identifier_lower: &str) -> bool {
        identifier_lower.contains(&self.keyword)
    }
}

impl fmt::Debug for SiteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteEntry")
            .field("keyword", &self.keyword)
            .finish_non_exhaustive()
    }
}

/// Maps free-text test identifiers to site profiles. Pure and total.
#[derive(Debug)]
pub struct SiteResolver {
    state_dir: PathBuf,
    entries: Vec<SiteEntry>,
    default_url: String,
}

impl SiteResolver {
    /// Creates a resolver with no site entries; every identifier resolves to
    /// the fallback profile.
    #[must_use]
    pub fn empty(state_dir: impl Into<PathBuf>, default_url: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            entries: Vec::new(),
            default_url: default_url.into(),
        }
    }

    /// Builds the resolver from configuration: configured sites first, in file
    /// order, then the built-in sites.
    #[must_use]
    pub fn from_config(config: &AuthCacheConfig) -> Self {
        let mut resolver = Self::empty(&config.state_dir, &config.default_url);

        for site in &config.sites {
            resolver.register(configured_entry(site.clone()));
        }

        let papers_url = base_url_for(config, &SiteKind::NTK_PAPERS, NTK_PAPERS_URL);
        resolver.register(SiteEntry::new("ntkpapers", move |dir| {
            SiteProfile::new(SiteKind::NTK_PAPERS, "NTK Papers", papers_url.clone(), dir)
                // Papers shares the legacy name-space with the older main site.
                .with_legacy_fallback(false)
                .with_url_guard(UrlGuard::new(vec!["ntkpapers".to_string()], Vec::new()))
                .with_detection_rules(Some(ntk_detection_rules()))
        }));

        let ntk_url = base_url_for(config, &SiteKind::NTK, NTK_URL);
        resolver.register(SiteEntry::new("ntk", move |dir| {
            SiteProfile::new(SiteKind::NTK, "NTK Institute", ntk_url.clone(), dir)
                .with_url_guard(UrlGuard::new(Vec::new(), vec!["ntkpapers".to_string()]))
                .with_detection_rules(Some(ntk_detection_rules()))
        }));

        resolver
    }

    /// Appends an entry; earlier entries win.
    pub fn register(&mut self, entry: SiteEntry) {
        debug!(keyword = entry.keyword(), "registering site entry");
        self.entries.push(entry);
    }

    /// Returns the number of registered entries, excluding the fallback.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Resolves a test identifier to exactly one profile.
    #[must_use]
    pub fn resolve(&self, test_identifier: &str) -> SiteProfile {
        let lowered = test_identifier.to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.matches(&lowered))
            .map_or_else(
                || SiteProfile::fallback(self.default_url.clone(), &self.state_dir),
                |entry| (entry.factory)(&self.state_dir),
            )
    }

    /// Returns the profile of every registered entry, in priority order.
    #[must_use]
    pub fn known_profiles(&self) -> Vec<SiteProfile> {
        self.entries
            .iter()
            .map(|entry| (entry.factory)(&self.state_dir))
            .collect()
    }
}

fn base_url_for(config: &AuthCacheConfig, kind: &SiteKind, builtin: &str) -> String {
    config
        .base_urls
        .get(kind.as_str())
        .cloned()
        .unwrap_or_else(|| builtin.to_string())
}

fn ntk_detection_rules() -> DetectionRules {
    DetectionRules {
        login_indicators: NTK_LOGIN_SELECTORS.iter().map(|s| (*s).to_string()).collect(),
        authenticated_indicators: NTK_AUTHENTICATED_SELECTORS
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
    }
}

fn configured_entry(site: SiteConfig) -> SiteEntry {
    let keyword = site.keyword.clone();
    SiteEntry::new(keyword, move |dir| {
        let kind = SiteKind::new(site.kind.clone().unwrap_or_else(|| site.keyword.clone()));
        let name = site.name.clone().unwrap_or_else(|| kind.to_string());
        SiteProfile::new(kind, name, site.base_url.clone(), dir)
            .with_legacy_fallback(site.legacy_fallback)
            .with_url_guard(UrlGuard::new(
                site.url_require.clone(),
                site.url_forbid.clone(),
            ))
            .with_detection_rules(DetectionRules::from_lists(
                site.login_selectors.clone(),
                site.authenticated_selectors.clone(),
            ))
    })
}
