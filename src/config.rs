//! Configuration loading for the auth cache.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment overrides. The file is looked up in this order:
//! 1. the path passed explicitly (CLI `--config`)
//! 2. `$AUTHCACHE_CONFIG`
//! 3. `./authcache.toml` when present

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default maximum snapshot age in hours.
pub const DEFAULT_MAX_AGE_HOURS: u64 = 24;

/// Default directory holding snapshot files.
pub const DEFAULT_STATE_DIR: &str = "./test-data/auth-state";

/// Identifier keywords that mark a test as exercising the login path itself.
pub const DEFAULT_FRESH_KEYWORDS: [&str; 8] = [
    "login",
    "signin",
    "signup",
    "register",
    "auth",
    "verification",
    "password",
    "reset",
];

/// Per-selector visibility budget for site-specific rules.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Per-selector visibility budget for the generic legacy probe.
pub const DEFAULT_LEGACY_PROBE_TIMEOUT_MS: u64 = 3_000;

/// Delay before probing so the page shell can finish rendering.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;

/// How long a snapshot load or save waits for the state directory lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// Base URL used by the `default` site profile.
pub const DEFAULT_SITE_URL: &str = "https://staging.ntk-institute.org/";

/// Config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "authcache.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "AUTHCACHE_CONFIG";

const MAX_TIMEOUT_MS: u64 = 60_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// An environment override carried an unusable value.
    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// A value is out of its accepted range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Field name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// A site declared in the config file.
///
/// Declared sites are matched before the built-in ones, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Case-insensitive substring that selects this site from a test identifier.
    pub keyword: String,
    /// Site kind; also names the cache files. Defaults to `keyword`.
    #[serde(default)]
    pub kind: Option<String>,
    /// Display name used in logs. Defaults to the kind.
    #[serde(default)]
    pub name: Option<String>,
    /// Page the restore and live probe navigate to.
    pub base_url: String,
    /// Whether the shared legacy file pair may be used for this site.
    #[serde(default = "default_true")]
    pub legacy_fallback: bool,
    /// Substrings the page URL must contain after a restore.
    #[serde(default)]
    pub url_require: Vec<String>,
    /// Substrings the page URL must not contain after a restore.
    #[serde(default)]
    pub url_forbid: Vec<String>,
    /// Selectors whose visibility means the login form is showing.
    #[serde(default)]
    pub login_selectors: Vec<String>,
    /// Selectors whose visibility means the user is signed in.
    #[serde(default)]
    pub authenticated_selectors: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Effective auth cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthCacheConfig {
    /// Bypass cached auth for every test.
    pub force_fresh: bool,
    /// Allow cached auth at all; `false` behaves like `force_fresh`.
    pub reuse_enabled: bool,
    /// Snapshots at or beyond this age are stale.
    pub max_age_hours: u64,
    /// Identifier keywords that require fresh authentication.
    pub fresh_keywords: Vec<String>,
    /// Directory holding snapshot files.
    pub state_dir: PathBuf,
    /// Visibility budget per site-rule selector, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Visibility budget per legacy selector, in milliseconds.
    pub legacy_probe_timeout_ms: u64,
    /// Delay before DOM probing, in milliseconds.
    pub settle_delay_ms: u64,
    /// Wait for a contended state directory lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Base URL of the `default` site profile.
    pub default_url: String,
    /// Base URL overrides for built-in sites, keyed by kind.
    pub base_urls: BTreeMap<String, String>,
    /// Additional sites, matched before the built-ins.
    pub sites: Vec<SiteConfig>,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            force_fresh: false,
            reuse_enabled: true,
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            fresh_keywords: DEFAULT_FRESH_KEYWORDS
                .iter()
                .map(|keyword| (*keyword).to_string())
                .collect(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            legacy_probe_timeout_ms: DEFAULT_LEGACY_PROBE_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            default_url: DEFAULT_SITE_URL.to_string(),
            base_urls: BTreeMap::new(),
            sites: Vec::new(),
        }
    }
}

/// Loaded config plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Effective settings after all layers.
    pub config: AuthCacheConfig,
    /// File the settings were read from, if any.
    pub path: Option<PathBuf>,
}

impl AuthCacheConfig {
    /// Loads defaults, the config file and process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicit file is missing or unreadable,
    /// the file does not parse, an override is malformed, or validation fails.
    pub fn load(explicit_path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let path = resolve_config_path(explicit_path, env::var_os(CONFIG_PATH_ENV));

        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| env::var(name).ok())?;
        config.validate()?;

        debug!(
            path = ?path,
            state_dir = %config.state_dir.display(),
            force_fresh = config.force_fresh,
            "auth cache config loaded"
        );

        Ok(LoadedConfig { config, path })
    }

    /// Reads settings from a TOML file; unspecified keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Recognized variables: `FORCE_FRESH_AUTH`, `DISABLE_AUTH_REUSE`,
    /// `AUTH_STATE_DIR`, `AUTH_MAX_AGE_HOURS`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparsable values.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("FORCE_FRESH_AUTH") {
            self.force_fresh = parse_env_bool("FORCE_FRESH_AUTH", &value)?;
        }
        if let Some(value) = lookup("DISABLE_AUTH_REUSE") {
            self.reuse_enabled = !parse_env_bool("DISABLE_AUTH_REUSE", &value)?;
        }
        if let Some(value) = lookup("AUTH_STATE_DIR")
            && !value.trim().is_empty()
        {
            self.state_dir = PathBuf::from(value.trim());
        }
        if let Some(value) = lookup("AUTH_MAX_AGE_HOURS") {
            self.max_age_hours =
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidEnv {
                        name: "AUTH_MAX_AGE_HOURS",
                        value,
                    })?;
        }
        Ok(())
    }

    /// Validates ranges and site declarations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_age_hours == 0 {
            return Err(invalid("max_age_hours", "must be greater than zero"));
        }
        validate_timeout_ms("probe_timeout_ms", self.probe_timeout_ms, 1)?;
        validate_timeout_ms("legacy_probe_timeout_ms", self.legacy_probe_timeout_ms, 1)?;
        validate_timeout_ms("settle_delay_ms", self.settle_delay_ms, 0)?;
        validate_timeout_ms("lock_timeout_ms", self.lock_timeout_ms, 0)?;

        if self.fresh_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(invalid("fresh_keywords", "keywords must not be blank"));
        }

        validate_url("default_url", &self.default_url)?;
        for (kind, base_url) in &self.base_urls {
            validate_url(&format!("base_urls.{kind}"), base_url)?;
        }

        for (index, site) in self.sites.iter().enumerate() {
            if site.keyword.trim().is_empty() {
                return Err(invalid(
                    &format!("sites[{index}].keyword"),
                    "must not be blank",
                ));
            }
            if site
                .kind
                .as_deref()
                .is_some_and(|kind| kind.trim().is_empty())
            {
                return Err(invalid(&format!("sites[{index}].kind"), "must not be blank"));
            }
            validate_site_kind(index, site)?;
            validate_url(&format!("sites[{index}].base_url"), &site.base_url)?;
            if !site.login_selectors.is_empty() && site.authenticated_selectors.is_empty() {
                return Err(invalid(
                    &format!("sites[{index}].authenticated_selectors"),
                    "must not be empty when login_selectors are set",
                ));
            }
        }

        Ok(())
    }

    /// Maximum snapshot age.
    #[must_use]
    pub fn max_age(&self) -> chrono::Duration {
        i64::try_from(self.max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Visibility budget per site-rule selector.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Visibility budget per legacy selector.
    #[must_use]
    pub fn legacy_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.legacy_probe_timeout_ms)
    }

    /// Delay before DOM probing.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Wait for a contended state directory lock.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn resolve_config_path(
    explicit: Option<&Path>,
    from_env: Option<std::ffi::OsString>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(value) = from_env
        && !value.is_empty()
    {
        return Some(PathBuf::from(value));
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    local.is_file().then_some(local)
}

fn parse_env_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        }),
    }
}

/// The effective kind names cache files, so it must be a plain file-name
/// fragment and must not shadow the fallback site.
fn validate_site_kind(index: usize, site: &SiteConfig) -> Result<(), ConfigError> {
    let (field, kind) = match &site.kind {
        Some(kind) => (format!("sites[{index}].kind"), kind.to_lowercase()),
        None => (format!("sites[{index}].keyword"), site.keyword.to_lowercase()),
    };
    if !kind
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid(
            &field,
            "site kind may only contain letters, digits, '-' and '_'",
        ));
    }
    if kind == "default" {
        return Err(invalid(&field, "site kind 'default' is reserved"));
    }
    Ok(())
}

fn validate_timeout_ms(field: &str, value: u64, min: u64) -> Result<(), ConfigError> {
    if !(min..=MAX_TIMEOUT_MS).contains(&value) {
        return Err(invalid(
            field,
            &format!("{value} is outside {min}..={MAX_TIMEOUT_MS}"),
        ));
    }
    Ok(())
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|error| invalid(field, &format!("'{value}' is not a valid URL ({error})")))
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
