//! Scripted in-memory browser for exercising the auth flow without a real
//! browser.
//!
//! The fake "site" treats a page as signed in when the cookie jar holds a
//! `session` cookie whose value matches the server's current token. Login
//! selectors are visible otherwise. Tokens can be revoked to simulate a
//! server-side logout.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use authcache_core::{
    AuthCacheConfig, BrowserDriver, CookieRecord, DriverError, FreshAuthError, FreshAuthFlow,
    SiteConfig, StorageState, WaitPolicy,
};
use serde_json::json;

pub const PORTAL_URL: &str = "https://portal.example.org/";
pub const LOGIN_SELECTOR: &str = "#email";
pub const AUTHENTICATED_SELECTOR: &str = ".avatar";
pub const SESSION_COOKIE: &str = "session";

/// Config with a `portal` site, short probes and lock waits, and no settle delay.
pub fn test_config(state_dir: &Path) -> AuthCacheConfig {
    AuthCacheConfig {
        state_dir: state_dir.to_path_buf(),
        probe_timeout_ms: 50,
        legacy_probe_timeout_ms: 50,
        settle_delay_ms: 0,
        lock_timeout_ms: 100,
        sites: vec![SiteConfig {
            keyword: "portal".to_string(),
            kind: Some("portal".to_string()),
            name: Some("Portal".to_string()),
            base_url: PORTAL_URL.to_string(),
            legacy_fallback: true,
            url_require: vec!["portal".to_string()],
            url_forbid: Vec::new(),
            login_selectors: vec![LOGIN_SELECTOR.to_string()],
            authenticated_selectors: vec![AUTHENTICATED_SELECTOR.to_string()],
        }],
        ..AuthCacheConfig::default()
    }
}

pub fn session_cookie(token: &str) -> CookieRecord {
    CookieRecord::new(json!({
        "name": SESSION_COOKIE,
        "value": token,
        "domain": "portal.example.org",
        "path": "/",
        "httpOnly": true,
    }))
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    server_token: String,
    cookies: Vec<CookieRecord>,
    storage: StorageState,
    calls: Vec<String>,
}

/// In-memory page with a cookie jar and storage.
#[derive(Debug)]
pub struct FakeBrowser {
    state: Mutex<PageState>,
    login_selectors: Vec<String>,
    authenticated_selectors: Vec<String>,
    also_visible: Vec<String>,
    redirect_to: Option<String>,
    navigation_fails: bool,
}

impl FakeBrowser {
    /// A signed-out browser for a site whose current session token is `token`.
    pub fn new(token: &str) -> Self {
        Self {
            state: Mutex::new(PageState {
                server_token: token.to_string(),
                ..PageState::default()
            }),
            login_selectors: vec![LOGIN_SELECTOR.to_string()],
            authenticated_selectors: vec![AUTHENTICATED_SELECTOR.to_string()],
            also_visible: Vec::new(),
            redirect_to: None,
            navigation_fails: false,
        }
    }

    /// Puts a valid session cookie in the jar.
    pub fn signed_in(self) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let token = state.server_token.clone();
            state.cookies.push(session_cookie(&token));
        }
        self
    }

    /// Uses a different selector vocabulary, e.g. the generic legacy set.
    pub fn with_selectors(mut self, login: &[&str], authenticated: &[&str]) -> Self {
        self.login_selectors = login.iter().map(|s| (*s).to_string()).collect();
        self.authenticated_selectors = authenticated.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Makes `selector` visible regardless of session state.
    pub fn with_also_visible(mut self, selector: &str) -> Self {
        self.also_visible.push(selector.to_string());
        self
    }

    /// Every navigation lands on `url` instead of the requested page.
    pub fn with_redirect(mut self, url: &str) -> Self {
        self.redirect_to = Some(url.to_string());
        self
    }

    /// Every navigation and reload fails.
    pub fn with_failing_navigation(mut self) -> Self {
        self.navigation_fails = true;
        self
    }

    /// Invalidates every issued session; the next login gets `new_token`.
    pub fn revoke_sessions(&self, new_token: &str) {
        self.state.lock().unwrap().server_token = new_token.to_string();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn cookies_in_jar(&self) -> Vec<CookieRecord> {
        self.state.lock().unwrap().cookies.clone()
    }

    pub fn storage(&self) -> StorageState {
        self.state.lock().unwrap().storage.clone()
    }

    pub fn server_token(&self) -> String {
        self.state.lock().unwrap().server_token.clone()
    }

    fn is_signed_in(state: &PageState) -> bool {
        state.cookies.iter().any(|cookie| {
            cookie.name() == Some(SESSION_COOKIE)
                && cookie.as_json().get("value").and_then(serde_json::Value::as_str)
                    == Some(state.server_token.as_str())
        })
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), DriverError> {
        self.record(format!("navigate {url} {}", wait.as_str()));
        if self.navigation_fails {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.url = self.redirect_to.clone().unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>, DriverError> {
        self.record("cookies".to_string());
        Ok(self.state.lock().unwrap().cookies.clone())
    }

    async fn add_cookies(&self, cookies: &[CookieRecord]) -> Result<(), DriverError> {
        self.record(format!("add_cookies {}", cookies.len()));
        let mut state = self.state.lock().unwrap();
        for cookie in cookies {
            state.cookies.retain(|existing| existing.name() != cookie.name());
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn read_storage(&self) -> Result<StorageState, DriverError> {
        self.record("read_storage".to_string());
        Ok(self.state.lock().unwrap().storage.clone())
    }

    async fn write_storage(&self, storage: &StorageState) -> Result<(), DriverError> {
        self.record("write_storage".to_string());
        self.state.lock().unwrap().storage = storage.clone();
        Ok(())
    }

    async fn is_visible(&self, selector: &str, _timeout: Duration) -> bool {
        if self.also_visible.iter().any(|s| s == selector) {
            return true;
        }
        let state = self.state.lock().unwrap();
        if Self::is_signed_in(&state) {
            self.authenticated_selectors.iter().any(|s| s == selector)
        } else {
            self.login_selectors.iter().any(|s| s == selector)
        }
    }

    async fn current_url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    async fn reload(&self, wait: WaitPolicy) -> Result<(), DriverError> {
        self.record(format!("reload {}", wait.as_str()));
        if self.navigation_fails {
            return Err(DriverError::Navigation {
                url: self.state.lock().unwrap().url.clone(),
                reason: "reload failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Login flow that signs the fake browser in with a given token.
#[derive(Debug)]
pub struct ScriptedLogin {
    token: Option<String>,
    runs: AtomicUsize,
}

impl ScriptedLogin {
    /// A flow that succeeds, signing in with `token`.
    pub fn succeeding(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            runs: AtomicUsize::new(0),
        }
    }

    /// A flow that always fails.
    pub fn failing() -> Self {
        Self {
            token: None,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FreshAuthFlow for ScriptedLogin {
    async fn authenticate(&self, driver: &dyn BrowserDriver) -> Result<(), FreshAuthError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let Some(token) = &self.token else {
            return Err(FreshAuthError::flow("verification code never arrived"));
        };

        driver.navigate(PORTAL_URL, WaitPolicy::NetworkIdle).await?;
        driver.add_cookies(&[session_cookie(token)]).await?;
        driver
            .write_storage(&StorageState {
                local: BTreeMap::from([("user".to_string(), "tester".to_string())]),
                session: BTreeMap::new(),
            })
            .await?;
        Ok(())
    }
}
