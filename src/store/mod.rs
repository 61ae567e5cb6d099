//! Durable per-site session snapshots.
//!
//! Each site owns a file pair under the state directory:
//! `cookies-<kind>.json` (array of cookie records) and `auth-state-<kind>.json`
//! (`{ localStorage, sessionStorage, timestamp }`). A shared legacy pair
//! (`cookies.json` / `auth-state.json`) predates per-site separation and is
//! still read for sites that allow it.
//!
//! Every public operation absorbs I/O failures into a status value; callers
//! always get a defined fallback instead of an error.
//!
//! Writes go to a temporary sibling and are renamed into place while holding an
//! exclusive advisory lock on `.authcache.lock` in the state directory; loads
//! hold the shared lock, so a reader never pairs a new cookie file with an old
//! session file. Lock acquisition polls until a deadline; contention past it
//! becomes a status value like any other I/O failure. A load in a directory
//! without a usable lock file reads unlocked.

mod snapshot;

pub use snapshot::{SessionSnapshot, format_age};

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::driver::{CookieRecord, StorageState};
use crate::site::SiteProfile;

use snapshot::{StoredSession, age_between};

const LOCK_FILE_NAME: &str = ".authcache.lock";

/// How long a load or save waits for the advisory lock by default.
pub const DEFAULT_LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

const LOCK_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

/// Errors raised inside the store. They never leave the public API; they are
/// logged and folded into status values.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem I/O failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File content is not the expected JSON shape.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The advisory lock could not be taken.
    #[error("failed to lock {path}: {source}")]
    Lock {
        /// Lock file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which file pair a snapshot was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// Per-site files.
    Current,
    /// Shared pre-separation files.
    Legacy,
}

/// A resolved file pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLocation {
    /// Storage snapshot file.
    pub session_file: PathBuf,
    /// Cookie file.
    pub cookie_file: PathBuf,
    /// Pair the files belong to.
    pub format: SnapshotFormat,
}

/// Result of [`AuthStateStore::load`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// A snapshot within the age limit.
    Loaded {
        /// The snapshot.
        snapshot: SessionSnapshot,
        /// Pair it was read from.
        format: SnapshotFormat,
    },
    /// No usable file pair exists.
    NotFound,
    /// The snapshot is at or beyond the age limit; files are left untouched.
    Stale {
        /// Age at load time.
        age: Duration,
        /// Recorded capture time.
        captured_at: DateTime<Utc>,
    },
    /// Files exist but could not be read or parsed.
    Unreadable {
        /// Description of the failure.
        reason: String,
    },
}

/// Files touched by a clear operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Files that existed and were deleted.
    pub removed: Vec<PathBuf>,
    /// Files that existed but could not be deleted.
    pub failed: Vec<(PathBuf, String)>,
}

impl ClearReport {
    /// Returns true when no deletion failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Health of a site's cached auth, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    /// No file pair.
    Missing,
    /// Within the age limit.
    Valid,
    /// At or beyond the age limit.
    Expired,
    /// Present but unreadable.
    Corrupted,
}

impl SnapshotStatus {
    /// Returns the stable label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Valid => "valid",
            Self::Expired => "expired",
            Self::Corrupted => "corrupted",
        }
    }
}

/// Summary of a site's cached auth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthInfo {
    /// Site display name.
    pub site: String,
    /// Whether a file pair resolved.
    pub exists: bool,
    /// Which pair resolved.
    pub format: Option<SnapshotFormat>,
    /// Snapshot health.
    pub status: SnapshotStatus,
    /// Recorded capture time.
    pub captured_at: Option<DateTime<Utc>>,
    /// Age in fractional hours.
    pub age_hours: Option<f64>,
    /// Human-readable age.
    pub age_display: Option<String>,
    /// Parse or read failure, for corrupted snapshots.
    pub error: Option<String>,
}

/// Persists, loads and clears session snapshots.
#[derive(Debug, Clone)]
pub struct AuthStateStore {
    max_age: Duration,
    lock_timeout: std::time::Duration,
}

impl AuthStateStore {
    /// Creates a store treating snapshots at or beyond `max_age` as stale.
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long loads and saves wait for a contended lock.
    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: std::time::Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Returns the staleness threshold.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Resolves the file pair `load` would read, if any.
    ///
    /// The current pair wins. The legacy pair is consulted only when the
    /// current pair is incomplete and the profile allows legacy fallback.
    #[must_use]
    pub fn locate(&self, profile: &SiteProfile) -> Option<SnapshotLocation> {
        if pair_present(&profile.session_file, &profile.cookie_file) {
            return Some(SnapshotLocation {
                session_file: profile.session_file.clone(),
                cookie_file: profile.cookie_file.clone(),
                format: SnapshotFormat::Current,
            });
        }

        if !profile.legacy_fallback {
            debug!(
                site = %profile.kind,
                "no site-specific auth files; legacy fallback disabled for this site"
            );
            return None;
        }

        if pair_present(&profile.legacy_session_file, &profile.legacy_cookie_file) {
            return Some(SnapshotLocation {
                session_file: profile.legacy_session_file.clone(),
                cookie_file: profile.legacy_cookie_file.clone(),
                format: SnapshotFormat::Legacy,
            });
        }

        None
    }

    /// Returns true if a snapshot file pair exists for the profile.
    #[must_use]
    pub fn exists(&self, profile: &SiteProfile) -> bool {
        let location = self.locate(profile);
        debug!(
            site = %profile.kind,
            format = ?location.as_ref().map(|l| l.format),
            "auth file lookup"
        );
        location.is_some()
    }

    /// Loads the profile's snapshot, evaluating age now.
    #[must_use]
    pub fn load(&self, profile: &SiteProfile) -> LoadOutcome {
        self.load_at(profile, Utc::now())
    }

    /// Loads the profile's snapshot, evaluating age at `now`.
    #[must_use]
    #[instrument(level = "debug", skip(self, profile), fields(site = %profile.kind))]
    pub fn load_at(&self, profile: &SiteProfile, now: DateTime<Utc>) -> LoadOutcome {
        let Some(location) = self.locate(profile) else {
            return LoadOutcome::NotFound;
        };

        match self.try_load(&location, now) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(site = %profile.kind, error = %error, "cached auth unreadable");
                LoadOutcome::Unreadable {
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Saves a snapshot captured now to the profile's current-format files.
    ///
    /// Returns `false` (after logging) when the write fails.
    pub fn save(
        &self,
        profile: &SiteProfile,
        cookies: &[CookieRecord],
        storage: &StorageState,
    ) -> bool {
        let snapshot = SessionSnapshot::new(cookies.to_vec(), storage.clone());
        self.save_snapshot(profile, &snapshot)
    }

    /// Writes `snapshot` to the profile's current-format files, replacing any
    /// previous content.
    ///
    /// Returns `false` (after logging) when the write fails.
    #[instrument(level = "debug", skip(self, profile, snapshot), fields(site = %profile.kind))]
    pub fn save_snapshot(&self, profile: &SiteProfile, snapshot: &SessionSnapshot) -> bool {
        match try_save(profile, snapshot, self.lock_timeout) {
            Ok(()) => {
                info!(
                    site = %profile.kind,
                    path = %profile.session_file.display(),
                    cookies = snapshot.cookies.len(),
                    "auth state saved"
                );
                true
            }
            Err(error) => {
                warn!(site = %profile.kind, error = %error, "failed to save auth state");
                false
            }
        }
    }

    /// Deletes the profile's current-format files. Missing files are fine.
    pub fn clear(&self, profile: &SiteProfile) -> ClearReport {
        self.clear_all(std::iter::once(profile))
    }

    /// Deletes the current-format files of every given profile.
    pub fn clear_all<'a>(&self, profiles: impl IntoIterator<Item = &'a SiteProfile>) -> ClearReport {
        let mut report = ClearReport::default();
        let mut seen: Vec<PathBuf> = Vec::new();

        for profile in profiles {
            for path in [&profile.session_file, &profile.cookie_file] {
                if seen.contains(path) {
                    continue;
                }
                seen.push(path.clone());

                match fs::remove_file(path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "removed auth file");
                        report.removed.push(path.clone());
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "failed to remove auth file");
                        report.failed.push((path.clone(), error.to_string()));
                    }
                }
            }
        }

        info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            "auth state cleared"
        );
        report
    }

    /// Reports the health of the profile's cached auth.
    #[must_use]
    pub fn info(&self, profile: &SiteProfile) -> AuthInfo {
        let mut info = AuthInfo {
            site: profile.name.clone(),
            exists: false,
            format: None,
            status: SnapshotStatus::Missing,
            captured_at: None,
            age_hours: None,
            age_display: None,
            error: None,
        };

        let Some(location) = self.locate(profile) else {
            return info;
        };
        info.exists = true;
        info.format = Some(location.format);

        match read_json::<StoredSession>(&location.session_file) {
            Ok(stored) => {
                let age = age_between(stored.timestamp, Utc::now());
                info.captured_at = Some(stored.timestamp);
                info.age_hours = Some(hours(age));
                info.age_display = Some(format_age(age));
                info.status = if age >= self.max_age {
                    SnapshotStatus::Expired
                } else {
                    SnapshotStatus::Valid
                };
            }
            Err(error) => {
                info.status = SnapshotStatus::Corrupted;
                info.error = Some(error.to_string());
            }
        }

        info
    }

    fn try_load(
        &self,
        location: &SnapshotLocation,
        now: DateTime<Utc>,
    ) -> Result<LoadOutcome, StoreError> {
        let _lock = DirLock::shared(&location.session_file, self.lock_timeout)?;

        let stored: StoredSession = read_json(&location.session_file)?;
        let age = age_between(stored.timestamp, now);
        if age >= self.max_age {
            info!(
                path = %location.session_file.display(),
                age_hours = %format_args!("{:.1}", hours(age)),
                "cached auth too old"
            );
            return Ok(LoadOutcome::Stale {
                age,
                captured_at: stored.timestamp,
            });
        }

        let cookies: Vec<CookieRecord> = read_json(&location.cookie_file)?;
        debug!(
            format = ?location.format,
            cookies = cookies.len(),
            age_hours = %format_args!("{:.1}", hours(age)),
            "cached auth loaded"
        );

        Ok(LoadOutcome::Loaded {
            snapshot: stored.into_snapshot(cookies),
            format: location.format,
        })
    }
}

fn try_save(
    profile: &SiteProfile,
    snapshot: &SessionSnapshot,
    lock_timeout: std::time::Duration,
) -> Result<(), StoreError> {
    for path in [&profile.session_file, &profile.cookie_file] {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::io(parent, source))?;
        }
    }

    let _lock = DirLock::exclusive(&profile.session_file, lock_timeout)?;
    write_json_atomic(&profile.cookie_file, &snapshot.cookies)?;
    write_json_atomic(
        &profile.session_file,
        &StoredSession::from_snapshot(snapshot),
    )?;
    Ok(())
}

fn pair_present(session_file: &Path, cookie_file: &Path) -> bool {
    session_file.is_file() && cookie_file.is_file()
}

#[allow(clippy::cast_precision_loss)]
fn hours(age: Duration) -> f64 {
    age.num_milliseconds() as f64 / 3_600_000.0
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let raw = fs::read(path).map_err(|source| StoreError::io(path, source))?;
    serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let payload = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let result = (|| {
        let mut file = File::create(&tmp_path).map_err(|source| StoreError::io(&tmp_path, source))?;
        file.write_all(&payload)
            .and_then(|()| file.sync_all())
            .map_err(|source| StoreError::io(&tmp_path, source))?;
        set_owner_only_permissions(&tmp_path)?;
        fs::rename(&tmp_path, path).map_err(|source| StoreError::io(path, source))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, permissions).map_err(|source| StoreError::io(path, source))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// Advisory lock on the state directory's lock file, released on drop.
struct DirLock {
    file: File,
}

impl DirLock {
    fn exclusive(member: &Path, timeout: std::time::Duration) -> Result<Self, StoreError> {
        let path = lock_path(member);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Lock {
                path: path.clone(),
                source,
            })?;
        acquire(&file, &path, timeout, <File as fs2::FileExt>::try_lock_exclusive)?;
        Ok(Self { file })
    }

    /// Takes the shared lock, or returns `None` when the lock file cannot be
    /// opened read-only (never written, or a read-only state directory).
    fn shared(member: &Path, timeout: std::time::Duration) -> Result<Option<Self>, StoreError> {
        let path = lock_path(member);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(error) => {
                debug!(
                    path = %path.display(),
                    error = %error,
                    "lock file unavailable; reading unlocked"
                );
                return Ok(None);
            }
        };
        acquire(&file, &path, timeout, <File as fs2::FileExt>::try_lock_shared)?;
        Ok(Some(Self { file }))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn acquire(
    file: &File,
    path: &Path,
    timeout: std::time::Duration,
    try_lock: fn(&File) -> std::io::Result<()>,
) -> Result<(), StoreError> {
    let deadline = Instant::now() + timeout;
    loop {
        match try_lock(file) {
            Ok(()) => return Ok(()),
            Err(error)
                if error.kind() == fs2::lock_contended_error().kind()
                    && Instant::now() < deadline =>
            {
                std::thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(source) => {
                return Err(StoreError::Lock {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

fn lock_path(member: &Path) -> PathBuf {
    member
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(LOCK_FILE_NAME)
}
