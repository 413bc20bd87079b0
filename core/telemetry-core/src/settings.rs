//! Persistent user-id, opt-in flag, and time-rotating anonymization salt.
//!
//! The settings record is the only persisted configuration surface this
//! crate owns (see `SPEC_FULL.md` §10.3); everything else is a plain setter
//! on `JournalingTracker`/`Publisher`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::fs_lock::{self, LockAttempt};
use crate::hex;
use crate::logger::Logger;

const SALT_LEN: usize = 24;
const USER_ID_LEN: usize = 16;
const WINDOW_DAYS: i64 = 28;
const MONDAY_ALIGNMENT_OFFSET: i64 = 3;

/// Persisted `{userId, optedIn, debugDisablePublishing, saltValue, saltSkew}` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub user_id: String,
    pub has_opted_in: bool,
    pub debug_disable_publishing: bool,
    /// Lowercase hex-encoded salt blob. Usually 24 bytes; see
    /// [`Settings::salt_bytes`] for the padding/truncation rule.
    pub salt_value: String,
    pub salt_skew: i32,
}

impl Settings {
    fn fresh(user_id: String) -> Self {
        Settings {
            user_id,
            has_opted_in: false,
            debug_disable_publishing: false,
            salt_value: hex::encode(&[0u8; SALT_LEN]),
            // Guaranteed to differ from any real skew, forcing salt
            // generation on the first `get_salt` call.
            salt_skew: i32::MIN,
        }
    }

    /// Returns the salt blob, right-padded with zeros to 24 bytes if shorter.
    /// A stored blob longer than 24 bytes is returned as-is, unchanged —
    /// preserved deliberately; see `SPEC_FULL.md` §9.
    pub fn salt_bytes(&self) -> Vec<u8> {
        let mut bytes = hex::decode(&self.salt_value).unwrap_or_default();
        if bytes.len() < SALT_LEN {
            bytes.resize(SALT_LEN, 0);
        }
        bytes
    }

    fn random_user_id() -> String {
        let mut bytes = [0u8; USER_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(&bytes)
    }

    fn random_salt() -> [u8; SALT_LEN] {
        let mut bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }
}

/// The current 28-day salt window index, anchored so boundaries land on
/// Mondays (epoch day 0 was a Thursday, hence the `+3`).
pub fn current_salt_skew_at(now: chrono::DateTime<Utc>) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date");
    let days_since_epoch = now.date_naive().signed_duration_since(epoch).num_days();
    (days_since_epoch + MONDAY_ALIGNMENT_OFFSET).div_euclid(WINDOW_DAYS) as i32
}

pub fn current_salt_skew() -> i32 {
    current_salt_skew_at(Utc::now())
}

fn open_locked(path: &Path, create: bool) -> Result<Option<File>> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if create {
        options.create(true);
    }
    let file = match options.open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !create => return Ok(None),
        Err(err) => return Err(AnalyticsError::io(format!("open {}", path.display()), err)),
    };

    match fs_lock::try_lock_exclusive(&file)
        .map_err(|err| AnalyticsError::io(format!("lock {}", path.display()), err))?
    {
        LockAttempt::Acquired => Ok(Some(file)),
        LockAttempt::Contended => Err(AnalyticsError::contention(path)),
    }
}

/// Loads the settings file. Returns `Ok(None)` if it does not exist.
pub fn load(path: &Path) -> Result<Option<Settings>> {
    if !path.exists() {
        return Ok(None);
    }
    let Some(mut file) = open_locked(path, false)? else {
        return Ok(None);
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|err| AnalyticsError::io(format!("read {}", path.display()), err))?;
    let _ = fs_lock::unlock(&file);

    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|err| AnalyticsError::parse(path, err))
}

/// Writes `settings` to `path` under an exclusive lock, truncating first.
pub fn save(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|err| AnalyticsError::io(format!("create {}", parent.display()), err))?;
    }

    let mut file = open_locked(path, true)?.expect("create=true always yields a handle");
    file.set_len(0)
        .map_err(|err| AnalyticsError::io(format!("truncate {}", path.display()), err))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|err| AnalyticsError::io(format!("seek {}", path.display()), err))?;

    let payload = serde_json::to_vec_pretty(settings)
        .map_err(|err| AnalyticsError::parse(path, err))?;
    file.write_all(&payload)
        .map_err(|err| AnalyticsError::io(format!("write {}", path.display()), err))?;
    file.flush()
        .map_err(|err| AnalyticsError::io(format!("flush {}", path.display()), err))?;
    let _ = fs_lock::unlock(&file);
    Ok(())
}

/// Constructs a fresh settings value, bridging a legacy `uid.txt` first line
/// as `userId` when present, and persists it immediately.
pub fn create_new(path: &Path, legacy_uid_path: Option<&Path>) -> Result<Settings> {
    let user_id = legacy_uid_path
        .and_then(|p| fs_err::read_to_string(p).ok())
        .and_then(|contents| contents.lines().next().map(str::trim).map(str::to_string))
        .filter(|line| !line.is_empty())
        .unwrap_or_else(Settings::random_user_id);

    let settings = Settings::fresh(user_id);
    save(path, &settings)?;
    Ok(settings)
}

/// Process-wide cache of the settings value, owned by the [`Lifecycle`]
/// coordinator (see `lifecycle.rs`) rather than a hidden global, so tests can
/// construct a fresh one per run.
///
/// [`Lifecycle`]: crate::lifecycle::Lifecycle
pub struct SettingsCache {
    path: PathBuf,
    legacy_uid_path: Option<PathBuf>,
    cached: Mutex<Option<Settings>>,
}

impl SettingsCache {
    pub fn new(path: PathBuf, legacy_uid_path: Option<PathBuf>) -> Self {
        SettingsCache {
            path,
            legacy_uid_path,
            cached: Mutex::new(None),
        }
    }

    /// Try cached → load → createNew → in-memory fallback. All failures are
    /// logged; none are raised to the caller.
    pub fn get_instance(&self, logger: &dyn Logger) -> Settings {
        {
            let cached = self.cached.lock().unwrap();
            if let Some(settings) = cached.as_ref() {
                return settings.clone();
            }
        }

        let resolved = self.resolve_from_disk(logger);
        *self.cached.lock().unwrap() = Some(resolved.clone());
        resolved
    }

    /// Load → createNew → in-memory fallback, without touching the cache.
    /// Shared by [`Self::get_instance`] and [`Self::get_salt`] so that a
    /// cache miss always goes through the real persisted record instead of
    /// fabricating a throwaway one.
    fn resolve_from_disk(&self, logger: &dyn Logger) -> Settings {
        match load(&self.path) {
            Ok(Some(settings)) => settings,
            Ok(None) => match create_new(&self.path, self.legacy_uid_path.as_deref()) {
                Ok(settings) => settings,
                Err(err) => {
                    logger.error(&format!("failed to create analytics settings: {err}"));
                    Settings::fresh(Settings::random_user_id())
                }
            },
            Err(err) => {
                logger.warning(&format!("failed to load analytics settings: {err}"));
                match create_new(&self.path, self.legacy_uid_path.as_deref()) {
                    Ok(settings) => settings,
                    Err(err) => {
                        logger.error(&format!("failed to create analytics settings: {err}"));
                        Settings::fresh(Settings::random_user_id())
                    }
                }
            }
        }
    }

    pub fn save(&self, settings: Settings) -> Result<()> {
        save(&self.path, &settings)?;
        *self.cached.lock().unwrap() = Some(settings);
        Ok(())
    }

    pub fn user_id(&self) -> Option<String> {
        self.cached.lock().unwrap().as_ref().map(|s| s.user_id.clone())
    }

    pub fn has_opted_in(&self) -> bool {
        self.cached
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.has_opted_in)
            .unwrap_or(false)
    }

    /// Returns exactly 24 bytes (more if the stored blob is longer),
    /// regenerating and persisting the salt if the current window has
    /// rotated since it was last computed.
    pub fn get_salt(&self, logger: &dyn Logger) -> Result<Vec<u8>> {
        let mut cached = self.cached.lock().unwrap();
        let mut settings = match cached.take() {
            Some(settings) => settings,
            None => self.resolve_from_disk(logger),
        };

        let skew = current_salt_skew();
        if settings.salt_skew != skew {
            settings.salt_value = hex::encode(&Settings::random_salt());
            settings.salt_skew = skew;
            if let Err(err) = save(&self.path, &settings) {
                logger.warning(&format!("failed to persist rotated salt: {err}"));
                *cached = Some(settings.clone());
                return Err(err);
            }
        }

        let bytes = settings.salt_bytes();
        *cached = Some(settings);
        Ok(bytes)
    }
}
