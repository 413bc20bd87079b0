//! Settings-home and spool-directory resolution.
//!
//! Pure derivations from environment and home directory; no I/O.

use std::path::PathBuf;

use crate::env;

const SDK_HOME_ENV: &str = "ANDROID_SDK_HOME";
const SETTINGS_DIR_NAME: &str = ".android";
const SPOOL_SUBDIR: &str = "metrics/spool";
const SETTINGS_FILE_NAME: &str = "analytics.settings";
const LEGACY_UID_FILE_NAME: &str = "uid.txt";

/// Returns `$ANDROID_SDK_HOME` if non-empty, else `<home>/.android`.
pub fn android_settings_home() -> Option<PathBuf> {
    if let Some(value) = env::get_var(SDK_HOME_ENV) {
        return Some(PathBuf::from(value));
    }
    dirs::home_dir().map(|home| home.join(SETTINGS_DIR_NAME))
}

/// Returns `<settings-home>/metrics/spool`.
pub fn spool_directory() -> Option<PathBuf> {
    android_settings_home().map(|home| home.join(SPOOL_SUBDIR))
}

/// Returns `<settings-home>/analytics.settings`.
pub fn settings_file_path() -> Option<PathBuf> {
    android_settings_home().map(|home| home.join(SETTINGS_FILE_NAME))
}

/// Returns `<settings-home>/uid.txt`, the legacy bridge path.
pub fn legacy_uid_path() -> Option<PathBuf> {
    android_settings_home().map(|home| home.join(LEGACY_UID_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{clear_override, set_override};

    #[test]
    fn sdk_home_env_override_wins() {
        set_override("ANDROID_SDK_HOME", "/opt/sdk-home");
        assert_eq!(android_settings_home(), Some(PathBuf::from("/opt/sdk-home")));
        clear_override("ANDROID_SDK_HOME");
    }

    #[test]
    fn spool_directory_is_nested_under_settings_home() {
        set_override("ANDROID_SDK_HOME", "/opt/sdk-home");
        assert_eq!(
            spool_directory(),
            Some(PathBuf::from("/opt/sdk-home/metrics/spool"))
        );
        clear_override("ANDROID_SDK_HOME");
    }
}
