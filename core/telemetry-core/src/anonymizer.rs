//! Keyed-hash anonymization of user-supplied strings before they leave the
//! process in a log event.

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::hex;
use crate::logger::Logger;
use crate::settings::SettingsCache;

/// Returns the salted SHA-256 digest of `value`, hex-encoded.
///
/// Empty or absent input maps to an empty string rather than the hash of the
/// empty string, per design: there is nothing to anonymize.
pub fn anonymize_utf8(
    logger: &dyn Logger,
    settings: &SettingsCache,
    value: &str,
) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }

    let salt = settings.get_salt(logger)?;
    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(value.as_bytes());
    Ok(hex::encode(&hasher.finalize()))
}
