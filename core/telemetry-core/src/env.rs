//! Environment-variable indirection.
//!
//! Reads go through this module rather than `std::env::var` directly so
//! tests can inject values without mutating the real process environment
//! (which is both `unsafe` on current stable Rust and racy across tests
//! running in the same process).

use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static OVERRIDES: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
}

/// Returns the named environment variable, or `None` if unset or empty.
///
/// "Empty" is treated the same as "unset" to match the design's
/// `ANDROID_SDK_HOME` rule ("overrides ... when non-empty").
pub fn get_var(name: &str) -> Option<String> {
    if let Some(value) = OVERRIDES.with(|overrides| overrides.borrow().get(name).cloned()) {
        return non_empty(value);
    }
    std::env::var(name).ok().and_then(non_empty)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Overrides `name` for the current thread, for test injection.
pub fn set_override(name: &str, value: impl Into<String>) {
    OVERRIDES.with(|overrides| {
        overrides.borrow_mut().insert(name.to_string(), value.into());
    });
}

/// Clears a thread-local override, restoring the real process environment.
pub fn clear_override(name: &str) {
    OVERRIDES.with(|overrides| {
        overrides.borrow_mut().remove(name);
    });
}
