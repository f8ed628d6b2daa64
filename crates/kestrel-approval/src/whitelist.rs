use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use kestrel_core::config::WhitelistScope;

const SCOPE_SEPARATOR: char = '\u{1f}';

/// Build the whitelist key for a session (and tool, under `SessionTool` scope).
pub fn scope_key(scope: WhitelistScope, session_id: &str, tool: &str) -> String {
    match scope {
        WhitelistScope::Session => session_id.to_string(),
        WhitelistScope::SessionTool => format!("{}{}{}", session_id, SCOPE_SEPARATOR, tool),
    }
}

/// True if `key` belongs to `session_id` under either scope.
fn key_in_session(key: &str, session_id: &str) -> bool {
    match key.strip_prefix(session_id) {
        Some("") => true,
        Some(rest) => rest.starts_with(SCOPE_SEPARATOR),
        None => false,
    }
}

/// Scope key -> expiry. Entries are checked lazily against the caller's
/// clock; an expired entry behaves as absent until it is overwritten.
#[derive(Debug, Default)]
pub struct Whitelist {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or refresh an entry. The new expiry replaces the old one.
    pub fn grant(&self, key: impl Into<String>, expires_at: DateTime<Utc>) {
        self.lock().insert(key.into(), expires_at);
    }

    /// Live expiry for `key`, if any.
    pub fn expiry(&self, key: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lock().get(key).copied().filter(|exp| *exp > now)
    }

    pub fn covers(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.expiry(key, now).is_some()
    }

    /// Whether any live entry belongs to `session_id`, whatever the scope.
    pub fn covers_session(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        self.lock()
            .iter()
            .any(|(key, exp)| *exp > now && key_in_session(key, session_id))
    }

    /// Remove an entry. Returns whether one existed.
    pub fn revoke(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
