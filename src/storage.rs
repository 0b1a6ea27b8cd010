//! Secure credential storage using the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate),
//! on macOS Keychain, and on Linux the Secret Service API. Backend
//! credentials and the remembered actor session live here rather than in
//! SQLite.

use keyring::Entry;
use tracing::{info, warn};

use crate::api;
use crate::auth::Actor;
use crate::models::ActorRole;

const SERVICE_NAME: &str = "shopfront-pos";

// Credential keys
pub const KEY_BACKEND_URL: &str = "backend_url";
pub const KEY_PROJECT_ID: &str = "project_id";
pub const KEY_API_KEY: &str = "api_key";
pub const KEY_STORE_ID: &str = "store_id";
pub const KEY_NOTIFY_URL: &str = "notify_url";
const KEY_SESSION_UID: &str = "session_uid";
const KEY_SESSION_NAME: &str = "session_display_name";
const KEY_SESSION_ROLE: &str = "session_role";
const KEY_SESSION_TOKEN: &str = "session_id_token";

const SESSION_KEYS: &[&str] = &[
    KEY_SESSION_UID,
    KEY_SESSION_NAME,
    KEY_SESSION_ROLE,
    KEY_SESSION_TOKEN,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) if !pw.trim().is_empty() => Some(pw),
        Ok(_) => None,
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The backend is considered configured when a project id is stored.
pub fn is_configured() -> bool {
    get_credential(KEY_PROJECT_ID).is_some()
}

/// Decode a connection string and store each field it carries.
pub fn apply_connection_string(raw: &str) -> Result<(), String> {
    let parsed = api::parse_connection_string(raw).ok_or("Invalid connection string")?;
    if let Some(url) = parsed.url.as_deref() {
        set_credential(KEY_BACKEND_URL, url)?;
    }
    if let Some(key) = parsed.api_key.as_deref() {
        set_credential(KEY_API_KEY, key)?;
    }
    if let Some(project) = parsed.project_id.as_deref() {
        set_credential(KEY_PROJECT_ID, project)?;
    }
    if let Some(store) = parsed.store_id.as_deref() {
        set_credential(KEY_STORE_ID, store)?;
    }
    info!(
        project_id = parsed.project_id.as_deref().unwrap_or(""),
        "backend credentials updated from connection string"
    );
    Ok(())
}

pub fn save_session(actor: &Actor) -> Result<(), String> {
    set_credential(KEY_SESSION_UID, &actor.identity.uid)?;
    set_credential(KEY_SESSION_NAME, &actor.identity.display_name)?;
    set_credential(KEY_SESSION_ROLE, actor.identity.role.as_str())?;
    set_credential(KEY_SESSION_TOKEN, actor.id_token.as_str())?;
    Ok(())
}

pub fn load_session() -> Option<Actor> {
    let uid = get_credential(KEY_SESSION_UID)?;
    let role = ActorRole::parse(&get_credential(KEY_SESSION_ROLE)?)?;
    let token = zeroize::Zeroizing::new(get_credential(KEY_SESSION_TOKEN)?);
    let name = get_credential(KEY_SESSION_NAME).unwrap_or_default();
    Some(Actor::new(&uid, &name, role, token.as_str()))
}

pub fn clear_session() -> Result<(), String> {
    for key in SESSION_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}

