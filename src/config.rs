//! Runtime configuration.
//!
//! Layers, lowest precedence first: built-in defaults, `local_settings`
//! rows, OS keyring credentials, `SHOPFRONT_*` environment variables.
//! Out-of-range or unparseable values are logged and ignored.

use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::api;
use crate::connectivity::{DEFAULT_PROBE_TIMEOUT, DEFAULT_PROBE_URL};
use crate::db;
use crate::docstore::DEFAULT_BACKEND_URL;
use crate::storage;

const APP_DIR_NAME: &str = "app.shopfront.pos";

/// Checkout timing and retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutPolicy {
    pub write_timeout: Duration,
    /// Extra attempts after the first failed customer write.
    pub customer_retries: u32,
    pub customer_retry_delay: Duration,
    pub success_notice_ttl: Duration,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            customer_retries: 2,
            customer_retry_delay: Duration::from_secs(3),
            success_notice_ttl: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Delay before the startup pass so the backend session can settle.
    pub startup_delay: Duration,
    pub interval: Duration,
    pub write_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(2),
            interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub url: String,
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROBE_URL.to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct BackendSettings {
    pub url: String,
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub store_id: String,
    pub notify_url: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            project_id: None,
            api_key: None,
            store_id: "default".to_string(),
            notify_url: None,
        }
    }
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("url", &self.url)
            .field("project_id", &self.project_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("store_id", &self.store_id)
            .field("notify_url", &self.notify_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PosConfig {
    pub checkout: CheckoutPolicy,
    pub sync: SyncSettings,
    pub probe: ProbeSettings,
    pub backend: BackendSettings,
    pub data_dir: PathBuf,
}

impl Default for PosConfig {
    fn default() -> Self {
        Self {
            checkout: CheckoutPolicy::default(),
            sync: SyncSettings::default(),
            probe: ProbeSettings::default(),
            backend: BackendSettings::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Per-user application data directory.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}

// ---------------------------------------------------------------------------
// Setting keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    ProbeUrl,
    ProbeTimeoutMs,
    WriteTimeoutMs,
    CustomerRetries,
    RetryDelayMs,
    SuccessNoticeMs,
    SyncStartupDelayMs,
    SyncIntervalMs,
    BackendUrl,
    ProjectId,
    ApiKey,
    StoreId,
    NotifyUrl,
}

/// `(key, local_settings category, local_settings key, env var)`.
/// The API key is never read from SQLite.
const KEYS: &[(Key, &str, &str, &str)] = &[
    (Key::ProbeUrl, "checkout", "probe_url", "SHOPFRONT_PROBE_URL"),
    (Key::ProbeTimeoutMs, "checkout", "probe_timeout_ms", "SHOPFRONT_PROBE_TIMEOUT_MS"),
    (Key::WriteTimeoutMs, "checkout", "write_timeout_ms", "SHOPFRONT_WRITE_TIMEOUT_MS"),
    (Key::CustomerRetries, "checkout", "customer_retries", "SHOPFRONT_CUSTOMER_RETRIES"),
    (Key::RetryDelayMs, "checkout", "retry_delay_ms", "SHOPFRONT_RETRY_DELAY_MS"),
    (Key::SuccessNoticeMs, "checkout", "success_notice_ms", "SHOPFRONT_SUCCESS_NOTICE_MS"),
    (Key::SyncStartupDelayMs, "sync", "startup_delay_ms", "SHOPFRONT_SYNC_STARTUP_DELAY_MS"),
    (Key::SyncIntervalMs, "sync", "interval_ms", "SHOPFRONT_SYNC_INTERVAL_MS"),
    (Key::BackendUrl, "backend", "url", "SHOPFRONT_BACKEND_URL"),
    (Key::ProjectId, "backend", "project_id", "SHOPFRONT_PROJECT_ID"),
    (Key::ApiKey, "", "", "SHOPFRONT_API_KEY"),
    (Key::StoreId, "backend", "store_id", "SHOPFRONT_STORE_ID"),
    (Key::NotifyUrl, "backend", "notify_url", "SHOPFRONT_NOTIFY_URL"),
];

fn parse_ms(raw: &str, min: u64, max: u64) -> Result<Duration, String> {
    let ms: u64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("not a number of milliseconds: {raw:?}"))?;
    if !(min..=max).contains(&ms) {
        return Err(format!("{ms}ms outside {min}..={max}"));
    }
    Ok(Duration::from_millis(ms))
}

fn non_empty(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty value".into());
    }
    Ok(trimmed.to_string())
}

impl PosConfig {
    fn apply(&mut self, key: Key, raw: &str) -> Result<(), String> {
        match key {
            Key::ProbeUrl => self.probe.url = non_empty(raw)?,
            Key::ProbeTimeoutMs => self.probe.timeout = parse_ms(raw, 500, 10_000)?,
            Key::WriteTimeoutMs => {
                let timeout = parse_ms(raw, 1_000, 60_000)?;
                self.checkout.write_timeout = timeout;
                self.sync.write_timeout = timeout;
            }
            Key::CustomerRetries => {
                let retries: u32 = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("not a retry count: {raw:?}"))?;
                if retries > 5 {
                    return Err(format!("{retries} retries exceeds 5"));
                }
                self.checkout.customer_retries = retries;
            }
            Key::RetryDelayMs => self.checkout.customer_retry_delay = parse_ms(raw, 0, 30_000)?,
            Key::SuccessNoticeMs => self.checkout.success_notice_ttl = parse_ms(raw, 0, 60_000)?,
            Key::SyncStartupDelayMs => self.sync.startup_delay = parse_ms(raw, 0, 60_000)?,
            Key::SyncIntervalMs => self.sync.interval = parse_ms(raw, 5_000, 3_600_000)?,
            Key::BackendUrl => {
                let url = api::normalize_base_url(raw);
                self.backend.url = non_empty(&url)?;
            }
            Key::ProjectId => self.backend.project_id = Some(non_empty(raw)?),
            Key::ApiKey => self.backend.api_key = Some(non_empty(raw)?),
            Key::StoreId => self.backend.store_id = non_empty(raw)?,
            Key::NotifyUrl => self.backend.notify_url = Some(api::normalize_base_url(&non_empty(raw)?)),
        }
        Ok(())
    }

    fn apply_logged(&mut self, key: Key, source: &str, raw: &str) {
        if let Err(e) = self.apply(key, raw) {
            warn!(setting = ?key, source, "Ignoring invalid setting: {e}");
        }
    }

    /// Overlay values stored in `local_settings`.
    pub fn apply_local_settings(&mut self, conn: &Connection) {
        for (key, category, name, _) in KEYS {
            if category.is_empty() {
                continue;
            }
            if let Some(raw) = db::get_setting(conn, category, name) {
                self.apply_logged(*key, "local_settings", &raw);
            }
        }
    }

    /// Overlay backend credentials from the OS keyring.
    pub fn apply_credentials(&mut self) {
        let pairs = [
            (Key::BackendUrl, storage::KEY_BACKEND_URL),
            (Key::ProjectId, storage::KEY_PROJECT_ID),
            (Key::ApiKey, storage::KEY_API_KEY),
            (Key::StoreId, storage::KEY_STORE_ID),
            (Key::NotifyUrl, storage::KEY_NOTIFY_URL),
        ];
        for (key, credential) in pairs {
            if let Some(raw) = storage::get_credential(credential) {
                self.apply_logged(key, "keyring", &raw);
            }
        }
    }

    /// Overlay values from a variable lookup (the process environment in
    /// production).
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("SHOPFRONT_CONNECTION_STRING") {
            match api::parse_connection_string(&raw) {
                Some(parsed) => {
                    if let Some(url) = parsed.url {
                        self.backend.url = url;
                    }
                    if parsed.project_id.is_some() {
                        self.backend.project_id = parsed.project_id;
                    }
                    if parsed.api_key.is_some() {
                        self.backend.api_key = parsed.api_key;
                    }
                    if let Some(store) = parsed.store_id {
                        self.backend.store_id = store;
                    }
                }
                None => warn!("Ignoring unparseable SHOPFRONT_CONNECTION_STRING"),
            }
        }
        for (key, _, _, env) in KEYS {
            if let Some(raw) = lookup(env) {
                self.apply_logged(*key, "env", &raw);
            }
        }
        if let Some(dir) = lookup("SHOPFRONT_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir.trim());
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }
}

/// Data directory from the environment or the per-user default. Needed
/// before the database (and therefore the full config) is available.
pub fn resolve_data_dir() -> PathBuf {
    std::env::var("SHOPFRONT_DATA_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .map(|d| PathBuf::from(d.trim()))
        .unwrap_or_else(default_data_dir)
}

/// Full layered load.
pub fn load(conn: &Connection) -> PosConfig {
    let mut config = PosConfig {
        data_dir: resolve_data_dir(),
        ..PosConfig::default()
    };
    config.apply_local_settings(conn);
    config.apply_credentials();
    config.apply_process_env();
    config
}
