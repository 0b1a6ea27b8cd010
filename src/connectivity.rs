//! Real internet reachability.
//!
//! The operating system's online flag reports "online" behind captive
//! portals and on dead mobile data, so checkout and sync decisions are made
//! on an actual network probe instead. The OS flag is still tracked: an
//! OS-reported offline state short-circuits the probe, and offline→online
//! transitions trigger a sync pass.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api;
use crate::error::ProbeError;
use crate::events::{EventBus, PosEvent};

pub const DEFAULT_PROBE_URL: &str = "https://www.google.com/favicon.ico";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Answers "can we reach the backend right now?".
///
/// Implementations never fail and never hang past their timeout: anything
/// other than a confirmed response is `false`.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probe that issues a lightweight request to a highly available endpoint.
/// A 2xx or 3xx answer counts as reachable.
pub struct HttpProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, String> {
        let url = url.trim();
        if url.is_empty() {
            return Err("Probe URL is empty".into());
        }
        Ok(Self {
            client: api::build_client(timeout)?,
            url: url.to_string(),
            timeout,
        })
    }
}

impl HttpProbe {
    /// One probe round-trip. Returns the status of a successful answer.
    pub async fn check(&self) -> Result<u16, ProbeError> {
        // Cache-buster so intermediaries cannot answer for the endpoint.
        let request = self
            .client
            .head(&self.url)
            .query(&[("_", Utc::now().timestamp_millis().to_string())])
            .send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(resp)) => {
                let status = resp.status();
                if status.is_success() || status.is_redirection() {
                    Ok(status.as_u16())
                } else {
                    Err(ProbeError::Status(status.as_u16()))
                }
            }
            Ok(Err(e)) => Err(ProbeError::Request(api::friendly_error(&self.url, &e))),
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.check().await {
            Ok(status) => {
                debug!(status, "connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

/// Snapshot of both connectivity signals. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub is_online: bool,
    pub is_really_online: bool,
}

/// Tracks the OS-reported flag and confirms it with a probe.
pub struct ConnectivityMonitor {
    os_online: AtomicBool,
    probe: Arc<dyn ConnectivityProbe>,
    events: EventBus,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, events: EventBus) -> Self {
        Self {
            os_online: AtomicBool::new(true),
            probe,
            events,
        }
    }

    /// Record the OS online/offline signal. Emits an event on change only.
    pub fn set_os_online(&self, online: bool) {
        let previous = self.os_online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        if online {
            info!("OS reports network restored");
        } else {
            info!("OS reports network offline");
        }
        self.events.emit(PosEvent::OsConnectivityChanged { online });
    }

    pub fn is_os_online(&self) -> bool {
        self.os_online.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ConnectivityState {
        let is_online = self.is_os_online();
        let is_really_online = is_online && self.probe.probe().await;
        ConnectivityState {
            is_online,
            is_really_online,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for ConnectivityMonitor {
    async fn probe(&self) -> bool {
        self.state().await.is_really_online
    }
}
