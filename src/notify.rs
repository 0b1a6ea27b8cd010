//! Staff push alerts for customer-placed orders.
//!
//! Delivery is best-effort. [`spawn_sale_alert`] runs the request as a
//! detached task whose errors are logged and never reach checkout.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api;
use crate::auth::AuthState;
use crate::error::NotifyError;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleAlert {
    pub transaction_id: String,
    pub client_name: String,
    pub total: f64,
    pub store_id: String,
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, alert: &SaleAlert) -> Result<(), NotifyError>;
}

/// Posts alerts as JSON to a notification endpoint. Without an endpoint
/// every alert fails with [`NotifyError::NotConfigured`].
pub struct HttpPushNotifier {
    client: Client,
    url: Option<String>,
    auth: Arc<AuthState>,
}

impl HttpPushNotifier {
    pub fn new(url: Option<&str>, auth: Arc<AuthState>) -> Result<Self, String> {
        Ok(Self {
            client: api::build_client(NOTIFY_TIMEOUT)?,
            url: url
                .map(api::normalize_base_url)
                .filter(|u| !u.is_empty()),
            auth,
        })
    }
}

#[async_trait]
impl PushNotifier for HttpPushNotifier {
    async fn notify(&self, alert: &SaleAlert) -> Result<(), NotifyError> {
        let url = self.url.as_deref().ok_or(NotifyError::NotConfigured)?;
        let mut req = self.client.post(url).json(alert);
        if let Some(token) = self.auth.id_token() {
            req = req.bearer_auth(token.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| NotifyError::Request(api::friendly_error(url, &e)))?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Fire an alert on a detached task.
pub fn spawn_sale_alert(notifier: Arc<dyn PushNotifier>, alert: SaleAlert) -> JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.notify(&alert).await {
            Ok(()) => info!(transaction_id = %alert.transaction_id, "Staff sale alert sent"),
            Err(NotifyError::NotConfigured) => {
                debug!(transaction_id = %alert.transaction_id, "Sale alert skipped: no endpoint")
            }
            Err(e) => warn!(
                transaction_id = %alert.transaction_id,
                error = %e,
                "Staff sale alert failed"
            ),
        }
    })
}
