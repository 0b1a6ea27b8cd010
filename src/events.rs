//! Application event bus.
//!
//! UI layers subscribe to render notices and badges; the sync loop
//! subscribes to react to connectivity and sign-in changes. Emitting never
//! fails: events without subscribers are dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::checkout::CheckoutFailure;
use crate::models::ActorRole;
use crate::sync::SyncStatus;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PosEvent {
    CheckoutSucceeded {
        sale_id: String,
        total: f64,
    },
    /// Non-blocking "saved offline, pending sync" notice.
    SaleQueuedOffline {
        local_id: String,
        failure: CheckoutFailure,
    },
    /// Blocking error; the cart is kept.
    CheckoutRejected {
        failure: CheckoutFailure,
    },
    SuccessNoticeDismissed,
    OsConnectivityChanged {
        online: bool,
    },
    ActorSignedIn {
        uid: String,
        role: ActorRole,
    },
    ActorSignedOut,
    SyncStarted {
        pending: usize,
    },
    /// "N sales synced" notice.
    SalesSynced {
        synced: usize,
        pending: usize,
    },
    SyncStatus(SyncStatus),
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PosEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: PosEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PosEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
