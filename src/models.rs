//! Sale data model shared by checkout, the offline queue and the writer.
//!
//! Field names serialize in camelCase because the same JSON shapes are
//! persisted in the offline queue and shown to the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of the authenticated actor recording a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Admin,
    Client,
    Guest,
}

impl ActorRole {
    /// Staff may record sales offline with deferred reconciliation.
    pub fn is_staff(self) -> bool {
        matches!(self, ActorRole::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::Client => "client",
            ActorRole::Guest => "guest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "staff" => Some(ActorRole::Admin),
            "client" | "customer" => Some(ActorRole::Client),
            "guest" => Some(ActorRole::Guest),
            _ => None,
        }
    }
}

/// Role recorded on the denormalized client snapshot of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// Walk-in sale without a customer account.
    Guest,
    /// Registered customer placing their own order.
    Client,
    /// Known customer entered by staff.
    Customer,
}

impl ClientRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientRole::Guest => "guest",
            ClientRole::Client => "client",
            ClientRole::Customer => "customer",
        }
    }
}

/// Snapshot of the buyer at the time of sale. Never a live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSnapshot {
    pub id: String,
    pub name: String,
    pub role: ClientRole,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ClientSnapshot {
    pub fn walk_in() -> Self {
        Self {
            id: String::new(),
            name: "Walk-in customer".to_string(),
            role: ClientRole::Guest,
            address: None,
            phone: None,
        }
    }

    /// Whether the snapshot points at a customer document whose stats the
    /// writer should update.
    pub fn has_account(&self) -> bool {
        !self.id.trim().is_empty() && self.role != ClientRole::Guest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    /// Charged to the customer's account.
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    Pending,
    Ready,
    Delivered,
    Cancelled,
}

macro_rules! impl_as_str {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

impl_as_str!(PaymentMethod { Cash => "cash", Card => "card", Transfer => "transfer", Credit => "credit" });
impl_as_str!(PaymentStatus { Paid => "paid", Pending => "pending", Partial => "partial" });
impl_as_str!(FulfillmentStatus {
    Pending => "pending",
    Ready => "ready",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

/// One sold product. Immutable once the sale is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default)]
    pub unit_cost: f64,
}

impl LineItem {
    pub fn line_total(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

/// Payload of a sale before the backend has assigned it an id.
///
/// `created_at` is the provisional client timestamp; the remote record
/// always receives a server timestamp instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleDraft {
    pub total: f64,
    pub client: ClientSnapshot,
    pub seller: String,
    pub store_id: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub created_at: DateTime<Utc>,
    /// Set only when the sale is replayed from the offline queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_created_at: Option<DateTime<Utc>>,
}

/// A sale confirmed written remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub sale: SaleDraft,
    pub items: Vec<LineItem>,
}

/// Durable wrapper around a sale that has not been confirmed remotely.
///
/// Entries are appended or removed as a whole, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub local_id: String,
    pub sale_data: SaleDraft,
    pub items_with_cost: Vec<LineItem>,
    pub queued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Wrap a sale under a fresh, never-reused local id.
    pub fn new(sale_data: SaleDraft, items_with_cost: Vec<LineItem>) -> Self {
        Self {
            local_id: new_local_id(),
            sale_data,
            items_with_cost,
            queued_at: Utc::now(),
        }
    }
}

pub fn new_local_id() -> String {
    format!("offline-{}", Uuid::new_v4())
}
