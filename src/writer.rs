//! Transaction writer: one sale's backend effects as a single atomic batch.
//!
//! A sale produces, in one commit:
//! - a new `sales/{id}` document stamped with the server time,
//! - a relative `stock` decrement on each sold product,
//! - an `orderCount` increment on the customer document, when the sale has
//!   a customer account.
//!
//! The writer is not idempotent: each call creates a new sale document.
//! Callers guarantee a queued sale is replayed only until one call is
//! confirmed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::docstore::{Delta, DocPath, DocumentStore, DocumentWrite, FieldValue};
use crate::error::WriteError;
use crate::models::{LineItem, SaleDraft};

pub const SALES_COLLECTION: &str = "sales";
pub const PRODUCTS_COLLECTION: &str = "products";
pub const USERS_COLLECTION: &str = "users";
const STOCK_FIELD: &str = "stock";
const ORDER_COUNT_FIELD: &str = "orderCount";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReceipt {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait TransactionWriter: Send + Sync {
    async fn write(&self, sale: &SaleDraft, items: &[LineItem]) -> Result<WriteReceipt, WriteError>;
}

/// Run one write under a deadline. A timed-out write is reported as
/// unconfirmed.
pub async fn write_with_timeout(
    writer: &dyn TransactionWriter,
    sale: &SaleDraft,
    items: &[LineItem],
    timeout: Duration,
) -> Result<WriteReceipt, WriteError> {
    match tokio::time::timeout(timeout, writer.write(sale, items)).await {
        Ok(result) => result,
        Err(_) => Err(WriteError::Timeout(timeout)),
    }
}

fn validate(sale: &SaleDraft, items: &[LineItem]) -> Result<(), WriteError> {
    if items.is_empty() {
        return Err(WriteError::InvalidSale("sale has no items".into()));
    }
    if !(sale.total.is_finite() && sale.total >= 0.0) {
        return Err(WriteError::InvalidSale(format!("invalid total {}", sale.total)));
    }
    for item in items {
        if item.quantity == 0 {
            return Err(WriteError::InvalidSale(format!(
                "{} has zero quantity",
                item.name
            )));
        }
        if !(item.unit_price.is_finite() && item.unit_price >= 0.0)
            || !(item.unit_cost.is_finite() && item.unit_cost >= 0.0)
        {
            return Err(WriteError::InvalidSale(format!(
                "{} has an invalid price or cost",
                item.name
            )));
        }
        if item.product_id.trim().is_empty() {
            return Err(WriteError::InvalidSale(format!(
                "{} has no product id",
                item.name
            )));
        }
    }
    Ok(())
}

fn sale_fields(sale: &SaleDraft, items: &[LineItem]) -> Result<BTreeMap<String, FieldValue>, WriteError> {
    let json = serde_json::to_value(sale)
        .map_err(|e| WriteError::InvalidSale(format!("serialize sale: {e}")))?;
    let FieldValue::Map(mut fields) = FieldValue::from_json(&json) else {
        return Err(WriteError::InvalidSale("sale did not serialize to an object".into()));
    };

    let items_json = serde_json::to_value(items)
        .map_err(|e| WriteError::InvalidSale(format!("serialize items: {e}")))?;
    fields.insert("items".into(), FieldValue::from_json(&items_json));
    fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
    match sale.offline_created_at {
        Some(ts) => {
            fields.insert("offlineCreatedAt".into(), FieldValue::Timestamp(ts));
            fields.insert("syncedFromOffline".into(), FieldValue::Bool(true));
        }
        None => {
            fields.insert("syncedFromOffline".into(), FieldValue::Bool(false));
        }
    }
    Ok(fields)
}

/// Build the commit batch for one sale.
pub fn build_sale_writes(
    sale_id: &str,
    sale: &SaleDraft,
    items: &[LineItem],
) -> Result<Vec<DocumentWrite>, WriteError> {
    validate(sale, items)?;

    let mut writes = vec![DocumentWrite::Create {
        path: DocPath::new(SALES_COLLECTION, sale_id),
        fields: sale_fields(sale, items)?,
    }];

    // One decrement per product, in first-seen order.
    let mut per_product: Vec<(&str, i64)> = Vec::new();
    for item in items {
        let qty = i64::from(item.quantity);
        match per_product.iter().position(|(id, _)| *id == item.product_id) {
            Some(pos) => per_product[pos].1 += qty,
            None => per_product.push((item.product_id.as_str(), qty)),
        }
    }
    for (product_id, qty) in per_product {
        writes.push(DocumentWrite::Increment {
            path: DocPath::new(PRODUCTS_COLLECTION, product_id),
            field: STOCK_FIELD.into(),
            delta: Delta::Integer(-qty),
            must_exist: true,
        });
    }

    // Missing customer documents are created holding just the counter.
    if sale.client.has_account() {
        writes.push(DocumentWrite::Increment {
            path: DocPath::new(USERS_COLLECTION, &sale.client.id),
            field: ORDER_COUNT_FIELD.into(),
            delta: Delta::Integer(1),
            must_exist: false,
        });
    }

    Ok(writes)
}

/// [`TransactionWriter`] over an atomic [`DocumentStore`] commit.
pub struct BatchTransactionWriter {
    store: Arc<dyn DocumentStore>,
}

impl BatchTransactionWriter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TransactionWriter for BatchTransactionWriter {
    async fn write(&self, sale: &SaleDraft, items: &[LineItem]) -> Result<WriteReceipt, WriteError> {
        let sale_id = Uuid::new_v4().simple().to_string();
        let writes = build_sale_writes(&sale_id, sale, items)?;
        let write_count = writes.len();

        match self.store.commit(writes).await {
            Ok(resp) => {
                info!(
                    sale_id = %sale_id,
                    total = sale.total,
                    writes = write_count,
                    replayed = sale.offline_created_at.is_some(),
                    "Sale committed"
                );
                Ok(WriteReceipt {
                    id: sale_id,
                    created_at: resp.commit_time,
                })
            }
            Err(e) => {
                warn!(total = sale.total, error = %e, "Sale commit failed");
                Err(WriteError::Commit(e))
            }
        }
    }
}
