//! Shared fakes for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::connectivity::ConnectivityProbe;
use crate::docstore::{CommitResponse, DocumentStore, DocumentWrite};
use crate::error::{NotifyError, StoreError, WriteError};
use crate::models::{
    ClientSnapshot, FulfillmentStatus, LineItem, PaymentMethod, PaymentStatus, QueueEntry,
    SaleDraft,
};
use crate::notify::{PushNotifier, SaleAlert};
use crate::writer::{TransactionWriter, WriteReceipt};

pub fn sample_sale(total: f64) -> SaleDraft {
    SaleDraft {
        total,
        client: ClientSnapshot::walk_in(),
        seller: "staff-1".into(),
        store_id: "store-1".into(),
        payment_method: PaymentMethod::Cash,
        payment_status: PaymentStatus::Paid,
        fulfillment_status: FulfillmentStatus::Delivered,
        created_at: Utc::now(),
        offline_created_at: None,
    }
}

/// Two Coke at 500 and one Water at 200: total 1200.
pub fn sample_items() -> Vec<LineItem> {
    vec![
        LineItem {
            product_id: "p-coke".into(),
            name: "Coke".into(),
            quantity: 2,
            unit_price: 500.0,
            unit_cost: 300.0,
        },
        LineItem {
            product_id: "p-water".into(),
            name: "Water".into(),
            quantity: 1,
            unit_price: 200.0,
            unit_cost: 80.0,
        },
    ]
}

pub fn sample_entry(total: f64) -> QueueEntry {
    QueueEntry::new(sample_sale(total), sample_items())
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

pub struct ScriptedProbe {
    default: bool,
    script: Mutex<VecDeque<bool>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn always(reachable: bool) -> Self {
        Self::sequence(&[], reachable)
    }

    /// Answer from `script` in order, then `default` forever.
    pub fn sequence(script: &[bool], default: bool) -> Self {
        Self {
            default,
            script: Mutex::new(script.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn probe(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default)
    }
}

// ---------------------------------------------------------------------------
// Transaction writer
// ---------------------------------------------------------------------------

enum WriterMode {
    Succeed,
    Fail,
    Hang,
    /// Fail when the sale total matches one of these values.
    FailTotals(Vec<f64>),
}

pub struct ScriptedWriter {
    mode: WriterMode,
    ids: Mutex<VecDeque<String>>,
    sales: Mutex<Vec<SaleDraft>>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedWriter {
    fn with_mode(mode: WriterMode) -> Self {
        Self {
            mode,
            ids: Mutex::new(VecDeque::new()),
            sales: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Every write succeeds. Receipts take ids from `ids` in order, then
    /// `tx-{n}`.
    pub fn succeeding(ids: &[&str]) -> Self {
        let writer = Self::with_mode(WriterMode::Succeed);
        *writer.ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        writer
    }

    pub fn failing() -> Self {
        Self::with_mode(WriterMode::Fail)
    }

    pub fn hanging() -> Self {
        Self::with_mode(WriterMode::Hang)
    }

    pub fn failing_totals(totals: &[f64]) -> Self {
        Self::with_mode(WriterMode::FailTotals(totals.to_vec()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Start instant of every write, on the tokio clock.
    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Sales whose write succeeded, in call order.
    pub fn written(&self) -> Vec<SaleDraft> {
        self.sales.lock().unwrap().clone()
    }
}

fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap()
}

#[async_trait]
impl TransactionWriter for ScriptedWriter {
    async fn write(&self, sale: &SaleDraft, _items: &[LineItem]) -> Result<WriteReceipt, WriteError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.call_times.lock().unwrap().push(tokio::time::Instant::now());
        let fail = match &self.mode {
            WriterMode::Succeed => false,
            WriterMode::Fail => true,
            WriterMode::Hang => {
                std::future::pending::<()>().await;
                true
            }
            WriterMode::FailTotals(totals) => totals.contains(&sale.total),
        };
        if fail {
            return Err(WriteError::Commit(StoreError::Transport(
                "connection reset".into(),
            )));
        }
        self.sales.lock().unwrap().push(sale.clone());
        let id = self
            .ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("tx-{n}"));
        Ok(WriteReceipt {
            id,
            created_at: fixed_time(),
        })
    }
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

/// Applies nothing from a failed commit, mirroring an atomic backend.
#[derive(Default)]
pub struct RecordingStore {
    next_error: Mutex<Option<StoreError>>,
    applied: Mutex<Vec<DocumentWrite>>,
    attempts: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: StoreError) {
        *self.next_error.lock().unwrap() = Some(err);
    }

    pub fn commit_time(&self) -> DateTime<Utc> {
        fixed_time()
    }

    pub fn commit_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Ids of created sale documents.
    pub fn applied_sales(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .filter_map(|w| match w {
                DocumentWrite::Create { path, .. } => Some(path.id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn applied_increments(&self) -> Vec<DocumentWrite> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .filter(|w| matches!(w, DocumentWrite::Increment { .. }))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<CommitResponse, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_error.lock().unwrap().take() {
            return Err(err);
        }
        self.applied.lock().unwrap().extend(writes);
        Ok(CommitResponse {
            commit_time: fixed_time(),
        })
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<SaleAlert>>,
}

impl RecordingNotifier {
    pub fn ok() -> Self {
        Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every alert attempted, including failed ones.
    pub fn sent(&self) -> Vec<SaleAlert> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushNotifier for RecordingNotifier {
    async fn notify(&self, alert: &SaleAlert) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(alert.clone());
        if self.fail {
            return Err(NotifyError::Status(503));
        }
        Ok(())
    }
}
