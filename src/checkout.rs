//! Checkout orchestrator.
//!
//! One [`Checkout::submit`] call runs the phase machine
//! `Idle → Probing → {DirectWrite | Queued | Rejected}` and, from
//! `DirectWrite`, `{Success | RetryWait → DirectWrite | Queued | Failed}`.
//! The decision table lives in [`next_phase`]; `submit` only performs the
//! I/O each phase asks for.
//!
//! Staff sales are never lost to a bad connection: when the backend cannot
//! be confirmed they go to the offline queue. Customer orders are never
//! queued on the customer's behalf: they are retried a bounded number of
//! times and then rejected with the cart left intact.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::auth::{ActorIdentity, AuthState};
use crate::cart::Cart;
use crate::config::CheckoutPolicy;
use crate::connectivity::ConnectivityProbe;
use crate::db::{self, DbState, JournalOutcome, JournalRow};
use crate::error::WriteError;
use crate::events::{EventBus, PosEvent};
use crate::models::{
    ActorRole, ClientRole, ClientSnapshot, FulfillmentStatus, LineItem, PaymentMethod, PaymentStatus,
    QueueEntry, SaleDraft, SaleRecord,
};
use crate::notify::{spawn_sale_alert, PushNotifier, SaleAlert};
use crate::offline_queue::OfflineQueue;
use crate::writer::{write_with_timeout, TransactionWriter};

// ---------------------------------------------------------------------------
// Phase machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CheckoutPhase {
    #[default]
    Idle,
    Probing,
    /// Attempt number, starting at 1.
    DirectWrite { attempt: u32 },
    /// Waiting after failed attempt `attempt`.
    RetryWait { attempt: u32 },
    Queued,
    /// Customer checkout refused while offline.
    Rejected,
    Success,
    /// Customer checkout whose every write attempt failed.
    Failed,
}

impl CheckoutPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CheckoutPhase::Queued
                | CheckoutPhase::Rejected
                | CheckoutPhase::Success
                | CheckoutPhase::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignal {
    Start,
    Probed { reachable: bool },
    WriteConfirmed,
    WriteFailed,
    RetryElapsed,
}

/// Pure transition function. Signals that do not apply to `phase` leave it
/// unchanged.
pub fn next_phase(
    phase: CheckoutPhase,
    signal: PhaseSignal,
    staff: bool,
    max_attempts: u32,
) -> CheckoutPhase {
    use CheckoutPhase::*;
    use PhaseSignal::*;

    match (phase, signal) {
        (Idle, Start) => Probing,
        (Probing, Probed { reachable: true }) => DirectWrite { attempt: 1 },
        (Probing, Probed { reachable: false }) if staff => Queued,
        (Probing, Probed { reachable: false }) => Rejected,
        (DirectWrite { .. }, WriteConfirmed) => Success,
        (DirectWrite { .. }, WriteFailed) if staff => Queued,
        (DirectWrite { attempt }, WriteFailed) if attempt < max_attempts => RetryWait { attempt },
        (DirectWrite { .. }, WriteFailed) => Failed,
        (RetryWait { attempt }, RetryElapsed) => DirectWrite {
            attempt: attempt + 1,
        },
        (unchanged, _) => unchanged,
    }
}

// ---------------------------------------------------------------------------
// Checkout view state
// ---------------------------------------------------------------------------

/// Structured payload of a deferred or refused checkout. Carries enough to
/// render an actionable message and to reconstruct the sale for support.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutFailure {
    pub items_summary: String,
    pub total: f64,
    pub timestamp: DateTime<Utc>,
    pub is_offline: bool,
    pub is_admin: bool,
    pub is_pending_sync: bool,
    pub message: String,
    /// Blocking errors need acknowledgement; pending-sync notices do not.
    pub blocking: bool,
}

/// Everything a UI renders for the checkout screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub cart: Cart,
    pub phase: CheckoutPhase,
    /// Busy indicator. Raised only after the probe has picked a strategy.
    pub is_processing: bool,
    pub last_sale: Option<SaleRecord>,
    pub show_checkout_success: bool,
    pub checkout_error: Option<CheckoutFailure>,
}

/// Sale attributes chosen at the till.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleOptions {
    pub client: ClientSnapshot,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
}

impl Default for SaleOptions {
    fn default() -> Self {
        Self {
            client: ClientSnapshot::walk_in(),
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::Paid,
            fulfillment_status: FulfillmentStatus::Delivered,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    /// Empty cart, no session, or a checkout already running.
    Ignored,
    Committed(SaleRecord),
    Queued { local_id: String },
    Rejected(CheckoutFailure),
}

/// Collaborators of a [`Checkout`].
pub struct CheckoutPorts {
    pub probe: Arc<dyn ConnectivityProbe>,
    pub writer: Arc<dyn TransactionWriter>,
    pub queue: Arc<OfflineQueue>,
    pub auth: Arc<AuthState>,
    pub notifier: Arc<dyn PushNotifier>,
    pub events: EventBus,
    /// Sale journal; `None` disables journaling.
    pub journal: Option<Arc<DbState>>,
}

pub struct Checkout {
    view: Arc<Mutex<CheckoutView>>,
    ports: CheckoutPorts,
    policy: CheckoutPolicy,
    store_id: String,
    /// Bumped on every success so a stale auto-dismiss cannot hide a newer
    /// notice.
    notice_generation: Arc<AtomicU64>,
}

fn lock_view(view: &Mutex<CheckoutView>) -> MutexGuard<'_, CheckoutView> {
    // The view holds plain data; a panic mid-update leaves it usable.
    view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases the checkout session when `submit` returns or its future is
/// dropped. A phase left mid-flight goes back to `Idle`.
struct ActiveCheckout<'a> {
    view: &'a Mutex<CheckoutView>,
}

impl Drop for ActiveCheckout<'_> {
    fn drop(&mut self) {
        let mut view = lock_view(self.view);
        view.is_processing = false;
        if !view.phase.is_terminal() {
            debug!(phase = ?view.phase, "Checkout abandoned before finishing");
            view.phase = CheckoutPhase::Idle;
        }
    }
}

impl Checkout {
    pub fn new(ports: CheckoutPorts, policy: CheckoutPolicy, store_id: &str) -> Self {
        Self {
            view: Arc::new(Mutex::new(CheckoutView::default())),
            ports,
            policy,
            store_id: store_id.to_string(),
            notice_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn view(&self) -> CheckoutView {
        lock_view(&self.view).clone()
    }

    // -- cart editing -------------------------------------------------------

    pub fn add_to_cart(
        &self,
        product_id: &str,
        name: &str,
        quantity: u32,
        unit_price: f64,
        unit_cost: f64,
    ) -> Result<(), String> {
        lock_view(&self.view)
            .cart
            .add(product_id, name, quantity, unit_price, unit_cost)
    }

    pub fn set_quantity(&self, product_id: &str, quantity: u32) {
        lock_view(&self.view).cart.set_quantity(product_id, quantity);
    }

    pub fn remove_from_cart(&self, product_id: &str) {
        lock_view(&self.view).cart.remove(product_id);
    }

    pub fn clear_cart(&self) {
        lock_view(&self.view).cart.clear();
    }

    pub fn dismiss_error(&self) {
        lock_view(&self.view).checkout_error = None;
    }

    pub fn dismiss_success(&self) {
        self.notice_generation.fetch_add(1, Ordering::SeqCst);
        let was_shown = std::mem::replace(&mut lock_view(&self.view).show_checkout_success, false);
        if was_shown {
            self.ports.events.emit(PosEvent::SuccessNoticeDismissed);
        }
    }

    // -- submit -------------------------------------------------------------

    /// Run one checkout of the current cart.
    pub async fn submit(&self, options: SaleOptions) -> CheckoutOutcome {
        let Some(actor) = self.ports.auth.current() else {
            debug!("Checkout ignored: no authenticated actor");
            return CheckoutOutcome::Ignored;
        };

        // Snapshot the cart and claim the session in one critical section.
        let (items, items_summary, total) = {
            let mut view = lock_view(&self.view);
            if view.cart.is_empty() {
                debug!("Checkout ignored: cart is empty");
                return CheckoutOutcome::Ignored;
            }
            if view.is_processing || !(view.phase.is_terminal() || view.phase == CheckoutPhase::Idle)
            {
                debug!("Checkout ignored: another checkout is in progress");
                return CheckoutOutcome::Ignored;
            }
            view.phase = CheckoutPhase::Probing;
            view.checkout_error = None;
            (view.cart.to_line_items(), view.cart.items_summary(), view.cart.total())
        };
        let _active = ActiveCheckout { view: &self.view };

        let staff = actor.role.is_staff();
        let sale = self.build_sale(&actor, options, total);
        let max_attempts = self.policy.customer_retries + 1;

        let mut phase = next_phase(CheckoutPhase::Idle, PhaseSignal::Start, staff, max_attempts);
        let mut reachable = false;
        let mut receipt = None;
        let mut last_error: Option<WriteError> = None;

        while !phase.is_terminal() {
            let signal = match phase {
                CheckoutPhase::Probing => {
                    reachable = self.ports.probe.probe().await;
                    debug!(reachable, "Checkout connectivity probe");
                    PhaseSignal::Probed { reachable }
                }
                CheckoutPhase::DirectWrite { attempt } => {
                    match write_with_timeout(
                        self.ports.writer.as_ref(),
                        &sale,
                        &items,
                        self.policy.write_timeout,
                    )
                    .await
                    {
                        Ok(r) => {
                            receipt = Some(r);
                            PhaseSignal::WriteConfirmed
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "Checkout write attempt failed");
                            last_error = Some(e);
                            PhaseSignal::WriteFailed
                        }
                    }
                }
                CheckoutPhase::RetryWait { .. } => {
                    tokio::time::sleep(self.policy.customer_retry_delay).await;
                    PhaseSignal::RetryElapsed
                }
                _ => PhaseSignal::Start,
            };
            let next = next_phase(phase, signal, staff, max_attempts);
            if next == phase {
                error!(?phase, ?signal, "Checkout phase machine stalled");
                break;
            }
            phase = next;
            let mut view = lock_view(&self.view);
            view.phase = phase;
            if !phase.is_terminal() && phase != CheckoutPhase::Probing {
                view.is_processing = true;
            }
        }

        let failure = |message: String, is_pending_sync: bool, blocking: bool| CheckoutFailure {
            items_summary: items_summary.clone(),
            total,
            timestamp: Utc::now(),
            is_offline: !reachable,
            is_admin: staff,
            is_pending_sync,
            message,
            blocking,
        };

        match (phase, receipt) {
            (CheckoutPhase::Success, Some(receipt)) => {
                let record = SaleRecord {
                    id: receipt.id,
                    created_at: receipt.created_at,
                    sale,
                    items,
                };
                self.finish_success(&actor, record, &items_summary)
            }
            (CheckoutPhase::Queued, _) => {
                self.finish_queued(&actor, sale, items, &items_summary, &failure)
            }
            (CheckoutPhase::Rejected, _) => {
                let message = format!(
                    "You are offline. Your order was not placed: {items_summary} (total {total:.2}). \
                     Please try again when you are back online."
                );
                self.finish_rejected(&actor, failure(message, false, true))
            }
            _ => {
                let reason = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "write not confirmed".into());
                let message = format!(
                    "Your order could not be placed after {max_attempts} attempts: \
                     {items_summary} (total {total:.2}). {reason}"
                );
                self.finish_rejected(&actor, failure(message, false, true))
            }
        }
    }

    fn build_sale(&self, actor: &ActorIdentity, options: SaleOptions, total: f64) -> SaleDraft {
        // A signed-in customer orders for themselves.
        let client = if actor.role == ActorRole::Client
            && !options.client.has_account()
        {
            ClientSnapshot {
                id: actor.uid.clone(),
                name: actor.display_name.clone(),
                role: ClientRole::Client,
                address: options.client.address,
                phone: options.client.phone,
            }
        } else {
            options.client
        };
        SaleDraft {
            total,
            client,
            seller: actor.uid.clone(),
            store_id: self.store_id.clone(),
            payment_method: options.payment_method,
            payment_status: options.payment_status,
            fulfillment_status: options.fulfillment_status,
            created_at: Utc::now(),
            offline_created_at: None,
        }
    }

    fn journal(&self, outcome: JournalOutcome, row: JournalRow<'_>) {
        if let Some(db) = &self.ports.journal {
            db::journal_best_effort(db, outcome, &row);
        }
    }

    fn finish_success(
        &self,
        actor: &ActorIdentity,
        record: SaleRecord,
        items_summary: &str,
    ) -> CheckoutOutcome {
        info!(sale_id = %record.id, total = record.sale.total, "Checkout committed");
        self.journal(
            JournalOutcome::Committed,
            JournalRow {
                remote_id: Some(&record.id),
                total: record.sale.total,
                items_summary,
                actor_role: Some(actor.role.as_str()),
                ..JournalRow::default()
            },
        );

        let generation = self.notice_generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut view = lock_view(&self.view);
            view.cart.remove_sold(&record.items);
            view.last_sale = Some(record.clone());
            view.show_checkout_success = true;
            view.checkout_error = None;
        }
        self.ports.events.emit(PosEvent::CheckoutSucceeded {
            sale_id: record.id.clone(),
            total: record.sale.total,
        });
        self.schedule_success_dismiss(generation);

        if record.sale.client.role == ClientRole::Client {
            spawn_sale_alert(
                self.ports.notifier.clone(),
                SaleAlert {
                    transaction_id: record.id.clone(),
                    client_name: record.sale.client.name.clone(),
                    total: record.sale.total,
                    store_id: record.sale.store_id.clone(),
                },
            );
        }
        CheckoutOutcome::Committed(record)
    }

    fn schedule_success_dismiss(&self, generation: u64) {
        let view = self.view.clone();
        let current = self.notice_generation.clone();
        let events = self.ports.events.clone();
        let ttl = self.policy.success_notice_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            let was_shown = std::mem::replace(&mut lock_view(&view).show_checkout_success, false);
            if was_shown {
                events.emit(PosEvent::SuccessNoticeDismissed);
            }
        });
    }

    fn finish_queued(
        &self,
        actor: &ActorIdentity,
        sale: SaleDraft,
        items: Vec<LineItem>,
        items_summary: &str,
        failure: &dyn Fn(String, bool, bool) -> CheckoutFailure,
    ) -> CheckoutOutcome {
        let total = sale.total;
        let sold = items.clone();
        let entry = QueueEntry::new(sale, items);
        let local_id = entry.local_id.clone();

        if let Err(e) = self.ports.queue.enqueue(entry) {
            error!(total, error = %e, "Offline save failed, sale not recorded");
            let message = format!(
                "Sale could not be saved offline: {items_summary} (total {total:.2}). {e}"
            );
            return self.finish_rejected(actor, failure(message, false, true));
        }

        info!(local_id = %local_id, total, "Sale saved offline, pending sync");
        self.journal(
            JournalOutcome::Queued,
            JournalRow {
                local_id: Some(&local_id),
                total,
                items_summary,
                actor_role: Some(actor.role.as_str()),
                ..JournalRow::default()
            },
        );

        let notice = failure(
            format!("Saved offline, pending sync: {items_summary} (total {total:.2})"),
            true,
            false,
        );
        {
            let mut view = lock_view(&self.view);
            view.cart.remove_sold(&sold);
            view.checkout_error = Some(notice.clone());
        }
        self.ports.events.emit(PosEvent::SaleQueuedOffline {
            local_id: local_id.clone(),
            failure: notice,
        });
        CheckoutOutcome::Queued { local_id }
    }

    fn finish_rejected(&self, actor: &ActorIdentity, failure: CheckoutFailure) -> CheckoutOutcome {
        warn!(
            total = failure.total,
            offline = failure.is_offline,
            items = %failure.items_summary,
            "Checkout rejected"
        );
        self.journal(
            JournalOutcome::Rejected,
            JournalRow {
                total: failure.total,
                items_summary: &failure.items_summary,
                actor_role: Some(actor.role.as_str()),
                detail: Some(&failure.message),
                ..JournalRow::default()
            },
        );
        lock_view(&self.view).checkout_error = Some(failure.clone());
        self.ports.events.emit(PosEvent::CheckoutRejected {
            failure: failure.clone(),
        });
        CheckoutOutcome::Rejected(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Actor;
    use crate::offline_queue::MemoryKvStore;
    use crate::test_support::{RecordingNotifier, ScriptedProbe, ScriptedWriter};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Harness {
        checkout: Checkout,
        probe: Arc<ScriptedProbe>,
        writer: Arc<ScriptedWriter>,
        queue: Arc<OfflineQueue>,
        notifier: Arc<RecordingNotifier>,
        events: EventBus,
        db: Arc<DbState>,
    }

    fn fast_policy() -> CheckoutPolicy {
        CheckoutPolicy {
            write_timeout: Duration::from_millis(200),
            customer_retries: 2,
            customer_retry_delay: Duration::from_millis(5),
            success_notice_ttl: Duration::from_millis(40),
        }
    }

    fn harness(role: Option<ActorRole>, reachable: bool, writer: ScriptedWriter) -> Harness {
        let events = EventBus::new();
        let auth = Arc::new(AuthState::new(events.clone()));
        if let Some(role) = role {
            auth.sign_in(Actor::new("u-1", "Ana", role, "tok"));
        }
        let probe = Arc::new(ScriptedProbe::always(reachable));
        let writer = Arc::new(writer);
        let queue = Arc::new(OfflineQueue::new(Box::new(MemoryKvStore::new())));
        let notifier = Arc::new(RecordingNotifier::ok());
        let db = Arc::new(db::open_in_memory().unwrap());
        let checkout = Checkout::new(
            CheckoutPorts {
                probe: probe.clone(),
                writer: writer.clone(),
                queue: queue.clone(),
                auth,
                notifier: notifier.clone(),
                events: events.clone(),
                journal: Some(db.clone()),
            },
            fast_policy(),
            "store-1",
        );
        checkout.add_to_cart("p-coke", "Coke", 2, 500.0, 300.0).unwrap();
        checkout.add_to_cart("p-water", "Water", 1, 200.0, 80.0).unwrap();
        Harness {
            checkout,
            probe,
            writer,
            queue,
            notifier,
            events,
            db,
        }
    }

    /// Bare checkout with the sample cart, for tests that need their own
    /// probe or policy.
    fn checkout_with(
        role: ActorRole,
        probe: Arc<dyn ConnectivityProbe>,
        writer: Arc<ScriptedWriter>,
        policy: CheckoutPolicy,
    ) -> Checkout {
        let events = EventBus::new();
        let auth = Arc::new(AuthState::new(events.clone()));
        auth.sign_in(Actor::new("u-1", "Ana", role, "tok"));
        let checkout = Checkout::new(
            CheckoutPorts {
                probe,
                writer,
                queue: Arc::new(OfflineQueue::new(Box::new(MemoryKvStore::new()))),
                auth,
                notifier: Arc::new(RecordingNotifier::ok()),
                events,
                journal: None,
            },
            policy,
            "store-1",
        );
        checkout.add_to_cart("p-coke", "Coke", 2, 500.0, 300.0).unwrap();
        checkout.add_to_cart("p-water", "Water", 1, 200.0, 80.0).unwrap();
        checkout
    }

    /// Reachable probe that signals `entered` and then holds until
    /// `release` fires.
    #[derive(Default)]
    struct GatedProbe {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl ConnectivityProbe for GatedProbe {
        async fn probe(&self) -> bool {
            self.entered.notify_one();
            self.release.notified().await;
            true
        }
    }

    fn journal_outcomes(db: &DbState) -> Vec<String> {
        let conn = db.conn.lock().unwrap();
        db::recent_journal(&conn, 10)
            .unwrap()
            .iter()
            .map(|row| row["outcome"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_phase_table() {
        use CheckoutPhase::*;
        use PhaseSignal::*;

        assert_eq!(next_phase(Idle, Start, false, 3), Probing);
        assert_eq!(next_phase(Probing, Probed { reachable: false }, true, 3), Queued);
        assert_eq!(next_phase(Probing, Probed { reachable: false }, false, 3), Rejected);
        assert_eq!(
            next_phase(Probing, Probed { reachable: true }, false, 3),
            DirectWrite { attempt: 1 }
        );
        assert_eq!(next_phase(DirectWrite { attempt: 1 }, WriteConfirmed, false, 3), Success);
        assert_eq!(next_phase(DirectWrite { attempt: 1 }, WriteFailed, true, 3), Queued);
        assert_eq!(
            next_phase(DirectWrite { attempt: 2 }, WriteFailed, false, 3),
            RetryWait { attempt: 2 }
        );
        assert_eq!(next_phase(DirectWrite { attempt: 3 }, WriteFailed, false, 3), Failed);
        assert_eq!(
            next_phase(RetryWait { attempt: 2 }, RetryElapsed, false, 3),
            DirectWrite { attempt: 3 }
        );
        // Terminal phases absorb every signal.
        assert_eq!(next_phase(Success, WriteFailed, false, 3), Success);
        assert_eq!(next_phase(Queued, Start, true, 3), Queued);
    }

    #[tokio::test]
    async fn test_admin_offline_queues_sale_and_clears_cart() {
        let h = harness(Some(ActorRole::Admin), false, ScriptedWriter::succeeding(&[]));
        let mut rx = h.events.subscribe();

        let outcome = h.checkout.submit(SaleOptions::default()).await;

        assert!(matches!(outcome, CheckoutOutcome::Queued { .. }));
        let entries = h.queue.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sale_data.total, 1200.0);
        assert_eq!(entries[0].items_with_cost.len(), 2);
        assert_eq!(h.writer.calls(), 0);

        let view = h.checkout.view();
        assert!(view.cart.is_empty());
        let notice = view.checkout_error.expect("pending-sync notice");
        assert!(notice.is_pending_sync);
        assert!(notice.is_offline);
        assert!(notice.is_admin);
        assert!(!notice.blocking);
        assert_eq!(notice.items_summary, "2x Coke, 1x Water");
        assert_eq!(view.phase, CheckoutPhase::Queued);
        assert!(!view.is_processing);

        assert!(matches!(
            rx.recv().await.unwrap(),
            PosEvent::SaleQueuedOffline { .. }
        ));
        assert_eq!(journal_outcomes(&h.db), vec!["queued"]);
    }

    #[tokio::test]
    async fn test_customer_online_commits_and_alerts_staff() {
        let h = harness(Some(ActorRole::Client), true, ScriptedWriter::succeeding(&["tx-1"]));

        let outcome = h.checkout.submit(SaleOptions::default()).await;

        assert!(matches!(outcome, CheckoutOutcome::Committed(ref r) if r.id == "tx-1"));
        assert_eq!(h.writer.calls(), 1);
        assert_eq!(h.probe.calls(), 1);
        let view = h.checkout.view();
        assert!(view.show_checkout_success);
        assert_eq!(view.last_sale.as_ref().unwrap().id, "tx-1");
        assert!(view.cart.is_empty());
        assert!(h.queue.is_empty());

        // Customer orders for themselves; staff get a best-effort alert.
        let written = h.writer.written();
        assert_eq!(written[0].client.id, "u-1");
        assert_eq!(written[0].client.role, ClientRole::Client);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let alerts = h.notifier.sent();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].transaction_id, "tx-1");
        assert_eq!(alerts[0].total, 1200.0);
        assert_eq!(journal_outcomes(&h.db), vec!["committed"]);
    }

    #[tokio::test]
    async fn test_success_notice_auto_dismisses() {
        let h = harness(Some(ActorRole::Admin), true, ScriptedWriter::succeeding(&[]));
        h.checkout.submit(SaleOptions::default()).await;
        assert!(h.checkout.view().show_checkout_success);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!h.checkout.view().show_checkout_success);
        // Walk-in staff sale: no alert.
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_customer_offline_is_rejected_and_cart_kept() {
        let h = harness(Some(ActorRole::Client), false, ScriptedWriter::succeeding(&[]));

        let outcome = h.checkout.submit(SaleOptions::default()).await;

        let CheckoutOutcome::Rejected(failure) = outcome else {
            panic!("expected rejection");
        };
        assert!(failure.blocking);
        assert!(failure.is_offline);
        assert!(!failure.is_pending_sync);
        assert!(failure.message.contains("2x Coke, 1x Water"));
        assert_eq!(failure.total, 1200.0);
        assert!(h.queue.is_empty());
        assert_eq!(h.writer.calls(), 0);
        assert_eq!(h.checkout.view().cart.total(), 1200.0);
        assert_eq!(journal_outcomes(&h.db), vec!["rejected"]);
    }

    #[tokio::test]
    async fn test_guest_actor_is_treated_as_customer() {
        let h = harness(Some(ActorRole::Guest), false, ScriptedWriter::succeeding(&[]));
        let outcome = h.checkout.submit(SaleOptions::default()).await;
        assert!(matches!(outcome, CheckoutOutcome::Rejected(_)));
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_customer_write_failure_retries_exactly_twice() {
        let h = harness(Some(ActorRole::Client), true, ScriptedWriter::failing());

        let outcome = h.checkout.submit(SaleOptions::default()).await;

        assert_eq!(h.writer.calls(), 3);
        let CheckoutOutcome::Rejected(failure) = outcome else {
            panic!("expected rejection");
        };
        assert!(!failure.is_offline);
        assert!(failure.blocking);
        assert!(h.queue.is_empty());
        assert!(!h.checkout.view().cart.is_empty());
        assert_eq!(h.checkout.view().phase, CheckoutPhase::Failed);
    }

    #[tokio::test]
    async fn test_admin_write_failure_falls_back_to_queue() {
        let h = harness(Some(ActorRole::Admin), true, ScriptedWriter::failing());

        let outcome = h.checkout.submit(SaleOptions::default()).await;

        assert!(matches!(outcome, CheckoutOutcome::Queued { .. }));
        assert_eq!(h.writer.calls(), 1);
        assert_eq!(h.queue.count(), 1);
        let notice = h.checkout.view().checkout_error.unwrap();
        assert!(notice.is_pending_sync);
        assert!(!notice.is_offline);
    }

    #[tokio::test]
    async fn test_admin_write_timeout_is_queued() {
        let h = harness(Some(ActorRole::Admin), true, ScriptedWriter::hanging());
        let outcome = h.checkout.submit(SaleOptions::default()).await;
        assert!(matches!(outcome, CheckoutOutcome::Queued { .. }));
        assert_eq!(h.queue.count(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart_or_no_session_is_a_no_op() {
        let h = harness(None, true, ScriptedWriter::succeeding(&[]));
        assert_eq!(h.checkout.submit(SaleOptions::default()).await, CheckoutOutcome::Ignored);
        assert_eq!(h.probe.calls(), 0);
        assert_eq!(h.checkout.view().phase, CheckoutPhase::Idle);

        let h = harness(Some(ActorRole::Admin), true, ScriptedWriter::succeeding(&[]));
        h.checkout.clear_cart();
        assert_eq!(h.checkout.submit(SaleOptions::default()).await, CheckoutOutcome::Ignored);
        assert_eq!(h.probe.calls(), 0);
        assert_eq!(h.writer.calls(), 0);
    }

    #[tokio::test]
    async fn test_busy_indicator_waits_for_connectivity_check() {
        let probe = Arc::new(GatedProbe::default());
        let writer = Arc::new(ScriptedWriter::hanging());
        let checkout = checkout_with(ActorRole::Client, probe.clone(), writer.clone(), fast_policy());

        let submit = checkout.submit(SaleOptions::default());
        tokio::pin!(submit);
        tokio::select! {
            _ = &mut submit => panic!("submit finished while the probe was held"),
            _ = probe.entered.notified() => {}
        }
        let view = checkout.view();
        assert_eq!(view.phase, CheckoutPhase::Probing);
        assert!(!view.is_processing);
        assert_eq!(writer.calls(), 0);

        probe.release.notify_one();
        let write_started = async {
            while writer.calls() == 0 {
                tokio::task::yield_now().await;
            }
        };
        tokio::select! {
            _ = &mut submit => panic!("hanging write cannot finish yet"),
            _ = write_started => {}
        }
        let view = checkout.view();
        assert_eq!(view.phase, CheckoutPhase::DirectWrite { attempt: 1 });
        assert!(view.is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_customer_retries_wait_the_fixed_delay() {
        let delay = Duration::from_secs(3);
        let policy = CheckoutPolicy {
            customer_retry_delay: delay,
            ..fast_policy()
        };
        let writer = Arc::new(ScriptedWriter::failing());
        let checkout = checkout_with(
            ActorRole::Client,
            Arc::new(ScriptedProbe::always(true)),
            writer.clone(),
            policy,
        );

        let started = tokio::time::Instant::now();
        let outcome = checkout.submit(SaleOptions::default()).await;

        assert!(matches!(outcome, CheckoutOutcome::Rejected(_)));
        let times = writer.call_times();
        assert_eq!(times.len(), 3);
        assert!(times[0] - started < Duration::from_millis(5));
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= delay && gap < delay + Duration::from_millis(5),
                "retry gap was {gap:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_abandoned_submit_releases_the_session() {
        let h = harness(Some(ActorRole::Admin), true, ScriptedWriter::hanging());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            h.checkout.submit(SaleOptions::default()),
        )
        .await;
        assert!(abandoned.is_err());

        let view = h.checkout.view();
        assert_eq!(view.phase, CheckoutPhase::Idle);
        assert!(!view.is_processing);
        assert_eq!(view.cart.items_summary(), "2x Coke, 1x Water");
        assert!(h.queue.is_empty());

        // The write times out this time and the sale falls back to the queue.
        let outcome = h.checkout.submit(SaleOptions::default()).await;
        assert!(matches!(outcome, CheckoutOutcome::Queued { .. }));
        assert_eq!(h.writer.calls(), 2);
    }

    #[tokio::test]
    async fn test_lines_added_during_checkout_stay_in_cart() {
        let probe = Arc::new(GatedProbe::default());
        let writer = Arc::new(ScriptedWriter::succeeding(&["tx-7"]));
        let checkout = checkout_with(ActorRole::Admin, probe.clone(), writer, fast_policy());

        let submit = checkout.submit(SaleOptions::default());
        tokio::pin!(submit);
        tokio::select! {
            _ = &mut submit => panic!("submit finished while the probe was held"),
            _ = probe.entered.notified() => {}
        }
        checkout.add_to_cart("p-chips", "Chips", 1, 150.0, 70.0).unwrap();
        probe.release.notify_one();

        let CheckoutOutcome::Committed(record) = submit.await else {
            panic!("expected a committed sale");
        };
        assert_eq!(record.id, "tx-7");
        assert_eq!(record.sale.total, 1200.0);
        assert_eq!(record.items.len(), 2);
        assert_eq!(checkout.view().cart.items_summary(), "1x Chips");
    }
}
