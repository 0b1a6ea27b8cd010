//! Background replay of the offline sale queue.
//!
//! A pass drains the [`OfflineQueue`] in insertion order through the
//! [`TransactionWriter`]. An entry is removed only after its write is
//! confirmed, so a crash mid-pass can duplicate a sale but never lose one.
//! A failing entry stays queued and the pass moves on to the next one.
//!
//! Passes are triggered by startup, the OS coming back online, sign-in and
//! a periodic timer (see [`start_sync_loop`]). Only one pass runs at a time;
//! triggers that arrive during a pass are dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::AuthState;
use crate::cart;
use crate::config::SyncSettings;
use crate::connectivity::ConnectivityProbe;
use crate::db::{self, DbState, JournalOutcome, JournalRow};
use crate::events::{EventBus, PosEvent};
use crate::models::QueueEntry;
use crate::offline_queue::OfflineQueue;
use crate::writer::{write_with_timeout, TransactionWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    OsOnline,
    SignIn,
    Timer,
    Manual,
}

/// Aggregate result of one pass. `pending > 0` is a partial sync, not an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub synced: usize,
    pub failed: usize,
    pub pending: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    AlreadyRunning,
    QueueEmpty,
    NotAuthenticated,
    Offline,
    Completed(SyncReport),
}

/// Badge data for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: usize,
    pub in_flight: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
}

/// Clears the in-flight flag when a pass ends, including on panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncManager {
    queue: Arc<OfflineQueue>,
    writer: Arc<dyn TransactionWriter>,
    probe: Arc<dyn ConnectivityProbe>,
    auth: Arc<AuthState>,
    events: EventBus,
    journal: Option<Arc<DbState>>,
    settings: SyncSettings,
    in_flight: AtomicBool,
    last_report: Mutex<Option<SyncReport>>,
}

impl SyncManager {
    pub fn new(
        queue: Arc<OfflineQueue>,
        writer: Arc<dyn TransactionWriter>,
        probe: Arc<dyn ConnectivityProbe>,
        auth: Arc<AuthState>,
        events: EventBus,
        settings: SyncSettings,
    ) -> Self {
        Self {
            queue,
            writer,
            probe,
            auth,
            events,
            journal: None,
            settings,
            in_flight: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn with_journal(mut self, db: Arc<DbState>) -> Self {
        self.journal = Some(db);
        self
    }

    pub fn status(&self) -> SyncStatus {
        let last_report = self.last_report.lock().ok().and_then(|g| g.clone());
        SyncStatus {
            pending: self.queue.count(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            last_sync_at: last_report.as_ref().map(|r| r.finished_at),
            last_report,
        }
    }

    /// Run one pass over the queue.
    pub async fn sync_pending(&self, trigger: SyncTrigger) -> SyncOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?trigger, "Sync pass already in flight, trigger ignored");
            return SyncOutcome::AlreadyRunning;
        }
        let _guard = InFlight(&self.in_flight);

        // Snapshot taken once; entries queued during the pass wait for the
        // next one.
        let entries = self.queue.list();
        if entries.is_empty() {
            return SyncOutcome::QueueEmpty;
        }
        if !self.auth.is_authenticated() {
            debug!(pending = entries.len(), "Sync skipped: no authenticated actor");
            return SyncOutcome::NotAuthenticated;
        }
        if !self.probe.probe().await {
            info!(pending = entries.len(), ?trigger, "Sync skipped: backend unreachable");
            return SyncOutcome::Offline;
        }

        let started_at = Utc::now();
        info!(pending = entries.len(), ?trigger, "Sync pass started");
        self.events.emit(PosEvent::SyncStarted {
            pending: entries.len(),
        });

        let mut synced = 0usize;
        let mut failed = 0usize;
        for entry in &entries {
            if self.replay(entry).await {
                synced += 1;
            } else {
                failed += 1;
            }
        }

        let report = SyncReport {
            trigger,
            synced,
            failed,
            pending: self.queue.count(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(synced, failed, pending = report.pending, "Sync pass finished");

        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
        if synced > 0 {
            self.events.emit(PosEvent::SalesSynced {
                synced,
                pending: report.pending,
            });
        }
        // Still flagged in flight until the guard drops; report it as done.
        let mut status = self.status();
        status.in_flight = false;
        self.events.emit(PosEvent::SyncStatus(status));

        SyncOutcome::Completed(report)
    }

    /// Write one queued sale and drop it from the queue on success.
    async fn replay(&self, entry: &QueueEntry) -> bool {
        let mut sale = entry.sale_data.clone();
        // The remote record gets a server timestamp; keep the till's time.
        sale.offline_created_at.get_or_insert(sale.created_at);

        let receipt = match write_with_timeout(
            self.writer.as_ref(),
            &sale,
            &entry.items_with_cost,
            self.settings.write_timeout,
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(local_id = %entry.local_id, error = %e, "Queued sale failed to sync");
                return false;
            }
        };

        if let Err(e) = self.queue.remove(&entry.local_id) {
            // Written remotely but still queued: the next pass writes it again.
            error!(
                local_id = %entry.local_id,
                sale_id = %receipt.id,
                error = %e,
                "Synced sale could not be removed from the offline queue"
            );
        }
        debug!(local_id = %entry.local_id, sale_id = %receipt.id, "Queued sale synced");

        if let Some(db) = &self.journal {
            let summary = cart::summarize(
                entry
                    .items_with_cost
                    .iter()
                    .map(|i| (i.quantity, i.name.as_str())),
            );
            db::journal_best_effort(
                db,
                JournalOutcome::Synced,
                &JournalRow {
                    local_id: Some(&entry.local_id),
                    remote_id: Some(&receipt.id),
                    total: sale.total,
                    items_summary: &summary,
                    ..JournalRow::default()
                },
            );
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Spawn the trigger loop. Runs until `cancel` fires; a pass in progress
/// finishes before the loop exits.
pub fn start_sync_loop(
    manager: Arc<SyncManager>,
    events: EventBus,
    settings: SyncSettings,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    // Subscribe before spawning so no event emitted after this call is missed.
    let mut rx = events.subscribe();

    tokio::spawn(async move {
        info!(
            interval_secs = settings.interval.as_secs(),
            "Sync loop started"
        );
        let startup = tokio::time::sleep(settings.startup_delay);
        tokio::pin!(startup);
        let mut startup_pending = true;

        let mut ticker =
            tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut startup, if startup_pending => {
                    startup_pending = false;
                    SyncTrigger::Startup
                }
                _ = ticker.tick() => SyncTrigger::Timer,
                event = rx.recv() => match event {
                    Ok(PosEvent::OsConnectivityChanged { online: true }) => SyncTrigger::OsOnline,
                    Ok(PosEvent::ActorSignedIn { .. }) => SyncTrigger::SignIn,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sync loop lagged behind the event bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let outcome = manager.sync_pending(trigger).await;
            debug!(?trigger, ?outcome, "Sync trigger handled");
        }
        info!("Sync loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Actor;
    use crate::models::ActorRole;
    use crate::offline_queue::MemoryKvStore;
    use crate::test_support::{sample_entry, ScriptedProbe, ScriptedWriter};
    use std::time::Duration;

    fn settings() -> SyncSettings {
        SyncSettings {
            startup_delay: Duration::from_millis(10),
            interval: Duration::from_secs(3600),
            write_timeout: Duration::from_millis(200),
        }
    }

    struct Harness {
        manager: Arc<SyncManager>,
        queue: Arc<OfflineQueue>,
        writer: Arc<ScriptedWriter>,
        probe: Arc<ScriptedProbe>,
        auth: Arc<AuthState>,
        events: EventBus,
    }

    fn harness(reachable: bool, writer: ScriptedWriter, signed_in: bool) -> Harness {
        let events = EventBus::new();
        let auth = Arc::new(AuthState::new(events.clone()));
        if signed_in {
            auth.sign_in(Actor::new("staff-1", "Maria", ActorRole::Admin, "tok"));
        }
        let queue = Arc::new(OfflineQueue::new(Box::new(MemoryKvStore::new())));
        let writer = Arc::new(writer);
        let probe = Arc::new(ScriptedProbe::always(reachable));
        let manager = Arc::new(SyncManager::new(
            queue.clone(),
            writer.clone(),
            probe.clone(),
            auth.clone(),
            events.clone(),
            settings(),
        ));
        Harness {
            manager,
            queue,
            writer,
            probe,
            auth,
            events,
        }
    }

    #[tokio::test]
    async fn test_fifo_drain_keeps_only_failed_entry() {
        let h = harness(true, ScriptedWriter::failing_totals(&[200.0]), true);
        let a = sample_entry(100.0);
        let b = sample_entry(200.0);
        let c = sample_entry(300.0);
        for e in [&a, &b, &c] {
            h.queue.enqueue(e.clone()).unwrap();
        }

        let SyncOutcome::Completed(report) = h.manager.sync_pending(SyncTrigger::Manual).await
        else {
            panic!("expected a completed pass");
        };

        assert_eq!(h.queue.list(), vec![b]);
        assert_eq!((report.synced, report.failed, report.pending), (2, 1, 1));
        let written: Vec<f64> = h.writer.written().iter().map(|s| s.total).collect();
        assert_eq!(written, vec![100.0, 300.0]);
        assert_eq!(h.writer.calls(), 3);
    }

    #[tokio::test]
    async fn test_two_entries_sync_and_notify_once() {
        let h = harness(true, ScriptedWriter::succeeding(&[]), true);
        h.queue.enqueue(sample_entry(1200.0)).unwrap();
        h.queue.enqueue(sample_entry(800.0)).unwrap();
        let mut rx = h.events.subscribe();

        h.manager.sync_pending(SyncTrigger::OsOnline).await;

        assert!(h.queue.is_empty());
        let mut synced_notices = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PosEvent::SalesSynced { synced, pending } = event {
                synced_notices.push((synced, pending));
            }
        }
        assert_eq!(synced_notices, vec![(2, 0)]);

        let status = h.manager.status();
        assert_eq!(status.pending, 0);
        assert!(!status.in_flight);
        assert!(status.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_replayed_sales_keep_offline_timestamp() {
        let h = harness(true, ScriptedWriter::succeeding(&[]), true);
        let entry = sample_entry(50.0);
        let provisional = entry.sale_data.created_at;
        h.queue.enqueue(entry).unwrap();

        h.manager.sync_pending(SyncTrigger::Manual).await;

        let written = h.writer.written();
        assert_eq!(written[0].offline_created_at, Some(provisional));
    }

    #[tokio::test]
    async fn test_offline_leaves_queue_untouched() {
        let h = harness(false, ScriptedWriter::succeeding(&[]), true);
        let entry = sample_entry(1200.0);
        h.queue.enqueue(entry.clone()).unwrap();

        assert_eq!(h.manager.sync_pending(SyncTrigger::Timer).await, SyncOutcome::Offline);
        assert_eq!(h.queue.list(), vec![entry]);
        assert_eq!(h.writer.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_and_signed_out_are_no_ops() {
        let h = harness(true, ScriptedWriter::succeeding(&[]), false);
        assert_eq!(h.manager.sync_pending(SyncTrigger::Startup).await, SyncOutcome::QueueEmpty);

        h.queue.enqueue(sample_entry(10.0)).unwrap();
        assert_eq!(
            h.manager.sync_pending(SyncTrigger::Startup).await,
            SyncOutcome::NotAuthenticated
        );
        assert_eq!(h.probe.calls(), 0);
        assert_eq!(h.queue.count(), 1);
    }

    #[tokio::test]
    async fn test_reentrant_trigger_is_ignored() {
        let h = harness(true, ScriptedWriter::hanging(), true);
        h.queue.enqueue(sample_entry(10.0)).unwrap();

        let first = tokio::spawn({
            let manager = h.manager.clone();
            async move { manager.sync_pending(SyncTrigger::Startup).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.manager.status().in_flight);
        assert_eq!(
            h.manager.sync_pending(SyncTrigger::OsOnline).await,
            SyncOutcome::AlreadyRunning
        );

        let SyncOutcome::Completed(report) = first.await.unwrap() else {
            panic!("first pass should complete after the write timeout");
        };
        assert_eq!((report.synced, report.pending), (0, 1));
        assert!(!h.manager.status().in_flight);
    }

    #[tokio::test]
    async fn test_loop_runs_startup_pass_and_stops_on_cancel() {
        let h = harness(true, ScriptedWriter::succeeding(&[]), true);
        h.queue.enqueue(sample_entry(10.0)).unwrap();
        let cancel = CancellationToken::new();

        let handle = start_sync_loop(h.manager.clone(), h.events.clone(), settings(), cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.queue.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_reacts_to_os_online_and_sign_in() {
        let h = harness(true, ScriptedWriter::succeeding(&[]), true);
        let cancel = CancellationToken::new();
        let slow_start = SyncSettings {
            startup_delay: Duration::from_secs(3600),
            ..settings()
        };
        let handle = start_sync_loop(h.manager.clone(), h.events.clone(), slow_start, cancel.clone());

        h.queue.enqueue(sample_entry(10.0)).unwrap();
        h.events.emit(PosEvent::OsConnectivityChanged { online: true });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.queue.is_empty());

        h.queue.enqueue(sample_entry(20.0)).unwrap();
        h.auth.sign_in(Actor::new("staff-2", "Nikos", ActorRole::Admin, "tok-2"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.queue.is_empty());

        // Going offline is not a trigger.
        h.queue.enqueue(sample_entry(30.0)).unwrap();
        h.events.emit(PosEvent::OsConnectivityChanged { online: false });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.queue.count(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
