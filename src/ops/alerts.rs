//! Periodic polling of the current user's unread alerts.
//!
//! Each cycle counts unread alerts, fetches them when the count is non-zero,
//! replaces the local list wholesale and toasts only ids not seen before in
//! this session. The first successful cycle after a start only records a
//! baseline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::io::remote::{Criteria, RemoteError, RemoteStore, patch_of};
use crate::model::alert::Alert;
use crate::model::config::BoardConfig;
use crate::model::notice::{Notifier, Toast, ToastLevel};

/// Poller configuration
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Upper bound on alerts fetched per cycle
    pub page_size: usize,
    /// Remote source holding alerts
    pub source: String,
    pub recipient_id: String,
}

impl PollSettings {
    pub fn from_config(config: &BoardConfig) -> Self {
        PollSettings {
            interval: Duration::from_secs(config.alerts.poll_interval_secs.max(1)),
            page_size: config.alerts.page_size,
            source: config.sources.alerts.clone(),
            recipient_id: config.board.user_id.clone(),
        }
    }

    fn unread(&self) -> Criteria {
        Criteria::all()
            .eq("recipient_id", self.recipient_id.as_str())
            .eq("is_read", false)
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another cycle was still awaiting its response
    Skipped,
    /// First cycle since start: ids recorded, nothing announced
    Baseline { count: usize },
    /// `new` alerts were announced
    Updated { new: usize },
    /// Polling was restarted or alerts acknowledged while this cycle ran;
    /// its result was dropped
    Superseded,
    Failed(RemoteError),
}

#[derive(Debug, Default)]
struct PollState {
    alerts: Vec<Alert>,
    seen: HashSet<String>,
    initial_fetch_complete: bool,
    /// Bumped by start, stop and acknowledgements
    generation: u64,
}

/// Clears the in-flight flag when a cycle ends, including by cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

const OUTCOME_BACKLOG: usize = 16;

pub struct AlertPoller {
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    settings: PollSettings,
    state: Mutex<PollState>,
    in_flight: AtomicBool,
    /// Set by a failed acknowledgement that found a cycle running; that
    /// cycle fetches again once it finishes.
    refetch_requested: AtomicBool,
    outcomes: broadcast::Sender<PollOutcome>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl AlertPoller {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
        settings: PollSettings,
    ) -> Self {
        AlertPoller {
            remote,
            notifier,
            settings,
            state: Mutex::new(PollState::default()),
            in_flight: AtomicBool::new(false),
            refetch_requested: AtomicBool::new(false),
            outcomes: broadcast::channel(OUTCOME_BACKLOG).0,
            timer: Mutex::new(None),
        }
    }

    /// Receive the outcome of every cycle from now on, timer-driven or not.
    pub fn subscribe(&self) -> broadcast::Receiver<PollOutcome> {
        self.outcomes.subscribe()
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- reads ---

    /// Unread alerts as of the last applied cycle, minus local acknowledgements.
    pub fn unacknowledged(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.lock().alerts.len()
    }

    /// Ids announced or baselined this session
    pub fn seen_count(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_polling(&self) -> bool {
        self.lock_timer().as_ref().is_some_and(|h| !h.is_finished())
    }

    // --- timer ---

    /// Start the interval timer. The first cycle runs immediately and only
    /// records a baseline. Restarting a running poller re-baselines.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_polling(self: &Arc<Self>) {
        let mut timer = self.lock_timer();
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        {
            let mut state = self.lock();
            state.initial_fetch_complete = false;
            state.generation += 1;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.settings.interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(poller) = weak.upgrade() else {
                    break;
                };
                // A tick never waits on the previous cycle; the in-flight
                // guard in poll_once turns overlaps into skips.
                tokio::spawn(async move {
                    let outcome = poller.poll_once().await;
                    tracing::debug!(?outcome, "alert poll finished");
                });
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "alert polling started");
    }

    /// Stop the timer. A cycle already running completes as superseded.
    pub fn stop_polling(&self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
            tracing::info!("alert polling stopped");
        }
        self.lock().generation += 1;
    }

    // --- cycle ---

    /// Run one count-then-list cycle.
    pub async fn poll_once(&self) -> PollOutcome {
        loop {
            if self.in_flight.swap(true, Ordering::AcqRel) {
                tracing::debug!("alert poll skipped, previous cycle in flight");
                self.publish(PollOutcome::Skipped);
                return PollOutcome::Skipped;
            }
            let outcome = {
                let _guard = InFlight(&self.in_flight);
                self.run_cycle().await
            };
            if self.refetch_requested.swap(false, Ordering::AcqRel) {
                tracing::debug!(?outcome, "re-fetching alerts for a failed acknowledgement");
                continue;
            }
            self.publish(outcome.clone());
            return outcome;
        }
    }

    fn publish(&self, outcome: PollOutcome) {
        // No receivers is the normal case outside `watch`.
        let _ = self.outcomes.send(outcome);
    }

    async fn run_cycle(&self) -> PollOutcome {
        // This cycle starts after any pending refetch request, so it satisfies it.
        self.refetch_requested.store(false, Ordering::Release);
        let generation = self.lock().generation;

        let fetched = match self.fetch_unread().await {
            Ok(alerts) => alerts,
            Err(e) => {
                tracing::warn!(error = %e, "alert poll failed");
                return PollOutcome::Failed(e);
            }
        };

        let (outcome, announced) = {
            let mut state = self.lock();
            if state.generation != generation {
                tracing::debug!(generation, current = state.generation, "alert poll superseded");
                return PollOutcome::Superseded;
            }
            state.alerts = fetched.clone();
            if !state.initial_fetch_complete {
                state.seen.extend(fetched.iter().map(|a| a.id.clone()));
                state.initial_fetch_complete = true;
                (PollOutcome::Baseline { count: fetched.len() }, Vec::new())
            } else {
                let mut announced = Vec::new();
                for alert in fetched {
                    if state.seen.insert(alert.id.clone()) {
                        announced.push(alert);
                    }
                }
                (PollOutcome::Updated { new: announced.len() }, announced)
            }
        };

        for alert in &announced {
            self.notifier.notify(alert_toast(alert));
        }
        match &outcome {
            PollOutcome::Baseline { count } => {
                tracing::info!(count, "alert baseline recorded")
            }
            PollOutcome::Updated { new } if *new > 0 => {
                tracing::info!(new, "new alerts announced")
            }
            _ => {}
        }
        outcome
    }

    async fn fetch_unread(&self) -> Result<Vec<Alert>, RemoteError> {
        let criteria = self.settings.unread();
        let count = self
            .remote
            .query_record_count(&self.settings.source, &criteria)
            .await?;
        tracing::debug!(count, criteria = %criteria, "unread alert count");
        if count == 0 {
            return Ok(Vec::new());
        }
        let page = self
            .remote
            .query_records(&self.settings.source, &criteria, self.settings.page_size, None)
            .await?;
        let mut alerts = Vec::with_capacity(page.records.len());
        for record in page.records {
            match serde_json::from_value::<Alert>(Value::Object(record)) {
                Ok(alert) => alerts.push(alert),
                Err(e) => tracing::warn!(error = %e, "skipping malformed alert record"),
            }
        }
        Ok(alerts)
    }

    // --- acknowledgements ---

    /// Mark one alert read. It leaves the local list immediately; on remote
    /// failure an error toast is raised and the list is re-fetched.
    pub async fn acknowledge(&self, alert_id: &str) -> Result<(), RemoteError> {
        {
            let mut state = self.lock();
            state.generation += 1;
            state.alerts.retain(|a| a.id != alert_id);
        }
        let result = self
            .remote
            .update_record(&self.settings.source, alert_id, &patch_of("is_read", true))
            .await;
        if let Err(e) = &result {
            self.recover_from_failed_ack(&format!("Could not mark alert {} as read", alert_id), e)
                .await;
        }
        result
    }

    /// Mark every unread alert of the current user read with one bulk update.
    pub async fn acknowledge_all(&self) -> Result<(), RemoteError> {
        let cleared = {
            let mut state = self.lock();
            state.generation += 1;
            std::mem::take(&mut state.alerts).len()
        };
        tracing::debug!(cleared, "acknowledging all alerts");
        let result = self
            .remote
            .update_records_bulk(
                &self.settings.source,
                &self.settings.unread(),
                &patch_of("is_read", true),
            )
            .await;
        if let Err(e) = &result {
            self.recover_from_failed_ack("Could not mark alerts as read", e)
                .await;
        }
        result
    }

    async fn recover_from_failed_ack(&self, what: &str, error: &RemoteError) {
        tracing::warn!(error = %error, "{}", what);
        self.notifier.notify(Toast::new(
            ToastLevel::Error,
            "Alerts",
            format!("{}: {}", what, error),
        ));
        // A cycle already in flight would skip this one and then be
        // superseded by the acknowledgement; the request makes it fetch again.
        self.refetch_requested.store(true, Ordering::Release);
        let outcome = self.poll_once().await;
        tracing::debug!(?outcome, "alerts re-fetched after failed acknowledgement");
    }
}

impl Drop for AlertPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
        }
    }
}

fn alert_toast(alert: &Alert) -> Toast {
    let title = if alert.kind.is_empty() {
        "Alert".to_string()
    } else {
        alert.kind.clone()
    };
    Toast::new(ToastLevel::Info, title, alert.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_store::{MemoryStore, StoreOp};
    use crate::model::notice::ToastLog;
    use serde_json::json;

    const SOURCE: &str = "alerts";

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(60),
            page_size: 200,
            source: SOURCE.into(),
            recipient_id: "u1".into(),
        }
    }

    fn alert(id: &str) -> Value {
        json!({"id": id, "recipient_id": "u1", "is_read": false, "type": "note", "message": format!("msg {}", id)})
    }

    fn setup(ids: &[&str]) -> (Arc<MemoryStore>, Arc<ToastLog>, Arc<AlertPoller>) {
        let store = Arc::new(MemoryStore::new());
        store.seed(SOURCE, ids.iter().map(|id| alert(id)));
        let log = Arc::new(ToastLog::new());
        let poller = Arc::new(AlertPoller::new(store.clone(), log.clone(), settings()));
        (store, log, poller)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn baseline_then_set_difference() {
        let (store, log, poller) = setup(&["a1", "a2", "a3"]);
        assert_eq!(poller.poll_once().await, PollOutcome::Baseline { count: 3 });
        assert!(log.is_empty());
        assert_eq!(poller.seen_count(), 3);

        store.seed(SOURCE, [alert("a4")]);
        assert_eq!(poller.poll_once().await, PollOutcome::Updated { new: 1 });
        let toasts = log.take();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].title, "note");
        assert_eq!(toasts[0].message, "msg a4");
        assert_eq!(poller.unacknowledged_count(), 4);

        assert_eq!(poller.poll_once().await, PollOutcome::Updated { new: 0 });
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn zero_count_skips_list_fetch() {
        let (store, _log, poller) = setup(&[]);
        assert_eq!(poller.poll_once().await, PollOutcome::Baseline { count: 0 });
        assert_eq!(store.calls(StoreOp::Count), 1);
        assert_eq!(store.calls(StoreOp::Query), 0);
    }

    #[tokio::test]
    async fn list_is_replaced_wholesale() {
        let (store, _log, poller) = setup(&["a1", "a2"]);
        poller.poll_once().await;
        store
            .update_record(SOURCE, "a1", &patch_of("is_read", true))
            .await
            .unwrap();
        poller.poll_once().await;
        let ids: Vec<String> = poller.unacknowledged().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a2"]);
        assert_eq!(poller.seen_count(), 2);
    }

    #[tokio::test]
    async fn failed_poll_keeps_state() {
        let (store, log, poller) = setup(&["a1"]);
        poller.poll_once().await;
        store.fail_next(StoreOp::Count, RemoteError::new("TIMEOUT", "slow"));
        assert!(matches!(poller.poll_once().await, PollOutcome::Failed(_)));
        assert_eq!(poller.unacknowledged_count(), 1);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn overlapping_poll_is_skipped() {
        let (store, _log, poller) = setup(&["a1"]);
        let gate = store.hold(StoreOp::Count);
        let p = poller.clone();
        let first = tokio::spawn(async move { p.poll_once().await });
        settle().await;
        assert_eq!(poller.poll_once().await, PollOutcome::Skipped);
        gate.add_permits(1);
        assert_eq!(first.await.unwrap(), PollOutcome::Baseline { count: 1 });
    }

    #[tokio::test]
    async fn ack_during_poll_supersedes_it() {
        let (store, _log, poller) = setup(&["a1", "a2"]);
        poller.poll_once().await;

        let gate = store.hold(StoreOp::Query);
        let p = poller.clone();
        let slow = tokio::spawn(async move { p.poll_once().await });
        settle().await;
        poller.acknowledge("a1").await.unwrap();
        gate.add_permits(1);
        assert_eq!(slow.await.unwrap(), PollOutcome::Superseded);

        let ids: Vec<String> = poller.unacknowledged().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a2"]);
    }

    #[tokio::test]
    async fn failed_ack_refetches() {
        let (store, log, poller) = setup(&["a1", "a2"]);
        poller.poll_once().await;
        store.fail_next(StoreOp::Update, RemoteError::new("DENIED", "read only"));
        assert!(poller.acknowledge("a1").await.is_err());
        assert_eq!(poller.unacknowledged_count(), 2);
        let toasts = log.take();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, ToastLevel::Error);
    }

    #[tokio::test]
    async fn ack_all_uses_one_bulk_call() {
        let (store, _log, poller) = setup(&["a1", "a2", "a3"]);
        poller.poll_once().await;
        poller.acknowledge_all().await.unwrap();
        assert_eq!(poller.unacknowledged_count(), 0);
        assert_eq!(store.calls(StoreOp::BulkUpdate), 1);
        assert_eq!(store.calls(StoreOp::Update), 0);
        assert_eq!(poller.poll_once().await, PollOutcome::Updated { new: 0 });
        assert_eq!(store.calls(StoreOp::Query), 1);
    }

    #[tokio::test]
    async fn failed_ack_all_refetches() {
        let (store, _log, poller) = setup(&["a1", "a2"]);
        poller.poll_once().await;
        store.fail_next(StoreOp::BulkUpdate, RemoteError::new("TIMEOUT", "slow"));
        assert!(poller.acknowledge_all().await.is_err());
        assert_eq!(poller.unacknowledged_count(), 2);
    }

    #[tokio::test]
    async fn failed_ack_all_during_running_poll_restores_list() {
        let (store, log, poller) = setup(&["a1", "a2"]);
        poller.poll_once().await;

        let gate = store.hold(StoreOp::Count);
        let p = poller.clone();
        let running = tokio::spawn(async move { p.poll_once().await });
        settle().await;

        store.fail_next(StoreOp::BulkUpdate, RemoteError::new("TIMEOUT", "slow"));
        assert!(poller.acknowledge_all().await.is_err());
        assert_eq!(poller.unacknowledged_count(), 0);

        store.release(StoreOp::Count);
        gate.add_permits(1);
        assert_eq!(running.await.unwrap(), PollOutcome::Updated { new: 0 });

        let ids: Vec<String> = poller.unacknowledged().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(store.calls(StoreOp::Count), 3);
        let toasts = log.take();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, ToastLevel::Error);
    }

    #[tokio::test]
    async fn failed_ack_during_running_poll_restores_alert() {
        let (store, _log, poller) = setup(&["a1", "a2"]);
        poller.poll_once().await;

        let gate = store.hold(StoreOp::Query);
        let p = poller.clone();
        let running = tokio::spawn(async move { p.poll_once().await });
        settle().await;

        store.fail_next(StoreOp::Update, RemoteError::new("DENIED", "read only"));
        assert!(poller.acknowledge("a1").await.is_err());

        store.release(StoreOp::Query);
        gate.add_permits(1);
        running.await.unwrap();
        assert_eq!(poller.unacknowledged_count(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_every_cycle() {
        let (store, _log, poller) = setup(&["a1"]);
        let mut outcomes = poller.subscribe();
        poller.poll_once().await;
        store.seed(SOURCE, [alert("a2")]);
        poller.poll_once().await;
        assert_eq!(outcomes.recv().await.unwrap(), PollOutcome::Baseline { count: 1 });
        assert_eq!(outcomes.recv().await.unwrap(), PollOutcome::Updated { new: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn timer_polls_and_stops() {
        let (store, log, poller) = setup(&["a1"]);
        poller.start_polling();
        settle().await;
        assert!(poller.is_polling());
        assert_eq!(poller.seen_count(), 1);
        assert!(log.is_empty());

        store.seed(SOURCE, [alert("a2")]);
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(log.take().len(), 1);

        poller.stop_polling();
        assert!(!poller.is_polling());
        let counts = store.calls(StoreOp::Count);
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(store.calls(StoreOp::Count), counts);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_rebaselines() {
        let (store, log, poller) = setup(&["a1"]);
        poller.start_polling();
        settle().await;
        poller.stop_polling();

        store.seed(SOURCE, [alert("a2"), alert("a3")]);
        poller.start_polling();
        settle().await;
        assert!(log.is_empty());
        assert_eq!(poller.seen_count(), 3);
        poller.stop_polling();
    }
}
