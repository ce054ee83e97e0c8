//! The engine core: per-rule timers, serialized evaluations, the
//! lifecycle state machine, throttling, reload, and shutdown.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vaultize_core::{
    AlertContext, AlertEvent, AlertState, DeliveryReport, EvaluationResult, Rule, RuleState,
    format_duration,
};
use vaultize_dispatch::Dispatcher;
use vaultize_state::StateStore;
use vaultize_store::SearchStore;

use crate::config::EngineConfig;
use crate::evaluator;
use crate::machine::{self, Append, Notify};
use crate::metrics::EngineMetrics;

/// Errors surfaced by engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Startup could not complete; the process should exit with the
    /// configuration-error code.
    #[error("startup failed: {0}")]
    Startup(String),

    /// The rules directory could not be re-read during reload.
    #[error("reload failed: {0}")]
    Reload(String),

    /// No loaded rule has this name.
    #[error("unknown rule '{0}'")]
    UnknownRule(String),

    /// Shutdown began while the operation was waiting to run.
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Counts returned by [`Engine::reload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub errored: usize,
}

/// Counts returned by [`Engine::start`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StartSummary {
    pub loaded: usize,
    pub errored: usize,
}

/// One row of the rule listing.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub name: String,
    pub enabled: bool,
    pub interval: String,
    pub state: AlertState,
}

/// Result of a manual trigger: the verdict plus the state it produced.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
    pub result: EvaluationResult,
    pub state: AlertState,
}

/// Per-rule runtime entry. The state mutex serializes evaluations for one
/// rule; entry membership only changes under the reload lock.
struct RuleEntry {
    state: Arc<Mutex<RuleState>>,
    timer: std::sync::Mutex<Option<CancellationToken>>,
}

impl RuleEntry {
    fn new(state: RuleState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            timer: std::sync::Mutex::new(None),
        }
    }

    fn stop_timer(&self) {
        if let Some(token) = self.timer.lock().unwrap().take() {
            token.cancel();
        }
    }
}

type Snapshot = Arc<HashMap<String, Arc<Rule>>>;

struct Inner {
    store: Arc<dyn SearchStore>,
    states: Arc<StateStore>,
    dispatcher: Dispatcher,
    config: EngineConfig,
    snapshot: std::sync::RwLock<Snapshot>,
    entries: DashMap<String, Arc<RuleEntry>>,
    reload_lock: Mutex<()>,
    eval_permits: Arc<Semaphore>,
    /// Root of the cancellation tree; cancelling it stops timers and
    /// aborts in-flight queries and deliveries.
    shutdown: CancellationToken,
    /// Separate token for state/history writes so pending persistence can
    /// flush during the shutdown grace period.
    persist_cancel: CancellationToken,
    store_ok: AtomicBool,
    running: AtomicBool,
    in_flight: AtomicUsize,
    metrics: EngineMetrics,
}

/// The alert evaluation engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn SearchStore>,
        states: Arc<StateStore>,
        dispatcher: Dispatcher,
        config: EngineConfig,
    ) -> Self {
        let eval_permits = Arc::new(Semaphore::new(config.max_concurrent_evaluations));
        Self {
            inner: Arc::new(Inner {
                store,
                states,
                dispatcher,
                config,
                snapshot: std::sync::RwLock::new(Arc::new(HashMap::new())),
                entries: DashMap::new(),
                reload_lock: Mutex::new(()),
                eval_permits,
                shutdown: CancellationToken::new(),
                persist_cancel: CancellationToken::new(),
                store_ok: AtomicBool::new(false),
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                metrics: EngineMetrics::default(),
            }),
        }
    }

    /// Ensure the state indices exist, recover persisted states, load the
    /// rule set, and start the per-rule timers. The state index is only
    /// consulted here; reload never re-reads it.
    pub async fn start(&self) -> Result<StartSummary, EngineError> {
        let cancel = self.inner.shutdown.clone();
        self.inner
            .states
            .ensure_indices(&cancel)
            .await
            .map_err(|e| EngineError::Startup(format!("cannot ensure state indices: {e}")))?;
        let persisted = self
            .inner
            .states
            .load_all(&cancel)
            .await
            .map_err(|e| EngineError::Startup(format!("cannot recover rule states: {e}")))?;
        self.inner.store_ok.store(true, Ordering::Relaxed);

        let report = vaultize_rules::load(&self.inner.config.rules_dir)
            .map_err(|e| EngineError::Startup(e.to_string()))?;
        for err in &report.errors {
            warn!(file = %err.file.display(), error = %err.error, "rule file skipped");
        }
        let errored = report.errors.len();

        let mut map = HashMap::with_capacity(report.rules.len());
        for rule in report.rules {
            let state = persisted.get(&rule.name).cloned().unwrap_or_default();
            self.inner
                .entries
                .insert(rule.name.clone(), Arc::new(RuleEntry::new(state)));
            map.insert(rule.name.clone(), Arc::new(rule));
        }
        let snapshot: Snapshot = Arc::new(map);
        *self.inner.snapshot.write().unwrap() = Arc::clone(&snapshot);

        for rule in snapshot.values() {
            if rule.enabled {
                self.spawn_timer(&rule.name, rule.interval);
            }
        }
        self.inner.running.store(true, Ordering::Relaxed);

        let summary = StartSummary {
            loaded: snapshot.len(),
            errored,
        };
        info!(loaded = summary.loaded, "engine started");
        Ok(summary)
    }

    /// Re-read the rules directory and atomically swap to the new
    /// snapshot. Surviving rules keep their in-memory state; new rules
    /// start at OK; removed rules' timers stop.
    pub async fn reload(&self) -> Result<ReloadSummary, EngineError> {
        let _guard = self.inner.reload_lock.lock().await;

        let report = vaultize_rules::load(&self.inner.config.rules_dir)
            .map_err(|e| EngineError::Reload(e.to_string()))?;
        for err in &report.errors {
            warn!(file = %err.file.display(), error = %err.error, "rule file skipped");
        }

        let old = self.inner.snapshot.read().unwrap().clone();
        let mut map = HashMap::with_capacity(report.rules.len());
        for rule in report.rules {
            map.insert(rule.name.clone(), Arc::new(rule));
        }
        let new: Snapshot = Arc::new(map);

        let mut summary = ReloadSummary {
            errored: report.errors.len(),
            ..ReloadSummary::default()
        };
        for (name, rule) in new.iter() {
            match old.get(name) {
                None => summary.added += 1,
                Some(prev) if **prev != **rule => summary.updated += 1,
                Some(_) => {}
            }
        }
        summary.removed = old.keys().filter(|n| !new.contains_key(*n)).count();

        // Swap first so no evaluation sees a mix of old and new tables.
        *self.inner.snapshot.write().unwrap() = Arc::clone(&new);

        for name in old.keys() {
            if !new.contains_key(name) {
                if let Some((_, entry)) = self.inner.entries.remove(name) {
                    entry.stop_timer();
                    debug!(rule = %name, "rule removed, timer stopped");
                }
            }
        }

        for (name, rule) in new.iter() {
            match old.get(name) {
                None => {
                    self.inner
                        .entries
                        .insert(name.clone(), Arc::new(RuleEntry::new(RuleState::default())));
                    if rule.enabled {
                        self.spawn_timer(name, rule.interval);
                    }
                }
                Some(prev) => {
                    if prev.interval != rule.interval || prev.enabled != rule.enabled {
                        if let Some(entry) =
                            self.inner.entries.get(name).map(|e| Arc::clone(&e))
                        {
                            entry.stop_timer();
                        }
                        if rule.enabled {
                            self.spawn_timer(name, rule.interval);
                        }
                    }
                }
            }
        }

        info!(
            added = summary.added,
            removed = summary.removed,
            updated = summary.updated,
            errored = summary.errored,
            "rule set reloaded"
        );
        Ok(summary)
    }

    /// Run exactly one evaluation for `name` now, synchronously, with
    /// full state-machine semantics. Does not reschedule timers.
    pub async fn trigger(&self, name: &str) -> Result<TriggerOutcome, EngineError> {
        self.trigger_at(name, Utc::now()).await
    }

    /// As [`trigger`](Self::trigger), evaluating as of the given instant.
    /// Scheduled ticks arriving while this holds the rule's lock are
    /// dropped as overruns.
    pub async fn trigger_at(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome, EngineError> {
        let rule = self
            .inner
            .snapshot
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownRule(name.to_owned()))?;
        let entry = self
            .inner
            .entries
            .get(name)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| EngineError::UnknownRule(name.to_owned()))?;

        let mut guard = Arc::clone(&entry.state).lock_owned().await;
        let _permit = tokio::select! {
            permit = self.inner.eval_permits.clone().acquire_owned() => {
                permit.map_err(|_| EngineError::ShuttingDown)?
            }
            () = self.inner.shutdown.cancelled() => return Err(EngineError::ShuttingDown),
        };
        Ok(self.inner.run_evaluation(&rule, &mut guard, now).await)
    }

    /// The current rule listing, name-sorted.
    pub async fn rule_summaries(&self) -> Vec<RuleSummary> {
        let snapshot = self.inner.snapshot.read().unwrap().clone();
        let mut names: Vec<_> = snapshot.keys().cloned().collect();
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let rule = &snapshot[&name];
            let entry = self.inner.entries.get(&name).map(|e| Arc::clone(&e));
            let state = match entry {
                Some(e) => e.state.lock().await.state,
                None => AlertState::default(),
            };
            out.push(RuleSummary {
                name,
                enabled: rule.enabled,
                interval: format_duration(rule.interval),
                state,
            });
        }
        out
    }

    /// Full definition and runtime state for one rule.
    pub async fn rule_status(&self, name: &str) -> Option<(Arc<Rule>, RuleState)> {
        let rule = self.inner.snapshot.read().unwrap().get(name).cloned()?;
        let entry = self.inner.entries.get(name).map(|e| Arc::clone(&e))?;
        let state = entry.state.lock().await.clone();
        Some((rule, state))
    }

    /// Ready means the scheduler is running and the store has answered at
    /// least once since startup.
    pub fn is_ready(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed) && self.inner.store_ok.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    /// Stop accepting ticks, cancel in-flight queries and deliveries, and
    /// give pending persistence the configured grace period to flush.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        self.inner.running.store(false, Ordering::Relaxed);
        self.inner.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_grace;
        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown grace expired with evaluations still in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.inner.persist_cancel.cancel();
        info!("engine stopped");
    }

    /// Spawn (or replace) the timer task for one rule. The first tick is
    /// offset by a hash of the rule name so schedules do not align across
    /// rules.
    fn spawn_timer(&self, name: &str, interval: Duration) {
        let Some(entry) = self.inner.entries.get(name).map(|e| Arc::clone(&e)) else {
            return;
        };
        let cancel = self.inner.shutdown.child_token();
        if let Some(old) = entry.timer.lock().unwrap().replace(cancel.clone()) {
            old.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let rule_name = name.to_owned();
        tokio::spawn(async move {
            let offset = startup_offset(&rule_name, interval);
            debug!(rule = %rule_name, ?offset, "timer started");
            tokio::select! {
                () = tokio::time::sleep(offset) => {}
                () = cancel.cancelled() => return,
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = cancel.cancelled() => return,
                }
                Inner::fire_tick(&inner, &rule_name);
            }
        });
    }
}

impl Inner {
    /// Launch one evaluation task for a tick. If the previous evaluation
    /// for this rule is still running the tick is dropped, not queued.
    fn fire_tick(inner: &Arc<Self>, name: &str) {
        if inner.shutdown.is_cancelled() {
            return;
        }
        let rule = inner.snapshot.read().unwrap().get(name).cloned();
        let Some(rule) = rule else { return };
        if !rule.enabled {
            return;
        }
        let Some(entry) = inner.entries.get(name).map(|e| Arc::clone(&e)) else {
            return;
        };

        let Ok(mut guard) = Arc::clone(&entry.state).try_lock_owned() else {
            warn!(rule = %name, "overrun: previous evaluation still running, tick dropped");
            EngineMetrics::incr(&inner.metrics.overruns);
            return;
        };

        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = inner.eval_permits.clone().acquire_owned() => permit.ok(),
                () = inner.shutdown.cancelled() => None,
            };
            if permit.is_some() {
                inner.run_evaluation(&rule, &mut guard, Utc::now()).await;
            }
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// One full evaluation: query, verdict, state machine, notifications,
    /// persistence. Runs with the rule's state lock held throughout, so
    /// evaluations of one rule are strictly serialized and at most one
    /// delivery per rule is outstanding at any time.
    async fn run_evaluation(
        &self,
        rule: &Rule,
        st: &mut RuleState,
        now: DateTime<Utc>,
    ) -> TriggerOutcome {
        let result = evaluator::evaluate(self.store.as_ref(), rule, now, &self.shutdown).await;

        if self.shutdown.is_cancelled() {
            // A cancellation-induced verdict must not count as an error.
            return TriggerOutcome {
                result,
                state: st.state,
            };
        }

        EngineMetrics::incr(&self.metrics.evaluations);

        if let Some(kind) = result.error {
            EngineMetrics::incr(&self.metrics.evaluation_errors);
            st.consecutive_errors += 1;
            st.last_eval_at = Some(now);
            st.last_error = Some(format!(
                "{}: {}",
                kind.as_str(),
                result.detail.clone().unwrap_or_default()
            ));
            warn!(
                rule = %rule.name,
                kind = kind.as_str(),
                consecutive = st.consecutive_errors,
                "evaluation failed"
            );

            if matches!(st.consecutive_errors, 1 | 5 | 25) || kind.is_rule_bug() {
                let event = AlertEvent::evaluation_error(
                    &rule.name,
                    st.state,
                    now,
                    rule.condition.threshold,
                    rule.condition.operator,
                    st.last_error.clone().unwrap_or_default(),
                );
                self.append_event(event).await;
            }
            self.persist_state(&rule.name, st).await;
            return TriggerOutcome {
                result,
                state: st.state,
            };
        }

        self.store_ok.store(true, Ordering::Relaxed);
        st.consecutive_errors = 0;
        st.last_error = None;
        st.last_value = result.value;
        st.last_eval_at = Some(now);

        let prior = st.state;
        let plan = machine::plan(prior, result.condition_met);
        match (prior, plan.next) {
            (p, AlertState::Firing) if p != AlertState::Firing => {
                st.condition_met_since = Some(now);
            }
            (_, AlertState::Resolved | AlertState::Ok) => st.condition_met_since = None,
            _ => {}
        }
        st.state = plan.next;
        if prior != st.state {
            EngineMetrics::incr(&self.metrics.transitions);
            info!(rule = %rule.name, from = %prior, to = %st.state, "state transition");
        }

        let throttle = chrono::Duration::from_std(rule.throttle).unwrap_or_default();
        let should_notify = match plan.notify {
            Notify::Never => false,
            Notify::Always => true,
            Notify::IfNotThrottled => st.last_notified_at.is_none_or(|t| now - t >= throttle),
        };

        let mut delivery = None;
        if should_notify {
            let ctx = self.context_for(rule, st, now);
            let report = self
                .dispatcher
                .dispatch(&rule.actions, &ctx, &self.shutdown)
                .await;
            if report.any_delivered() {
                st.last_notified_at = Some(now);
                EngineMetrics::incr(&self.metrics.notifications_sent);
            } else {
                EngineMetrics::incr(&self.metrics.notifications_failed);
            }
            delivery = Some(report);
        }

        let append = match plan.append {
            Append::Never => false,
            Append::Always => true,
            Append::IfNotified => delivery.as_ref().is_some_and(DeliveryReport::any_delivered),
        };
        if append {
            let mut event = AlertEvent::transition(
                &rule.name,
                prior,
                st.state,
                now,
                result.value,
                rule.condition.threshold,
                rule.condition.operator,
            );
            if let Some(report) = delivery {
                event = event.with_delivery(report);
            }
            self.append_event(event).await;
        }

        self.persist_state(&rule.name, st).await;
        TriggerOutcome {
            result,
            state: st.state,
        }
    }

    fn context_for(&self, rule: &Rule, st: &RuleState, now: DateTime<Utc>) -> AlertContext {
        AlertContext {
            name: rule.name.clone(),
            description: rule.description.clone(),
            state: st.state,
            value: st.last_value,
            threshold: rule.condition.threshold,
            operator: rule.condition.operator.as_str().to_owned(),
            observed_at: now,
            url_to_rule: format!(
                "{}/api/v1/alerts/rules/{}/status",
                self.config.external_url, rule.name
            ),
            metadata: rule.metadata.clone(),
        }
    }

    /// History append. Failures log; nothing in this path is fatal. No
    /// events are appended once shutdown has begun.
    async fn append_event(&self, event: AlertEvent) {
        if self.shutdown.is_cancelled() {
            return;
        }
        match self.states.append_event(&event, &self.persist_cancel).await {
            Ok(()) => EngineMetrics::incr(&self.metrics.events_appended),
            Err(e) => {
                EngineMetrics::incr(&self.metrics.persistence_failures);
                warn!(rule = %event.rule_name, error = %e, "failed to append history event");
            }
        }
    }

    /// State persistence. Failures log; in-memory state stays
    /// authoritative until the next successful persist.
    async fn persist_state(&self, name: &str, st: &RuleState) {
        if let Err(e) = self.states.persist(name, st, &self.persist_cancel).await {
            EngineMetrics::incr(&self.metrics.persistence_failures);
            warn!(rule = %name, error = %e, "failed to persist rule state");
        }
    }
}

/// First-tick offset in `[0, interval)`, derived from a hash of the rule
/// name so the spread is stable across restarts.
fn startup_offset(name: &str, interval: Duration) -> Duration {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    #[allow(clippy::cast_possible_truncation)]
    let millis = (interval.as_millis().max(1)) as u64;
    Duration::from_millis(hasher.finish() % millis)
}
