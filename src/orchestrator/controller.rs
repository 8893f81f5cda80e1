//! Task lifecycle controller.
//!
//! Owns the `Pending -> Searching -> Evaluating -> Completed` state machine
//! for every task and emits events for presentation layers.

use crate::backend::{AsyncSearchRequest, BackendError, SearchBackend, SearchPayload};
use crate::cache::{CachePayload, CacheStore};
use crate::convert;
use crate::events::EventBus;
use crate::model::{
    SearchConfig, SearchOptions, Task, TaskEvent, TaskOutcome, TaskPatch, TaskStatus,
};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Terminal result of one polling session.
enum PollOutcome {
    Ready(SearchPayload),
    Failed,
    TimedOut,
}

#[derive(Clone)]
pub struct SearchOrchestrator {
    backend: Arc<dyn SearchBackend>,
    cache: Arc<CacheStore>,
    events: EventBus,
    cfg: SearchConfig,
    tasks: Arc<Mutex<HashMap<u64, Task>>>,
    last_id: Arc<AtomicU64>,
    // Checked before every polling attempt. Nothing sets it today, so a
    // session runs to success or to its attempt ceiling; an abort API can
    // flip it later without restructuring the loop.
    cancel: Arc<AtomicBool>,
}

impl SearchOrchestrator {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        cache: Arc<CacheStore>,
        events: EventBus,
        cfg: SearchConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            events,
            cfg,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            last_id: Arc::new(AtomicU64::new(0)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a task for `keyword` and begin executing it asynchronously.
    /// Returns the task immediately in `Pending`; fails only on an empty
    /// keyword, in which case no task is created.
    pub fn create_task(&self, keyword: &str, options: SearchOptions) -> Result<Task> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            bail!("search keyword must not be empty");
        }

        let id = self.next_task_id();
        let task = Task::new(id, keyword, options.search_type, self.cfg.enable_llm);
        self.tasks.lock().unwrap().insert(id, task.clone());

        let orchestrator = self.clone();
        let keyword = keyword.to_string();
        tokio::spawn(async move {
            orchestrator.execute(id, keyword, options).await;
        });

        Ok(task)
    }

    /// Drive one task from `Searching` to `Completed`.
    async fn execute(&self, task_id: u64, keyword: String, options: SearchOptions) {
        self.advance_status(task_id, TaskStatus::Searching);

        let key = CacheStore::cache_key(&keyword, options.search_type, self.cfg.enable_llm);
        if let Some(hit) = self.cache.load(&key) {
            info!(task_id, "serving completed search from local cache");
            self.advance_status(task_id, TaskStatus::Evaluating);
            tokio::time::sleep(self.cfg.settle_delay).await;
            let relevant = hit.results.len() as u64;
            self.apply_patch(
                task_id,
                TaskPatch {
                    results: Some(hit.results),
                    total_results: Some(hit.total_results),
                    relevant_results: Some(relevant),
                    outcome: Some(TaskOutcome::Success),
                    ..Default::default()
                },
            );
            self.advance_status(task_id, TaskStatus::Completed);
            return;
        }

        let request = AsyncSearchRequest {
            query: keyword.clone(),
            page: self.cfg.page,
            page_size: options.max_results,
            search_type: options.search_type,
            enable_llm: self.cfg.enable_llm,
        };
        let started = Instant::now();
        let accepted = match self.backend.start_search(&request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(task_id, error = %e, "search initiation failed");
                self.force_complete(task_id, TaskOutcome::BackendError);
                return;
            }
        };
        debug!(
            task_id,
            search_id = %accepted.search_id,
            message = accepted.message.as_deref().unwrap_or(""),
            "search accepted"
        );
        self.apply_patch(
            task_id,
            TaskPatch {
                backend_reference: Some(accepted.search_id.clone()),
                ..Default::default()
            },
        );

        match self.poll(task_id, &accepted.search_id).await {
            PollOutcome::Ready(payload) => {
                self.advance_status(task_id, TaskStatus::Evaluating);
                tokio::time::sleep(self.cfg.settle_delay).await;

                let entries: Vec<_> = payload
                    .results
                    .iter()
                    .enumerate()
                    .map(|(i, record)| convert::record_to_entry(i + 1, record))
                    .collect();
                let total = payload.total_count();

                let snapshot = CachePayload {
                    results: entries.clone(),
                    total_results: total,
                    rewritten_terms: payload.rewritten_terms.clone(),
                    search_ms: started.elapsed().as_millis() as u64,
                };
                if let Err(e) = self.cache.save(&key, &snapshot) {
                    warn!(task_id, error = %e, "cache write dropped");
                }

                self.apply_patch(
                    task_id,
                    TaskPatch {
                        relevant_results: Some(entries.len() as u64),
                        results: Some(entries),
                        total_results: Some(total),
                        outcome: Some(TaskOutcome::Success),
                        ..Default::default()
                    },
                );
                self.advance_status(task_id, TaskStatus::Completed);
            }
            PollOutcome::Failed => self.force_complete(task_id, TaskOutcome::BackendError),
            PollOutcome::TimedOut => self.force_complete(task_id, TaskOutcome::TimedOut),
        }
    }

    /// Poll the backend until results materialize. Attempts are strictly
    /// sequential at a fixed interval; a not-ready answer is a retry cause,
    /// anything else ends the session.
    async fn poll(&self, task_id: u64, search_id: &str) -> PollOutcome {
        let mut attempts = 0u32;
        while attempts < self.cfg.max_poll_attempts {
            if self.cancel.load(Ordering::Relaxed) {
                debug!(task_id, "polling session cancelled");
                return PollOutcome::TimedOut;
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
            attempts += 1;

            match self.backend.fetch_results(search_id).await {
                Ok(payload) => {
                    debug!(
                        task_id,
                        attempts,
                        search_type = payload.search_type.as_deref().unwrap_or("unknown"),
                        "results materialized"
                    );
                    return PollOutcome::Ready(payload);
                }
                Err(BackendError::NotReady(_)) => {
                    debug!(task_id, attempt = attempts, "results not ready");
                }
                Err(e) => {
                    warn!(task_id, error = %e, "result fetch failed");
                    return PollOutcome::Failed;
                }
            }
        }
        warn!(task_id, attempts, "polling ceiling reached without results");
        PollOutcome::TimedOut
    }

    /// Land a task on `Completed` with no results. Apart from the recorded
    /// outcome this is indistinguishable from a legitimately empty result
    /// set.
    fn force_complete(&self, task_id: u64, outcome: TaskOutcome) {
        self.apply_patch(
            task_id,
            TaskPatch {
                results: Some(Vec::new()),
                total_results: Some(0),
                relevant_results: Some(0),
                outcome: Some(outcome),
                ..Default::default()
            },
        );
        self.advance_status(task_id, TaskStatus::Completed);
    }

    /// Fetch and attach results for a task that has none, returning an
    /// updated copy. Idempotent: a task that already carries results comes
    /// back unchanged, as does one whose backend fetch fails. The input is
    /// never mutated in place.
    pub async fn load_task_results(&self, task: &Task) -> Result<Task> {
        if !task.results.is_empty() {
            return Ok(task.clone());
        }
        let reference = task
            .backend_reference
            .clone()
            .context("task has no backend reference to load results from")?;

        let key = CacheStore::cache_key(&task.keyword, task.search_type, task.enable_llm);
        if let Some(hit) = self.cache.load(&key) {
            return Ok(self.finish_loaded(task, hit));
        }

        let started = Instant::now();
        let payload = match self.backend.fetch_results(&reference).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "lazy result load failed; task unchanged");
                return Ok(task.clone());
            }
        };

        let entries: Vec<_> = payload
            .results
            .iter()
            .enumerate()
            .map(|(i, record)| convert::record_to_entry(i + 1, record))
            .collect();
        let snapshot = CachePayload {
            results: entries,
            total_results: payload.total_count(),
            rewritten_terms: payload.rewritten_terms,
            search_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.cache.save(&key, &snapshot) {
            warn!(task_id = task.id, error = %e, "cache write dropped");
        }
        Ok(self.finish_loaded(task, snapshot))
    }

    /// Apply loaded results to a copy of `task`, keep the owned collection
    /// in step, and notify subscribers.
    fn finish_loaded(&self, task: &Task, payload: CachePayload) -> Task {
        let patch = TaskPatch {
            relevant_results: Some(payload.results.len() as u64),
            results: Some(payload.results),
            total_results: Some(payload.total_results),
            ..Default::default()
        };
        let mut updated = task.clone();
        patch.apply(&mut updated);
        if let Some(owned) = self.tasks.lock().unwrap().get_mut(&task.id) {
            patch.apply(owned);
        }
        self.events.publish(TaskEvent::ResultsUpdate {
            task_id: task.id,
            updates: patch,
        });
        updated
    }

    /// Seed the task collection, e.g. from the history feed. Existing tasks
    /// with the same id are left untouched.
    pub fn adopt_tasks(&self, seeded: Vec<Task>) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in seeded {
            tasks.entry(task.id).or_insert(task);
        }
    }

    pub fn task(&self, id: u64) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    /// All known tasks, newest first.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<_> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|task| std::cmp::Reverse((task.created_at, task.id)));
        tasks
    }

    pub async fn is_backend_healthy(&self) -> bool {
        self.backend.health().await
    }

    pub async fn backend_cache_stats(&self) -> Result<serde_json::Value> {
        self.backend
            .cache_stats()
            .await
            .context("fetch backend cache statistics")
    }

    /// Time-derived with a monotonic tiebreak, so ids stay unique even when
    /// two tasks are created within the same millisecond.
    fn next_task_id(&self) -> u64 {
        let now_ms = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64;
        loop {
            let prev = self.last_id.load(Ordering::Relaxed);
            let id = now_ms.max(prev + 1);
            if self
                .last_id
                .compare_exchange(prev, id, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return id;
            }
        }
    }

    /// Advance a task's status and publish the transition. Transitions are
    /// monotonic; an out-of-order advance is ignored.
    fn advance_status(&self, task_id: u64, status: TaskStatus) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            if status <= task.status {
                return;
            }
            task.status = status;
        }
        self.events.publish(TaskEvent::StatusUpdate { task_id, status });
    }

    fn apply_patch(&self, task_id: u64, patch: TaskPatch) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            patch.apply(task);
        }
        self.events.publish(TaskEvent::ResultsUpdate {
            task_id,
            updates: patch,
        });
    }
}
