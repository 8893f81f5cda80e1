//! Reconstruction of prior tasks from the backend's history feed.
//!
//! History records carry only summary metadata; the tasks rebuilt here keep
//! their results empty and retain the backend reference so results can be
//! loaded lazily when a task is actually selected.

use crate::backend::{HistoryRecord, SearchBackend};
use crate::model::{SearchType, Task, TaskStatus};
use std::sync::Arc;
use tracing::{debug, warn};

/// Width of a locally generated task id in digits (millisecond timestamps).
const LOCAL_ID_DIGITS: usize = 13;

pub struct HistoryLoader {
    backend: Arc<dyn SearchBackend>,
}

impl HistoryLoader {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    /// Load up to `limit` prior tasks. Any fetch or parse failure yields an
    /// empty list rather than a partial one; the caller treats that as "no
    /// history available".
    pub async fn load(&self, limit: usize) -> Vec<Task> {
        let response = match self.backend.history(limit).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "history unavailable");
                return Vec::new();
            }
        };
        debug!(
            count = response.count,
            returned = response.history.len(),
            "history feed loaded"
        );
        response
            .history
            .into_iter()
            .take(limit)
            .map(task_from_record)
            .collect()
    }
}

fn task_from_record(record: HistoryRecord) -> Task {
    let search_type = record
        .search_type
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(SearchType::Keyword);
    let mut task = Task::new(
        derive_local_id(&record.search_id),
        record.query,
        search_type,
        record.enable_llm,
    );
    task.status = TaskStatus::Completed;
    task.total_results = record.total_results;
    task.relevant_results = record.results_count;
    if let Some(created_at) = record.created_at {
        task.created_at = created_at;
    }
    task.backend_reference = Some(record.search_id);
    task
}

/// Stable local id for a backend identifier: its digit characters, truncated
/// to the local id width. Falls back to the current time when the identifier
/// carries no digits at all.
fn derive_local_id(backend_id: &str) -> u64 {
    let digits: String = backend_id
        .chars()
        .filter(char::is_ascii_digit)
        .take(LOCAL_ID_DIGITS)
        .collect();
    digits.parse().unwrap_or_else(|_| now_millis())
}

fn now_millis() -> u64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::backend::HistoryResponse;

    fn record(search_id: &str, query: &str) -> HistoryRecord {
        HistoryRecord {
            search_id: search_id.into(),
            query: query.into(),
            search_type: Some("hybrid".into()),
            enable_llm: true,
            total_results: Some(40),
            results_count: Some(12),
            created_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn uuid_digits_derive_a_deterministic_local_id() {
        let uuid = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(derive_local_id(uuid), 5_508_400_294_147);
        assert_eq!(derive_local_id(uuid), derive_local_id(uuid));
    }

    #[test]
    fn digitless_ids_fall_back_to_current_time() {
        // Millisecond timestamps; anything after 2020 is fine.
        assert!(derive_local_id("no-digits-here") > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn load_rebuilds_completed_tasks_without_results() {
        let backend = Arc::new(FakeBackend {
            history: Some(HistoryResponse {
                history: vec![record("a1", "diabetes"), record("b2", "insulin")],
                count: 2,
            }),
            ..Default::default()
        });
        let tasks = HistoryLoader::new(backend).load(20).await;

        assert_eq!(tasks.len(), 2);
        for task in &tasks {
            assert_eq!(task.status, TaskStatus::Completed);
            assert!(task.results.is_empty());
            assert!(task.backend_reference.is_some());
            assert_eq!(task.search_type, SearchType::Hybrid);
        }
        assert_eq!(tasks[0].total_results, Some(40));
        assert_eq!(tasks[0].relevant_results, Some(12));
        assert_eq!(tasks[0].created_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn load_never_exceeds_the_limit() {
        let backend = Arc::new(FakeBackend {
            history: Some(HistoryResponse {
                history: (0..5)
                    .map(|i| record(&format!("id{i}"), "q"))
                    .collect(),
                count: 5,
            }),
            ..Default::default()
        });
        let tasks = HistoryLoader::new(backend).load(3).await;
        assert_eq!(tasks.len(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_yields_an_empty_list() {
        let backend = Arc::new(FakeBackend::default());
        let tasks = HistoryLoader::new(backend).load(20).await;
        assert!(tasks.is_empty());
    }
}
