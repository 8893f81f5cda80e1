use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub base_url: String,
    pub page: u32,
    pub page_size: u32,
    pub enable_llm: bool,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

/// Per-task options supplied at creation time; everything else comes from `SearchConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub search_type: SearchType,
    pub max_results: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Keyword,
    Vector,
    Hybrid,
}

impl SearchType {
    /// Wire string used in request bodies and cache keys.
    pub fn as_query_str(self) -> &'static str {
        match self {
            SearchType::Keyword => "keyword",
            SearchType::Vector => "vector",
            SearchType::Hybrid => "hybrid",
        }
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(SearchType::Keyword),
            "vector" => Ok(SearchType::Vector),
            "hybrid" => Ok(SearchType::Hybrid),
            other => Err(format!(
                "unknown search type {other:?} (expected keyword, vector, or hybrid)"
            )),
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query_str())
    }
}

/// Task lifecycle states. Ordered progression; a task never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Searching,
    Evaluating,
    Completed,
}

/// Terminal cause recorded alongside `Completed`. Timeouts and backend
/// failures still complete the task with empty results; this field is what
/// lets a consumer tell them apart from a genuine empty result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success,
    TimedOut,
    BackendError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub keyword: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
    /// Unix seconds at creation; immutable.
    pub created_at: i64,
    pub search_type: SearchType,
    pub enable_llm: bool,
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub relevant_results: Option<u64>,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
    /// Opaque backend `search_id`; absent until the backend accepts the request.
    #[serde(default)]
    pub backend_reference: Option<String>,
}

impl Task {
    pub fn new(id: u64, keyword: impl Into<String>, search_type: SearchType, enable_llm: bool) -> Self {
        Self {
            id,
            keyword: keyword.into(),
            status: TaskStatus::Pending,
            outcome: None,
            created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
            search_type,
            enable_llm,
            total_results: None,
            relevant_results: None,
            results: Vec::new(),
            backend_reference: None,
        }
    }
}

/// One retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Sequence position within the result set, 1-based.
    pub id: usize,
    pub title: String,
    pub authors: Vec<String>,
    pub journal: String,
    pub year: u16,
    pub relevance_score: f64,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub ai_reasoning: String,
}

/// Partial patch applied to a task; only populated fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub results: Option<Vec<ResultEntry>>,
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub relevant_results: Option<u64>,
    #[serde(default)]
    pub backend_reference: Option<String>,
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
}

impl TaskPatch {
    pub fn apply(&self, task: &mut Task) {
        if let Some(results) = &self.results {
            task.results = results.clone();
        }
        if let Some(total) = self.total_results {
            task.total_results = Some(total);
        }
        if let Some(relevant) = self.relevant_results {
            task.relevant_results = Some(relevant);
        }
        if let Some(reference) = &self.backend_reference {
            task.backend_reference = Some(reference.clone());
        }
        if let Some(outcome) = self.outcome {
            task.outcome = Some(outcome);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    StatusUpdate { task_id: u64, status: TaskStatus },
    ResultsUpdate { task_id: u64, updates: TaskPatch },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_progression_is_ordered() {
        assert!(TaskStatus::Pending < TaskStatus::Searching);
        assert!(TaskStatus::Searching < TaskStatus::Evaluating);
        assert!(TaskStatus::Evaluating < TaskStatus::Completed);
    }

    #[test]
    fn patch_only_touches_populated_fields() {
        let mut task = Task::new(1, "diabetes", SearchType::Hybrid, false);
        task.backend_reference = Some("abc".into());

        let patch = TaskPatch {
            total_results: Some(12),
            ..Default::default()
        };
        patch.apply(&mut task);

        assert_eq!(task.total_results, Some(12));
        assert_eq!(task.backend_reference.as_deref(), Some("abc"));
        assert!(task.results.is_empty());
        assert_eq!(task.relevant_results, None);
    }
}
