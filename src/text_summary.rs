//! Text summary builder for CLI output.
//!
//! Formats a finished task as human-readable lines for text mode.

use crate::model::{Task, TaskOutcome};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(task: &Task) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Query: {}", task.keyword));
    lines.push(format!(
        "Mode: {} (llm {})",
        task.search_type,
        if task.enable_llm { "on" } else { "off" }
    ));
    match task.outcome {
        Some(TaskOutcome::TimedOut) => {
            lines.push("Search timed out before the backend produced results.".into());
        }
        Some(TaskOutcome::BackendError) => {
            lines.push("Backend failed; no results were retrieved.".into());
        }
        _ => {}
    }

    let total = task.total_results.unwrap_or(0);
    let relevant = task.relevant_results.unwrap_or(0);
    lines.push(format!("Results: {relevant} relevant of {total} total"));

    for entry in &task.results {
        lines.push(format!(
            "{:>3}. {} ({}) - {} [score {:.2}]",
            entry.id, entry.title, entry.year, entry.journal, entry.relevance_score
        ));
        lines.push(format!(
            "     {}: {}",
            entry.authors.join(", "),
            entry.ai_reasoning
        ));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SearchType, TaskStatus};

    #[test]
    fn summary_mentions_counts_and_entries() {
        let mut task = Task::new(1, "diabetes", SearchType::Hybrid, false);
        task.status = TaskStatus::Completed;
        task.total_results = Some(40);
        task.relevant_results = Some(0);
        task.outcome = Some(TaskOutcome::Success);

        let summary = build_text_summary(&task);
        assert!(summary.lines.iter().any(|l| l.contains("0 relevant of 40")));
    }
}
