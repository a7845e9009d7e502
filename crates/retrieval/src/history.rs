//! Similar-task search over the local task store.

use std::collections::BTreeSet;
use std::sync::Arc;
use async_trait::async_trait;
use taskflow_core::{Outcome, ResultMarker, SimilarTask, Stage, Task, TaskFilter};
use taskflow_storage::Storage;
use tokio::sync::Mutex;
use crate::{RankedResults, Result, TaskHistorySearch};

/// Keyword-overlap similarity over finished tasks in a [`Storage`].
pub struct StoredTaskHistory<S: Storage> {
    storage: Arc<Mutex<S>>,
}

impl<S: Storage> StoredTaskHistory<S> {
    /// Search the given store.
    pub fn new(storage: Arc<Mutex<S>>) -> Self {
        Self { storage }
    }

    fn calculate_relevance_score(task: &Task, terms: &BTreeSet<String>) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let title = tokenize(&task.title);
        let description = tokenize(&task.description);
        let summaries: BTreeSet<String> = task
            .live_history()
            .flat_map(|r| tokenize(&r.summary))
            .collect();

        let mut score = 0.0;
        for term in terms {
            // Title (highest weight)
            if title.contains(term) {
                score += 3.0;
            }
            // Stage summaries (medium weight)
            if summaries.contains(term) {
                score += 2.0;
            }
            // Description
            if description.contains(term) {
                score += 1.0;
            }
        }

        // Normalise so long queries do not dominate
        score / (terms.len() as f64 * 6.0)
    }

    fn outcome_summary(task: &Task) -> String {
        if let Some(ResultMarker::Abandoned { reason }) =
            task.last_result().and_then(|r| r.marker.as_ref())
        {
            return format!("abandoned: {}", reason);
        }
        let last_success = task
            .live_history()
            .rev()
            .find(|r| r.outcome == Outcome::Success);
        match last_success {
            Some(r) => format!("{} ({}): {}", task.stage, r.stage, r.summary),
            None => task.stage.to_string(),
        }
    }
}

#[async_trait]
impl<S: Storage> TaskHistorySearch for StoredTaskHistory<S> {
    async fn find_similar_tasks(
        &self,
        description: &str,
        top_k: usize,
    ) -> Result<RankedResults<SimilarTask>> {
        let filter = TaskFilter {
            stages: Some(vec![Stage::Done, Stage::Abandoned]),
            ..Default::default()
        };
        let finished = self.storage.lock().await.list_tasks(&filter).await?;
        let terms = tokenize(description);

        let hits = finished
            .iter()
            .map(|task| (task, Self::calculate_relevance_score(task, &terms)))
            .filter(|(_, score)| *score > 0.0)
            .map(|(task, score)| SimilarTask {
                reference: task.id.to_string(),
                title: task.title.clone(),
                summary: Self::outcome_summary(task),
                score,
            })
            .collect();

        Ok(RankedResults::new(hits, top_k))
    }
}

/// Lowercase alphanumeric words of three or more characters.
fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}
