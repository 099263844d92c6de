//! Interaction history persistence and similar-question lookup.
//!
//! Persistence is best effort: appends run detached from the request and a
//! store failure is logged, never surfaced to the caller. The lookup side
//! lets a request short-circuit on a sufficiently similar prior question
//! before any completion call is made.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::cleanup::similarity;

/// One logged interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub feature: String,
    pub input: String,
    pub prompt: String,
    pub response: String,
    pub response_time_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// Persistence seam for prior interactions.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist one record. Implementations log failures and swallow them.
    async fn append(&self, record: HistoryRecord);

    /// Response of the most similar prior interaction for a feature, or
    /// `None` when nothing scores at or above the threshold.
    async fn find_similar(
        &self,
        feature: &str,
        query_text: &str,
        context_text: &str,
        score_threshold: f64,
    ) -> Option<String>;
}

/// Append-only JSON-lines store, one serialized record per line.
///
/// Stands in for a document store when none is deployed; records keep the
/// same shape either way.
pub struct JsonlHistoryStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, record: HistoryRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                log::error!("failed to serialize history record: {}", err);
                return;
            }
        };

        let _guard = self.write_lock.lock().await;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        }
        .await;

        if let Err(err) = result {
            log::error!("failed to log history record: {}", err);
        }
    }

    async fn find_similar(
        &self,
        feature: &str,
        query_text: &str,
        context_text: &str,
        score_threshold: f64,
    ) -> Option<String> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;

        let mut best: Option<(f64, String)> = None;
        for line in content.lines() {
            let Ok(record) = serde_json::from_str::<HistoryRecord>(line) else {
                continue;
            };
            if record.feature != feature {
                continue;
            }

            let query_score = similarity(query_text, &record.input);
            let score = match record.metadata.get("code").and_then(|c| c.as_str()) {
                Some(code) if !context_text.is_empty() => {
                    (query_score + similarity(context_text, code)) / 2.0
                }
                _ => query_score,
            };

            if score >= score_threshold && best.as_ref().map_or(true, |(prev, _)| score > *prev) {
                best = Some((score, record.response));
            }
        }
        best.map(|(_, response)| response)
    }
}
