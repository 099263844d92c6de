//! Request orchestration for the screen-assist feature.
//!
//! Glues the OCR pipeline to the completion backend and the history store:
//! batch in, analysis out. The pipeline's no-code outcome and the
//! similar-question cache both short-circuit before any completion call.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::AppConfig;
use crate::error::AssistError;
use crate::history::{HistoryRecord, HistoryStore};
use crate::llm::{self, CompletionOptions, CompletionService, RetryPolicy};
use crate::pipeline::{BatchOutcome, Pipeline};

/// Feature tag written to every history record of this endpoint.
pub const FEATURE: &str = "screen-assist";

/// Guidance returned when no readable code was recovered from the batch.
pub const NO_CODE_GUIDANCE: &str = "⚠️ We couldn't detect readable code from your screen capture. \
    This may happen if:\n\
    - Your code font is very small\n\
    - Your editor theme is dark with low contrast\n\n\
    🛠 Try increasing font size, using a light theme, or zooming in before running Screen Assist again.";

/// One incoming request: a session's frame batch plus the question.
#[derive(Debug)]
pub struct AssistRequest {
    pub session_id: String,
    pub query: String,
    /// Base64-decoded image bytes, in capture order.
    pub frames: Vec<Vec<u8>>,
}

pub struct AssistService {
    pipeline: Pipeline,
    completion: Arc<dyn CompletionService>,
    history: Arc<dyn HistoryStore>,
    config: AppConfig,
}

impl AssistService {
    pub fn new(
        pipeline: Pipeline,
        completion: Arc<dyn CompletionService>,
        history: Arc<dyn HistoryStore>,
        config: AppConfig,
    ) -> Self {
        Self {
            pipeline,
            completion,
            history,
            config,
        }
    }

    /// Run one request end to end.
    pub async fn handle(&self, request: AssistRequest) -> Result<String, AssistError> {
        let code = match self
            .pipeline
            .process_batch(&request.session_id, &request.frames)
            .await
        {
            BatchOutcome::Ready(code) => code,
            BatchOutcome::NoCodeDetected => return Err(AssistError::NoTextDetected),
        };

        if let Some(previous) = self
            .history
            .find_similar(
                FEATURE,
                &request.query,
                &code,
                self.config.cache_score_threshold,
            )
            .await
        {
            log::info!(
                "session {}: served similar prior answer from history",
                request.session_id
            );
            return Ok(previous);
        }

        if self.config.anthropic_api_key.is_none() {
            return Err(AssistError::ConfigurationMissing("ANTHROPIC_API_KEY"));
        }

        let prompt = llm::create_prompt(&request.query, &code);
        let options = CompletionOptions {
            model_id: self.config.model_id.clone(),
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            base_delay: self.config.retry_base_delay(),
        };

        let start = Instant::now();
        let analysis =
            llm::complete_with_retry(self.completion.as_ref(), &prompt, &options, policy).await?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        log::info!(
            "session {}: completion answered in {:.0}ms",
            request.session_id,
            elapsed_ms
        );

        self.log_interaction(&request, prompt, analysis.clone(), code, elapsed_ms);
        Ok(analysis)
    }

    /// Detach a best-effort history write; the request never waits on it.
    fn log_interaction(
        &self,
        request: &AssistRequest,
        prompt: String,
        response: String,
        code: String,
        elapsed_ms: f64,
    ) {
        let record = HistoryRecord {
            feature: FEATURE.to_string(),
            input: request.query.clone(),
            prompt,
            response,
            response_time_ms: Some(elapsed_ms),
            timestamp: Utc::now(),
            metadata: serde_json::json!({
                "model": self.config.model_id,
                "session_id": request.session_id,
                "frame_count": request.frames.len(),
                "code": code,
            }),
        };
        let history = Arc::clone(&self.history);
        tokio::spawn(async move {
            history.append(record).await;
        });
    }
}
