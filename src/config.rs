//! Environment-driven configuration.
//!
//! Everything has a usable default so the server starts with nothing but an
//! API key; each field can be overridden through the environment.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the whole service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Completion API credential. Absence is reported per request, not at
    /// startup, so the service can come up before credentials are wired.
    pub anthropic_api_key: Option<String>,
    /// Completion model identifier.
    pub model_id: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Outer timeout for one completion request, in seconds.
    pub request_timeout_secs: u64,
    /// Retries after a completion timeout. Other errors are never retried.
    pub max_retries: u32,
    /// Backoff base; attempt N sleeps N times this long.
    pub retry_base_delay_ms: u64,
    /// Per-tier OCR time budget, in seconds.
    pub ocr_timeout_secs: u64,
    /// Language passed to the character recognizers.
    pub ocr_language: String,
    /// Language whose keyword set drives fuzzy cleanup.
    pub cleanup_language: String,
    /// Write preprocessed frames to a scratch directory for inspection.
    pub debug_ocr_dump: bool,
    /// Path of the JSONL interaction log.
    pub history_path: String,
    /// Similarity required for a prior answer to short-circuit a request.
    pub cache_score_threshold: f64,
    /// Model files for the neural fallback engine; the tier is skipped when
    /// either is missing.
    pub ocrs_detection_model: Option<String>,
    pub ocrs_recognition_model: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            anthropic_api_key: None,
            model_id: "claude-sonnet-4-20250514".to_string(),
            max_output_tokens: 2048,
            temperature: 0.5,
            request_timeout_secs: 20,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            ocr_timeout_secs: 5,
            ocr_language: "eng".to_string(),
            cleanup_language: "python".to_string(),
            debug_ocr_dump: false,
            history_path: "history.jsonl".to_string(),
            cache_score_threshold: 0.9,
            ocrs_detection_model: None,
            ocrs_recognition_model: None,
        }
    }
}

impl AppConfig {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("SCREENASSIST_BIND", defaults.bind_addr),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            model_id: env_or("SCREENASSIST_MODEL", defaults.model_id),
            max_output_tokens: env_parse("SCREENASSIST_MAX_TOKENS", defaults.max_output_tokens),
            temperature: env_parse("SCREENASSIST_TEMPERATURE", defaults.temperature),
            request_timeout_secs: env_parse(
                "SCREENASSIST_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            max_retries: env_parse("SCREENASSIST_MAX_RETRIES", defaults.max_retries),
            retry_base_delay_ms: env_parse(
                "SCREENASSIST_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            ),
            ocr_timeout_secs: env_parse("SCREENASSIST_OCR_TIMEOUT_SECS", defaults.ocr_timeout_secs),
            ocr_language: env_or("SCREENASSIST_OCR_LANGUAGE", defaults.ocr_language),
            cleanup_language: env_or("SCREENASSIST_CLEANUP_LANGUAGE", defaults.cleanup_language),
            debug_ocr_dump: env_flag("DEBUG_OCR_LOG"),
            history_path: env_or("SCREENASSIST_HISTORY_PATH", defaults.history_path),
            cache_score_threshold: env_parse(
                "SCREENASSIST_CACHE_THRESHOLD",
                defaults.cache_score_threshold,
            ),
            ocrs_detection_model: std::env::var("OCRS_DETECTION_MODEL").ok(),
            ocrs_recognition_model: std::env::var("OCRS_RECOGNITION_MODEL").ok(),
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.model_id, "claude-sonnet-4-20250514");
        assert_eq!(config.max_output_tokens, 2048);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.ocr_timeout(), Duration::from_secs(5));
        assert_eq!(config.cleanup_language, "python");
        assert!(!config.debug_ocr_dump);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("SCREENASSIST_TEST_PARSE", "not-a-number");
        let value: u32 = env_parse("SCREENASSIST_TEST_PARSE", 7);
        assert_eq!(value, 7);
        std::env::remove_var("SCREENASSIST_TEST_PARSE");
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("SCREENASSIST_TEST_FLAG", "TRUE");
        assert!(env_flag("SCREENASSIST_TEST_FLAG"));
        std::env::set_var("SCREENASSIST_TEST_FLAG", "yes");
        assert!(!env_flag("SCREENASSIST_TEST_FLAG"));
        std::env::remove_var("SCREENASSIST_TEST_FLAG");
        assert!(!env_flag("SCREENASSIST_TEST_FLAG"));
    }
}
