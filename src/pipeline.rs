//! Frame batch processing.
//!
//! Runs decode, preprocessing, recognition and cleanup for every frame of a
//! request, then aggregates. Frames are processed sequentially: the engines
//! are shared process-wide singletons, so in-request parallelism would
//! contend on them without a latency win, and sequential frames bound peak
//! memory. A bad frame is skipped; it never fails the batch.

use std::path::Path;
use std::sync::Arc;

use image::GrayImage;
use uuid::Uuid;

use crate::cleanup;
use crate::ocr::{EngineChain, ExtractionOutcome, FrameImages};
use crate::preprocess;
use crate::session::SessionBuffer;

/// Terminal result of one batch.
#[derive(Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// At least one frame produced text; the joined blob is ready for
    /// prompt construction.
    Ready(String),
    /// Nothing readable anywhere in the batch. The caller must not reach
    /// the completion backend for this request.
    NoCodeDetected,
}

pub struct Pipeline {
    chain: EngineChain,
    cleanup_language: String,
    debug_dump: bool,
}

impl Pipeline {
    pub fn new(chain: EngineChain, cleanup_language: &str, debug_dump: bool) -> Self {
        Self {
            chain,
            cleanup_language: cleanup_language.to_string(),
            debug_dump,
        }
    }

    /// Process a full batch for one session.
    pub async fn process_batch(&self, session_id: &str, frames: &[Vec<u8>]) -> BatchOutcome {
        let request_id = Uuid::new_v4();
        let mut buffer = SessionBuffer::new(session_id);
        let dump = DebugDump::new(self.debug_dump, request_id);
        if let Some(path) = dump.dir_path() {
            log::info!(
                "request {}: dumping preprocessed frames to {}",
                request_id,
                path.display()
            );
        }

        log::debug!(
            "request {}: processing {} frames for session {}",
            request_id,
            frames.len(),
            session_id
        );

        for (index, bytes) in frames.iter().enumerate() {
            let original = match preprocess::decode_frame(bytes) {
                Ok(image) => image,
                Err(err) => {
                    log::warn!("request {}: frame {} skipped: {}", request_id, index, err);
                    continue;
                }
            };

            let preprocessed = preprocess::preprocess(&original);
            dump.save(index, &preprocessed);

            let frame = Arc::new(FrameImages {
                original,
                preprocessed,
            });
            let result = self.chain.extract(index, frame).await;
            log::debug!(
                "request {}: frame {} -> {:?} via {}",
                request_id,
                result.frame_index,
                result.outcome,
                result.engine
            );

            match result.outcome {
                ExtractionOutcome::Extracted => {
                    let cleaned =
                        cleanup::clean_ocr_text(result.text.trim(), &self.cleanup_language);
                    buffer.push(&cleaned);
                }
                _ => buffer.push(""),
            }
        }

        match buffer.aggregate() {
            Some(code) => {
                log::info!(
                    "request {}: extracted {} chars from {}/{} frames",
                    request_id,
                    code.len(),
                    buffer.extracted_count(),
                    buffer.frames_seen()
                );
                BatchOutcome::Ready(code)
            }
            None => {
                log::info!(
                    "request {}: no readable code in batch for session {}",
                    request_id,
                    buffer.session_id()
                );
                BatchOutcome::NoCodeDetected
            }
        }
    }
}

/// Scratch directory for preprocessed frames when OCR debugging is on.
///
/// Backed by a `TempDir`, so the files are removed when the request
/// finishes on success, error and panic paths alike.
struct DebugDump {
    dir: Option<tempfile::TempDir>,
}

impl DebugDump {
    fn new(enabled: bool, request_id: Uuid) -> Self {
        if !enabled {
            return Self { dir: None };
        }
        match tempfile::Builder::new()
            .prefix(&format!("screenassist-{}-", request_id))
            .tempdir()
        {
            Ok(dir) => Self { dir: Some(dir) },
            Err(err) => {
                log::warn!("debug dump disabled: {}", err);
                Self { dir: None }
            }
        }
    }

    fn dir_path(&self) -> Option<&Path> {
        self.dir.as_ref().map(|dir| dir.path())
    }

    fn save(&self, frame_index: usize, image: &GrayImage) {
        let Some(dir) = &self.dir else { return };
        let path = dir.path().join(format!("frame-{:02}.png", frame_index));
        if let Err(err) = image.save(&path) {
            log::warn!("failed to write debug frame {}: {}", path.display(), err);
        }
    }
}
