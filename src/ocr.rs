//! OCR engine tiers and the fallback chain.
//!
//! Recognition is tiered: a general-purpose engine first, an alternate
//! engine with different layout assumptions second, and a contour-based
//! region counter last so a frame always yields some signal. Tiers run
//! strictly one after another; bounding worst-case latency matters more
//! here than squeezing accuracy out of parallel attempts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GrayImage};
use imageproc::contours::{find_contours, BorderType};
use tokio::time::timeout;

use crate::config::AppConfig;
use crate::error::EngineError;

/// Inputs available to every engine tier for one frame.
///
/// Recognition tiers read the preprocessed bitmap; the region heuristic
/// works from the original capture.
pub struct FrameImages {
    pub original: DynamicImage,
    pub preprocessed: GrayImage,
}

/// One OCR strategy in the fallback chain.
///
/// Implementations are blocking and run on a worker thread; a single
/// instance is shared across requests, so `recognize` must be safe to call
/// concurrently.
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn recognize(&self, frame: &FrameImages) -> Result<String, EngineError>;
}

/// How the chain finished for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// An engine produced non-empty text.
    Extracted,
    /// Every tier ran but none saw any text. Distinct from a hard failure.
    NoText,
    /// The last tier to run failed outright.
    Failed,
    /// The last tier to run exceeded its time budget.
    TimedOut,
}

/// Text recognized from one frame, tagged with the engine that produced it.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub frame_index: usize,
    pub text: String,
    pub engine: &'static str,
    pub outcome: ExtractionOutcome,
}

// ============================================================================
// Fallback chain
// ============================================================================

/// Ordered fallback chain over the configured engines.
pub struct EngineChain {
    engines: Vec<Arc<dyn Recognizer>>,
    tier_timeout: Duration,
}

impl EngineChain {
    pub fn new(engines: Vec<Arc<dyn Recognizer>>, tier_timeout: Duration) -> Self {
        Self {
            engines,
            tier_timeout,
        }
    }

    /// Run the chain for one frame.
    ///
    /// Each tier gets its own time budget and runs on a blocking worker; a
    /// worker that overruns is abandoned, not joined, so a stuck recognizer
    /// cannot stall the batch. The next tier starts only after the previous
    /// one errored, timed out, or returned empty text.
    pub async fn extract(&self, frame_index: usize, frame: Arc<FrameImages>) -> ExtractionResult {
        let mut saw_empty = false;
        let mut last_failure: Option<ExtractionOutcome> = None;
        let mut last_engine = "";

        for engine in &self.engines {
            let name = engine.name();
            last_engine = name;

            let worker_engine = Arc::clone(engine);
            let worker_frame = Arc::clone(&frame);
            let attempt =
                tokio::task::spawn_blocking(move || worker_engine.recognize(&worker_frame));

            match timeout(self.tier_timeout, attempt).await {
                Ok(Ok(Ok(text))) => {
                    if text.trim().is_empty() {
                        log::debug!("frame {}: {} found no text", frame_index, name);
                        saw_empty = true;
                        continue;
                    }
                    return ExtractionResult {
                        frame_index,
                        text,
                        engine: name,
                        outcome: ExtractionOutcome::Extracted,
                    };
                }
                Ok(Ok(Err(err))) => {
                    log::warn!("frame {}: {} failed: {}", frame_index, name, err);
                    last_failure = Some(ExtractionOutcome::Failed);
                }
                Ok(Err(join_err)) => {
                    log::warn!("frame {}: {} worker died: {}", frame_index, name, join_err);
                    last_failure = Some(ExtractionOutcome::Failed);
                }
                Err(_) => {
                    log::warn!(
                        "frame {}: {} exceeded {:?}, abandoning worker",
                        frame_index,
                        name,
                        self.tier_timeout
                    );
                    last_failure = Some(ExtractionOutcome::TimedOut);
                }
            }
        }

        let outcome = if saw_empty {
            ExtractionOutcome::NoText
        } else {
            last_failure.unwrap_or(ExtractionOutcome::NoText)
        };
        ExtractionResult {
            frame_index,
            text: String::new(),
            engine: last_engine,
            outcome,
        }
    }
}

/// Build the chain from configuration: Tesseract when compiled in, the
/// neural engine when its models are present, and the region counter
/// always.
pub fn build_chain(config: &AppConfig) -> EngineChain {
    let mut engines: Vec<Arc<dyn Recognizer>> = Vec::new();

    #[cfg(feature = "ocr")]
    engines.push(Arc::new(TesseractEngine::new(&config.ocr_language)));

    match (&config.ocrs_detection_model, &config.ocrs_recognition_model) {
        (Some(detection), Some(recognition)) => {
            match NeuralEngine::load(Path::new(detection), Path::new(recognition)) {
                Ok(engine) => engines.push(Arc::new(engine)),
                Err(err) => log::warn!("neural engine disabled: {}", err),
            }
        }
        _ => log::info!("neural engine not configured, skipping tier"),
    }

    engines.push(Arc::new(RegionHeuristic::default()));
    EngineChain::new(engines, config.ocr_timeout())
}

// ============================================================================
// Tesseract tier
// ============================================================================

/// General-purpose recognizer backed by the system Tesseract install.
#[cfg(feature = "ocr")]
pub struct TesseractEngine {
    language: String,
}

#[cfg(feature = "ocr")]
impl TesseractEngine {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }
}

#[cfg(feature = "ocr")]
impl Recognizer for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, frame: &FrameImages) -> Result<String, EngineError> {
        use tesseract::Tesseract;

        // Tesseract reads encoded bytes, so round-trip through PNG.
        let gray = &frame.preprocessed;
        let mut png_bytes = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
        image::ImageEncoder::write_image(
            encoder,
            gray.as_raw(),
            gray.width(),
            gray.height(),
            image::ExtendedColorType::L8,
        )
        .map_err(|err| EngineError::Recognition(format!("failed to encode image: {}", err)))?;

        let mut tess = Tesseract::new(None, Some(self.language.as_str()))
            .map_err(|err| EngineError::Unavailable(format!("failed to initialize: {}", err)))?
            .set_image_from_mem(&png_bytes)
            .map_err(|err| EngineError::Recognition(format!("failed to set image: {}", err)))?;

        tess.get_text()
            .map_err(|err| EngineError::Recognition(format!("failed to read text: {}", err)))
    }
}

// ============================================================================
// Neural tier (ocrs)
// ============================================================================

/// Pure-Rust neural recognizer. Useful when Tesseract's layout assumptions
/// fail on a frame; models are loaded once at startup and the engine is
/// reused for every request.
pub struct NeuralEngine {
    engine: ocrs::OcrEngine,
}

impl NeuralEngine {
    /// Load detection and recognition models from disk.
    pub fn load(detection_model: &Path, recognition_model: &Path) -> Result<Self, EngineError> {
        let detection = rten::Model::load_file(detection_model).map_err(|err| {
            EngineError::Unavailable(format!("failed to load detection model: {}", err))
        })?;
        let recognition = rten::Model::load_file(recognition_model).map_err(|err| {
            EngineError::Unavailable(format!("failed to load recognition model: {}", err))
        })?;

        let engine = ocrs::OcrEngine::new(ocrs::OcrEngineParams {
            detection_model: Some(detection),
            recognition_model: Some(recognition),
            ..Default::default()
        })
        .map_err(|err| EngineError::Unavailable(format!("failed to build engine: {}", err)))?;

        Ok(Self { engine })
    }
}

impl Recognizer for NeuralEngine {
    fn name(&self) -> &'static str {
        "ocrs"
    }

    fn recognize(&self, frame: &FrameImages) -> Result<String, EngineError> {
        let rgb = DynamicImage::ImageLuma8(frame.preprocessed.clone()).into_rgb8();
        let source = ocrs::ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions())
            .map_err(|err| EngineError::Recognition(format!("failed to read image: {}", err)))?;

        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| EngineError::Recognition(format!("failed to prepare input: {}", err)))?;

        self.engine
            .get_text(&input)
            .map_err(|err| EngineError::Recognition(format!("failed to recognize text: {}", err)))
    }
}

// ============================================================================
// Region heuristic tier
// ============================================================================

/// Last-resort tier. Counts probable text regions instead of reading
/// characters, so the caller still gets a signal when recognition is
/// impossible.
pub struct RegionHeuristic {
    min_width: u32,
    min_height: u32,
}

impl Default for RegionHeuristic {
    fn default() -> Self {
        Self {
            min_width: 20,
            min_height: 10,
        }
    }
}

impl Recognizer for RegionHeuristic {
    fn name(&self) -> &'static str {
        "regions"
    }

    fn recognize(&self, frame: &FrameImages) -> Result<String, EngineError> {
        let gray = frame.original.to_luma8();

        // Plain binary threshold; contour detection treats white as
        // foreground.
        let mut binary = gray;
        for pixel in binary.pixels_mut() {
            pixel.0[0] = if pixel.0[0] > 127 { 255 } else { 0 };
        }

        let contours = find_contours::<u32>(&binary);
        let mut regions: Vec<(u32, u32)> = Vec::new();
        for contour in &contours {
            if contour.border_type != BorderType::Outer || contour.points.is_empty() {
                continue;
            }
            let min_x = contour.points.iter().map(|p| p.x).min().unwrap_or(0);
            let max_x = contour.points.iter().map(|p| p.x).max().unwrap_or(0);
            let min_y = contour.points.iter().map(|p| p.y).min().unwrap_or(0);
            let max_y = contour.points.iter().map(|p| p.y).max().unwrap_or(0);

            let width = max_x - min_x;
            let height = max_y - min_y;
            if width > self.min_width && height > self.min_height {
                regions.push((min_y, min_x));
            }
        }

        // Top-to-bottom, matching reading order.
        regions.sort_unstable();
        Ok(format!(
            "Found {} potential text regions in image",
            regions.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blank_frame(width: u32, height: u32) -> Arc<FrameImages> {
        let original = DynamicImage::new_rgb8(width, height);
        let preprocessed = original.to_luma8();
        Arc::new(FrameImages {
            original,
            preprocessed,
        })
    }

    struct FixedEngine {
        name: &'static str,
        text: &'static str,
    }

    impl Recognizer for FixedEngine {
        fn name(&self) -> &'static str {
            self.name
        }
        fn recognize(&self, _frame: &FrameImages) -> Result<String, EngineError> {
            Ok(self.text.to_string())
        }
    }

    struct FailingEngine;

    impl Recognizer for FailingEngine {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn recognize(&self, _frame: &FrameImages) -> Result<String, EngineError> {
            Err(EngineError::Recognition("model exploded".to_string()))
        }
    }

    struct SlowEngine;

    impl Recognizer for SlowEngine {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn recognize(&self, _frame: &FrameImages) -> Result<String, EngineError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok("too late".to_string())
        }
    }

    fn chain(engines: Vec<Arc<dyn Recognizer>>) -> EngineChain {
        EngineChain::new(engines, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_first_tier_success_wins() {
        let chain = chain(vec![
            Arc::new(FixedEngine {
                name: "first",
                text: "hello",
            }),
            Arc::new(FixedEngine {
                name: "second",
                text: "unused",
            }),
        ]);
        let result = chain.extract(0, blank_frame(8, 8)).await;
        assert_eq!(result.text, "hello");
        assert_eq!(result.engine, "first");
        assert_eq!(result.outcome, ExtractionOutcome::Extracted);
    }

    #[tokio::test]
    async fn test_error_falls_through_to_next_tier() {
        let chain = chain(vec![
            Arc::new(FailingEngine),
            Arc::new(FixedEngine {
                name: "second",
                text: "rescued",
            }),
        ]);
        let result = chain.extract(3, blank_frame(8, 8)).await;
        assert_eq!(result.text, "rescued");
        assert_eq!(result.engine, "second");
        assert_eq!(result.frame_index, 3);
    }

    #[tokio::test]
    async fn test_empty_text_falls_through_to_next_tier() {
        let chain = chain(vec![
            Arc::new(FixedEngine {
                name: "first",
                text: "   \n  ",
            }),
            Arc::new(FixedEngine {
                name: "second",
                text: "real text",
            }),
        ]);
        let result = chain.extract(0, blank_frame(8, 8)).await;
        assert_eq!(result.text, "real text");
        assert_eq!(result.engine, "second");
    }

    #[tokio::test]
    async fn test_timeout_falls_through_to_next_tier() {
        let chain = chain(vec![
            Arc::new(SlowEngine),
            Arc::new(FixedEngine {
                name: "second",
                text: "fast",
            }),
        ]);
        let result = chain.extract(0, blank_frame(8, 8)).await;
        assert_eq!(result.text, "fast");
        assert_eq!(result.engine, "second");
    }

    #[tokio::test]
    async fn test_all_tiers_failing_reports_failure() {
        let chain = chain(vec![Arc::new(FailingEngine), Arc::new(FailingEngine)]);
        let result = chain.extract(0, blank_frame(8, 8)).await;
        assert!(result.text.is_empty());
        assert_eq!(result.outcome, ExtractionOutcome::Failed);
    }

    #[tokio::test]
    async fn test_all_empty_reports_no_text() {
        let chain = chain(vec![Arc::new(FixedEngine {
            name: "first",
            text: "",
        })]);
        let result = chain.extract(0, blank_frame(8, 8)).await;
        assert_eq!(result.outcome, ExtractionOutcome::NoText);
    }

    #[test]
    fn test_region_heuristic_counts_bright_blocks() {
        let mut img = image::GrayImage::new(200, 120);
        // Two text-sized bright blocks on a dark background, plus one too
        // small to count.
        for y in 10..30 {
            for x in 10..60 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        for y in 60..80 {
            for x in 30..100 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        for y in 100..104 {
            for x in 150..160 {
                img.put_pixel(x, y, Luma([255]));
            }
        }

        let original = DynamicImage::ImageLuma8(img);
        let preprocessed = original.to_luma8();
        let frame = FrameImages {
            original,
            preprocessed,
        };

        let text = RegionHeuristic::default().recognize(&frame).unwrap();
        assert_eq!(text, "Found 2 potential text regions in image");
    }

    #[test]
    fn test_region_heuristic_empty_image() {
        let frame = blank_frame(64, 64);
        let text = RegionHeuristic::default().recognize(&frame).unwrap();
        assert_eq!(text, "Found 0 potential text regions in image");
    }
}
