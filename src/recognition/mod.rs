//! Local recognition over captured images.
//!
//! Two engines run on-device:
//! - Text recognition: ordered text fragments with boxes and confidences
//! - Scene classification: category labels filtered by a precision/recall
//!   operating point
//!
//! [`Recognizer`] wraps both and never fails: engine errors are logged and
//! read as "nothing recognized", since a screenshot without text is an
//! ordinary input.

pub mod classify;
pub mod helper;
pub mod ocr;

use crate::config::RecognitionConfig;
use crate::types::{CapturedImage, Classification, TextFragment};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub use classify::HelperSceneClassifier;
pub use helper::VisionHelper;
pub use ocr::HelperTextRecognizer;

/// Errors from a recognition engine
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("Vision helper not found at {0}")]
    HelperUnavailable(String),

    #[error("Vision helper failed: {0}")]
    HelperFailed(String),

    #[error("Vision helper timed out after {0}s")]
    Timeout(u64),

    #[error("Could not parse vision helper output: {0}")]
    Parse(String),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text recognition settings handed to the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextRecognitionOptions {
    /// Prefer accuracy over speed
    pub accurate: bool,
    /// Smallest text height to report, relative to image height; 0 keeps all
    pub minimum_text_height: f32,
    pub language_correction: bool,
}

impl Default for TextRecognitionOptions {
    fn default() -> Self {
        Self {
            accurate: true,
            minimum_text_height: 0.0,
            language_correction: true,
        }
    }
}

/// A point on a label's precision/recall curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionRecall {
    pub precision: f32,
    pub recall: f32,
}

/// Raw classifier output for one label, before filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationObservation {
    pub label: String,
    pub confidence: f32,
    /// Operating points the classifier reports for this label
    #[serde(default)]
    pub pr_curve: Vec<PrecisionRecall>,
}

impl ClassificationObservation {
    /// Whether the label reaches `min_recall` at a precision of at least
    /// `precision`
    pub fn has_minimum_recall(&self, min_recall: f32, precision: f32) -> bool {
        self.pr_curve
            .iter()
            .any(|p| p.precision >= precision && p.recall >= min_recall)
    }
}

#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in reading order. No text is `Ok(vec![])`.
    async fn recognize(
        &self,
        image: &CapturedImage,
        options: TextRecognitionOptions,
    ) -> Result<Vec<TextFragment>, RecognitionError>;
}

#[async_trait::async_trait]
pub trait SceneClassifier: Send + Sync {
    /// Classify the scene, returning every label the model scored
    async fn classify(
        &self,
        image: &CapturedImage,
    ) -> Result<Vec<ClassificationObservation>, RecognitionError>;
}

/// Keep labels that pass the operating point, best first, at most `max_labels`
pub fn filter_classifications(
    observations: Vec<ClassificationObservation>,
    min_recall: f32,
    min_precision: f32,
    max_labels: usize,
) -> Vec<Classification> {
    let mut passed: Vec<Classification> = observations
        .into_iter()
        .filter(|o| o.has_minimum_recall(min_recall, min_precision))
        .map(|o| Classification {
            label: o.label,
            confidence: clamp_confidence(o.confidence),
        })
        .collect();

    passed.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    passed.truncate(max_labels);
    passed
}

/// Confidences outside 0.0-1.0 (or NaN) are pulled back into range
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Runs text recognition and classification with the configured thresholds
pub struct Recognizer {
    text: Arc<dyn TextRecognizer>,
    classifier: Arc<dyn SceneClassifier>,
    settings: RecognitionConfig,
}

impl Recognizer {
    pub fn new(
        text: Arc<dyn TextRecognizer>,
        classifier: Arc<dyn SceneClassifier>,
        settings: RecognitionConfig,
    ) -> Self {
        Self {
            text,
            classifier,
            settings,
        }
    }

    fn text_options(&self) -> TextRecognitionOptions {
        TextRecognitionOptions {
            language_correction: self.settings.language_correction,
            ..TextRecognitionOptions::default()
        }
    }

    /// Recognize text; engine failures yield an empty result
    pub async fn recognize_text(&self, image: &CapturedImage) -> Vec<TextFragment> {
        match self.text.recognize(image, self.text_options()).await {
            Ok(fragments) => {
                debug!("Recognized {} text fragments", fragments.len());
                fragments
                    .into_iter()
                    .map(|f| TextFragment {
                        confidence: clamp_confidence(f.confidence),
                        ..f
                    })
                    .collect()
            }
            Err(e) => {
                warn!("Text recognition failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Classify the scene; engine failures yield an empty result
    pub async fn classify(&self, image: &CapturedImage) -> Vec<Classification> {
        match self.classifier.classify(image).await {
            Ok(observations) => {
                let total = observations.len();
                let labels = filter_classifications(
                    observations,
                    self.settings.min_recall,
                    self.settings.min_precision,
                    self.settings.max_labels,
                );
                debug!("{} of {} labels passed the filter", labels.len(), total);
                labels
            }
            Err(e) => {
                warn!("Classification failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Whether the labels suggest a document worth reading out.
    ///
    /// Coarse substring check on the joined labels, so "document" also
    /// matches labels such as "documents".
    pub fn looks_like_document(&self, labels: &[Classification]) -> bool {
        let keyword = self.settings.document_keyword.as_str();
        if keyword.is_empty() {
            return false;
        }
        labels
            .iter()
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
            .contains(keyword)
    }
}
