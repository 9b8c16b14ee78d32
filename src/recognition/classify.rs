//! Scene classification through the vision helper.

use super::helper::VisionHelper;
use super::{ClassificationObservation, RecognitionError, SceneClassifier};
use crate::types::CapturedImage;
use tracing::debug;

/// Classifier backed by the vision helper's `--classify` mode.
///
/// The helper reports every label with its precision/recall curve; the
/// operating-point filter runs on this side.
#[derive(Debug, Clone, Default)]
pub struct HelperSceneClassifier {
    helper: VisionHelper,
}

impl HelperSceneClassifier {
    pub fn new(helper: VisionHelper) -> Self {
        Self { helper }
    }
}

/// Read observations from helper output. A missing list means no labels.
pub fn parse_observations(
    value: &serde_json::Value,
) -> Result<Vec<ClassificationObservation>, RecognitionError> {
    match value.get("observations") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list.clone())
            .map_err(|e| RecognitionError::Parse(format!("observations: {}", e))),
    }
}

#[async_trait::async_trait]
impl SceneClassifier for HelperSceneClassifier {
    async fn classify(
        &self,
        image: &CapturedImage,
    ) -> Result<Vec<ClassificationObservation>, RecognitionError> {
        debug!("Classifying {}x{} image", image.width(), image.height());

        let output = self.helper.run(image, &["--classify".to_string()]).await?;
        parse_observations(&output)
    }
}
