//! Text recognition through the vision helper.

use super::helper::VisionHelper;
use super::{RecognitionError, TextRecognitionOptions, TextRecognizer};
use crate::types::{CapturedImage, TextFragment};
use tracing::debug;

/// OCR engine backed by the vision helper's `--ocr` mode
#[derive(Debug, Clone, Default)]
pub struct HelperTextRecognizer {
    helper: VisionHelper,
}

impl HelperTextRecognizer {
    pub fn new(helper: VisionHelper) -> Self {
        Self { helper }
    }
}

/// Command-line flags for a text recognition request
pub fn ocr_args(options: TextRecognitionOptions) -> Vec<String> {
    vec![
        "--ocr".to_string(),
        "--level".to_string(),
        if options.accurate { "accurate" } else { "fast" }.to_string(),
        "--min-text-height".to_string(),
        options.minimum_text_height.to_string(),
        "--language-correction".to_string(),
        options.language_correction.to_string(),
    ]
}

/// Read fragments from helper output. A missing list means no text.
pub fn parse_fragments(value: &serde_json::Value) -> Result<Vec<TextFragment>, RecognitionError> {
    match value.get("fragments") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list.clone())
            .map_err(|e| RecognitionError::Parse(format!("fragments: {}", e))),
    }
}

#[async_trait::async_trait]
impl TextRecognizer for HelperTextRecognizer {
    async fn recognize(
        &self,
        image: &CapturedImage,
        options: TextRecognitionOptions,
    ) -> Result<Vec<TextFragment>, RecognitionError> {
        debug!(
            "🔍 OCR: Recognizing text in {}x{} image",
            image.width(),
            image.height()
        );

        let output = self.helper.run(image, &ocr_args(options)).await?;
        parse_fragments(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ocr_args_defaults() {
        let args = ocr_args(TextRecognitionOptions::default());
        assert_eq!(
            args,
            vec![
                "--ocr",
                "--level",
                "accurate",
                "--min-text-height",
                "0",
                "--language-correction",
                "true"
            ]
        );
    }

    #[test]
    fn test_parse_fragments_keeps_order() {
        let output = json!({
            "fragments": [
                {"text": "File", "confidence": 1.0, "bounds": {"x": 0.0, "y": 0.9, "width": 0.1, "height": 0.05}},
                {"text": "Edit", "confidence": 0.5, "bounds": {"x": 0.1, "y": 0.9, "width": 0.1, "height": 0.05}}
            ]
        });
        let fragments = parse_fragments(&output).unwrap();
        let texts: Vec<_> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["File", "Edit"]);
        assert_eq!(fragments[1].bounds.x, 0.1);
    }

    #[test]
    fn test_parse_fragments_no_text() {
        assert!(parse_fragments(&json!({"fragments": []})).unwrap().is_empty());
        assert!(parse_fragments(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_parse_fragments_malformed() {
        let output = json!({"fragments": [{"confidence": 0.3}]});
        assert!(matches!(
            parse_fragments(&output),
            Err(RecognitionError::Parse(_))
        ));
    }
}
