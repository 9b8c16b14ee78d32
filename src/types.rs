//! Core types used throughout the scan pipeline.
//!
//! This module defines the fundamental data structures for screen regions,
//! captured images, recognition results and scan requests, along with the
//! error taxonomy for every pipeline stage.

use crate::backend::BackendIdentifier;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier for a window (platform-specific)
pub type WindowId = u64;

/// Unique identifier for a display
pub type DisplayId = u32;

/// Screen rectangle to capture, in screen coordinates.
///
/// A region with zero width or height means "unknown", which the capturer
/// interprets as the full bounds of the display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Zero-area region standing for the whole display
    pub const FULL_DISPLAY: Region = Region {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether this region should be read as "capture the whole display"
    pub fn is_full_display(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Information about a display/monitor
#[derive(Debug, Clone)]
pub struct DisplayInfo {
    /// Unique display identifier
    pub id: DisplayId,
    /// Display bounds in logical points
    pub bounds: Region,
    /// Whether this is the main display
    pub is_main: bool,
}

/// Pixels produced by one capture, already normalized to logical size.
///
/// The buffer is never mutated after construction. Clones share it, so a
/// copy can be handed to a blocking encoder thread without copying pixels.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pixels: Arc<RgbaImage>,
    bits_per_pixel: u8,
}

impl CapturedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            bits_per_pixel: 32,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Color depth of the pixel buffer
    pub fn bits_per_pixel(&self) -> u8 {
        self.bits_per_pixel
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Encode the image as PNG bytes
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    /// Write the image to disk as PNG
    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.pixels.save_with_format(path, ImageFormat::Png)
    }
}

/// Bounding box of a text fragment, normalized to 0.0-1.0 of the image size
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One line of recognized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    #[serde(default)]
    pub bounds: BoundingBox,
    /// Recognition confidence (0.0-1.0)
    pub confidence: f32,
}

/// A scene label that cleared the classification filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    /// Classifier confidence (0.0-1.0)
    pub confidence: f32,
}

/// Structured output of local recognition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Text fragments in reading order
    pub fragments: Vec<TextFragment>,
    /// Labels ordered by confidence, highest first
    pub labels: Vec<Classification>,
}

impl RecognitionResult {
    /// Recognized text, one fragment per line
    pub fn text(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Labels joined for speech, e.g. "document, text"
    pub fn label_summary(&self) -> String {
        self.labels
            .iter()
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// What a scan cycle should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Recognize text
    Ocr,
    /// Ask a description backend about the image
    Describe,
    /// Classify the scene
    Classify,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Ocr => "ocr",
            ScanMode::Describe => "describe",
            ScanMode::Classify => "classify",
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ocr" => Ok(ScanMode::Ocr),
            "describe" => Ok(ScanMode::Describe),
            "classify" => Ok(ScanMode::Classify),
            other => Err(format!("unknown scan mode: {}", other)),
        }
    }
}

/// Which pointer button produced a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickKind {
    Primary,
    Secondary,
}

impl ClickKind {
    /// Map a platform event type code (left/right mouse down) to a click kind
    pub fn from_event_type(code: u32) -> Option<Self> {
        match code {
            1 => Some(ClickKind::Primary),
            3 => Some(ClickKind::Secondary),
            _ => None,
        }
    }

    /// Map a textual event name from the event feed
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "primary" | "left" => Some(ClickKind::Primary),
            "secondary" | "right" => Some(ClickKind::Secondary),
            _ => None,
        }
    }
}

/// Emitted by the trigger gate when a click is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSignal {
    pub kind: ClickKind,
    /// Event timestamp on the event source's monotonic clock
    pub timestamp: Duration,
}

/// One scan cycle's parameters. Holds no credentials.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub region: Region,
    pub mode: ScanMode,
    pub prompt: String,
    pub backend: BackendIdentifier,
}

/// Errors from window targeting
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("No window found for the frontmost application")]
    NoWindow,

    #[error("Window position or size unavailable")]
    GeometryUnavailable,

    #[error("Window selection cancelled")]
    SelectionCancelled,
}

/// Errors from display capture
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("No active display")]
    NoActiveDisplay,

    #[error("Capture of display {0} failed")]
    CaptureFailed(DisplayId),

    #[error("Resizing capture failed: {0}")]
    ResizeFailed(String),
}

/// Errors from credential resolution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("No API key stored for {0}")]
    MissingSecret(BackendIdentifier),

    #[error("Credential store error: {0}")]
    Store(String),
}

/// Errors from description backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend returned status {0}")]
    BadResponse(u16),

    #[error("Could not read backend response: {0}")]
    ParseFailure(String),

    #[error("Could not encode the capture: {0}")]
    Encoding(String),
}

/// Reasons a scan cycle ended without delivering a result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Scan stage did not finish: {0}")]
    Stage(String),
}

impl ScanError {
    /// Whether the user should hear about this failure.
    ///
    /// Cancelled selections and missing secrets are already being handled by
    /// a dialog, so they end the cycle silently.
    pub fn is_reported(&self) -> bool {
        !matches!(
            self,
            ScanError::Target(TargetError::SelectionCancelled)
                | ScanError::Credential(CredentialError::MissingSecret(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_full_display() {
        assert!(Region::FULL_DISPLAY.is_full_display());
        assert!(Region::new(10, 10, 0, 300).is_full_display());
        assert!(!Region::new(0, 0, 800, 600).is_full_display());
    }

    #[test]
    fn test_scan_mode_parse() {
        assert_eq!("OCR".parse::<ScanMode>(), Ok(ScanMode::Ocr));
        assert_eq!(" describe ".parse::<ScanMode>(), Ok(ScanMode::Describe));
        assert!("translate".parse::<ScanMode>().is_err());
    }

    #[test]
    fn test_click_kind_codes() {
        assert_eq!(ClickKind::from_event_type(1), Some(ClickKind::Primary));
        assert_eq!(ClickKind::from_event_type(3), Some(ClickKind::Secondary));
        assert_eq!(ClickKind::from_event_type(10), None);
        assert_eq!(ClickKind::from_name("Right"), Some(ClickKind::Secondary));
        assert_eq!(ClickKind::from_name("scroll"), None);
    }

    #[test]
    fn test_recognition_text_joins_lines() {
        let result = RecognitionResult {
            fragments: vec![
                TextFragment {
                    text: "Hello".to_string(),
                    bounds: BoundingBox::default(),
                    confidence: 0.9,
                },
                TextFragment {
                    text: "World".to_string(),
                    bounds: BoundingBox::default(),
                    confidence: 0.8,
                },
            ],
            labels: vec![],
        };
        assert_eq!(result.text(), "Hello\nWorld");
    }

    #[test]
    fn test_captured_image_png_encoding() {
        let image = CapturedImage::new(RgbaImage::new(4, 3));
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 3);
        assert_eq!(image.bits_per_pixel(), 32);
        let png = image.to_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_captured_image_clones_share_pixels() {
        let image = CapturedImage::new(RgbaImage::new(64, 48));
        let copy = image.clone();
        assert!(std::ptr::eq(image.pixels(), copy.pixels()));
    }

    #[test]
    fn test_silent_scan_errors() {
        assert!(!ScanError::from(TargetError::SelectionCancelled).is_reported());
        assert!(!ScanError::from(CredentialError::MissingSecret(BackendIdentifier::Gpt)).is_reported());
        assert!(ScanError::from(TargetError::NoWindow).is_reported());
        assert!(ScanError::from(DispatchError::BadResponse(500)).is_reported());
    }
}
