//! Scan Router - click-triggered screen scanning
//!
//! This crate reads the screen aloud on demand. A pointer click (debounced)
//! starts one scan cycle:
//!
//! - **Targeting**: the frontmost window, or one the user picks
//! - **Capture**: a display snapshot of that region, resized to logical size
//! - **Recognition**: on-device OCR and scene classification
//! - **Description**: optionally, a vision-capable chat backend (OpenAI,
//!   Gemini, Ollama or llama.cpp) describes the capture
//!
//! The result is handed to a speech collaborator.
//!
//! # Architecture
//!
//! Every platform call sits behind a trait ([`WindowService`],
//! [`DisplayService`], [`SpeechOutput`], ...) so the [`ScanOrchestrator`] can
//! be driven with fakes. One cycle runs at a time; triggers arriving during a
//! cycle are dropped.

pub mod backend;
pub mod capture;
pub mod config;
pub mod credentials;
pub mod dialogs;
pub mod dispatch;
pub mod orchestrator;
pub mod recognition;
pub mod speech;
pub mod trigger;
pub mod types;
pub mod window_tracker;

// Re-export commonly used types
pub use backend::{BackendConfig, BackendIdentifier, ResolvedBackend, Secret};
pub use capture::{Capturer, DisplayService};
pub use config::{Config, SettingsFile};
pub use credentials::{CredentialResolver, FileSecretStore, MemorySecretStore, SecretStore};
pub use dialogs::{ChoicePrompt, SecretPrompt};
pub use dispatch::{DescriptionBackend, HttpDispatcher};
pub use orchestrator::{run_worker, ScanOrchestrator, ScanOutcome, ScanReport, ScanServices, ScanState};
pub use recognition::{Recognizer, SceneClassifier, TextRecognizer};
pub use speech::SpeechOutput;
pub use trigger::TriggerGate;
pub use types::{
    CaptureError, CapturedImage, ClickKind, CredentialError, DispatchError, DisplayId, DisplayInfo,
    Region, RecognitionResult, ScanError, ScanMode, ScanRequest, ScanSignal, TargetError, WindowId,
};
pub use window_tracker::{TargetLocator, WindowService};
