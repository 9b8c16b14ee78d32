//! Scan orchestration.
//!
//! This module wires targeting, capture, recognition and description into one
//! request/response cycle. Only one cycle runs at a time; a trigger that
//! arrives while a cycle is in flight is dropped, never queued.

use crate::capture::{Capturer, DisplayService};
use crate::config::Config;
use crate::credentials::{CredentialResolver, SecretStore};
use crate::dialogs::{ChoicePrompt, SecretPrompt};
use crate::dispatch::DescriptionBackend;
use crate::recognition::{Recognizer, SceneClassifier, TextRecognizer};
use crate::speech::SpeechOutput;
use crate::types::{
    ClickKind, CredentialError, RecognitionResult, ScanError, ScanMode, ScanRequest, ScanSignal,
};
use crate::window_tracker::{TargetInfo, TargetLocator, WindowService};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Spoken when OCR finds nothing
pub const NO_TEXT_FOUND: &str = "No text found";

/// Spoken when no label passes the classification filter
pub const UNKNOWN_SCENE: &str = "Unknown";

/// Pipeline stage of the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Targeting = 1,
    Capturing = 2,
    Recognizing = 3,
    Describing = 4,
    Delivering = 5,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanState::Targeting,
            2 => ScanState::Capturing,
            3 => ScanState::Recognizing,
            4 => ScanState::Describing,
            5 => ScanState::Delivering,
            _ => ScanState::Idle,
        }
    }
}

/// Everything one delivered cycle produced
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub request: ScanRequest,
    /// Window the scan was aimed at, when one was found
    pub target: Option<TargetInfo>,
    pub recognition: RecognitionResult,
    /// Backend answer in describe mode
    pub description: Option<String>,
    pub completed_at: DateTime<Local>,
}

impl ScanReport {
    /// The utterance for this report
    pub fn speech_text(&self) -> String {
        match self.request.mode {
            ScanMode::Ocr => {
                let text = self.recognition.text();
                if text.trim().is_empty() {
                    NO_TEXT_FOUND.to_string()
                } else {
                    text
                }
            }
            ScanMode::Classify => {
                if self.recognition.labels.is_empty() {
                    return UNKNOWN_SCENE.to_string();
                }
                let labels = self.recognition.label_summary();
                let text = self.recognition.text();
                if text.trim().is_empty() {
                    labels
                } else {
                    format!("{}\n{}", labels, text)
                }
            }
            ScanMode::Describe => self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .unwrap_or("No description received")
                .to_string(),
        }
    }

    /// File name for auto-saved results, e.g. `scan-20240101-093000-ocr.txt`
    pub fn file_name(&self) -> String {
        format!(
            "scan-{}-{}.txt",
            self.completed_at.format("%Y%m%d-%H%M%S"),
            self.request.mode.as_str()
        )
    }
}

/// How a call to [`ScanOrchestrator::run_scan`] ended
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// A result was spoken
    Delivered(ScanReport),
    /// Another cycle was running; the trigger was dropped
    Busy,
    /// The cycle stopped early. Reported errors were spoken.
    Aborted(ScanError),
    /// A secret was missing; the user was asked for it and the next scan
    /// will use it
    Deferred,
}

/// Platform collaborators the orchestrator calls into
pub struct ScanServices {
    pub windows: Arc<dyn WindowService>,
    pub chooser: Arc<dyn ChoicePrompt>,
    pub displays: Arc<dyn DisplayService>,
    pub text: Arc<dyn TextRecognizer>,
    pub classifier: Arc<dyn SceneClassifier>,
    pub secrets: Arc<dyn SecretStore>,
    pub secret_prompt: Arc<dyn SecretPrompt>,
    pub dispatcher: Arc<dyn DescriptionBackend>,
    pub speech: Arc<dyn SpeechOutput>,
}

/// Single entry point for scans
pub struct ScanOrchestrator {
    locator: Arc<TargetLocator>,
    capturer: Arc<Capturer>,
    recognizer: Recognizer,
    credentials: Arc<CredentialResolver>,
    dispatcher: Arc<dyn DescriptionBackend>,
    speech: Arc<dyn SpeechOutput>,
    config: Config,
    /// Mode used for click-triggered scans; can change at runtime
    mode: Mutex<ScanMode>,
    state: AtomicU8,
    last_report: Mutex<Option<ScanReport>>,
}

/// Puts the state cell back to Idle when a cycle ends, however it ends
struct CycleGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state.store(ScanState::Idle as u8, Ordering::Release);
    }
}

impl ScanOrchestrator {
    pub fn new(config: Config, services: ScanServices) -> Self {
        let recognizer = Recognizer::new(
            services.text,
            services.classifier,
            config.recognition.clone(),
        );
        let credentials =
            CredentialResolver::new(services.secrets, services.secret_prompt, config.clone());

        Self {
            locator: Arc::new(TargetLocator::new(services.windows, services.chooser)),
            capturer: Arc::new(Capturer::new(services.displays)),
            recognizer,
            credentials: Arc::new(credentials),
            dispatcher: services.dispatcher,
            speech: services.speech,
            mode: Mutex::new(config.scan.mode),
            config,
            state: AtomicU8::new(ScanState::Idle as u8),
            last_report: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn mode(&self) -> ScanMode {
        self.mode.lock().map(|m| *m).unwrap_or(self.config.scan.mode)
    }

    pub fn set_mode(&self, mode: ScanMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
        info!("Scan mode set to {}", mode.as_str());
    }

    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    pub fn settle_delay(&self) -> Duration {
        self.config.trigger.settle_delay()
    }

    /// Secondary clicks, or the `target_window` setting, ask which window
    /// to scan
    pub fn is_interactive(&self, kind: ClickKind) -> bool {
        self.config.scan.target_window || kind == ClickKind::Secondary
    }

    fn begin(&self) -> Option<CycleGuard<'_>> {
        self.state
            .compare_exchange(
                ScanState::Idle as u8,
                ScanState::Targeting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| CycleGuard { state: &self.state })
    }

    fn enter(&self, state: ScanState) {
        debug!("Scan state -> {:?}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run one scan cycle.
    ///
    /// Returns [`ScanOutcome::Busy`] without side effects when a cycle is
    /// already running.
    pub async fn run_scan(&self, signal: ScanSignal, mode: ScanMode, interactive: bool) -> ScanOutcome {
        let Some(_cycle) = self.begin() else {
            debug!("Scan already running, dropping {:?} trigger", signal.kind);
            return ScanOutcome::Busy;
        };

        info!(
            "Scan started by {:?} click (mode: {}, interactive: {})",
            signal.kind,
            mode.as_str(),
            interactive
        );
        let start = Instant::now();

        match self.run_cycle(mode, interactive).await {
            Ok(report) => {
                self.enter(ScanState::Delivering);
                self.deliver(&report);
                info!("Scan delivered in {:?}", start.elapsed());
                ScanOutcome::Delivered(report)
            }
            Err(ScanError::Credential(CredentialError::MissingSecret(backend))) => {
                info!("Scan deferred until a {} API key is stored", backend);
                ScanOutcome::Deferred
            }
            Err(e) if e.is_reported() => {
                warn!("Scan aborted: {}", e);
                self.speech.speak(&e.to_string());
                ScanOutcome::Aborted(e)
            }
            Err(e) => {
                debug!("Scan aborted silently: {}", e);
                ScanOutcome::Aborted(e)
            }
        }
    }

    async fn run_cycle(&self, mode: ScanMode, interactive: bool) -> Result<ScanReport, ScanError> {
        let locator = self.locator.clone();
        let region = tokio::task::spawn_blocking(move || {
            locator.resolve_region_or_full_display(interactive)
        })
        .await
        .map_err(|e| ScanError::Stage(e.to_string()))??;

        let request = ScanRequest {
            region,
            mode,
            prompt: self.config.scan.prompt.clone(),
            backend: self.config.scan.backend,
        };

        self.enter(ScanState::Capturing);
        let capturer = self.capturer.clone();
        let image = tokio::task::spawn_blocking(move || capturer.capture(region))
            .await
            .map_err(|e| ScanError::Stage(e.to_string()))??;

        let mut recognition = RecognitionResult::default();
        let mut description = None;

        match mode {
            ScanMode::Ocr => {
                self.enter(ScanState::Recognizing);
                recognition.fragments = self.recognizer.recognize_text(&image).await;
            }
            ScanMode::Classify => {
                self.enter(ScanState::Recognizing);
                recognition.labels = self.recognizer.classify(&image).await;
                if self.recognizer.looks_like_document(&recognition.labels) {
                    debug!("Labels look like a document, reading its text");
                    recognition.fragments = self.recognizer.recognize_text(&image).await;
                }
            }
            ScanMode::Describe => {
                self.enter(ScanState::Describing);
                let credentials = self.credentials.clone();
                let backend = request.backend;
                let resolved = tokio::task::spawn_blocking(move || credentials.resolve(backend))
                    .await
                    .map_err(|e| ScanError::Stage(e.to_string()))??;

                let text = self
                    .dispatcher
                    .describe(&image, &request.prompt, &self.config.scan.system_prompt, &resolved)
                    .await?;
                description = Some(text);
            }
        }

        Ok(ScanReport {
            request,
            target: self.locator.last_target(),
            recognition,
            description,
            completed_at: Local::now(),
        })
    }

    fn deliver(&self, report: &ScanReport) {
        let text = report.speech_text();
        self.speech.speak(&text);

        if let Some(dir) = &self.config.scan.auto_save_dir {
            let path = dir.join(report.file_name());
            match write_report(&path, &text) {
                Ok(()) => debug!("Saved scan result to {:?}", path),
                Err(e) => warn!("Failed to save scan result to {:?}: {}", path, e),
            }
        }

        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
    }

    /// The most recent delivered report
    pub fn last_report(&self) -> Option<ScanReport> {
        self.last_report.lock().ok().and_then(|r| r.clone())
    }

    /// Write the last delivered result to `path`.
    ///
    /// Returns `Ok(false)` when nothing has been delivered yet.
    pub fn save_last_result(&self, path: &Path) -> std::io::Result<bool> {
        let Some(report) = self.last_report() else {
            return Ok(false);
        };
        write_report(path, &report.speech_text())?;
        info!("Saved last scan result to {:?}", path);
        Ok(true)
    }

    /// Default location for a manual save of the last result
    pub fn default_save_path(&self) -> Option<PathBuf> {
        let report = self.last_report()?;
        let dir = self
            .config
            .scan
            .auto_save_dir
            .clone()
            .or_else(dirs::document_dir)
            .unwrap_or_else(std::env::temp_dir);
        Some(dir.join(report.file_name()))
    }
}

fn write_report(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)
}

/// Drain scan signals until the sending side closes.
///
/// Waits the settle delay after each click so the click's own effect on the
/// screen is captured. Signals that arrive while a cycle runs are discarded
/// when it ends.
pub async fn run_worker(orchestrator: Arc<ScanOrchestrator>, mut signals: mpsc::Receiver<ScanSignal>) {
    info!("Scan worker started");

    while let Some(signal) = signals.recv().await {
        tokio::time::sleep(orchestrator.settle_delay()).await;

        let interactive = orchestrator.is_interactive(signal.kind);
        match orchestrator
            .run_scan(signal, orchestrator.mode(), interactive)
            .await
        {
            ScanOutcome::Delivered(report) => {
                debug!("Delivered {} chars", report.speech_text().len())
            }
            ScanOutcome::Busy => debug!("Worker found a scan in flight"),
            ScanOutcome::Deferred => debug!("Scan deferred"),
            ScanOutcome::Aborted(e) => {
                if let ScanError::Stage(_) = e {
                    error!("Scan stage failed: {}", e);
                }
            }
        }

        while let Ok(stale) = signals.try_recv() {
            debug!("Dropping {:?} click that arrived mid-scan", stale.kind);
        }
    }

    info!("Scan worker stopped");
}
