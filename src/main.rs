//! Scan Router - Main entry point
//!
//! This binary runs the scan pipeline as a daemon. Click events arrive on
//! stdin, one per line, from the platform event tap:
//!
//! ```text
//! primary | secondary      pointer click (used when auto_scan is on)
//! scan                     scan now, as a primary click
//! mode <ocr|describe|classify>
//! save [path]              save the last result
//! key <backend>            ask for and store a backend API key
//! ```

use scan_router::credentials::seed_from_env;
use scan_router::dialogs::SecretPrompt;
use scan_router::recognition::{HelperSceneClassifier, HelperTextRecognizer, VisionHelper};
use scan_router::speech::LogSpeech;
use scan_router::{
    run_worker, BackendIdentifier, ClickKind, Config, FileSecretStore, HttpDispatcher,
    ScanMode, ScanOrchestrator, ScanServices, SettingsFile, TriggerGate,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[cfg(target_os = "macos")]
fn platform_services(config: &Config) -> Result<ScanServices, Box<dyn std::error::Error>> {
    use scan_router::capture::CgDisplayService;
    use scan_router::dialogs::OsaScriptDialogs;
    use scan_router::speech::SaySpeech;
    use scan_router::window_tracker::CgWindowService;

    let dialogs = Arc::new(OsaScriptDialogs::new());
    Ok(ScanServices {
        windows: Arc::new(CgWindowService::new()),
        chooser: dialogs.clone(),
        displays: Arc::new(CgDisplayService),
        speech: Arc::new(SaySpeech::new()),
        secret_prompt: dialogs,
        ..common_services(config)?
    })
}

#[cfg(not(target_os = "macos"))]
fn platform_services(config: &Config) -> Result<ScanServices, Box<dyn std::error::Error>> {
    warn!("No native window or display binding on this platform, scans will fail");
    common_services(config)
}

/// Services that work the same everywhere, with inert platform defaults
fn common_services(config: &Config) -> Result<ScanServices, Box<dyn std::error::Error>> {
    use scan_router::capture::NoDisplayService;
    use scan_router::dialogs::NoDialogs;
    use scan_router::window_tracker::NoWindowService;

    let helper = match &config.recognition.helper_path {
        Some(path) => VisionHelper::with_path(path.clone()),
        None => VisionHelper::new(),
    }
    .with_timeout(Duration::from_secs(config.recognition.timeout_seconds));

    if helper.is_available() {
        info!("✅ Vision helper available at {:?}", helper.binary_path());
    } else {
        warn!("⚠️  Vision helper not found, OCR and classification will return nothing");
    }

    let secrets = Arc::new(FileSecretStore::open_default());
    seed_from_env(secrets.as_ref());

    Ok(ScanServices {
        windows: Arc::new(NoWindowService),
        chooser: Arc::new(NoDialogs),
        displays: Arc::new(NoDisplayService),
        text: Arc::new(HelperTextRecognizer::new(helper.clone())),
        classifier: Arc::new(HelperSceneClassifier::new(helper)),
        secrets,
        secret_prompt: Arc::new(NoDialogs),
        dispatcher: Arc::new(HttpDispatcher::new(&config.dispatch)?),
        speech: Arc::new(LogSpeech),
    })
}

/// Prompt used by the `key` command
#[cfg(target_os = "macos")]
fn key_prompt() -> Arc<dyn SecretPrompt> {
    Arc::new(scan_router::dialogs::OsaScriptDialogs::new())
}

#[cfg(not(target_os = "macos"))]
fn key_prompt() -> Arc<dyn SecretPrompt> {
    Arc::new(scan_router::dialogs::NoDialogs)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .skip_while(|a| a != "--config" && a != "-c")
        .nth(1)
        .map(PathBuf::from);

    let mut settings = match config_path {
        Some(path) => SettingsFile::open(path),
        None => SettingsFile::open_default(),
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.config().general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting Scan Router");
    info!("Configuration loaded from {:?}", settings.path());

    let config = settings.config().clone();
    if !config.general.enabled {
        info!("Scanning is disabled in configuration, exiting");
        return Ok(());
    }

    let orchestrator = Arc::new(ScanOrchestrator::new(
        config.clone(),
        platform_services(&config)?,
    ));

    let (gate, signals) = TriggerGate::with_channel(config.trigger.refractory());
    let worker = tokio::spawn(run_worker(orchestrator.clone(), signals));

    // Setup shutdown signal
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\n🛑 Shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    info!(
        "Listening for clicks on stdin (auto scan: {}, mode: {})",
        config.trigger.auto_scan,
        orchestrator.mode().as_str()
    );

    // Event feed. The gate lives on this thread; dropping it closes the
    // worker's channel.
    let feed_running = running.clone();
    let feed_orchestrator = orchestrator.clone();
    let feed = std::thread::spawn(move || {
        let epoch = Instant::now();
        let stdin = std::io::stdin();

        for line in stdin.lock().lines() {
            if !feed_running.load(Ordering::SeqCst) {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read event feed: {}", e);
                    break;
                }
            };

            let mut words = line.split_whitespace();
            let Some(command) = words.next() else {
                continue;
            };
            let argument = words.next();

            match command {
                "scan" => {
                    gate.on_click(ClickKind::Primary, epoch.elapsed());
                }
                "mode" => match argument.map(str::parse::<ScanMode>) {
                    Some(Ok(mode)) => {
                        feed_orchestrator.set_mode(mode);
                        if let Err(e) = settings.update(|c| c.scan.mode = mode) {
                            warn!("Failed to save settings: {}", e);
                        }
                    }
                    Some(Err(e)) => warn!("{}", e),
                    None => info!("Mode: {}", feed_orchestrator.mode().as_str()),
                },
                "save" => {
                    let path = argument
                        .map(PathBuf::from)
                        .or_else(|| feed_orchestrator.default_save_path());
                    match path.map(|p| feed_orchestrator.save_last_result(&p)) {
                        Some(Ok(true)) => {}
                        Some(Err(e)) => warn!("Failed to save result: {}", e),
                        Some(Ok(false)) | None => info!("Nothing to save yet"),
                    }
                }
                "key" => match argument.map(str::parse::<BackendIdentifier>) {
                    Some(Ok(backend)) => {
                        if let Some(secret) = key_prompt().request_secret(backend) {
                            if let Err(e) = feed_orchestrator.credentials().set_secret(backend, &secret) {
                                warn!("Failed to store {} API key: {}", backend, e);
                            }
                        }
                    }
                    Some(Err(e)) => warn!("{}", e),
                    None => warn!("Usage: key <gpt|gemini|ollama|llamacpp>"),
                },
                other => {
                    if !settings.config().trigger.auto_scan {
                        continue;
                    }
                    match ClickKind::from_name(other) {
                        Some(kind) => {
                            gate.on_click(kind, epoch.elapsed());
                        }
                        None => warn!("Unknown event: {}", other),
                    }
                }
            }
        }
    });

    while running.load(Ordering::SeqCst) && !feed.is_finished() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if feed.is_finished() {
        // Event feed closed; let the worker finish the pending scan
        if let Err(e) = worker.await {
            error!("Scan worker failed: {}", e);
        }
    } else {
        worker.abort();
    }

    info!("Scan Router stopped");
    Ok(())
}
