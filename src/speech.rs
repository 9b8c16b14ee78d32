//! Spoken output.

use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::{info, warn};

/// Speaks a result to the user. Fire-and-forget: speech never blocks a scan
/// and failures are only logged.
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, text: &str);
}

/// Speech through the system `say` command
#[derive(Debug, Default)]
pub struct SaySpeech {
    /// The utterance in progress; a new one interrupts it
    current: Mutex<Option<std::process::Child>>,
}

impl SaySpeech {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `say` invocation for one utterance. `--` keeps text starting with a dash
/// from being read as an option.
fn say_command(text: &str) -> Command {
    let mut cmd = Command::new("say");
    cmd.arg("--").arg(text).stdout(Stdio::null()).stderr(Stdio::null());
    cmd
}

impl SpeechOutput for SaySpeech {
    fn speak(&self, text: &str) {
        let mut cmd = say_command(text);

        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut previous) = current.take() {
            let _ = previous.kill();
            let _ = previous.wait();
        }

        match cmd.spawn() {
            Ok(child) => *current = Some(child),
            Err(e) => warn!("Failed to run say: {}", e),
        }
    }
}

/// Speech sink that only logs, for hosts without a speech synthesizer
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpeech;

impl SpeechOutput for LogSpeech {
    fn speak(&self, text: &str) {
        info!("🔊 {}", text);
    }
}
