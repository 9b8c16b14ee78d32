//! User-facing dialogs used by the pipeline.
//!
//! Window selection and API key entry are the only points where a scan cycle
//! asks the user something. On macOS both are AppleScript dialogs run through
//! `osascript`; elsewhere the prompts decline, which the pipeline treats as a
//! cancelled selection or a still-missing secret.

use crate::backend::BackendIdentifier;
use std::process::Command;
use tracing::{debug, warn};

/// Presents a list of labeled options and returns the chosen index
pub trait ChoicePrompt: Send + Sync {
    /// Returns the 0-based index of the chosen option, or `None` if cancelled
    fn choose(&self, title: &str, message: &str, options: &[String]) -> Option<usize>;
}

/// Asks the user for a backend's API key
pub trait SecretPrompt: Send + Sync {
    /// Returns the entered secret, or `None` if the user cancelled
    fn request_secret(&self, backend: BackendIdentifier) -> Option<String>;
}

/// AppleScript dialogs via `osascript`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsaScriptDialogs;

impl OsaScriptDialogs {
    pub fn new() -> Self {
        Self
    }

    fn run(script: &str) -> Option<String> {
        let output = match Command::new("osascript").arg("-e").arg(script).output() {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run osascript: {}", e);
                return None;
            }
        };

        if !output.status.success() {
            // Cancel buttons make osascript exit with an error
            debug!(
                "Dialog dismissed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Quote a string as an AppleScript literal
fn applescript_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Find which option a `choose from list` answer names
fn index_of_choice(answer: &str, options: &[String]) -> Option<usize> {
    if answer == "false" {
        return None;
    }
    options.iter().position(|o| o == answer)
}

impl ChoicePrompt for OsaScriptDialogs {
    fn choose(&self, title: &str, message: &str, options: &[String]) -> Option<usize> {
        if options.is_empty() {
            return None;
        }

        let items = options
            .iter()
            .map(|o| applescript_quote(o))
            .collect::<Vec<_>>()
            .join(", ");
        let script = format!(
            "choose from list {{{}}} with title {} with prompt {}",
            items,
            applescript_quote(title),
            applescript_quote(message)
        );

        let answer = Self::run(&script)?;
        index_of_choice(&answer, options)
    }
}

impl SecretPrompt for OsaScriptDialogs {
    fn request_secret(&self, backend: BackendIdentifier) -> Option<String> {
        let script = format!(
            "text returned of (display dialog {} default answer \"\" with title {} with hidden answer buttons {{\"Cancel\", \"Save\"}} default button \"Save\")",
            applescript_quote(&format!("Type your {} API key below:", backend.display_name())),
            applescript_quote(&format!("{} API Key", backend.display_name()))
        );

        Self::run(&script).filter(|answer| !answer.is_empty())
    }
}

/// Prompts that always decline, for platforms without a dialog service
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDialogs;

impl ChoicePrompt for NoDialogs {
    fn choose(&self, title: &str, _message: &str, options: &[String]) -> Option<usize> {
        debug!("No dialog service for '{}' ({} options)", title, options.len());
        None
    }
}

impl SecretPrompt for NoDialogs {
    fn request_secret(&self, backend: BackendIdentifier) -> Option<String> {
        warn!(
            "No dialog service to ask for the {} API key; set {} or edit the secret store",
            backend,
            backend.secret_env_var().unwrap_or("the key")
        );
        None
    }
}
