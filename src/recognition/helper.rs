//! Vision helper process.
//!
//! Text recognition and classification run in a small native helper binary
//! that wraps the platform's vision framework. Each call writes the image to
//! a temporary PNG, runs the helper with `--image <path> --json` and parses
//! the JSON it prints.

use super::RecognitionError;
use crate::types::CapturedImage;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Vision helper client
#[derive(Debug, Clone)]
pub struct VisionHelper {
    /// Path to the helper binary
    binary_path: PathBuf,
    /// Timeout for one invocation
    timeout: Duration,
}

impl VisionHelper {
    /// Create a helper client with the default binary path
    pub fn new() -> Self {
        Self::with_path(Self::default_binary_path())
    }

    /// Create with a custom binary path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            binary_path: path,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the default binary path
    fn default_binary_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let paths = [
            // Same directory as the running binary
            exe_dir.join("vision-helper"),
            // Relative to workspace root (Swift build output)
            PathBuf::from("vision-helper/.build/release/vision-helper"),
            PathBuf::from("vision-helper/.build/debug/vision-helper"),
            // System paths
            PathBuf::from("/usr/local/bin/vision-helper"),
        ];

        for path in paths {
            if path.exists() {
                return path;
            }
        }

        // Default fallback - will fail gracefully
        PathBuf::from("vision-helper")
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Check if the binary is available
    pub fn is_available(&self) -> bool {
        let exists = self.binary_path.exists();
        if !exists {
            debug!(
                "Vision helper binary not found at: {}",
                self.binary_path.display()
            );
        }
        exists
    }

    /// Run the helper on an image and return its parsed JSON output
    pub async fn run(
        &self,
        image: &CapturedImage,
        args: &[String],
    ) -> Result<serde_json::Value, RecognitionError> {
        if !self.is_available() {
            return Err(RecognitionError::HelperUnavailable(
                self.binary_path.display().to_string(),
            ));
        }

        let temp_path = std::env::temp_dir().join(format!(
            "scan_capture_{}_{}.png",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let owned = image.clone();
        let write_path = temp_path.clone();
        tokio::task::spawn_blocking(move || owned.save_png(&write_path))
            .await
            .map_err(|e| RecognitionError::HelperFailed(e.to_string()))??;

        let result = self.run_on_file(&temp_path, args).await;

        // Clean up temp file
        let _ = tokio::fs::remove_file(&temp_path).await;

        result
    }

    async fn run_on_file(
        &self,
        path: &Path,
        args: &[String],
    ) -> Result<serde_json::Value, RecognitionError> {
        let child = Command::new(&self.binary_path)
            .arg("--image")
            .arg(path)
            .args(args)
            .arg("--json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| RecognitionError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Vision helper failed: {}", stderr);
            return Err(RecognitionError::HelperFailed(stderr.trim().to_string()));
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for VisionHelper {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse helper stdout, surfacing an `"error"` field as a failure
pub fn parse_output(stdout: &str) -> Result<serde_json::Value, RecognitionError> {
    let result: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| RecognitionError::Parse(format!("{} - raw: {}", e, stdout.trim())))?;

    if let Some(error) = result["error"].as_str() {
        return Err(RecognitionError::HelperFailed(error.to_string()));
    }

    Ok(result)
}
