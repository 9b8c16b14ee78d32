//! Description backend catalogue.
//!
//! Each backend is a row in a static table. The rest of the pipeline never
//! branches on the backend kind except through this table and the response
//! envelope mapping in [`crate::dispatch`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Interchangeable providers of natural-language image descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendIdentifier {
    /// OpenAI chat completions (cloud)
    Gpt,
    /// Google Gemini, OpenAI-compatible endpoint (cloud)
    Gemini,
    /// Ollama server (local)
    Ollama,
    /// llama.cpp server (local)
    #[serde(rename = "llamacpp")]
    LlamaCpp,
}

/// Static connection details for a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    pub id: BackendIdentifier,
    pub endpoint_url: &'static str,
    pub requires_secret: bool,
    pub model_name: &'static str,
    /// Key under which the secret lives in the secret store
    pub secret_lookup_key: &'static str,
}

const BACKENDS: [BackendConfig; 4] = [
    BackendConfig {
        id: BackendIdentifier::Gpt,
        endpoint_url: "https://api.openai.com/v1/chat/completions",
        requires_secret: true,
        model_name: "gpt-4o",
        secret_lookup_key: "openai_api_key",
    },
    BackendConfig {
        id: BackendIdentifier::Gemini,
        endpoint_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        requires_secret: true,
        model_name: "gemini-1.5-flash",
        secret_lookup_key: "gemini_api_key",
    },
    BackendConfig {
        id: BackendIdentifier::Ollama,
        endpoint_url: "http://127.0.0.1:11434/v1/chat/completions",
        requires_secret: false,
        model_name: "llava",
        secret_lookup_key: "ollama_api_key",
    },
    BackendConfig {
        id: BackendIdentifier::LlamaCpp,
        endpoint_url: "http://127.0.0.1:8080/v1/chat/completions",
        requires_secret: false,
        model_name: "llava",
        secret_lookup_key: "llamacpp_api_key",
    },
];

impl BackendIdentifier {
    pub const ALL: [BackendIdentifier; 4] = [
        BackendIdentifier::Gpt,
        BackendIdentifier::Gemini,
        BackendIdentifier::Ollama,
        BackendIdentifier::LlamaCpp,
    ];

    /// Table row for this backend
    pub fn config(&self) -> &'static BackendConfig {
        // The table holds one row per variant, in declaration order.
        &BACKENDS[*self as usize]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendIdentifier::Gpt => "gpt",
            BackendIdentifier::Gemini => "gemini",
            BackendIdentifier::Ollama => "ollama",
            BackendIdentifier::LlamaCpp => "llamacpp",
        }
    }

    /// Human-readable name used in dialogs and speech
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendIdentifier::Gpt => "OpenAI",
            BackendIdentifier::Gemini => "Gemini",
            BackendIdentifier::Ollama => "Ollama",
            BackendIdentifier::LlamaCpp => "llama.cpp",
        }
    }

    /// Environment variable that may seed the secret store
    pub fn secret_env_var(&self) -> Option<&'static str> {
        match self {
            BackendIdentifier::Gpt => Some("OPENAI_API_KEY"),
            BackendIdentifier::Gemini => Some("GEMINI_API_KEY"),
            BackendIdentifier::Ollama | BackendIdentifier::LlamaCpp => None,
        }
    }
}

impl fmt::Display for BackendIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for BackendIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gpt" | "openai" => Ok(BackendIdentifier::Gpt),
            "gemini" => Ok(BackendIdentifier::Gemini),
            "ollama" => Ok(BackendIdentifier::Ollama),
            "llamacpp" | "llama.cpp" => Ok(BackendIdentifier::LlamaCpp),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Secret string that keeps itself out of logs
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret, for building the authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

/// Everything the dispatcher needs to talk to one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub id: BackendIdentifier,
    pub endpoint: String,
    pub secret: Secret,
    pub model: String,
}
