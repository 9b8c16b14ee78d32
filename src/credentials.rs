//! Credential resolution for description backends.
//!
//! Secrets travel from the secret store through the resolver into a
//! [`ResolvedBackend`] and on to the dispatcher. They never enter a
//! [`ScanRequest`](crate::types::ScanRequest) or a log line.

use crate::backend::{BackendIdentifier, ResolvedBackend, Secret};
use crate::config::Config;
use crate::dialogs::SecretPrompt;
use crate::types::CredentialError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Key-value store for backend secrets. Absence is a normal state.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError>;
}

/// In-process secret store
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Option<String> {
        self.secrets.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError> {
        self.secrets
            .write()
            .map_err(|e| CredentialError::Store(e.to_string()))?
            .insert(key.to_string(), secret.to_string());
        Ok(())
    }
}

/// Secret store persisted as a JSON map, readable by the owner only
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    secrets: RwLock<HashMap<String, String>>,
    /// Set when an existing file could not be read; writes are refused so
    /// the keys it holds are not overwritten
    load_error: Option<String>,
}

impl FileSecretStore {
    /// Open the store in the default config directory
    pub fn open_default() -> Self {
        Self::open(Config::config_dir().join("secrets.json"))
    }

    /// Open the store at `path`. A missing file starts empty; an unreadable
    /// or corrupt one leaves the store read-only.
    pub fn open(path: PathBuf) -> Self {
        let (secrets, load_error) = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(secrets) => (secrets, None),
                Err(e) => {
                    warn!("Failed to parse secret store {:?}: {}, not writing to it", path, e);
                    (HashMap::new(), Some(format!("corrupt secret store: {}", e)))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No secret store at {:?}", path);
                (HashMap::new(), None)
            }
            Err(e) => {
                warn!("Failed to read secret store {:?}: {}, not writing to it", path, e);
                (HashMap::new(), Some(format!("unreadable secret store: {}", e)))
            }
        };

        Self {
            path,
            secrets: RwLock::new(secrets),
            load_error,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the map to a temporary file created owner-only, then move it
    /// over the store
    fn persist(&self, secrets: &HashMap<String, String>) -> std::io::Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(secrets)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let written = options.open(&temp_path).and_then(|mut file| {
            file.write_all(contents.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| std::fs::rename(&temp_path, &self.path)) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Option<String> {
        self.secrets.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError> {
        if let Some(reason) = &self.load_error {
            return Err(CredentialError::Store(reason.clone()));
        }

        let mut secrets = self
            .secrets
            .write()
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        let previous = secrets.insert(key.to_string(), secret.to_string());

        if let Err(e) = self.persist(&secrets) {
            match previous {
                Some(value) => secrets.insert(key.to_string(), value),
                None => secrets.remove(key),
            };
            return Err(CredentialError::Store(e.to_string()));
        }

        info!("Saved secret store to {:?}", self.path);
        Ok(())
    }
}

/// Copy API keys from the environment into an empty store slot
pub fn seed_from_env(store: &dyn SecretStore) {
    for backend in BackendIdentifier::ALL {
        let Some(var) = backend.secret_env_var() else {
            continue;
        };
        let key = backend.config().secret_lookup_key;
        if store.get(key).is_some_and(|s| !s.trim().is_empty()) {
            continue;
        }
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                match store.set(key, value.trim()) {
                    Ok(()) => info!("Loaded {} API key from {}", backend, var),
                    Err(e) => warn!("Failed to store {} API key: {}", backend, e),
                }
            }
        }
    }
}

/// Maps backends to endpoint, model and secret
pub struct CredentialResolver {
    store: Arc<dyn SecretStore>,
    prompt: Arc<dyn SecretPrompt>,
    config: Config,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn SecretStore>, prompt: Arc<dyn SecretPrompt>, config: Config) -> Self {
        Self {
            store,
            prompt,
            config,
        }
    }

    /// Resolve a backend for dispatch.
    ///
    /// When a required secret is missing the user is asked for it, any answer
    /// is saved, and `MissingSecret` is returned anyway: the current scan is
    /// dropped and the next one picks up the stored key.
    pub fn resolve(&self, backend: BackendIdentifier) -> Result<ResolvedBackend, CredentialError> {
        let table = backend.config();
        let endpoint = self.config.endpoint_for(backend);
        let model = self.config.model_for(backend);

        if !table.requires_secret {
            return Ok(ResolvedBackend {
                id: backend,
                endpoint,
                secret: Secret::default(),
                model,
            });
        }

        let stored = self
            .store
            .get(table.secret_lookup_key)
            .map(Secret::new)
            .filter(|s| !s.is_empty());

        match stored {
            Some(secret) => Ok(ResolvedBackend {
                id: backend,
                endpoint,
                secret,
                model,
            }),
            None => {
                info!("No {} API key stored, asking the user", backend);
                if let Some(entered) = self.prompt.request_secret(backend) {
                    if let Err(e) = self.set_secret(backend, &entered) {
                        warn!("Failed to save {} API key: {}", backend, e);
                    }
                }
                Err(CredentialError::MissingSecret(backend))
            }
        }
    }

    /// Store a new secret for a backend. Blank input is ignored.
    pub fn set_secret(&self, backend: BackendIdentifier, secret: &str) -> Result<(), CredentialError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Ok(());
        }
        self.store.set(backend.config().secret_lookup_key, secret)?;
        info!("Stored {} API key", backend);
        Ok(())
    }
}
