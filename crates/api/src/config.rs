//! Runtime configuration for the ledger API service.
//!
//! Everything is environment-driven; there is no config file. The signing
//! key resolution order is: `SIGNING_PRIVATE_KEY_HEX`, then the key file,
//! then generate-and-persist so certificates survive restarts.

use anyhow::Result;
use garl_core::{CoreError, Signer};
use std::path::PathBuf;
use tracing::warn;

/// Default sliding-window capacity of the webhook event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Runtime configuration for the GARL API server.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// SQLite database URL.
    pub database_url: String,
    /// Listen port.
    pub port: u16,
    /// Hex-encoded signing key, if configured.
    pub signing_private_key_hex: Option<String>,
    /// Where a generated signing key is persisted.
    pub signing_key_file: PathBuf,
    /// CORS origins; empty means permissive.
    pub allowed_origins: Vec<String>,
    /// Whether compliance reads require an API key.
    pub read_auth_enabled: bool,
}

impl RuntimeConfig {
    /// Build runtime configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://garl.db".to_string());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let signing_private_key_hex = std::env::var("SIGNING_PRIVATE_KEY_HEX")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let signing_key_file = std::env::var("SIGNING_KEY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("garl_signing_key.hex"));

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let read_auth_enabled = parse_env_bool("READ_AUTH_ENABLED")?.unwrap_or(false);

        Ok(Self {
            database_url,
            port,
            signing_private_key_hex,
            signing_key_file,
            allowed_origins,
            read_auth_enabled,
        })
    }

    /// Deterministic test configuration over a given database.
    pub fn for_test(database_url: impl Into<String>, signing_key_file: PathBuf) -> Self {
        Self {
            database_url: database_url.into(),
            port: 0,
            signing_private_key_hex: None,
            signing_key_file,
            allowed_origins: Vec::new(),
            read_auth_enabled: false,
        }
    }

    /// Resolve the process-wide signer.
    ///
    /// A malformed configured key is fatal; a missing key is generated
    /// once and persisted to [`RuntimeConfig::signing_key_file`].
    pub fn build_signer(&self) -> std::result::Result<Signer, CoreError> {
        if let Some(hex_key) = &self.signing_private_key_hex {
            return Signer::from_hex(hex_key);
        }

        if let Ok(stored) = std::fs::read_to_string(&self.signing_key_file) {
            return Signer::from_hex(stored.trim());
        }

        let (signer, private_hex) = Signer::generate();
        if let Err(err) = std::fs::write(&self.signing_key_file, &private_hex) {
            warn!(
                "Could not persist generated signing key to {}: {}. \
                 Certificates will not survive a restart.",
                self.signing_key_file.display(),
                err
            );
        } else {
            warn!(
                "SIGNING_PRIVATE_KEY_HEX not set; generated a key and saved it to {}",
                self.signing_key_file.display()
            );
        }
        Ok(signer)
    }
}

fn parse_env_bool(name: &str) -> Result<Option<bool>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let normalized = raw.trim().to_ascii_lowercase();
    let value = match normalized.as_str() {
        "1" | "true" | "yes" | "y" | "on" => true,
        "0" | "false" | "no" | "n" | "off" => false,
        _ => {
            return Err(anyhow::anyhow!(
                "Invalid {} (expected boolean-like value)",
                name
            ))
        }
    };
    Ok(Some(value))
}
