use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// JWT secret used when none is configured. Fine for tests, refused by the console.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub jwt_secret: String,
    pub request_timeout: Duration,
    /// Base URL under which stored objects are served.
    pub public_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("vortex.db"),
            storage_dir: PathBuf::from("./vortex-storage"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            public_url: "http://localhost:3000/storage".to_string(),
        }
    }
}

impl ClientConfig {
    /// Read `VORTEX_*` variables from the process environment.
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let request_timeout = match lookup("VORTEX_REQUEST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    ClientError::Config(format!("VORTEX_REQUEST_TIMEOUT_SECS is not a number: {}", raw))
                })?;
                if secs == 0 {
                    return Err(ClientError::Config("VORTEX_REQUEST_TIMEOUT_SECS must be positive".into()));
                }
                Duration::from_secs(secs)
            }
            None => defaults.request_timeout,
        };

        Ok(Self {
            db_path: lookup("VORTEX_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            storage_dir: lookup("VORTEX_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            jwt_secret: lookup("VORTEX_JWT_SECRET").unwrap_or(defaults.jwt_secret),
            request_timeout,
            public_url: lookup("VORTEX_PUBLIC_URL").unwrap_or(defaults.public_url),
        })
    }

    /// True while the JWT secret is empty or still a placeholder.
    pub fn has_placeholder_secret(&self) -> bool {
        let secret = self.jwt_secret.trim();
        secret.is_empty() || secret == DEV_JWT_SECRET || secret.contains("change-me")
    }
}
