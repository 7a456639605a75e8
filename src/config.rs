use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::LabGuardError;

/// Process-wide configuration, loaded once on first access.
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| panic!("FATAL: failed to load configuration: {e}"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    /// Secret the key-encryption (master) key is derived from.
    pub master_secret: String,
    pub master_salt: String,
    pub pbkdf2_iterations: u32,
    pub key_rotation_days: i64,
    pub maintenance_interval_secs: u64,
    pub body_limit_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite://labguard.sqlite".to_string(),
            loglevel: "info".to_string(),
            master_secret: String::new(),
            master_salt: "labguard-master-salt".to_string(),
            pbkdf2_iterations: 100_000,
            key_rotation_days: 90,
            maintenance_interval_secs: 3600,
            body_limit_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Defaults, then `labguard.toml`, then `LABGUARD_*` environment variables.
    pub fn load() -> Result<Self, LabGuardError> {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("labguard.toml"))
            .merge(Env::prefixed("LABGUARD_"))
            .extract()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), LabGuardError> {
        if self.master_secret.trim().is_empty() {
            return Err(LabGuardError::Config(
                "LABGUARD_MASTER_SECRET must be set".to_string(),
            ));
        }
        if self.pbkdf2_iterations == 0 {
            return Err(LabGuardError::Config(
                "pbkdf2_iterations must be greater than zero".to_string(),
            ));
        }
        if self.key_rotation_days <= 0 {
            return Err(LabGuardError::Config(
                "key_rotation_days must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn key_rotation_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.key_rotation_days)
    }
}
