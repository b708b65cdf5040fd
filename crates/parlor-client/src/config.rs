use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, anyhow};

use parlor_types::Address;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(anyhow!("unknown PARLOR_ENV '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbLocation,
    /// App identifier logins are scoped to.
    pub app_address: Option<Address>,
    /// Sync endpoint key. Never logged.
    pub sync_key: Option<String>,
    pub environment: Environment,
    pub identity_file: Option<PathBuf>,
    pub require_passkey: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbLocation::File(PathBuf::from("parlor.db")),
            app_address: None,
            sync_key: None,
            environment: Environment::Development,
            identity_file: None,
            require_passkey: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let db = match get("PARLOR_DB_PATH") {
            Some(path) if path == ":memory:" => DbLocation::Memory,
            Some(path) => DbLocation::File(PathBuf::from(path)),
            None => defaults.db,
        };

        let app_address = get("PARLOR_APP_ADDRESS").and_then(|raw| Address::parse(&raw));

        let environment = match get("PARLOR_ENV") {
            Some(raw) => raw.parse()?,
            None => defaults.environment,
        };

        let require_passkey = match get("PARLOR_REQUIRE_PASSKEY") {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .map_err(|_| anyhow!("PARLOR_REQUIRE_PASSKEY must be true or false, got '{}'", raw))?,
            None => defaults.require_passkey,
        };

        Ok(Self {
            db,
            app_address,
            sync_key: get("PARLOR_SYNC_KEY"),
            environment,
            identity_file: get("PARLOR_IDENTITY_FILE").map(PathBuf::from),
            require_passkey,
        })
    }
}
