//! Connection settings
//!
//! Settings can be built in code or read from `CONCEPTDB_*` environment
//! variables, with a `.env` file loaded first when present.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DriverError, Result};
use crate::options::Options;
use crate::protocol::Credentials;

/// Settings used to open a [`Connection`](crate::Connection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Service address, e.g. `memory://local`
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Defaults applied to every session opened through the connection
    #[serde(default)]
    pub options: Options,
}

fn default_address() -> String {
    "memory://default".to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            username: None,
            password: None,
            options: Options::default(),
        }
    }
}

impl ConnectionSettings {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Credentials to present, if a username was configured
    pub fn credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|username| {
            Credentials::new(username.clone(), self.password.clone().unwrap_or_default())
        })
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(address) = lookup("CONCEPTDB_ADDRESS") {
            settings.address = address;
        }
        settings.username = lookup("CONCEPTDB_USERNAME");
        settings.password = lookup("CONCEPTDB_PASSWORD");

        if let Some(infer) = lookup("CONCEPTDB_INFER") {
            settings.options.infer = Some(parse_var("CONCEPTDB_INFER", &infer)?);
        }
        if let Some(size) = lookup("CONCEPTDB_PREFETCH_SIZE") {
            settings.options.prefetch_size = Some(parse_var("CONCEPTDB_PREFETCH_SIZE", &size)?);
        }
        if let Some(ms) = lookup("CONCEPTDB_TRANSACTION_TIMEOUT_MS") {
            let ms: u64 = parse_var("CONCEPTDB_TRANSACTION_TIMEOUT_MS", &ms)?;
            settings.options = settings.options.transaction_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = lookup("CONCEPTDB_SESSION_IDLE_TIMEOUT_MS") {
            let ms: u64 = parse_var("CONCEPTDB_SESSION_IDLE_TIMEOUT_MS", &ms)?;
            settings.options = settings.options.session_idle_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = lookup("CONCEPTDB_SCHEMA_LOCK_TIMEOUT_MS") {
            let ms: u64 = parse_var("CONCEPTDB_SCHEMA_LOCK_TIMEOUT_MS", &ms)?;
            settings.options = settings
                .options
                .schema_lock_acquire_timeout(Duration::from_millis(ms));
        }

        settings.options.validate()?;
        Ok(settings)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        DriverError::IllegalState(format!("invalid value '{}' for {}", raw, name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let settings = ConnectionSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, ConnectionSettings::default());
        assert!(settings.credentials().is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let settings = ConnectionSettings::from_lookup(lookup(&[
            ("CONCEPTDB_ADDRESS", "memory://prod"),
            ("CONCEPTDB_USERNAME", "admin"),
            ("CONCEPTDB_PASSWORD", "secret"),
            ("CONCEPTDB_INFER", "true"),
            ("CONCEPTDB_PREFETCH_SIZE", "8"),
            ("CONCEPTDB_TRANSACTION_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(settings.address, "memory://prod");
        let credentials = settings.credentials().unwrap();
        assert_eq!(credentials.username(), "admin");
        assert_eq!(credentials.password(), "secret");
        assert!(settings.options.infer_enabled());
        assert_eq!(settings.options.prefetch_size_or_default(), 8);
        assert_eq!(
            settings.options.transaction_timeout_or_default(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ConnectionSettings::from_lookup(lookup(&[("CONCEPTDB_PREFETCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("CONCEPTDB_PREFETCH_SIZE"));

        let err = ConnectionSettings::from_lookup(lookup(&[("CONCEPTDB_PREFETCH_SIZE", "0")]))
            .unwrap_err();
        assert_eq!(err, DriverError::PositiveValueRequired("prefetch_size"));
    }
}
