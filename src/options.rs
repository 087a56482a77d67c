//! Per-session, per-transaction and per-query options
//!
//! Every field is optional; an unset field means "use the service default".
//! The getters resolve unset fields to the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DriverError, Result};

pub const DEFAULT_PREFETCH_SIZE: u32 = 50;
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SCHEMA_LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Apply rules while answering queries
    #[serde(default)]
    pub infer: Option<bool>,
    #[serde(default)]
    pub trace_inference: Option<bool>,
    /// Attach explainables to inferred answers
    #[serde(default)]
    pub explain: Option<bool>,
    #[serde(default)]
    pub parallel: Option<bool>,
    /// Stream answers eagerly up to `prefetch_size`
    #[serde(default)]
    pub prefetch: Option<bool>,
    #[serde(default)]
    pub prefetch_size: Option<u32>,
    #[serde(default)]
    pub session_idle_timeout_millis: Option<u64>,
    #[serde(default)]
    pub transaction_timeout_millis: Option<u64>,
    #[serde(default)]
    pub schema_lock_acquire_timeout_millis: Option<u64>,
    #[serde(default)]
    pub read_any_replica: Option<bool>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infer(mut self, infer: bool) -> Self {
        self.infer = Some(infer);
        self
    }

    pub fn trace_inference(mut self, trace_inference: bool) -> Self {
        self.trace_inference = Some(trace_inference);
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = Some(explain);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn prefetch_size(mut self, prefetch_size: u32) -> Self {
        self.prefetch_size = Some(prefetch_size);
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout_millis = Some(timeout.as_millis() as u64);
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_millis = Some(timeout.as_millis() as u64);
        self
    }

    pub fn schema_lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.schema_lock_acquire_timeout_millis = Some(timeout.as_millis() as u64);
        self
    }

    pub fn read_any_replica(mut self, read_any_replica: bool) -> Self {
        self.read_any_replica = Some(read_any_replica);
        self
    }

    pub fn infer_enabled(&self) -> bool {
        self.infer.unwrap_or(false)
    }

    pub fn explain_enabled(&self) -> bool {
        self.explain.unwrap_or(false)
    }

    pub fn prefetch_enabled(&self) -> bool {
        self.prefetch.unwrap_or(true)
    }

    pub fn prefetch_size_or_default(&self) -> u32 {
        self.prefetch_size.unwrap_or(DEFAULT_PREFETCH_SIZE)
    }

    pub fn session_idle_timeout_or_default(&self) -> Duration {
        self.session_idle_timeout_millis
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SESSION_IDLE_TIMEOUT)
    }

    pub fn transaction_timeout_or_default(&self) -> Duration {
        self.transaction_timeout_millis
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TRANSACTION_TIMEOUT)
    }

    pub fn schema_lock_acquire_timeout_or_default(&self) -> Duration {
        self.schema_lock_acquire_timeout_millis
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SCHEMA_LOCK_ACQUIRE_TIMEOUT)
    }

    /// Fields set here win over fields set in `base`.
    pub fn merged_over(&self, base: &Options) -> Options {
        Options {
            infer: self.infer.or(base.infer),
            trace_inference: self.trace_inference.or(base.trace_inference),
            explain: self.explain.or(base.explain),
            parallel: self.parallel.or(base.parallel),
            prefetch: self.prefetch.or(base.prefetch),
            prefetch_size: self.prefetch_size.or(base.prefetch_size),
            session_idle_timeout_millis: self
                .session_idle_timeout_millis
                .or(base.session_idle_timeout_millis),
            transaction_timeout_millis: self
                .transaction_timeout_millis
                .or(base.transaction_timeout_millis),
            schema_lock_acquire_timeout_millis: self
                .schema_lock_acquire_timeout_millis
                .or(base.schema_lock_acquire_timeout_millis),
            read_any_replica: self.read_any_replica.or(base.read_any_replica),
        }
    }

    /// Rejects sizes and timeouts that are explicitly set to zero.
    pub fn validate(&self) -> Result<()> {
        if self.prefetch_size == Some(0) {
            return Err(DriverError::PositiveValueRequired("prefetch_size"));
        }
        if self.session_idle_timeout_millis == Some(0) {
            return Err(DriverError::PositiveValueRequired("session_idle_timeout"));
        }
        if self.transaction_timeout_millis == Some(0) {
            return Err(DriverError::PositiveValueRequired("transaction_timeout"));
        }
        if self.schema_lock_acquire_timeout_millis == Some(0) {
            return Err(DriverError::PositiveValueRequired("schema_lock_acquire_timeout"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::new();
        assert!(!options.infer_enabled());
        assert!(!options.explain_enabled());
        assert_eq!(options.prefetch_size_or_default(), 50);
        assert_eq!(options.session_idle_timeout_or_default(), Duration::from_secs(30));
        assert_eq!(options.transaction_timeout_or_default(), Duration::from_secs(300));
        assert_eq!(options.schema_lock_acquire_timeout_or_default(), Duration::from_secs(10));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let err = Options::new().prefetch_size(0).validate().unwrap_err();
        assert_eq!(err, DriverError::PositiveValueRequired("prefetch_size"));

        let err = Options::new()
            .transaction_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(err, DriverError::PositiveValueRequired("transaction_timeout"));
    }

    #[test]
    fn test_merge_prefers_explicit_fields() {
        let session = Options::new().infer(true).prefetch_size(10);
        let query = Options::new().prefetch_size(2);

        let merged = query.merged_over(&session);
        assert!(merged.infer_enabled());
        assert_eq!(merged.prefetch_size_or_default(), 2);
    }

    #[test]
    fn test_unset_fields_deserialize_as_none() {
        let options: Options = serde_json::from_str(r#"{"explain": true}"#).unwrap();
        assert_eq!(options, Options::new().explain(true));
    }
}
