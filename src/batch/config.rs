//! Batcher configuration.

use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::time::Duration;

/// Startup configuration for [`super::EmbeddingBatcher`]. Immutable once the
/// batcher is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatcherConfig {
    /// Maximum requests sealed into one batch (BATCH_SIZE).
    pub batch_size: usize,
    /// Maximum age of a forming batch before it is sealed (BATCH_TIMEOUT_MS).
    #[serde(serialize_with = "serialize_millis")]
    pub batch_timeout: Duration,
    /// Number of workers, i.e. concurrent inference calls (PROCESSING_CONCURRENCY).
    pub processing_concurrency: usize,
    /// Maximum Queued + Batched requests (MAX_QUEUE_SIZE).
    pub max_queue_size: usize,
    /// How long shutdown waits for in-flight work (DRAIN_TIMEOUT_MS).
    #[serde(serialize_with = "serialize_millis")]
    pub drain_timeout: Duration,
}

fn serialize_millis<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            batch_timeout: Duration::from_millis(100),
            processing_concurrency: 2,
            max_queue_size: 50,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl BatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_batch_timeout(mut self, d: Duration) -> Self {
        self.batch_timeout = d;
        self
    }

    pub fn with_processing_concurrency(mut self, n: usize) -> Self {
        self.processing_concurrency = n;
        self
    }

    pub fn with_max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    pub fn with_drain_timeout(mut self, d: Duration) -> Self {
        self.drain_timeout = d;
        self
    }

    /// Loads overrides from the environment on top of the defaults.
    ///
    /// - `BATCH_SIZE`
    /// - `BATCH_TIMEOUT_MS`
    /// - `PROCESSING_CONCURRENCY`
    /// - `MAX_QUEUE_SIZE`
    /// - `DRAIN_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                    Error::configuration_with_context(
                        "expected a positive integer",
                        ErrorContext::new()
                            .with_field_path(key)
                            .with_details(format!("{:?}: {}", raw, e))
                            .with_source("config"),
                    )
                }),
            }
        };

        let cfg = Self {
            batch_size: read("BATCH_SIZE", defaults.batch_size as u64)? as usize,
            batch_timeout: Duration::from_millis(read(
                "BATCH_TIMEOUT_MS",
                defaults.batch_timeout.as_millis() as u64,
            )?),
            processing_concurrency: read(
                "PROCESSING_CONCURRENCY",
                defaults.processing_concurrency as u64,
            )? as usize,
            max_queue_size: read("MAX_QUEUE_SIZE", defaults.max_queue_size as u64)? as usize,
            drain_timeout: Duration::from_millis(read(
                "DRAIN_TIMEOUT_MS",
                defaults.drain_timeout.as_millis() as u64,
            )?),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects zero values. Called before the batcher accepts any request.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("BATCH_SIZE", self.batch_size as u128),
            ("BATCH_TIMEOUT_MS", self.batch_timeout.as_millis()),
            ("PROCESSING_CONCURRENCY", self.processing_concurrency as u128),
            ("MAX_QUEUE_SIZE", self.max_queue_size as u128),
            ("DRAIN_TIMEOUT_MS", self.drain_timeout.as_millis()),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(Error::configuration_with_context(
                    "value must be positive",
                    ErrorContext::new()
                        .with_field_path(key)
                        .with_details("got 0")
                        .with_source("config"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = BatcherConfig::default();
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.batch_timeout, Duration::from_millis(100));
        assert_eq!(cfg.processing_concurrency, 2);
        assert_eq!(cfg.max_queue_size, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let cfg = BatcherConfig::new()
            .with_batch_size(4)
            .with_batch_timeout(Duration::from_millis(50))
            .with_processing_concurrency(3)
            .with_max_queue_size(10)
            .with_drain_timeout(Duration::from_secs(1));
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.processing_concurrency, 3);
        assert_eq!(cfg.max_queue_size, 10);
        assert_eq!(cfg.drain_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_lookup_overrides_and_defaults() {
        let cfg = BatcherConfig::from_lookup(lookup(&[
            ("BATCH_SIZE", "16"),
            ("BATCH_TIMEOUT_MS", " 25 "),
        ]))
        .unwrap();
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.batch_timeout, Duration::from_millis(25));
        assert_eq!(cfg.max_queue_size, 50);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = BatcherConfig::from_lookup(lookup(&[("MAX_QUEUE_SIZE", "lots")])).unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("MAX_QUEUE_SIZE")
        );
    }

    #[test]
    fn test_zero_is_fatal() {
        let err =
            BatcherConfig::from_lookup(lookup(&[("PROCESSING_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(BatcherConfig::new().with_batch_size(0).validate().is_err());
        assert!(BatcherConfig::new()
            .with_batch_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_serializes_durations_as_millis() {
        let json = serde_json::to_value(BatcherConfig::default()).unwrap();
        assert_eq!(json["batch_timeout"], 100);
        assert_eq!(json["drain_timeout"], 30000);
    }
}
