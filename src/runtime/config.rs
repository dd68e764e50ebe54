use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Runtime settings.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```ignore
/// let config = RuntimeConfig::from_json(r#"{ "snapshot_every": 50 }"#)?;
/// assert_eq!(config.stream_name, "event_stream");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Stream every command appends to. Created on `build()` when missing.
    pub stream_name: String,
    /// Serialize load/handle/append per process with the lock manager. When off,
    /// only the store's version check protects concurrent writers.
    pub lock_per_process: bool,
    /// Let the attached projection engine catch up after each commit.
    pub run_projections: bool,
    /// Save a state snapshot whenever a process version crosses a multiple of this.
    pub snapshot_every: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stream_name: "event_stream".to_string(),
            lock_per_process: true,
            run_projections: true,
            snapshot_every: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let config: RuntimeConfig = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::Other(format!("invalid runtime config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.stream_name.is_empty() {
            return Err(ConfigurationError::EmptyName("stream name"));
        }
        if self.snapshot_every == Some(0) {
            return Err(ConfigurationError::Other(
                "snapshot_every must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn with_stream_name(mut self, stream_name: impl Into<String>) -> Self {
        self.stream_name = stream_name.into();
        self
    }

    pub fn with_lock_per_process(mut self, enabled: bool) -> Self {
        self.lock_per_process = enabled;
        self
    }

    pub fn with_projections(mut self, enabled: bool) -> Self {
        self.run_projections = enabled;
        self
    }

    pub fn with_snapshot_every(mut self, every: u64) -> Self {
        self.snapshot_every = Some(every);
        self
    }

    /// True when a process moving from `from` to `to` crossed a snapshot boundary.
    pub(crate) fn snapshot_due(&self, from: u64, to: u64) -> bool {
        match self.snapshot_every {
            Some(every) if every > 0 => to / every > from / every,
            _ => false,
        }
    }
}
