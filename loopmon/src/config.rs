//! Monitor configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::callback::Callback;
use crate::error::{Error, Result};

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Immutable configuration of a monitor.
///
/// Build one with [`MonitorConfig::builder`]. Callbacks can only be
/// registered here; a monitor cannot gain or lose callbacks later.
#[derive(Clone)]
pub struct MonitorConfig {
    interval: Duration,
    callbacks: Arc<[Arc<dyn Callback>]>,
    name: Option<String>,
}

impl MonitorConfig {
    /// Create a builder for configuring a monitor.
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::new()
    }

    /// How often the monitor collects a sample.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Registered callbacks, in registration order.
    pub fn callbacks(&self) -> &[Arc<dyn Callback>] {
        &self.callbacks
    }

    /// Name of the sampling task.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            callbacks: Arc::from(Vec::new()),
            name: None,
        }
    }
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("interval", &self.interval)
            .field("callbacks", &self.callbacks.len())
            .field("name", &self.name)
            .finish()
    }
}

/// Builder for [`MonitorConfig`].
#[derive(Default)]
pub struct MonitorConfigBuilder {
    interval: Option<Duration>,
    callbacks: Vec<Arc<dyn Callback>>,
    name: Option<String>,
}

impl MonitorConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sampling interval.
    ///
    /// Defaults to 100ms. Very small intervals mostly measure timer
    /// granularity rather than loop lag.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Register a callback.
    ///
    /// Callbacks are invoked in registration order, but since each one runs
    /// as its own task their execution order is not guaranteed.
    pub fn callback(mut self, callback: impl Callback) -> Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Register an already shared callback.
    pub fn shared_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Name the sampling task.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the configuration.
    ///
    /// Fails with [`Error::InvalidConfig`] for a zero interval.
    pub fn build(self) -> Result<MonitorConfig> {
        let interval = self.interval.unwrap_or(DEFAULT_INTERVAL);
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "interval must be greater than zero".to_string(),
            ));
        }

        Ok(MonitorConfig {
            interval,
            callbacks: self.callbacks.into(),
            name: self.name,
        })
    }
}

impl std::fmt::Debug for MonitorConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfigBuilder")
            .field("interval", &self.interval)
            .field("callbacks", &self.callbacks.len())
            .field("name", &self.name)
            .finish()
    }
}
