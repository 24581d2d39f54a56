//! [`InputOrchestrator`] – owns the input plugins and collects one snapshot
//! per tick.
//!
//! Every plugin is polled concurrently under its own timeout.  A plugin that
//! errors or times out contributes nothing to the snapshot and is reported in
//! [`InputSnapshot::failures`]; the others are unaffected.

use std::sync::Arc;
use std::time::Duration;

use cortex_hal::InputPlugin;
use cortex_types::{CortexError, InputDatum, PluginStatus};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

/// One tick's worth of input.
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    /// Data in plugin registration order.
    pub data: Vec<InputDatum>,
    /// One message per plugin that failed or timed out.
    pub failures: Vec<String>,
}

pub struct InputOrchestrator {
    plugins: Vec<Arc<dyn InputPlugin>>,
    default_timeout: Duration,
}

impl InputOrchestrator {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            plugins: Vec::new(),
            default_timeout,
        }
    }

    /// Append a plugin.  Registration order is the fusion tie-break order.
    ///
    /// # Errors
    ///
    /// [`CortexError::Config`] when a plugin with the same name exists.
    pub fn register(&mut self, plugin: Arc<dyn InputPlugin>) -> Result<(), CortexError> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(CortexError::Config(format!("duplicate input plugin '{}'", plugin.name())));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Initialize every plugin in order.  On the first failure the plugins
    /// already initialized are stopped again.
    pub async fn initialize(&self) -> Result<(), CortexError> {
        for (index, plugin) in self.plugins.iter().enumerate() {
            if let Err(e) = plugin.initialize().await {
                for ready in self.plugins[..index].iter().rev() {
                    let _ = ready.stop().await;
                }
                return Err(CortexError::Initialization {
                    component: format!("input:{}", plugin.name()),
                    details: e.to_string(),
                });
            }
            debug!(plugin = plugin.name(), "input plugin initialized");
        }
        info!(count = self.plugins.len(), "input plugins initialized");
        Ok(())
    }

    /// Poll every plugin concurrently.
    pub async fn collect(&self) -> InputSnapshot {
        let polls = self.plugins.iter().map(|plugin| {
            let limit = plugin.timeout().unwrap_or(self.default_timeout);
            async move { (plugin.name(), limit, tokio::time::timeout(limit, plugin.poll()).await) }
        });

        let mut snapshot = InputSnapshot::default();
        for (name, limit, outcome) in join_all(polls).await {
            match outcome {
                Ok(Ok(Some(datum))) => snapshot.data.push(datum),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(plugin = name, error = %e, "input plugin failed");
                    snapshot.failures.push(e.to_string());
                }
                Err(_) => {
                    let e = CortexError::Timeout {
                        component: name.to_string(),
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    };
                    warn!(plugin = name, error = %e, "input plugin timed out");
                    snapshot.failures.push(e.to_string());
                }
            }
        }
        snapshot
    }

    /// Data only; failures are logged and dropped.
    pub async fn collect_inputs(&self) -> Vec<InputDatum> {
        self.collect().await.data
    }

    pub fn statuses(&self) -> Vec<PluginStatus> {
        self.plugins.iter().map(|p| p.get_status()).collect()
    }

    /// Stop every plugin, last registered first.  Errors are logged.
    pub async fn stop(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Err(e) = plugin.stop().await {
                warn!(plugin = plugin.name(), error = %e, "input plugin failed to stop");
            }
        }
    }
}
