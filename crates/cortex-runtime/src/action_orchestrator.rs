//! [`ActionOrchestrator`] – owns the action plugins, turns LLM replies into
//! commands and dispatches them one at a time.
//!
//! The orchestrator is shared as `Arc<ActionOrchestrator>`: the tick loop
//! dispatches through it while [`emergency_stop`](ActionOrchestrator::emergency_stop)
//! may be called from any other task.  The emergency flag is checked before
//! every dispatch and an in-flight `execute` is abandoned as soon as it is
//! raised.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cortex_hal::RecordingAction;
//! use cortex_runtime::action_orchestrator::ActionOrchestrator;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let speech = Arc::new(RecordingAction::new("speech"));
//! let mut actions = ActionOrchestrator::new();
//! actions.register(speech.clone()).unwrap();
//! actions.initialize().await.unwrap();
//!
//! let results = actions
//!     .execute_actions(r#"{"action": "speech", "params": {"text": "hi"}}"#)
//!     .await;
//! assert!(results[0].success);
//! assert_eq!(speech.received().len(), 1);
//! # });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cortex_hal::ActionPlugin;
use cortex_types::{ActionCommand, ActionResult, CortexError, PluginStatus};
use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::directive::{directive_guide, parse_directives};

pub struct ActionOrchestrator {
    plugins: Vec<Arc<dyn ActionPlugin>>,
    plain_text_action: Option<String>,
    emergency: AtomicBool,
    halted: Notify,
}

impl Default for ActionOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionOrchestrator {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            plain_text_action: None,
            emergency: AtomicBool::new(false),
            halted: Notify::new(),
        }
    }

    /// Replies containing no JSON object at all are sent to `action` as
    /// `{"text": reply}`.
    pub fn with_plain_text_action(mut self, action: Option<String>) -> Self {
        self.plain_text_action = action;
        self
    }

    /// # Errors
    ///
    /// [`CortexError::Config`] when an action with the same name exists.
    pub fn register(&mut self, plugin: Arc<dyn ActionPlugin>) -> Result<(), CortexError> {
        if self.get(plugin.name()).is_some() {
            return Err(CortexError::Config(format!("duplicate action plugin '{}'", plugin.name())));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ActionPlugin>> {
        self.plugins.iter().find(|p| p.name() == name)
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

    pub fn plain_text_action(&self) -> Option<&str> {
        self.plain_text_action.as_deref()
    }

    /// Prompt section describing every registered action.
    pub fn usage_guide(&self) -> String {
        directive_guide(self.plugins.iter().map(|p| (p.name(), p.usage())))
    }

    /// Initialize every plugin in order, stopping the ones already
    /// initialized on the first failure.
    pub async fn initialize(&self) -> Result<(), CortexError> {
        if let Some(target) = &self.plain_text_action
            && self.get(target).is_none()
        {
            return Err(CortexError::Config(format!(
                "plain_text_action '{target}' is not a registered action"
            )));
        }
        for (index, plugin) in self.plugins.iter().enumerate() {
            if let Err(e) = plugin.initialize().await {
                for ready in self.plugins[..index].iter().rev() {
                    let _ = ready.stop().await;
                }
                return Err(CortexError::Initialization {
                    component: format!("action:{}", plugin.name()),
                    details: e.to_string(),
                });
            }
            debug!(plugin = plugin.name(), "action plugin initialized");
        }
        info!(count = self.plugins.len(), "action plugins initialized");
        Ok(())
    }

    /// Parse `llm_text` and dispatch every recognised directive in order.
    ///
    /// Unknown actions and malformed directives are logged and skipped; a
    /// failing action is reported in its [`ActionResult`] and the remaining
    /// directives still run.
    pub async fn execute_actions(&self, llm_text: &str) -> Vec<ActionResult> {
        let scan = parse_directives(llm_text);
        for problem in &scan.malformed {
            warn!(directive = %problem, "skipping malformed directive");
        }

        let commands = if scan.is_plain_text() {
            match (&self.plain_text_action, llm_text.trim()) {
                (Some(target), text) if !text.is_empty() => {
                    vec![ActionCommand::new(target.clone(), json!({ "text": text }))]
                }
                _ => Vec::new(),
            }
        } else {
            scan.commands
        };

        let mut results = Vec::with_capacity(commands.len());
        for command in &commands {
            if self.is_emergency() {
                warn!(remaining = commands.len() - results.len(), "emergency stop: not dispatching remaining directives");
                break;
            }
            if let Some(result) = self.dispatch(command).await {
                results.push(result);
            }
        }
        results
    }

    /// Dispatch one command.
    ///
    /// Returns `None` when the action is unknown or the emergency flag is set.
    pub async fn dispatch(&self, command: &ActionCommand) -> Option<ActionResult> {
        let Some(plugin) = self.get(&command.action_name) else {
            warn!(action = %command.action_name, "skipping directive for unknown action");
            return None;
        };

        // Registered before the flag check so a concurrent emergency stop
        // cannot slip between the two.
        let halted = self.halted.notified();
        tokio::pin!(halted);
        halted.as_mut().enable();
        if self.is_emergency() {
            return None;
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            outcome = plugin.execute(&command.params) => outcome,
            _ = halted.as_mut() => Err(CortexError::PluginFailure {
                plugin: command.action_name.clone(),
                details: "interrupted by emergency stop".to_string(),
            }),
        };
        let elapsed = started.elapsed();

        Some(match outcome {
            Ok(()) => {
                debug!(action = %command.action_name, elapsed_ms = elapsed.as_millis() as u64, "action completed");
                ActionResult::succeeded(&command.action_name, elapsed)
            }
            Err(e) => {
                warn!(action = %command.action_name, error = %e, "action failed");
                ActionResult::failed(&command.action_name, e.to_string(), elapsed)
            }
        })
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    /// Raise the emergency flag and fail-safe every plugin.
    ///
    /// Only the first call does anything; it returns `true`.  Fail-safes run
    /// concurrently and their errors are logged.
    pub async fn emergency_stop(&self) -> bool {
        if self.emergency.swap(true, Ordering::SeqCst) {
            return false;
        }
        error!(actions = self.plugins.len(), "EMERGENCY STOP: fail-safing all actuators");
        self.halted.notify_waiters();

        let outcomes = join_all(self.plugins.iter().map(|p| async move { (p.name(), p.fail_safe().await) })).await;
        for (name, outcome) in outcomes {
            if let Err(e) = outcome {
                error!(action = name, error = %e, "fail-safe failed");
            }
        }
        true
    }

    pub fn statuses(&self) -> Vec<PluginStatus> {
        self.plugins.iter().map(|p| p.get_status()).collect()
    }

    /// Stop every plugin, last registered first.
    pub async fn stop(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Err(e) = plugin.stop().await {
                warn!(plugin = plugin.name(), error = %e, "action plugin failed to stop");
            }
        }
    }
}
