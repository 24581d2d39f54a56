//! [`CortexRuntime`] – the fixed-rate fusion loop.
//!
//! Each tick:
//!
//! 1. **Commands** – drain manual commands queued on
//!    [`Topic::OperatorCommands`] and dispatch them.
//! 2. **Collect** – poll every input plugin concurrently under its timeout.
//! 3. **Fuse** – rank the snapshot into a [`FusedContext`].
//! 4. **Think** – prompt the LLM with the system prompt and the context
//!    (skipped when nothing was sensed).
//! 5. **Act** – dispatch the directives found in the reply.
//! 6. **Account** – update [`RuntimeMetrics`] and the command history, then
//!    publish the status on the bus.
//!
//! [`start`](CortexRuntime::start) repeats ticks at most `hertz` times per
//! second; an overrunning tick is followed immediately by the next one.
//! Recoverable failures (an input, the LLM call, an action) are logged and
//! counted and never end the loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use cortex_runtime::CortexRuntime;
//!
//! # async fn demo() -> Result<(), cortex_types::CortexError> {
//! let mut runtime = CortexRuntime::from_path("config/g1.json5")?;
//! runtime.initialize().await?;
//! let handle = runtime.handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     handle.stop().await;
//! });
//! runtime.run().await
//! # }
//! ```

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cortex_cockpit::CockpitServer;
use cortex_hal::{
    ActionPlugin, HardwareSession, InputPlugin, PluginContext, SimSession, build_actions, build_inputs,
};
use cortex_middleware::{EventBus, Topic, TopicReceiver};
use cortex_perception::{Fuser, PriorityFuser};
use cortex_types::{
    ActionResult, CortexError, Event, EventPayload, FusedContext, LlmResponse, RobotMode, RuntimeMetrics,
    RuntimeStatus,
};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::action_orchestrator::ActionOrchestrator;
use crate::config::CortexConfig;
use crate::history::CommandHistory;
use crate::input_orchestrator::InputOrchestrator;
use crate::llm::LlmProvider;
use crate::safety::{BatteryGuard, BatteryLevel};

/// Source name of every event the runtime publishes.
const SOURCE: &str = "cortex-runtime";

/// History entries carried in each [`RuntimeStatus`].
const STATUS_HISTORY: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Shared state and handle
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    running: AtomicBool,
    wake: Notify,
    /// `true` while `start()` is looping.
    active: watch::Sender<bool>,
    actions: Mutex<Option<Arc<ActionOrchestrator>>>,
    snapshot: Mutex<Option<RuntimeStatus>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            wake: Notify::new(),
            active: watch::Sender::new(false),
            actions: Mutex::new(None),
            snapshot: Mutex::new(None),
        }
    }

    /// Only a loop already waiting is woken; no permit is left behind for
    /// a later `start()`.
    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }
}

/// Cloneable control surface of a [`CortexRuntime`], usable from other tasks
/// while the loop holds `&mut` on the runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<Shared>,
}

impl RuntimeHandle {
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to finish its current tick and return.  Resolves once
    /// the loop has exited (immediately when it is not running, in which case
    /// a later `start()` is unaffected).
    pub async fn stop(&self) {
        self.shared.halt();
        let mut active = self.shared.active.subscribe();
        let _ = active.wait_for(|looping| !*looping).await;
    }

    /// Halt the loop and fail-safe every action plugin without waiting for
    /// the tick in flight.  Returns `true` for the call that performed the
    /// fail-safe; later calls only halt.
    pub async fn emergency_stop(&self) -> bool {
        self.shared.halt();
        let actions = self.shared.actions.lock().unwrap_or_else(|p| p.into_inner()).clone();
        match actions {
            Some(actions) => actions.emergency_stop().await,
            None => false,
        }
    }

    /// Status published by the most recent tick.
    pub fn status(&self) -> Option<RuntimeStatus> {
        self.shared.snapshot.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick report
// ─────────────────────────────────────────────────────────────────────────────

/// What one [`tick`](CortexRuntime::tick) did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub context: FusedContext,
    /// `None` when the LLM was skipped or failed.
    pub response: Option<LlmResponse>,
    /// Manual commands first, then LLM directives, in dispatch order.
    pub results: Vec<ActionResult>,
    /// Recoverable failures counted into `RuntimeMetrics::errors`.
    pub failures: Vec<String>,
    pub elapsed: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles a [`CortexRuntime`] with optional injected collaborators.
///
/// Anything not injected is built from the configuration at
/// [`initialize`](CortexRuntime::initialize).
pub struct RuntimeBuilder {
    config: CortexConfig,
    session: Option<Arc<dyn HardwareSession>>,
    inputs: Vec<Arc<dyn InputPlugin>>,
    actions: Vec<Arc<dyn ActionPlugin>>,
    llm: Option<LlmProvider>,
    bus: Option<EventBus>,
}

impl RuntimeBuilder {
    pub fn new(config: CortexConfig) -> Self {
        Self {
            config,
            session: None,
            inputs: Vec::new(),
            actions: Vec::new(),
            llm: None,
            bus: None,
        }
    }

    /// Use `session` instead of a simulated one.
    pub fn with_session(mut self, session: Arc<dyn HardwareSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Register `plugin` after the configured inputs.
    pub fn with_input(mut self, plugin: Arc<dyn InputPlugin>) -> Self {
        self.inputs.push(plugin);
        self
    }

    /// Register `plugin` after the configured actions.
    pub fn with_action(mut self, plugin: Arc<dyn ActionPlugin>) -> Self {
        self.actions.push(plugin);
        self
    }

    /// Use `provider` instead of the one described by `config.llm`.
    pub fn with_llm(mut self, provider: LlmProvider) -> Self {
        self.llm = Some(provider);
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> CortexRuntime {
        let config = self.config;
        let session = self.session.unwrap_or_else(|| {
            Arc::new(
                SimSession::builder()
                    .with_interface(config.unitree_ethernet.clone())
                    .with_mode(RobotMode::Damping)
                    .build(),
            )
        });
        let bus = self.bus.unwrap_or_default();
        // Subscribed now so commands queued before the first tick are kept.
        let commands = bus.subscribe_to(Topic::OperatorCommands);
        CortexRuntime {
            fuser: Box::new(PriorityFuser::new(config.fuser.baseline_priority)),
            battery: BatteryGuard::new(&config.safety),
            history: CommandHistory::new(config.command_history_size),
            system_prompt: config.system_prompt_base.clone(),
            session,
            pending_inputs: self.inputs,
            pending_actions: self.actions,
            pending_llm: self.llm,
            parts: None,
            bus,
            commands,
            metrics: RuntimeMetrics::default(),
            robot_mode: None,
            shared: Arc::new(Shared::new()),
            tasks: Vec::new(),
            lifecycle: Lifecycle::Created,
            config,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CortexRuntime
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Ready,
    Stopped,
}

/// Components that exist only after a successful `initialize()`.
struct Parts {
    inputs: InputOrchestrator,
    actions: Arc<ActionOrchestrator>,
    llm: LlmProvider,
}

pub struct CortexRuntime {
    config: CortexConfig,
    session: Arc<dyn HardwareSession>,
    pending_inputs: Vec<Arc<dyn InputPlugin>>,
    pending_actions: Vec<Arc<dyn ActionPlugin>>,
    pending_llm: Option<LlmProvider>,
    parts: Option<Parts>,
    fuser: Box<dyn Fuser>,
    battery: BatteryGuard,
    system_prompt: String,
    bus: EventBus,
    commands: TopicReceiver,
    metrics: RuntimeMetrics,
    history: CommandHistory,
    robot_mode: Option<RobotMode>,
    shared: Arc<Shared>,
    /// Debug interface and emergency listener.
    tasks: Vec<JoinHandle<()>>,
    lifecycle: Lifecycle,
}

impl CortexRuntime {
    /// A runtime built entirely from `config`.
    pub fn new(config: CortexConfig) -> Self {
        RuntimeBuilder::new(config).build()
    }

    pub fn builder(config: CortexConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Load, override from the environment and fully validate a JSON5 file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CortexError> {
        let config = CortexConfig::load(path)?;
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &CortexConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// The full system prompt sent with every LLM call.  Final only after
    /// `initialize()`, which appends the action usage guide.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Connect the session and bring every component up in dependency
    /// order: plugins, orchestrators, LLM, debug interface.
    ///
    /// Calling it again on a ready runtime does nothing.
    ///
    /// # Errors
    ///
    /// The first failure.  Everything brought up before it is torn down
    /// again, so nothing is left running.
    pub async fn initialize(&mut self) -> Result<(), CortexError> {
        match self.lifecycle {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::Stopped => {
                return Err(CortexError::Initialization {
                    component: "runtime".to_string(),
                    details: "runtime was stopped; build a new one".to_string(),
                });
            }
            Lifecycle::Created => {}
        }
        self.config.validate_settings()?;
        info!(name = %self.config.name, hertz = self.config.hertz, session = self.session.name(), "initializing runtime");

        self.session.connect().await?;

        let (inputs, actions) = match self.build_orchestrators() {
            Ok(built) => built,
            Err(e) => {
                self.disconnect().await;
                return Err(e);
            }
        };

        if let Err(e) = inputs.initialize().await {
            self.disconnect().await;
            return Err(e);
        }
        if let Err(e) = actions.initialize().await {
            inputs.stop().await;
            self.disconnect().await;
            return Err(e);
        }

        let llm = match self.pending_llm.take() {
            Some(llm) => Ok(llm),
            None => LlmProvider::from_config(&self.config.llm),
        };
        let mut llm = match llm {
            Ok(llm) => llm,
            Err(e) => {
                actions.stop().await;
                inputs.stop().await;
                self.disconnect().await;
                return Err(e);
            }
        };
        if let Err(e) = llm.initialize().await {
            actions.stop().await;
            inputs.stop().await;
            self.disconnect().await;
            return Err(e);
        }

        if self.config.development.websim_enabled {
            match self.spawn_cockpit().await {
                Ok(task) => self.tasks.push(task),
                Err(e) => {
                    llm.stop();
                    actions.stop().await;
                    inputs.stop().await;
                    self.disconnect().await;
                    return Err(e);
                }
            }
        }

        self.system_prompt = format!("{}\n\n{}", self.config.system_prompt_base, actions.usage_guide());
        let actions = Arc::new(actions);
        *self.shared.actions.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&actions));
        self.tasks.push(self.spawn_emergency_listener());
        self.robot_mode = self.session.current_mode().await.ok();
        self.parts = Some(Parts { inputs, actions, llm });
        self.lifecycle = Lifecycle::Ready;
        info!(
            inputs = ?self.parts.as_ref().map(|p| p.inputs.names()),
            actions = ?self.parts.as_ref().map(|p| p.actions.names()),
            "runtime initialized"
        );
        Ok(())
    }

    fn build_orchestrators(&mut self) -> Result<(InputOrchestrator, ActionOrchestrator), CortexError> {
        let mut ctx = PluginContext::new(Arc::clone(&self.session));
        ctx.auto_switch_mode = self.config.auto_switch_mode;
        ctx.locomotion = self.config.locomotion_service;

        let mut inputs = InputOrchestrator::new(self.config.input_timeout());
        for plugin in build_inputs(self.config.agent_inputs.specs(), &ctx)?
            .into_iter()
            .chain(self.pending_inputs.drain(..))
        {
            inputs.register(plugin)?;
        }

        let mut actions = ActionOrchestrator::new().with_plain_text_action(self.config.plain_text_action.clone());
        for plugin in build_actions(self.config.agent_actions.specs(), &ctx)?
            .into_iter()
            .chain(self.pending_actions.drain(..))
        {
            actions.register(plugin)?;
        }

        if inputs.is_empty() {
            return Err(CortexError::Config("at least one input plugin must be enabled".into()));
        }
        if actions.is_empty() {
            return Err(CortexError::Config("at least one action plugin must be enabled".into()));
        }
        Ok((inputs, actions))
    }

    async fn spawn_cockpit(&self) -> Result<JoinHandle<()>, CortexError> {
        let dev = &self.config.development;
        let host: IpAddr = dev
            .websim_host
            .parse()
            .map_err(|e| CortexError::Config(format!("development.websim_host '{}': {e}", dev.websim_host)))?;
        let bound = CockpitServer::new(self.bus.clone())
            .with_host(host)
            .with_port(dev.websim_port)
            .bind()
            .await?;
        info!(addr = %bound.local_addr()?, "debug interface enabled");
        Ok(tokio::spawn(async move {
            if let Err(e) = bound.serve().await {
                error!(error = %e, "debug interface stopped");
            }
        }))
    }

    fn spawn_emergency_listener(&self) -> JoinHandle<()> {
        let mut requests = self.bus.subscribe_to(Topic::OperatorCommands);
        let handle = self.handle();
        tokio::spawn(async move {
            while let Some(event) = requests.recv().await {
                if let EventPayload::EmergencyStop { reason } = event.payload {
                    error!(%reason, source = %event.source, "emergency stop requested");
                    handle.emergency_stop().await;
                }
            }
        })
    }

    async fn disconnect(&self) {
        if let Err(e) = self.session.disconnect().await {
            warn!(error = %e, "hardware session disconnect failed");
        }
    }

    fn ensure_ready(&self) -> Result<(), CortexError> {
        match (&self.parts, self.lifecycle) {
            (Some(_), Lifecycle::Ready) => Ok(()),
            _ => Err(not_initialized()),
        }
    }

    fn emergency_engaged(&self) -> bool {
        self.parts.as_ref().is_some_and(|p| p.actions.is_emergency())
    }

    // ── Loop ─────────────────────────────────────────────────────────────────

    /// Run exactly one iteration.
    ///
    /// # Errors
    ///
    /// [`CortexError::Initialization`] before `initialize()`, after `stop()`
    /// or once an emergency stop has been engaged.  Per-tick failures are
    /// reported in the [`TickReport`], not as errors.
    pub async fn tick(&mut self) -> Result<TickReport, CortexError> {
        self.ensure_ready()?;
        let Some(parts) = self.parts.as_ref() else {
            return Err(not_initialized());
        };
        if parts.actions.is_emergency() {
            return Err(CortexError::Initialization {
                component: "runtime".to_string(),
                details: "emergency stop engaged".to_string(),
            });
        }
        let started = Instant::now();
        let mut failures = Vec::new();
        let mut results = Vec::new();

        // Emergency requests queued before the listener task existed are
        // only seen here.
        for event in self.commands.drain() {
            match event.payload {
                EventPayload::ManualCommand(command) => {
                    info!(action = %command.action_name, source = %event.source, "dispatching manual command");
                    results.extend(parts.actions.dispatch(&command).await);
                }
                EventPayload::EmergencyStop { reason } => {
                    error!(%reason, source = %event.source, "emergency stop requested");
                    self.shared.halt();
                    parts.actions.emergency_stop().await;
                }
                _ => {}
            }
        }

        let snapshot = parts.inputs.collect().await;
        failures.extend(snapshot.failures);
        let context = self.fuser.fuse(snapshot.data, parts.inputs.len());

        if let Some(alert) = self.battery.assess(&context) {
            publish(
                &self.bus,
                Topic::SystemAlerts,
                EventPayload::Fault {
                    component: "battery".to_string(),
                    message: alert.message(),
                },
            );
            if alert.level == BatteryLevel::Critical {
                self.shared.halt();
                parts.actions.emergency_stop().await;
            }
        }

        let response = if parts.actions.is_emergency() {
            warn!("emergency stop engaged, skipping LLM");
            None
        } else if context.is_empty() {
            debug!("no input this tick, skipping LLM");
            None
        } else {
            match parts.llm.process(&context, &self.system_prompt).await {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(error = %e, "LLM call failed");
                    failures.push(e.to_string());
                    None
                }
            }
        };

        if let Some(response) = &response {
            if self.config.development.debug_mode {
                info!(provider = %response.provider, tokens = response.tokens_used, reply = %response.content, "LLM reply");
            } else {
                debug!(provider = %response.provider, tokens = response.tokens_used, "LLM reply");
            }
            publish(&self.bus, Topic::CognitiveStream, EventPayload::AgentThought(response.content.clone()));
            results.extend(parts.actions.execute_actions(&response.content).await);
        }

        for result in &results {
            if !result.success {
                failures.push(format!(
                    "action '{}': {}",
                    result.action_name,
                    result.error.as_deref().unwrap_or("failed")
                ));
            }
            publish(&self.bus, Topic::ActionResults, EventPayload::ActionCompleted(result.clone()));
        }

        let elapsed = started.elapsed();
        self.metrics.record_tick(elapsed, &failures);
        self.history.extend(results.iter().cloned());
        self.robot_mode = self.session.current_mode().await.ok().or(self.robot_mode);
        debug!(
            tick = self.metrics.total_loops,
            sources = context.ordered_data.len(),
            actions = results.len(),
            failures = failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "tick complete"
        );

        let status = self.status();
        *self.shared.snapshot.lock().unwrap_or_else(|p| p.into_inner()) = Some(status.clone());
        publish(&self.bus, Topic::Telemetry, EventPayload::Status(Box::new(status)));

        Ok(TickReport {
            context,
            response,
            results,
            failures,
            elapsed,
        })
    }

    /// Loop until [`RuntimeHandle::stop`] or an emergency stop.
    ///
    /// Resets `loop_count`.  Does not tear down; see [`run`](Self::run).
    pub async fn start(&mut self) -> Result<(), CortexError> {
        self.run_loop(None).await
    }

    /// Like [`start`](Self::start) but also returns once `duration` has
    /// elapsed.  The tick in flight at the deadline is completed.
    pub async fn run_for(&mut self, duration: Duration) -> Result<(), CortexError> {
        self.run_loop(Some(Instant::now() + duration)).await
    }

    /// [`start`](Self::start) followed by [`stop`](Self::stop).
    pub async fn run(&mut self) -> Result<(), CortexError> {
        let outcome = self.start().await;
        self.stop().await;
        outcome
    }

    async fn run_loop(&mut self, deadline: Option<Instant>) -> Result<(), CortexError> {
        self.ensure_ready()?;
        if self.emergency_engaged() {
            return Err(CortexError::Initialization {
                component: "runtime".to_string(),
                details: "emergency stop engaged; tear down and rebuild the runtime".to_string(),
            });
        }

        let period = self.config.period();
        self.metrics.loop_count = 0;
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.active.send_replace(true);
        info!(name = %self.config.name, hertz = self.config.hertz, "loop started");

        let outcome = loop {
            if !self.is_running() || deadline.is_some_and(|d| Instant::now() >= d) {
                break Ok(());
            }
            let next = Instant::now() + period;
            if let Err(e) = self.tick().await {
                if self.emergency_engaged() {
                    break Ok(());
                }
                break Err(e);
            }

            // Armed before the running check so a halt in between still wakes us.
            let shared = Arc::clone(&self.shared);
            let wake = shared.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();
            if !self.is_running() {
                break Ok(());
            }

            let wake_at = deadline.map_or(next, |d| d.min(next));
            if Instant::now() >= wake_at {
                debug!(period_ms = period.as_millis() as u64, "tick overran its period");
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = wake => {}
            }
        };

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.active.send_replace(false);
        info!(loops = self.metrics.loop_count, errors = self.metrics.errors, "loop stopped");
        outcome
    }

    /// Tear everything down in reverse order: debug interface, actions, LLM,
    /// inputs, hardware session.  Idempotent.
    pub async fn stop(&mut self) {
        self.shared.halt();
        if self.lifecycle != Lifecycle::Ready {
            return;
        }
        info!(name = %self.config.name, "tearing down runtime");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(parts) = self.parts.as_mut() {
            parts.actions.stop().await;
            parts.llm.stop();
            parts.inputs.stop().await;
        }
        self.disconnect().await;
        self.lifecycle = Lifecycle::Stopped;
    }

    /// Halt the loop and fail-safe every action plugin.  Returns `true` when
    /// this call performed the fail-safe.
    pub async fn emergency_stop(&self) -> bool {
        self.handle().emergency_stop().await
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            name: self.config.name.clone(),
            running: self.is_running(),
            hertz: self.config.hertz,
            metrics: self.metrics.clone(),
            llm: self.parts.as_ref().map(|p| p.llm.get_status()),
            robot_mode: self.robot_mode,
            inputs: self.parts.as_ref().map(|p| p.inputs.statuses()).unwrap_or_default(),
            actions: self.parts.as_ref().map(|p| p.actions.statuses()).unwrap_or_default(),
            history: self.history.recent(STATUS_HISTORY),
        }
    }
}

fn not_initialized() -> CortexError {
    CortexError::Initialization {
        component: "runtime".to_string(),
        details: "runtime is not initialized".to_string(),
    }
}

/// Publish on the bus; nobody listening is not an error for the runtime.
fn publish(bus: &EventBus, topic: Topic, payload: EventPayload) {
    let _ = bus.publish_to(topic, Event::new(SOURCE, payload));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_hal::RecordingAction;
    use cortex_hal::sim_session::SessionCall;
    use cortex_types::ActionCommand;
    use serde_json::json;

    fn config(extra: &str) -> CortexConfig {
        CortexConfig::from_json5(&format!(
            r#"{{
                hertz: 10,
                llm: {{ provider: "mock", mock_latency_ms: 0, response_mode: "echo" }},
                agent_inputs: {{ thermo: {{ kind: "mock", payload: {{ temp: 20 }} }} }},
                {extra}
            }}"#
        ))
        .unwrap()
    }

    fn sim() -> Arc<SimSession> {
        Arc::new(SimSession::builder().build())
    }

    #[tokio::test]
    async fn tick_before_initialize_is_an_error() {
        let mut runtime = CortexRuntime::builder(config("")).with_action(Arc::new(RecordingAction::new("rec"))).build();
        assert!(matches!(runtime.tick().await, Err(CortexError::Initialization { .. })));
        assert!(runtime.start().await.is_err());
    }

    #[tokio::test]
    async fn initialize_requires_an_action_and_disconnects_on_failure() {
        let session = sim();
        let mut runtime = CortexRuntime::builder(config("")).with_session(session.clone()).build();
        let err = runtime.initialize().await.unwrap_err();
        assert!(matches!(err, CortexError::Config(_)), "{err}");
        assert!(!session.is_connected());
        assert_eq!(session.calls(), vec![SessionCall::Connect, SessionCall::Disconnect]);
    }

    #[tokio::test]
    async fn llm_failure_unwinds_initialized_plugins() {
        let session = sim();
        let rec = Arc::new(RecordingAction::new("rec"));
        let mut cfg = config("");
        cfg.llm.provider = "openai".to_string();
        cfg.llm.api_key_env = Some("CORTEX_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        let mut runtime = CortexRuntime::builder(cfg)
            .with_session(session.clone())
            .with_action(rec.clone())
            .build();

        assert!(matches!(runtime.initialize().await, Err(CortexError::Initialization { .. })));
        assert!(!session.is_connected());
        assert!(!rec.get_status().initialized);
    }

    #[tokio::test]
    async fn tick_routes_plain_text_and_records_history() {
        let rec = Arc::new(RecordingAction::new("say"));
        let mut cfg = config(r#"plain_text_action: "say""#);
        cfg.llm.response_mode = crate::llm::ResponseMode::Template;
        cfg.llm.response_template = "Hello there".to_string();
        let mut runtime = CortexRuntime::builder(cfg).with_action(rec.clone()).build();
        runtime.initialize().await.unwrap();
        assert!(runtime.system_prompt().contains("say"));

        let report = runtime.tick().await.unwrap();
        assert_eq!(report.context.ordered_data[0].source_name, "thermo");
        assert_eq!(report.response.unwrap().content, "Hello there");
        assert_eq!(rec.received(), vec![json!({ "text": "Hello there" })]);
        assert_eq!(runtime.history().len(), 1);
        assert_eq!(runtime.metrics().loop_count, 1);
        assert_eq!(runtime.metrics().errors, 0);
        assert_eq!(runtime.status().robot_mode, Some(RobotMode::Damping));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn manual_commands_from_the_bus_run_first() {
        let rec = Arc::new(RecordingAction::new("rec"));
        let mut runtime = CortexRuntime::builder(config("")).with_action(rec.clone()).build();
        runtime.initialize().await.unwrap();

        let command = ActionCommand::new("rec", json!({ "manual": true }));
        runtime
            .bus()
            .publish_to(Topic::OperatorCommands, Event::new("test", EventPayload::ManualCommand(command)))
            .unwrap();
        let report = runtime.tick().await.unwrap();
        assert_eq!(report.results[0].action_name, "rec");
        assert_eq!(rec.received()[0], json!({ "manual": true }));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn failing_action_counts_one_error() {
        let rec = Arc::new(RecordingAction::new("rec").failing());
        let mut cfg = config("");
        cfg.llm.response_mode = crate::llm::ResponseMode::Template;
        cfg.llm.response_template = r#"{"action": "rec", "params": {}}"#.to_string();
        let mut runtime = CortexRuntime::builder(cfg).with_action(rec).build();
        runtime.initialize().await.unwrap();

        let report = runtime.tick().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(runtime.metrics().errors, 1);
        assert!(runtime.metrics().last_error.as_deref().unwrap().contains("rec"));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn every_tick_publishes_its_status() {
        let bus = EventBus::default();
        let mut telemetry = bus.subscribe_to(Topic::Telemetry);
        let mut runtime = CortexRuntime::builder(config(""))
            .with_bus(bus)
            .with_action(Arc::new(RecordingAction::new("rec")))
            .build();
        runtime.initialize().await.unwrap();
        runtime.tick().await.unwrap();

        let events = telemetry.drain();
        assert!(matches!(&events[0].payload, EventPayload::Status(s) if s.metrics.total_loops == 1));
        assert_eq!(runtime.handle().status().unwrap().metrics.total_loops, 1);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_disconnects_once() {
        let session = sim();
        let mut runtime = CortexRuntime::builder(config(""))
            .with_session(session.clone())
            .with_action(Arc::new(RecordingAction::new("rec")))
            .build();
        runtime.initialize().await.unwrap();
        runtime.stop().await;
        runtime.stop().await;
        let disconnects = session.calls().into_iter().filter(|c| *c == SessionCall::Disconnect).count();
        assert_eq!(disconnects, 1);
        assert!(runtime.tick().await.is_err());
        assert!(runtime.initialize().await.is_err());
    }

    #[tokio::test]
    async fn handle_stop_ends_the_loop() {
        let mut runtime = CortexRuntime::builder(config(""))
            .with_action(Arc::new(RecordingAction::new("rec")))
            .build();
        runtime.initialize().await.unwrap();
        let handle = runtime.handle();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            handle.stop().await;
        });
        runtime.start().await.unwrap();
        stopper.await.unwrap();
        assert!(!runtime.is_running());
        assert!(runtime.metrics().loop_count >= 1);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn emergency_request_on_the_bus_halts_and_fail_safes_once() {
        let rec = Arc::new(RecordingAction::new("rec"));
        let mut runtime = CortexRuntime::builder(config("")).with_action(rec.clone()).build();
        runtime.initialize().await.unwrap();

        let bus = runtime.bus().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = bus.publish_to(
                Topic::OperatorCommands,
                Event::new("test", EventPayload::EmergencyStop { reason: "test".into() }),
            );
        });
        tokio::time::timeout(Duration::from_secs(5), runtime.start())
            .await
            .expect("loop must end after an emergency stop")
            .unwrap();

        assert_eq!(rec.fail_safe_count(), 1);
        assert!(!runtime.emergency_stop().await);
        assert_eq!(rec.fail_safe_count(), 1);
        assert!(matches!(runtime.start().await, Err(CortexError::Initialization { .. })));
        runtime.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_does_not_leak_into_the_loop() {
        let mut cfg = config("");
        cfg.hertz = 2.0;
        let mut runtime = CortexRuntime::builder(cfg)
            .with_action(Arc::new(RecordingAction::new("rec")))
            .build();
        runtime.initialize().await.unwrap();

        runtime.handle().stop().await;
        runtime.run_for(Duration::from_secs(1)).await.unwrap();
        // Ticks at 0 s and 0.5 s only; a leftover wake-up would add a third.
        assert_eq!(runtime.metrics().loop_count, 2);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn emergency_queued_before_initialize_is_honoured() {
        let rec = Arc::new(RecordingAction::new("rec"));
        let mut runtime = CortexRuntime::builder(config("")).with_action(rec.clone()).build();
        runtime
            .bus()
            .publish_to(
                Topic::OperatorCommands,
                Event::new("test", EventPayload::EmergencyStop { reason: "early".into() }),
            )
            .unwrap();
        runtime.initialize().await.unwrap();

        let report = runtime.tick().await.unwrap();
        assert!(report.response.is_none());
        assert_eq!(rec.fail_safe_count(), 1);
        assert!(rec.received().is_empty());
        assert!(runtime.tick().await.is_err());
        runtime.stop().await;
    }

    fn battery_runtime(percent: f32, bus: EventBus, rec: Arc<RecordingAction>) -> CortexRuntime {
        let cfg = CortexConfig::from_json5(
            r#"{
                llm: { provider: "mock", mock_latency_ms: 0, response_mode: "echo" },
                agent_inputs: { G1State: {} },
            }"#,
        )
        .unwrap();
        CortexRuntime::builder(cfg)
            .with_session(Arc::new(SimSession::builder().with_battery(percent).build()))
            .with_bus(bus)
            .with_action(rec)
            .build()
    }

    fn battery_faults(alerts: &mut TopicReceiver) -> Vec<String> {
        alerts
            .drain()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::Fault { component, message } if component == "battery" => Some(message),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn low_battery_raises_one_fault() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let rec = Arc::new(RecordingAction::new("rec"));
        let mut runtime = battery_runtime(15.0, bus, rec.clone());
        runtime.initialize().await.unwrap();

        assert!(runtime.tick().await.unwrap().response.is_some());
        runtime.tick().await.unwrap();
        let faults = battery_faults(&mut alerts);
        assert_eq!(faults.len(), 1, "{faults:?}");
        assert!(faults[0].contains("low"));
        assert_eq!(rec.fail_safe_count(), 0);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn critical_battery_emergency_stops() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let rec = Arc::new(RecordingAction::new("rec"));
        let mut runtime = battery_runtime(8.0, bus, rec.clone());
        runtime.initialize().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), runtime.start())
            .await
            .expect("loop must end on a critical battery")
            .unwrap();

        assert_eq!(runtime.metrics().loop_count, 1);
        assert_eq!(rec.fail_safe_count(), 1);
        assert!(battery_faults(&mut alerts)[0].contains("critical"));
        assert!(runtime.tick().await.is_err());
        runtime.stop().await;
    }
}
