//! `cortex-runtime` – the cognitive loop of the G1 cortex.
//!
//! # Modules
//!
//! - [`cortex`] – [`CortexRuntime`]: initializes every component in
//!   dependency order and runs the fixed-rate collect → fuse → LLM →
//!   dispatch loop.  [`RuntimeHandle`] stops it (or emergency-stops it) from
//!   other tasks.
//! - [`input_orchestrator`] – [`InputOrchestrator`]: concurrent, per-plugin
//!   timed polling of the input plugins.
//! - [`action_orchestrator`] – [`ActionOrchestrator`]: parses LLM replies
//!   into directives and dispatches them sequentially; owns the emergency
//!   flag.
//! - [`directive`] – the `{"action", "params"}` scanner and the usage guide
//!   appended to the system prompt.
//! - [`llm`] – [`LlmProvider`] with a fallback chain over mock, Ollama,
//!   OpenAI and Anthropic backends.
//! - [`config`] – [`CortexConfig`]: JSON5 configuration with `CORTEX_*`
//!   environment overrides.
//! - [`history`] – [`CommandHistory`]: bounded ring of recent action results.
//! - [`safety`] – [`BatteryGuard`]: raises faults on low battery and
//!   emergency-stops at the critical level.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional
//!   OTLP export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod action_orchestrator;
pub mod config;
pub mod cortex;
pub mod directive;
pub mod history;
pub mod input_orchestrator;
pub mod llm;
pub mod safety;
pub mod telemetry;

pub use action_orchestrator::ActionOrchestrator;
pub use config::{CortexConfig, DevelopmentConfig, FuserConfig, LlmConfig, PluginTable, SafetyConfig};
pub use cortex::{CortexRuntime, RuntimeBuilder, RuntimeHandle, TickReport};
pub use directive::{DirectiveScan, parse_directives};
pub use history::CommandHistory;
pub use input_orchestrator::{InputOrchestrator, InputSnapshot};
pub use llm::{LlmError, LlmProvider, ProviderKind, ResponseMode};
pub use safety::{BatteryAlert, BatteryGuard, BatteryLevel};
pub use telemetry::{TracerProviderGuard, init_tracing};
