//! Runtime configuration – a JSON5 file plus `CORTEX_*` overrides.
//!
//! ```json5
//! {
//!   name: "g1_assistant",
//!   hertz: 2,
//!   system_prompt_base: "You are a friendly humanoid robot.",
//!   agent_inputs: {
//!     G1State: { priority: 10 },
//!     G1Vision: { priority: 5, timeout_ms: 300 },
//!   },
//!   agent_actions: {
//!     G1Speech: { default_volume: 80 },
//!     G1Arms: { gestures: { wave: 26 } },
//!   },
//!   llm: { provider: "ollama", model: "llama3", fallback_provider: "mock" },
//! }
//! ```
//!
//! `agent_inputs` / `agent_actions` are read in file order: that order is the
//! plugin registration order used for fusion tie-breaks and dispatch.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use cortex_hal::registry::{ActionKind, InputKind};
use cortex_hal::{LocomotionService, PluginSpec};
use cortex_perception::DEFAULT_BASELINE_PRIORITY;
use cortex_types::CortexError;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::history::DEFAULT_HISTORY_SIZE;
use crate::llm::{ProviderKind, ResponseMode};

/// Accepted range of `hertz`.
pub const HERTZ_RANGE: std::ops::RangeInclusive<f64> = 1.0..=100.0;

// ─────────────────────────────────────────────────────────────────────────────
// Top level
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Loop rate ceiling in ticks per second.
    #[serde(default = "default_hertz")]
    pub hertz: f64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt_base: String,
    /// Network interface facing the robot.
    #[serde(default = "default_ethernet")]
    pub unitree_ethernet: String,
    #[serde(default)]
    pub agent_inputs: PluginTable,
    #[serde(default)]
    pub agent_actions: PluginTable,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub fuser: FuserConfig,
    #[serde(default)]
    pub development: DevelopmentConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Default poll timeout of every input plugin.
    #[serde(default = "default_input_timeout_ms")]
    pub input_timeout_ms: u64,
    #[serde(default = "default_history_size")]
    pub command_history_size: usize,
    /// Action that receives LLM replies carrying no directive, as `{"text": …}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain_text_action: Option<String>,
    /// Walk the robot into an action's required FSM mode instead of failing.
    #[serde(default = "default_true")]
    pub auto_switch_mode: bool,
    #[serde(default)]
    pub locomotion_service: LocomotionService,
}

fn default_name() -> String {
    "g1_assistant".to_string()
}
fn default_hertz() -> f64 {
    10.0
}
fn default_system_prompt() -> String {
    "You are the cognitive core of a Unitree G1 humanoid robot. \
     Observe the sensor context and respond briefly."
        .to_string()
}
fn default_ethernet() -> String {
    "en0".to_string()
}
fn default_input_timeout_ms() -> u64 {
    1_000
}
fn default_history_size() -> usize {
    DEFAULT_HISTORY_SIZE
}
fn default_true() -> bool {
    true
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            hertz: default_hertz(),
            system_prompt_base: default_system_prompt(),
            unitree_ethernet: default_ethernet(),
            agent_inputs: PluginTable::default(),
            agent_actions: PluginTable::default(),
            llm: LlmConfig::default(),
            fuser: FuserConfig::default(),
            development: DevelopmentConfig::default(),
            safety: SafetyConfig::default(),
            input_timeout_ms: default_input_timeout_ms(),
            command_history_size: default_history_size(),
            plain_text_action: None,
            auto_switch_mode: true,
            locomotion_service: LocomotionService::default(),
        }
    }
}

impl CortexConfig {
    /// Read and parse `path`, then apply environment overrides.  The result
    /// is not validated; call [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CortexError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CortexError::Config(format!("failed to read {}: {e}", path.display())))?;
        let mut config = Self::from_json5(&raw)?;
        config.apply_env_overrides();
        debug!(path = %path.display(), name = %config.name, "configuration loaded");
        Ok(config)
    }

    /// Parse a JSON5 document.
    pub fn from_json5(raw: &str) -> Result<Self, CortexError> {
        json5::from_str(raw).map_err(|e| CortexError::Config(format!("invalid configuration: {e}")))
    }

    /// Apply overrides from the process environment.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `CORTEX_HERTZ` | `hertz` |
    /// | `CORTEX_LLM_PROVIDER` | `llm.provider` |
    /// | `CORTEX_LLM_MODEL` | `llm.model` |
    /// | `CORTEX_WEBSIM_PORT` | `development.websim_port` |
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Like [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// explicit variable lookup.  Unparsable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CORTEX_HERTZ") {
            match v.parse::<f64>() {
                Ok(hertz) => self.hertz = hertz,
                Err(_) => warn!(value = %v, "ignoring unparsable CORTEX_HERTZ"),
            }
        }
        if let Some(v) = lookup("CORTEX_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = lookup("CORTEX_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("CORTEX_WEBSIM_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.development.websim_port = port,
                Err(_) => warn!(value = %v, "ignoring unparsable CORTEX_WEBSIM_PORT"),
            }
        }
    }

    /// Check every constraint the runtime relies on.
    ///
    /// # Errors
    ///
    /// [`CortexError::Config`] describing the first violation, or
    /// [`CortexError::UnknownPlugin`] for a plugin kind the registry does not
    /// know.
    pub fn validate(&self) -> Result<(), CortexError> {
        self.validate_settings()?;
        if self.agent_inputs.enabled().next().is_none() {
            return Err(CortexError::Config("at least one input plugin must be enabled".into()));
        }
        if self.agent_actions.enabled().next().is_none() {
            return Err(CortexError::Config("at least one action plugin must be enabled".into()));
        }
        if let Some(target) = &self.plain_text_action
            && !self.agent_actions.enabled().any(|s| &s.name == target)
        {
            return Err(CortexError::Config(format!(
                "plain_text_action '{target}' is not an enabled action"
            )));
        }
        Ok(())
    }

    /// Everything [`validate`](Self::validate) checks except the plugin
    /// counts and the `plain_text_action` target, which depend on plugins
    /// the embedding program may register in code.
    pub fn validate_settings(&self) -> Result<(), CortexError> {
        if !HERTZ_RANGE.contains(&self.hertz) {
            return Err(CortexError::Config(format!(
                "hertz must be within 1..=100, got {}",
                self.hertz
            )));
        }
        if !(0.0..=1.0).contains(&self.llm.error_rate) {
            return Err(CortexError::Config(format!(
                "llm.error_rate must be within 0..=1, got {}",
                self.llm.error_rate
            )));
        }
        if self.input_timeout_ms == 0 {
            return Err(CortexError::Config("input_timeout_ms must be positive".into()));
        }
        if self.llm.timeout_ms == 0 {
            return Err(CortexError::Config("llm.timeout_ms must be positive".into()));
        }
        if !self.fuser.baseline_priority.is_finite() {
            return Err(CortexError::Config("fuser.baseline_priority must be finite".into()));
        }
        ProviderKind::from_str(&self.llm.provider)?;
        if let Some(fallback) = &self.llm.fallback_provider {
            ProviderKind::from_str(fallback)?;
        }

        for spec in self.agent_inputs.enabled() {
            InputKind::resolve(spec.kind_name())?;
        }
        for spec in self.agent_actions.enabled() {
            ActionKind::resolve(spec.kind_name())?;
        }
        let safety = &self.safety;
        if !(0.0..=100.0).contains(&safety.battery_critical_percent)
            || !(0.0..=100.0).contains(&safety.battery_warning_percent)
            || safety.battery_critical_percent > safety.battery_warning_percent
        {
            return Err(CortexError::Config(format!(
                "safety thresholds must satisfy 0 <= critical ({}) <= warning ({}) <= 100",
                safety.battery_critical_percent, safety.battery_warning_percent
            )));
        }
        if self.development.websim_enabled && self.development.websim_port == 0 {
            return Err(CortexError::Config("development.websim_port must be non-zero".into()));
        }
        Ok(())
    }

    /// Target tick period, `1 / hertz`.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.hertz.clamp(*HERTZ_RANGE.start(), *HERTZ_RANGE.end()))
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `llm` section.
///
/// Credentials never live in the file: `api_key_env` names the environment
/// variable holding the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `mock`, `ollama`, `openai` or `anthropic`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,
    /// Endpoint override for HTTP backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_mock_latency_ms")]
    pub mock_latency_ms: u64,
    /// Probability in `[0, 1]` that a mock call fails.
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default = "default_response_template")]
    pub response_template: String,
}

fn default_provider() -> String {
    "mock".to_string()
}
fn default_model() -> String {
    "mock-g1".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    256
}
fn default_llm_timeout_ms() -> u64 {
    10_000
}
fn default_mock_latency_ms() -> u64 {
    100
}
fn default_response_template() -> String {
    "Hello! I am the G1 and everything is working.".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            fallback_provider: None,
            base_url: None,
            api_key_env: None,
            timeout_ms: default_llm_timeout_ms(),
            mock_latency_ms: default_mock_latency_ms(),
            error_rate: 0.0,
            response_mode: ResponseMode::default(),
            response_template: default_response_template(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `fuser` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuserConfig {
    /// Priority of data whose plugin sets none.
    #[serde(default = "default_baseline_priority")]
    pub baseline_priority: f64,
}

fn default_baseline_priority() -> f64 {
    DEFAULT_BASELINE_PRIORITY
}

impl Default for FuserConfig {
    fn default() -> Self {
        Self {
            baseline_priority: default_baseline_priority(),
        }
    }
}

/// `safety` section: battery thresholds in percent.
///
/// At or below `battery_warning_percent` a fault is raised on the alert
/// topic; at or below `battery_critical_percent` the runtime emergency-stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_battery_warning")]
    pub battery_warning_percent: f64,
    #[serde(default = "default_battery_critical")]
    pub battery_critical_percent: f64,
}

fn default_battery_warning() -> f64 {
    20.0
}
fn default_battery_critical() -> f64 {
    10.0
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            battery_warning_percent: default_battery_warning(),
            battery_critical_percent: default_battery_critical(),
        }
    }
}

/// `development` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentConfig {
    #[serde(default)]
    pub debug_mode: bool,
    /// Serve the debug web interface.
    #[serde(default)]
    pub websim_enabled: bool,
    #[serde(default = "default_websim_port")]
    pub websim_port: u16,
    #[serde(default = "default_websim_host")]
    pub websim_host: String,
}

fn default_websim_port() -> u16 {
    8080
}
fn default_websim_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for DevelopmentConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            websim_enabled: false,
            websim_port: default_websim_port(),
            websim_host: default_websim_host(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordered plugin table
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered `name → PluginSpec` mapping.
///
/// Deserializes from a map, keeping entry order and copying each key into
/// [`PluginSpec::name`].  Duplicate keys are rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginTable(Vec<PluginSpec>);

impl PluginTable {
    pub fn new(specs: Vec<PluginSpec>) -> Self {
        Self(specs)
    }

    pub fn specs(&self) -> &[PluginSpec] {
        &self.0
    }

    pub fn enabled(&self) -> impl Iterator<Item = &PluginSpec> {
        self.0.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&PluginSpec> {
        self.0.iter().find(|s| s.name == name)
    }

    pub fn push(&mut self, spec: PluginSpec) {
        self.0.push(spec);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PluginSpec> for PluginTable {
    fn from_iter<I: IntoIterator<Item = PluginSpec>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for PluginTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|s| (&s.name, s)))
    }
}

impl<'de> Deserialize<'de> for PluginTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = PluginTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of plugin name to plugin configuration")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<PluginTable, A::Error> {
                let mut specs: Vec<PluginSpec> = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(name) = map.next_key::<String>()? {
                    if specs.iter().any(|s| s.name == name) {
                        return Err(serde::de::Error::custom(format!("duplicate plugin '{name}'")));
                    }
                    let mut spec: PluginSpec = map.next_value()?;
                    spec.name = name;
                    specs.push(spec);
                }
                Ok(PluginTable(specs))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_types::RobotMode;
    use std::io::Write;

    const SAMPLE: &str = r#"
    // comments and trailing commas are fine
    {
      name: "lab_g1",
      hertz: 2,
      unitree_ethernet: "eth0",
      agent_inputs: {
        G1Vision: { priority: 5 },
        G1State: { priority: 10, timeout_ms: 250 },
        G1GPS: { enabled: false },
      },
      agent_actions: {
        G1Speech: { default_volume: 70 },
        G1Arms: { required_mode: "main_operation_control", gestures: { wave: 26 } },
      },
      llm: { provider: "ollama", model: "llama3", fallback_provider: "mock", error_rate: 0.25 },
      fuser: { baseline_priority: 2.5 },
      development: { websim_enabled: true, websim_port: 9000 },
      plain_text_action: "G1Speech",
      locomotion_service: "loco",
    }
    "#;

    #[test]
    fn parses_json5_with_file_order() {
        let config = CortexConfig::from_json5(SAMPLE).expect("valid config");
        assert_eq!(config.name, "lab_g1");
        assert_eq!(config.hertz, 2.0);

        let inputs: Vec<_> = config.agent_inputs.specs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(inputs, ["G1Vision", "G1State", "G1GPS"], "file order is registration order");
        assert_eq!(config.agent_inputs.get("G1State").unwrap().timeout_ms, Some(250));
        assert!(!config.agent_inputs.get("G1GPS").unwrap().enabled);

        let arms = config.agent_actions.get("G1Arms").unwrap();
        assert_eq!(arms.required_mode, Some(RobotMode::MainOperationControl));
        assert!(arms.options.contains_key("gestures"));

        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.fallback_provider.as_deref(), Some("mock"));
        assert_eq!(config.fuser.baseline_priority, 2.5);
        assert_eq!(config.development.websim_port, 9000);
        assert_eq!(config.locomotion_service, LocomotionService::Loco);
        config.validate().expect("sample validates");
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config = CortexConfig::from_json5("{}").unwrap();
        assert_eq!(config.hertz, 10.0);
        assert_eq!(config.command_history_size, 100);
        assert_eq!(config.llm.provider, "mock");
        assert!(config.auto_switch_mode);
        assert!(!config.development.websim_enabled);
        assert_eq!(config.period(), Duration::from_millis(100));
        assert_eq!(config.safety, SafetyConfig::default());
    }

    #[test]
    fn validate_checks_battery_thresholds() {
        let mut config = CortexConfig::from_json5(r#"{ safety: { battery_warning_percent: 30 } }"#).unwrap();
        assert_eq!(config.safety.battery_warning_percent, 30.0);
        assert_eq!(config.safety.battery_critical_percent, 10.0);
        assert!(config.validate_settings().is_ok());

        config.safety.battery_critical_percent = 40.0;
        assert!(matches!(config.validate_settings(), Err(CortexError::Config(_))));
        config.safety.battery_critical_percent = -1.0;
        assert!(config.validate_settings().is_err());
    }

    #[test]
    fn duplicate_plugin_names_are_rejected() {
        let err = CortexConfig::from_json5(r#"{ agent_inputs: { a: {}, a: {} } }"#).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{err}");
    }

    #[test]
    fn validate_rejects_out_of_range_hertz() {
        let mut config = CortexConfig::from_json5(SAMPLE).unwrap();
        config.hertz = 0.5;
        assert!(matches!(config.validate(), Err(CortexError::Config(_))));
        config.hertz = 101.0;
        assert!(config.validate().is_err());
        config.hertz = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_error_rate_and_provider() {
        let mut config = CortexConfig::from_json5(SAMPLE).unwrap();
        config.llm.error_rate = 1.5;
        assert!(config.validate().is_err());

        config.llm.error_rate = 0.0;
        config.llm.fallback_provider = Some("gemini".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_plugin_kind() {
        let config = CortexConfig::from_json5(
            r#"{ agent_inputs: { Lidar: {} }, agent_actions: { G1Speech: {} } }"#,
        )
        .unwrap();
        assert_eq!(config.validate(), Err(CortexError::UnknownPlugin("Lidar".into())));
    }

    #[test]
    fn validate_requires_enabled_input_and_action() {
        let config = CortexConfig::from_json5(
            r#"{ agent_inputs: { G1State: { enabled: false } }, agent_actions: { G1Speech: {} } }"#,
        )
        .unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("input"));
    }

    #[test]
    fn validate_checks_plain_text_action() {
        let mut config = CortexConfig::from_json5(SAMPLE).unwrap();
        config.plain_text_action = Some("G1Emotion".into());
        assert!(config.validate().unwrap_err().to_string().contains("plain_text_action"));
    }

    #[test]
    fn overrides_replace_fields_and_ignore_garbage() {
        let mut config = CortexConfig::default();
        config.apply_overrides(|key| match key {
            "CORTEX_HERTZ" => Some("25".into()),
            "CORTEX_LLM_PROVIDER" => Some("openai".into()),
            "CORTEX_LLM_MODEL" => Some("gpt-4o-mini".into()),
            "CORTEX_WEBSIM_PORT" => Some("not-a-port".into()),
            _ => None,
        });
        assert_eq!(config.hertz, 25.0);
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.development.websim_port, 8080, "garbage is ignored");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = CortexConfig::load(file.path()).expect("loads");
        assert_eq!(config.agent_actions.len(), 2);

        let missing = CortexConfig::load("/definitely/not/here.json5");
        assert!(matches!(missing, Err(CortexError::Config(_))));
    }

    #[test]
    fn plugin_table_serializes_as_map() {
        let config = CortexConfig::from_json5(SAMPLE).unwrap();
        let value = serde_json::to_value(&config.agent_inputs).unwrap();
        assert_eq!(value["G1State"]["priority"], 10.0);
        assert_eq!(value["G1GPS"]["enabled"], false);
    }
}
