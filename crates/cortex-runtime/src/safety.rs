//! Battery safety check run on every fused context.
//!
//! Any datum whose payload carries a numeric `battery_percent` (the robot
//! state input publishes one) is a battery reading; the lowest reading of the
//! tick is compared against the [`SafetyConfig`] thresholds.  An alert is
//! produced only when the level gets worse, so a robot sitting at 15 % raises
//! one warning, not one per tick.

use cortex_types::FusedContext;
use tracing::{error, info, warn};

use crate::config::SafetyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BatteryLevel {
    Normal,
    Warning,
    Critical,
}

/// A worsening of the battery level.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryAlert {
    pub level: BatteryLevel,
    pub percent: f64,
}

impl BatteryAlert {
    pub fn message(&self) -> String {
        match self.level {
            BatteryLevel::Critical => format!("battery critical at {:.1}%", self.percent),
            _ => format!("battery low at {:.1}%", self.percent),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatteryGuard {
    warning: f64,
    critical: f64,
    level: BatteryLevel,
}

impl BatteryGuard {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            warning: config.battery_warning_percent,
            critical: config.battery_critical_percent,
            level: BatteryLevel::Normal,
        }
    }

    pub fn level(&self) -> BatteryLevel {
        self.level
    }

    fn classify(&self, percent: f64) -> BatteryLevel {
        if percent <= self.critical {
            BatteryLevel::Critical
        } else if percent <= self.warning {
            BatteryLevel::Warning
        } else {
            BatteryLevel::Normal
        }
    }

    /// Lowest finite `battery_percent` in `context`.
    pub fn reading(context: &FusedContext) -> Option<f64> {
        context
            .ordered_data
            .iter()
            .filter_map(|d| d.payload.get("battery_percent")?.as_f64())
            .filter(|p| p.is_finite())
            .reduce(f64::min)
    }

    /// Update the level from `context`; `Some` when it got worse.
    ///
    /// A tick without a reading leaves the level unchanged.
    pub fn assess(&mut self, context: &FusedContext) -> Option<BatteryAlert> {
        let percent = Self::reading(context)?;
        let level = self.classify(percent);
        let previous = std::mem::replace(&mut self.level, level);
        if level <= previous {
            if level < previous {
                info!(percent, ?level, "battery level recovered");
            }
            return None;
        }
        let alert = BatteryAlert { level, percent };
        match level {
            BatteryLevel::Critical => error!(percent, "{}", alert.message()),
            _ => warn!(percent, "{}", alert.message()),
        }
        Some(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_types::InputDatum;
    use serde_json::json;

    fn context(readings: &[serde_json::Value]) -> FusedContext {
        FusedContext {
            ordered_data: readings.iter().map(|p| InputDatum::new("G1State", p.clone())).collect(),
            ..FusedContext::default()
        }
    }

    fn guard() -> BatteryGuard {
        BatteryGuard::new(&SafetyConfig::default())
    }

    #[test]
    fn alerts_only_when_the_level_worsens() {
        let mut guard = guard();
        assert_eq!(guard.assess(&context(&[json!({"battery_percent": 80.0})])), None);

        let warning = guard.assess(&context(&[json!({"battery_percent": 18.0})])).unwrap();
        assert_eq!(warning.level, BatteryLevel::Warning);
        assert_eq!(guard.assess(&context(&[json!({"battery_percent": 17.5})])), None);

        let critical = guard.assess(&context(&[json!({"battery_percent": 9.0})])).unwrap();
        assert_eq!(critical.level, BatteryLevel::Critical);
        assert!(critical.message().contains("critical"));
    }

    #[test]
    fn recovery_rearms_the_warning() {
        let mut guard = guard();
        assert!(guard.assess(&context(&[json!({"battery_percent": 15})])).is_some());
        assert!(guard.assess(&context(&[json!({"battery_percent": 60})])).is_none());
        assert_eq!(guard.level(), BatteryLevel::Normal);
        assert!(guard.assess(&context(&[json!({"battery_percent": 15})])).is_some());
    }

    #[test]
    fn lowest_reading_wins_and_other_data_is_ignored() {
        let ctx = context(&[
            json!({"battery_percent": 70}),
            json!({"temp": 20}),
            json!({"battery_percent": "low"}),
            json!({"battery_percent": 9.5}),
        ]);
        assert_eq!(BatteryGuard::reading(&ctx), Some(9.5));
        assert_eq!(BatteryGuard::reading(&context(&[json!({"temp": 20})])), None);
    }

    #[test]
    fn no_reading_keeps_the_level() {
        let mut guard = guard();
        guard.assess(&context(&[json!({"battery_percent": 15})]));
        assert!(guard.assess(&FusedContext::default()).is_none());
        assert_eq!(guard.level(), BatteryLevel::Warning);
    }
}
