//! Priority-based input fusion.
//!
//! Merges one tick's worth of [`InputDatum`] into a single [`FusedContext`]:
//!
//! 1. **Deduplicate** – at most one datum per source.  A later datum from the
//!    same source replaces the earlier one but keeps the source's position.
//! 2. **Rank** – stable sort by descending `priority_hint`; data without a
//!    hint (or with a non-finite one) uses the baseline priority.  Equal
//!    priorities keep registration order, so identical configurations always
//!    fuse in the same order.
//! 3. **Score** – `confidence = reporting sources / registered sources`.
//!
//! There is no weighting or decay: priority is the static configuration
//! value and nothing carries over between ticks.
//!
//! # Example
//!
//! ```rust
//! use cortex_perception::fusion::{Fuser, PriorityFuser};
//! use cortex_types::InputDatum;
//! use serde_json::json;
//!
//! let fuser = PriorityFuser::default();
//! let context = fuser.fuse(
//!     vec![
//!         InputDatum::new("camera", json!({})).with_priority(Some(5.0)),
//!         InputDatum::new("voice", json!({})).with_priority(Some(10.0)),
//!     ],
//!     2,
//! );
//!
//! assert_eq!(context.ordered_data[0].source_name, "voice");
//! assert_eq!(context.confidence, 1.0);
//! ```

use chrono::Utc;
use cortex_types::{FusedContext, InputDatum};
use tracing::trace;

/// Priority assumed for data that carries no hint.
pub const DEFAULT_BASELINE_PRIORITY: f64 = 1.0;

/// A strategy that turns one tick's input snapshot into a [`FusedContext`].
pub trait Fuser: Send + Sync {
    /// `data` must be in source registration order; `registered_sources` is
    /// the number of enabled input plugins.
    fn fuse(&self, data: Vec<InputDatum>, registered_sources: usize) -> FusedContext;
}

/// Static-priority fuser.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFuser {
    baseline: f64,
}

impl PriorityFuser {
    /// Create a fuser whose un-hinted data ranks at `baseline`.  A
    /// non-finite baseline falls back to [`DEFAULT_BASELINE_PRIORITY`].
    pub fn new(baseline: f64) -> Self {
        Self {
            baseline: if baseline.is_finite() {
                baseline
            } else {
                DEFAULT_BASELINE_PRIORITY
            },
        }
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Effective priority of one datum.
    pub fn priority_of(&self, datum: &InputDatum) -> f64 {
        datum
            .priority_hint
            .filter(|p| p.is_finite())
            .unwrap_or(self.baseline)
    }
}

impl Default for PriorityFuser {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_PRIORITY)
    }
}

impl Fuser for PriorityFuser {
    fn fuse(&self, data: Vec<InputDatum>, registered_sources: usize) -> FusedContext {
        let mut unique: Vec<InputDatum> = Vec::with_capacity(data.len());
        for datum in data {
            match unique.iter_mut().find(|d| d.source_name == datum.source_name) {
                Some(slot) => *slot = datum,
                None => unique.push(datum),
            }
        }

        // `sort_by` is stable: equal priorities keep registration order.
        unique.sort_by(|a, b| self.priority_of(b).total_cmp(&self.priority_of(a)));

        let confidence = if registered_sources == 0 {
            0.0
        } else {
            (unique.len() as f64 / registered_sources as f64).min(1.0)
        };

        trace!(sources = unique.len(), registered_sources, confidence, "fused inputs");

        FusedContext {
            ordered_data: unique,
            confidence,
            fusion_timestamp: Utc::now(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn datum(source: &str, priority: Option<f64>) -> InputDatum {
        InputDatum::new(source, json!({ "from": source })).with_priority(priority)
    }

    fn order(ctx: &FusedContext) -> Vec<&str> {
        ctx.sources().collect()
    }

    #[test]
    fn higher_priority_comes_first() {
        let fuser = PriorityFuser::default();
        let ctx = fuser.fuse(vec![datum("low", Some(5.0)), datum("high", Some(10.0))], 2);
        assert_eq!(ctx.ordered_data[0].source_name, "high");
    }

    #[test]
    fn ties_keep_registration_order() {
        let fuser = PriorityFuser::default();
        let ctx = fuser.fuse(
            vec![
                datum("a", Some(2.0)),
                datum("b", Some(7.0)),
                datum("c", Some(2.0)),
                datum("d", Some(7.0)),
            ],
            4,
        );
        assert_eq!(order(&ctx), ["b", "d", "a", "c"]);
    }

    #[test]
    fn ordering_is_non_increasing_and_repeatable() {
        let fuser = PriorityFuser::new(3.0);
        let input = || {
            vec![
                datum("a", None),
                datum("b", Some(1.0)),
                datum("c", Some(9.0)),
                datum("d", None),
                datum("e", Some(3.0)),
            ]
        };
        let first = fuser.fuse(input(), 5);
        let second = fuser.fuse(input(), 5);

        let priorities: Vec<f64> = first.ordered_data.iter().map(|d| fuser.priority_of(d)).collect();
        assert!(priorities.windows(2).all(|w| w[0] >= w[1]), "{priorities:?}");
        assert_eq!(order(&first), order(&second));
        // a, d, e all rank 3.0 and keep their relative order.
        assert_eq!(order(&first), ["c", "a", "d", "e", "b"]);
    }

    #[test]
    fn missing_hint_uses_baseline() {
        let fuser = PriorityFuser::new(5.0);
        let ctx = fuser.fuse(vec![datum("hinted", Some(4.0)), datum("plain", None)], 2);
        assert_eq!(order(&ctx), ["plain", "hinted"]);
    }

    #[test]
    fn non_finite_hint_uses_baseline() {
        let fuser = PriorityFuser::default();
        let ctx = fuser.fuse(vec![datum("nan", Some(f64::NAN)), datum("two", Some(2.0))], 2);
        assert_eq!(order(&ctx), ["two", "nan"]);
        assert_eq!(PriorityFuser::new(f64::INFINITY).baseline(), DEFAULT_BASELINE_PRIORITY);
    }

    #[test]
    fn duplicate_source_last_wins_in_first_position() {
        let fuser = PriorityFuser::default();
        let mut newer = datum("cam", None);
        newer.payload = json!({ "frame": 2 });
        let ctx = fuser.fuse(vec![datum("cam", None), datum("gps", None), newer], 2);

        assert_eq!(ctx.ordered_data.len(), 2, "one datum per source");
        assert_eq!(order(&ctx), ["cam", "gps"]);
        assert_eq!(ctx.ordered_data[0].payload["frame"], 2);
    }

    #[test]
    fn confidence_is_fraction_of_registered_sources() {
        let fuser = PriorityFuser::default();
        let ctx = fuser.fuse(vec![datum("a", None)], 4);
        assert!((ctx.confidence - 0.25).abs() < 1e-9);

        let empty = fuser.fuse(Vec::new(), 3);
        assert!(empty.is_empty());
        assert_eq!(empty.confidence, 0.0);
    }

    #[test]
    fn confidence_with_no_registered_sources_is_zero() {
        let fuser = PriorityFuser::default();
        assert_eq!(fuser.fuse(Vec::new(), 0).confidence, 0.0);
        // More reporters than registered (should not happen) is clamped.
        assert_eq!(fuser.fuse(vec![datum("a", None), datum("b", None)], 1).confidence, 1.0);
    }

    #[test]
    fn output_never_exceeds_source_count() {
        let fuser = PriorityFuser::default();
        let data: Vec<_> = (0..20).map(|i| datum(["x", "y", "z"][i % 3], None)).collect();
        let ctx = fuser.fuse(data, 3);
        assert!(ctx.ordered_data.len() <= 3);
    }
}
