//! `cortex-perception` – merges what the robot senses into one ranked view.
//!
//! # Modules
//!
//! - [`fusion`] – [`PriorityFuser`][fusion::PriorityFuser]: deterministic,
//!   static-priority merge of one tick's input snapshot into a
//!   [`FusedContext`][cortex_types::FusedContext] for the LLM.

pub mod fusion;

pub use fusion::{DEFAULT_BASELINE_PRIORITY, Fuser, PriorityFuser};
