//! `cortex-middleware` – the nervous system between the tick loop and its
//! observers.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.  The runtime publishes status, LLM output
//!   and action results; the debug web interface publishes operator commands.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
