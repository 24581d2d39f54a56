//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Runtime status snapshot published after every tick |
//! | [`Topic::ActionResults`] | One [`ActionResult`][cortex_types::ActionResult] per dispatched command |
//! | [`Topic::CognitiveStream`] | Raw LLM output |
//! | [`Topic::OperatorCommands`] | Manual commands and emergency stops from the debug interface |
//! | [`Topic::SystemAlerts`] | Faults worth surfacing to an operator |
//!
//! Every event published to a topic is mirrored onto the global channel, so
//! [`EventBus::subscribe`] is a firehose of everything.

use cortex_types::{CortexError, Event};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    ActionResults,
    CognitiveStream,
    OperatorCommands,
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    global: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
    action_results: broadcast::Sender<Event>,
    cognitive_stream: broadcast::Sender<Event>,
    operator_commands: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (action_results, _) = broadcast::channel(capacity);
        let (cognitive_stream, _) = broadcast::channel(capacity);
        let (operator_commands, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            global,
            telemetry,
            action_results,
            cognitive_stream,
            operator_commands,
            system_alerts,
        }
    }

    /// Publish `event` to `topic` and mirror it onto the global channel.
    ///
    /// Returns the total number of receivers handed the event.  Returns
    /// [`CortexError::Channel`] when nobody is listening anywhere; callers
    /// that publish opportunistically simply ignore that case.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, CortexError> {
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let on_global = self.global.send(event).unwrap_or(0);
        match on_topic + on_global {
            0 => Err(CortexError::Channel(format!("no subscribers for topic {topic:?}"))),
            n => Ok(n),
        }
    }

    /// Subscribe to a single [`Topic`].
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event published on any topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.global.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::ActionResults => &self.action_results,
            Topic::CognitiveStream => &self.cognitive_stream,
            Topic::OperatorCommands => &self.operator_commands,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic, skipping over lag.
    ///
    /// Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "topic receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take every event already queued without waiting.
    ///
    /// Used by the tick loop to pick up operator commands between ticks.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "topic receiver lagged while draining");
                }
                Err(_) => break,
            }
        }
        events
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
