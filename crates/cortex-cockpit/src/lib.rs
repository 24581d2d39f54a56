//! `cortex-cockpit` – optional debug web interface for a running runtime.
//!
//! A single TCP listener serves:
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /` | Embedded HTML page |
//! | `GET /api/status` | Latest runtime status snapshot |
//! | `GET /api/history` | Recent action results, oldest first |
//! | `POST /api/command` | Queue a manual `{"action", "params"}` command (rate limited) |
//! | `POST /api/emergency` | Request an emergency stop |
//! | `GET /ws` | WebSocket streaming every bus event; accepts `command`, `emergency_stop`, `ping` |
//!
//! The cockpit never touches the runtime directly: it reads the status and
//! action results the runtime publishes on the [`EventBus`] and publishes
//! operator requests on [`Topic::OperatorCommands`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use cortex_middleware::EventBus;
//! use cortex_cockpit::CockpitServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::default();
//!     CockpitServer::new(bus.clone())
//!         .with_port(8080)
//!         .run()
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```
//!
//! [`EventBus`]: cortex_middleware::EventBus
//! [`Topic::OperatorCommands`]: cortex_middleware::Topic::OperatorCommands

pub mod server;

pub use server::{BoundCockpit, CockpitServer, DEFAULT_COMMANDS_PER_SECOND, DEFAULT_PORT};
