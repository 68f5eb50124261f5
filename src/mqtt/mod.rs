//! # MQTT link
//!
//! Everything that touches the broker lives here.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - broker settings and topic names
//! ├── mqtt_handler.rs     - connection state machine and event loop
//! ├── message_manager.rs  - inbound routing and status display
//! └── publisher.rs        - connection-gated outbound commands
//! ```
//!
//! The handler is the single writer of the connection state. Publishers only
//! read it, right before each send, and drop the message when the link is
//! down. Outbound messages use QoS 0; the state subscription uses QoS 1.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod publisher;
