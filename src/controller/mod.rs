//! Gamepad input source
//!
//! 1. [`event_collector`] - raw gilrs events on a dedicated thread
//! 2. [`event_processor`] - stick sessions and button actions
//! 3. [`controller_handle`] - settings and lifecycle
//!
//! ```text
//! Gamepad ──► Collector ──► Processor ──► DriveRequest (start/move/end, test toggle)
//!             (thread)      (task)    └─► EmergencyOverride (B = STOP, Start = START)
//! ```

pub mod controller_handle;
pub mod event_collector;
pub mod event_processor;

pub use controller_handle::{ControllerHandle, InputError, InputSettings};
