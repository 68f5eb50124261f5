//! Drive command pipeline
//!
//! Turns operator input into wheel commands:
//!
//! ```text
//! Input source ──► SamplingLoop ──► mix() ──► CommandPublisher ──► broker
//!                  (latest value,            (connection gated)
//!                   fixed cadence)
//!
//! Console ───────► PeriodicTestEmitter ─────► CommandPublisher
//! Console/Gamepad ► EmergencyOverride ──────► CommandPublisher
//! ```
//!
//! - [`mixer`] - pure differential-drive arithmetic
//! - [`sampling`] - input sessions and the sampling ticker
//! - [`test_emitter`] - fixed-interval bench test publisher
//! - [`emergency`] - immediate STOP / START
//! - [`settings`] - live operator settings
//! - [`ticker`] - independently cancellable periodic tasks
//! - [`pipeline`] - the task that owns sampling and test emission

pub mod emergency;
pub mod mixer;
pub mod pipeline;
pub mod sampling;
pub mod settings;
pub mod test_emitter;
pub mod ticker;
