//! Emergency override
//!
//! `STOP` and `START` go straight to the emergency topic the moment they are
//! triggered. They never pass through the sampling loop or a timer, so a stop
//! request cannot wait behind a pending joystick tick. Handles are cheap to
//! clone and are given directly to every input surface (console, gamepad).

use crate::mqtt::publisher::{CommandPublisher, PublishOutcome};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmergencyDirective {
    Stop,
    Start,
}

impl EmergencyDirective {
    /// Literal wire payload.
    pub fn as_payload(&self) -> &'static str {
        match self {
            EmergencyDirective::Stop => "STOP",
            EmergencyDirective::Start => "START",
        }
    }
}

impl fmt::Display for EmergencyDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_payload())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown emergency directive '{0}'")]
pub struct UnknownDirective(pub String);

impl FromStr for EmergencyDirective {
    type Err = UnknownDirective;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STOP" => Ok(EmergencyDirective::Stop),
            "START" => Ok(EmergencyDirective::Start),
            other => Err(UnknownDirective(other.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmergencyOverride {
    publisher: CommandPublisher,
}

impl EmergencyOverride {
    pub fn new(publisher: CommandPublisher) -> Self {
        Self { publisher }
    }

    pub fn trigger(&self, directive: EmergencyDirective) -> PublishOutcome {
        match directive {
            EmergencyDirective::Stop => warn!("EMERGENCY STOP requested"),
            EmergencyDirective::Start => info!("Motor START requested"),
        }

        let outcome = self.publisher.send_emergency(directive);
        if outcome == PublishOutcome::Dropped {
            error!("Emergency {} could not be delivered", directive);
        }
        outcome
    }

    pub fn stop(&self) -> PublishOutcome {
        self.trigger(EmergencyDirective::Stop)
    }

    pub fn start(&self) -> PublishOutcome {
        self.trigger(EmergencyDirective::Start)
    }
}
