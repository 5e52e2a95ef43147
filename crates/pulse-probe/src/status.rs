//! Health status values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which health signal a probe or transport carries.
///
/// Both flavors share [`Status`], but "up" means different things:
/// a liveness probe that is down asks to be restarted, a readiness probe
/// that is down asks to stop receiving traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Liveness,
    Readiness,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Liveness => f.write_str("liveness"),
            Signal::Readiness => f.write_str("readiness"),
        }
    }
}

/// Current health of one signal. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub up: bool,
    pub message: String,
}

impl Status {
    pub fn up(message: impl Into<String>) -> Self {
        Self {
            up: true,
            message: message.into(),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            up: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.up { "up" } else { "down" };
        write!(f, "{state}: {}", self.message)
    }
}
