//! Session state machine.
//!
//! ```text
//! Config ──begin_launch──▶ Launching ──mark_ready──▶ Ready
//!   ▲                          │                       │
//!   └────────mark_config───────┴───────────────────────┘
//!
//! any live state ──close──▶ NoHandle (terminal)
//! ```
//!
//! `Launching` is owned by the launch sequence; the handle core only acts
//! on `Config`, `Ready` and `NoHandle`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, appliance not started. Configuration setters apply here.
    Config,
    /// The launch sequence is starting the appliance.
    Launching,
    /// The appliance is up and accepting calls.
    Ready,
    /// Closed. Every resource has been released.
    NoHandle,
}

impl SessionState {
    /// Anything but `NoHandle`.
    pub fn is_live(self) -> bool {
        self != SessionState::NoHandle
    }

    pub fn can_launch(self) -> bool {
        self == SessionState::Config
    }

    /// Appliance calls are only legal once the appliance is up.
    pub fn can_invoke(self) -> bool {
        self == SessionState::Ready
    }

    /// Whether the launch/protocol layers may move from `self` to `next`.
    ///
    /// `NoHandle` is never a legal target here; only close reaches it.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Config, Launching) | (Launching, Ready) | (Launching, Config) | (Ready, Config)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Config => "config",
            SessionState::Launching => "launching",
            SessionState::Ready => "ready",
            SessionState::NoHandle => "closed",
        };
        f.write_str(name)
    }
}
