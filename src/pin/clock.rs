//! Pin clock lifecycle.
//!
//! `Clock` is a value type: each operation returns the next clock or an
//! error, and the owning pin stores the result.

use std::fmt;

use crate::error::{Error, Result};

/// Lifecycle of a pin clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClockState {
    /// No clock.
    #[default]
    Disabled,
    /// Parameters set, not running.
    Armed,
    /// Toggling.
    Running,
    /// Halted, keeping its parameters.
    Paused,
}

impl fmt::Display for ClockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Frequency parameters of a pin clock, in hertz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockParams {
    /// The frequency to aim for.
    pub freq_target: u64,
    /// Accepted deviation from the target.
    pub freq_range: u64,
}

impl ClockParams {
    /// Parameters with the given target and range.
    #[must_use]
    pub const fn new(freq_target: u64, freq_range: u64) -> Self {
        Self {
            freq_target,
            freq_range,
        }
    }
}

/// Clock state and the last parameters supplied. Transitions are pure: each
/// returns the next clock and leaves `self` untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Clock {
    pub(crate) state: ClockState,
    pub(crate) params: Option<ClockParams>,
}

impl Clock {
    pub(crate) fn enable(self, pin: &str, params: ClockParams) -> Result<Self> {
        match self.state {
            ClockState::Disabled | ClockState::Armed => Ok(Self {
                state: ClockState::Armed,
                params: Some(params),
            }),
            state => Err(invalid(pin, state, "enable")),
        }
    }

    /// Starting a running clock with new parameters restarts it; without
    /// parameters it keeps running unchanged.
    pub(crate) fn start(self, pin: &str, params: Option<ClockParams>) -> Result<Self> {
        match (self.state, params) {
            (ClockState::Running, None) => Ok(self),
            (ClockState::Running, Some(_)) => {
                tracing::debug!(pin, "restarting running clock with new parameters");
                self.stop().start(pin, params)
            }
            _ => {
                let params = params
                    .or(self.params)
                    .ok_or_else(|| Error::MissingParameters {
                        pin: pin.to_string(),
                    })?;
                Ok(Self {
                    state: ClockState::Running,
                    params: Some(params),
                })
            }
        }
    }

    pub(crate) fn pause(self, pin: &str) -> Result<Self> {
        match self.state {
            ClockState::Running => Ok(Self {
                state: ClockState::Paused,
                ..self
            }),
            state => Err(invalid(pin, state, "pause")),
        }
    }

    pub(crate) fn resume(self, pin: &str, params: Option<ClockParams>) -> Result<Self> {
        match self.state {
            ClockState::Paused => Ok(Self {
                state: ClockState::Running,
                params: params.or(self.params),
            }),
            state => Err(invalid(pin, state, "resume")),
        }
    }

    /// Stopping keeps the parameters for a later start.
    pub(crate) const fn stop(self) -> Self {
        Self {
            state: ClockState::Disabled,
            params: self.params,
        }
    }
}

fn invalid(pin: &str, state: ClockState, operation: &'static str) -> Error {
    Error::InvalidClockTransition {
        pin: pin.to_string(),
        state,
        operation,
    }
}
