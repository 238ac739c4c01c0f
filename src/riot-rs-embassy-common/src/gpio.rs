//! Provides architecture-agnostic GPIO-related types.

pub mod usage;

/// Digital level of an input or output.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    /// Digital low level.
    Low,
    /// Digital high level.
    High,
}

impl From<Level> for bool {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => false,
            Level::High => true,
        }
    }
}

impl From<bool> for Level {
    fn from(boolean: bool) -> Self {
        if boolean {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<embedded_hal::digital::PinState> for Level {
    fn from(pin_state: embedded_hal::digital::PinState) -> Self {
        bool::from(pin_state).into()
    }
}

impl From<Level> for embedded_hal::digital::PinState {
    fn from(level: Level) -> Self {
        bool::from(level).into()
    }
}
