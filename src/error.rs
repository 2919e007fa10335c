//! Arbiter error types
//!
//! `Busy` is the only protocol error. Everything else is either a caller
//! precondition violation or a collaborator failure passed through as is.

use core::fmt;

use thiserror::Error;

use crate::backend::{BackendError, DeviceRole};
use crate::types::{ChannelId, ControlWord, Name, SubChannel};

/// Arbiter operation result
pub type Result<T> = core::result::Result<T, ArbiterError>;

/// Exclusive mode that caused a request to be refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Blocker {
    /// Processed/input mode is engaged
    ProcessedInput,
    /// A stream buffer owns the DMA path
    StreamBuffer,
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessedInput => f.write_str("processed input engaged"),
            Self::StreamBuffer => f.write_str("stream buffer open"),
        }
    }
}

/// Failure of an arbiter operation
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArbiterError {
    /// Request conflicts with an active exclusive mode; nothing changed
    #[error("{channel} busy: {blocker}")]
    Busy {
        /// First conflicting channel
        channel: ChannelId,
        /// Mode holding the channel
        blocker: Blocker,
    },
    /// Channel id outside the configured range
    #[error("{0} is not configured")]
    UnknownChannel(ChannelId),
    /// Group operation on an empty channel set
    #[error("empty channel set")]
    EmptyChannelSet,
    /// Channel discovery failed
    #[error("channel {name} not found on {device}")]
    ChannelNotFound {
        /// Device searched
        device: DeviceRole,
        /// Channel name
        name: Name,
    },
    /// Device register disagrees with the arbiter's state
    #[error("{channel}/{sub:?} control register reads {observed:#x}, expected {expected}")]
    RegisterMismatch {
        /// Channel pair
        channel: ChannelId,
        /// Sub-channel read
        sub: SubChannel,
        /// Value derived from the channel flags
        expected: ControlWord,
        /// Value read from the device
        observed: u32,
    },
    /// Collaborator failure, state untouched
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ArbiterError {
    /// Check if this is a mode conflict
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ArbiterError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Busy { channel, .. } => defmt::write!(f, "Busy({})", channel),
            Self::UnknownChannel(id) => defmt::write!(f, "UnknownChannel({})", id),
            Self::EmptyChannelSet => defmt::write!(f, "EmptyChannelSet"),
            Self::ChannelNotFound { name, .. } => {
                defmt::write!(f, "ChannelNotFound({=str})", name.as_str());
            }
            Self::RegisterMismatch { channel, observed, .. } => {
                defmt::write!(f, "RegisterMismatch({}, {=u32:#x})", channel, observed);
            }
            Self::Backend(err) => defmt::write!(f, "Backend({})", err),
        }
    }
}
