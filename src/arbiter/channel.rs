//! Channel State
//!
//! Per-pair mode flags and the pure transition rules between them.
//! Transitions return a new state or the mode that blocks them, so a
//! refused request can never leave a half-applied state behind.

use crate::backend::{AttrKind, BackendError, BackendResult, DeviceRole, TxBackend};
use crate::config::attrs;
use crate::error::{self, ArbiterError, Blocker};
use crate::types::{ChannelId, ControlWord, DriveMode, Name, SubChannel, Tone};

/// Mode flags of one I/Q pair (immutable)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ChannelState {
    /// Last accepted tone generator request
    raw_requested: bool,
    /// A stream buffer owns the DMA path
    buffer_open: bool,
    /// Processed/input mode engaged
    processed_enabled: bool,
}

impl ChannelState {
    /// Idle state with the given tone generator request
    #[must_use]
    pub const fn new(raw_requested: bool) -> Self {
        Self {
            raw_requested,
            buffer_open: false,
            processed_enabled: false,
        }
    }

    /// State with processed/input already engaged (as found on the device)
    #[must_use]
    pub const fn processed(raw_requested: bool) -> Self {
        Self {
            raw_requested,
            buffer_open: false,
            processed_enabled: true,
        }
    }

    /// Last accepted tone generator request
    #[must_use]
    pub const fn raw_requested(&self) -> bool {
        self.raw_requested
    }

    /// Check if a stream buffer owns the DMA path
    #[must_use]
    pub const fn buffer_open(&self) -> bool {
        self.buffer_open
    }

    /// Check if processed/input mode is engaged
    #[must_use]
    pub const fn processed_enabled(&self) -> bool {
        self.processed_enabled
    }

    /// Control word implied by the flags
    #[must_use]
    pub const fn register(&self) -> ControlWord {
        ControlWord::from_flags(self.raw_requested, self.buffer_open, self.processed_enabled)
    }

    /// Active drive source
    #[must_use]
    pub const fn mode(&self) -> DriveMode {
        DriveMode::from_flags(self.buffer_open, self.processed_enabled)
    }

    /// Request the tone generator on or off
    ///
    /// # Errors
    ///
    /// Refused while processed/input is engaged, whatever the value.
    pub const fn with_raw(self, requested: bool) -> Result<Self, Blocker> {
        if self.processed_enabled {
            return Err(Blocker::ProcessedInput);
        }
        Ok(Self {
            raw_requested: requested,
            ..self
        })
    }

    /// Hand the DMA path to a stream buffer
    ///
    /// # Errors
    ///
    /// Refused while processed/input is engaged or another buffer owns
    /// the path.
    pub const fn with_buffer_open(self) -> Result<Self, Blocker> {
        if self.processed_enabled {
            return Err(Blocker::ProcessedInput);
        }
        if self.buffer_open {
            return Err(Blocker::StreamBuffer);
        }
        Ok(Self {
            buffer_open: true,
            ..self
        })
    }

    /// Release the DMA path (never refused)
    #[must_use]
    pub const fn with_buffer_closed(self) -> Self {
        Self {
            buffer_open: false,
            ..self
        }
    }

    /// Engage or release processed/input mode
    ///
    /// # Errors
    ///
    /// Engaging is refused while a stream buffer owns the DMA path.
    /// Releasing is never refused.
    pub const fn with_processed(self, enabled: bool) -> Result<Self, Blocker> {
        if enabled && self.buffer_open {
            return Err(Blocker::StreamBuffer);
        }
        Ok(Self {
            processed_enabled: enabled,
            ..self
        })
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ChannelState {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "State(raw={}, buf={}, proc={}, reg={})",
            self.raw_requested,
            self.buffer_open,
            self.processed_enabled,
            self.register()
        );
    }
}

/// Driver channels backing one I/Q pair
#[derive(Clone, Debug)]
pub struct ChannelHandles<C> {
    dac_i: C,
    dac_q: C,
    tone1_i: C,
    tone1_q: C,
    tone2_i: C,
    tone2_q: C,
}

impl<C: Clone> ChannelHandles<C> {
    /// Locate the DAC and DDS channels of a pair on the DAC device
    ///
    /// Every lookup is attempted so that all missing channels get logged;
    /// the first failure is returned.
    ///
    /// # Errors
    ///
    /// `ChannelNotFound` for the first channel the backend cannot find.
    pub fn find<B>(backend: &B, id: ChannelId) -> error::Result<Self>
    where
        B: TxBackend<Channel = C>,
    {
        let dac_i = lookup(backend, id.dac_name(SubChannel::I));
        let dac_q = lookup(backend, id.dac_name(SubChannel::Q));
        let tone1_i = lookup(backend, id.tone_name(Tone::F1, SubChannel::I));
        let tone1_q = lookup(backend, id.tone_name(Tone::F1, SubChannel::Q));
        let tone2_i = lookup(backend, id.tone_name(Tone::F2, SubChannel::I));
        let tone2_q = lookup(backend, id.tone_name(Tone::F2, SubChannel::Q));

        Ok(Self {
            dac_i: dac_i?,
            dac_q: dac_q?,
            tone1_i: tone1_i?,
            tone1_q: tone1_q?,
            tone2_i: tone2_i?,
            tone2_q: tone2_q?,
        })
    }

    /// DMA channel of one sub-channel
    #[must_use]
    pub const fn dac(&self, sub: SubChannel) -> &C {
        match sub {
            SubChannel::I => &self.dac_i,
            SubChannel::Q => &self.dac_q,
        }
    }

    /// DDS tone channel of one sub-channel
    #[must_use]
    pub const fn tone(&self, tone: Tone, sub: SubChannel) -> &C {
        match (tone, sub) {
            (Tone::F1, SubChannel::I) => &self.tone1_i,
            (Tone::F1, SubChannel::Q) => &self.tone1_q,
            (Tone::F2, SubChannel::I) => &self.tone2_i,
            (Tone::F2, SubChannel::Q) => &self.tone2_q,
        }
    }
}

fn lookup<B: TxBackend>(backend: &B, name: Name) -> error::Result<B::Channel> {
    backend.find_channel(DeviceRole::Dac, &name, true).map_err(|_| {
        tracing::error!(channel = %name, "output channel not found");
        ArbiterError::ChannelNotFound {
            device: DeviceRole::Dac,
            name,
        }
    })
}

/// Read back a channel's flags from the driver
pub(crate) fn read_flags<B: TxBackend>(
    backend: &B,
    handles: &ChannelHandles<B::Channel>,
) -> BackendResult<ChannelState> {
    let raw = backend
        .read_attribute(handles.tone(Tone::F1, SubChannel::I), attrs::RAW, AttrKind::Bool)?
        .as_bool()
        .ok_or(BackendError::BadValue)?;
    let input = backend
        .read_attribute(handles.dac(SubChannel::I), attrs::INPUT, AttrKind::Bool)?
        .as_bool()
        .ok_or(BackendError::BadValue)?;

    Ok(if input {
        ChannelState::processed(raw)
    } else {
        ChannelState::new(raw)
    })
}
