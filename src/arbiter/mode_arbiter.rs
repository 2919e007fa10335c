//! Channel Mode Arbiter
//!
//! Owns the mode flags of every configured pair, decides each request
//! against them and realizes accepted requests through the backend.
//!
//! Every mutating call either applies completely or returns an error with
//! nothing changed. State is only committed after the backend accepted the
//! corresponding write, so the flags never run ahead of the hardware.

use heapless::Vec;
use tracing::{debug, warn};

use super::channel::{read_flags, ChannelHandles, ChannelState};
use crate::backend::{AttrKind, AttrValue, TxBackend};
use crate::config::{attrs, TxConfig, MAX_TX_CHANNELS};
use crate::error::{ArbiterError, Blocker, Result};
use crate::types::{ChannelId, ChannelSet, ControlWord, DriveMode, SubChannel, Tone};

/// One configured I/Q pair
#[derive(Clone, Debug)]
pub struct TxChannel<C> {
    id: ChannelId,
    handles: ChannelHandles<C>,
    state: ChannelState,
}

impl<C> TxChannel<C> {
    /// Pair index
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Current flags
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Driver channels of the pair
    #[must_use]
    pub const fn handles(&self) -> &ChannelHandles<C> {
        &self.handles
    }
}

/// Open stream buffer over a group of channels
///
/// Returned by [`ModeArbiter::open_stream_buffer`] and consumed by
/// [`ModeArbiter::close_stream_buffer`]. A handle dropped without being
/// closed still leaves its pairs owned; [`ModeArbiter::close_stream_channels`]
/// gives them back.
#[derive(Debug)]
#[must_use = "an open stream buffer holds the DMA path until closed"]
pub struct StreamBuffer<Buf> {
    channels: ChannelSet,
    buffer: Buf,
}

impl<Buf> StreamBuffer<Buf> {
    /// Channels whose DMA path this buffer owns
    pub const fn channels(&self) -> ChannelSet {
        self.channels
    }

    /// Backend buffer
    pub const fn buffer(&self) -> &Buf {
        &self.buffer
    }
}

/// Transmit mode arbiter
pub struct ModeArbiter<B: TxBackend> {
    backend: B,
    config: TxConfig,
    channels: Vec<TxChannel<B::Channel>, MAX_TX_CHANNELS>,
}

impl<B: TxBackend> ModeArbiter<B> {
    /// Discover the configured channel pairs and read their current flags
    ///
    /// # Errors
    ///
    /// `ChannelNotFound` if any DAC or DDS channel is missing (all missing
    /// channels are logged), `Backend` if the initial flags cannot be read.
    pub fn discover(backend: B, config: TxConfig) -> Result<Self> {
        let count = config.channels.min(MAX_TX_CHANNELS);
        let mut channels = Vec::new();
        let mut first_err = None;

        let ids = (0..count).filter_map(|i| u8::try_from(i).ok().and_then(ChannelId::new));
        for id in ids {
            match ChannelHandles::find(&backend, id) {
                Ok(handles) => {
                    let state = read_flags(&backend, &handles)?;
                    // Capacity is MAX_TX_CHANNELS and count never exceeds it
                    let _ = channels.push(TxChannel { id, handles, state });
                }
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }

        debug!(channels = channels.len(), "transmit channels loaded");
        Ok(Self {
            backend,
            config,
            channels,
        })
    }

    /// Runtime configuration
    #[must_use]
    pub const fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Number of configured pairs
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// All configured pairs, in index order
    #[must_use]
    pub fn channels(&self) -> &[TxChannel<B::Channel>] {
        &self.channels
    }

    /// Set of every configured pair
    #[must_use]
    pub fn all_channels(&self) -> ChannelSet {
        self.channels.iter().map(TxChannel::id).collect()
    }

    /// Look up a configured pair
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if the id is beyond the configured range.
    pub fn channel(&self, id: ChannelId) -> Result<&TxChannel<B::Channel>> {
        self.channels
            .get(usize::from(id.index()))
            .ok_or(ArbiterError::UnknownChannel(id))
    }

    /// Read-only access to the backend
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Give the backend back
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Backend access for configuration glue that does not touch mode flags
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn state(&self, id: ChannelId) -> Result<ChannelState> {
        self.channel(id).map(TxChannel::state)
    }

    fn commit(&mut self, id: ChannelId, state: ChannelState) {
        if let Some(channel) = self.channels.get_mut(usize::from(id.index())) {
            channel.state = state;
        }
    }

    fn refuse(id: ChannelId, blocker: Blocker) -> ArbiterError {
        warn!(channel = %id, %blocker, "mode change refused");
        ArbiterError::Busy { channel: id, blocker }
    }

    /// Request the DDS tone generator on (`true`) or off (`false`)
    ///
    /// # Errors
    ///
    /// `Busy` while processed/input is engaged on the pair, whatever the
    /// requested value. Backend failures are passed through.
    pub fn set_raw(&mut self, id: ChannelId, requested: bool) -> Result<()> {
        let next = self
            .state(id)?
            .with_raw(requested)
            .map_err(|blocker| Self::refuse(id, blocker))?;

        let handle = self.channel(id)?.handles.tone(Tone::F1, SubChannel::I).clone();
        self.backend
            .write_attribute(&handle, attrs::RAW, AttrValue::Bool(requested))?;

        self.commit(id, next);
        debug!(channel = %id, requested, register = %next.register(), "raw updated");
        Ok(())
    }

    /// Engage (`true`) or release (`false`) processed/input mode
    ///
    /// # Errors
    ///
    /// Engaging is `Busy` while a stream buffer owns the pair. Releasing is
    /// never refused. Backend failures are passed through.
    pub fn set_processed_input(&mut self, id: ChannelId, enabled: bool) -> Result<()> {
        let next = self
            .state(id)?
            .with_processed(enabled)
            .map_err(|blocker| Self::refuse(id, blocker))?;

        let handle = self.channel(id)?.handles.dac(SubChannel::I).clone();
        self.backend
            .write_attribute(&handle, attrs::INPUT, AttrValue::Bool(enabled))?;

        self.commit(id, next);
        debug!(
            channel = %id,
            enabled,
            register = %next.register(),
            "processed input updated"
        );
        Ok(())
    }

    /// Hand the DMA path of a group of pairs to a new stream buffer
    ///
    /// The group is decided as a whole: if any pair refuses, no pair
    /// changes and no buffer is created.
    ///
    /// # Errors
    ///
    /// `EmptyChannelSet`, `UnknownChannel`, `Busy` for the first pair with
    /// processed/input engaged (or already streaming). Backend failures are
    /// passed through after the scan mask is restored.
    pub fn open_stream_buffer(&mut self, set: ChannelSet) -> Result<StreamBuffer<B::Buffer>> {
        if set.is_empty() {
            return Err(ArbiterError::EmptyChannelSet);
        }

        let next: Vec<ChannelState, MAX_TX_CHANNELS> = set
            .iter()
            .map(|id| {
                self.state(id)?
                    .with_buffer_open()
                    .map_err(|blocker| Self::refuse(id, blocker))
            })
            .collect::<Result<_>>()?;

        self.set_scan_mask(set, true);
        let samples = self.config.buffer_samples(set.len());
        let buffer = match self.backend.open_buffer(samples, self.config.cyclic) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!(?set, %err, "stream buffer not created");
                self.set_scan_mask(set, false);
                return Err(err.into());
            }
        };

        for (id, state) in set.iter().zip(next) {
            self.commit(id, state);
        }
        debug!(?set, samples, "stream buffer open");
        Ok(StreamBuffer { channels: set, buffer })
    }

    /// Release a stream buffer and give its pairs back to their tone request
    ///
    /// Never refused. Each pair's register reverts according to its stored
    /// raw request.
    pub fn close_stream_buffer(&mut self, stream: StreamBuffer<B::Buffer>) {
        let StreamBuffer { channels: set, buffer } = stream;

        self.backend.close_buffer(buffer);
        self.release(set);
        debug!(?set, "stream buffer closed");
    }

    /// Give the DMA path of a group of pairs back without the buffer handle
    ///
    /// For pairs whose [`StreamBuffer`] was dropped instead of closed. The
    /// backend buffer goes away with its handle; this clears the ownership
    /// the arbiter still records and removes the pairs from the scan mask.
    /// Pairs not owned by a buffer are left as they are.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if the set names a pair beyond the configured
    /// range. Nothing is released in that case.
    pub fn close_stream_channels(&mut self, set: ChannelSet) -> Result<()> {
        for id in set.iter() {
            self.state(id)?;
        }
        let owned: ChannelSet = set
            .iter()
            .filter(|&id| self.state(id).is_ok_and(|state| state.buffer_open()))
            .collect();

        self.release(owned);
        debug!(?owned, "stream channels released");
        Ok(())
    }

    fn release(&mut self, set: ChannelSet) {
        self.set_scan_mask(set, false);
        for id in set.iter() {
            if let Ok(state) = self.state(id) {
                self.commit(id, state.with_buffer_closed());
            }
        }
    }

    fn set_scan_mask(&mut self, set: ChannelSet, enabled: bool) {
        for id in set.iter() {
            let Some(channel) = self.channels.get(usize::from(id.index())) else {
                continue;
            };
            for sub in SubChannel::BOTH {
                let handle = channel.handles.dac(sub);
                if enabled {
                    self.backend.enable_channel(handle);
                } else {
                    self.backend.disable_channel(handle);
                }
            }
        }
    }

    /// Control word the pair's registers must hold (pure observation)
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if the id is beyond the configured range.
    pub fn read_register(&self, id: ChannelId) -> Result<ControlWord> {
        self.state(id).map(|state| state.register())
    }

    /// Active drive source of a pair
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if the id is beyond the configured range.
    pub fn mode(&self, id: ChannelId) -> Result<DriveMode> {
        self.state(id).map(|state| state.mode())
    }

    /// Last accepted tone generator request of a pair
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if the id is beyond the configured range.
    pub fn raw_requested(&self, id: ChannelId) -> Result<bool> {
        self.state(id).map(|state| state.raw_requested())
    }

    /// Check if a stream buffer owns a pair
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if the id is beyond the configured range.
    pub fn buffer_open(&self, id: ChannelId) -> Result<bool> {
        self.state(id).map(|state| state.buffer_open())
    }

    /// Check if processed/input is engaged on a pair
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if the id is beyond the configured range.
    pub fn processed_enabled(&self, id: ChannelId) -> Result<bool> {
        self.state(id).map(|state| state.processed_enabled())
    }

    /// Compare both sub-channel control registers with the expected word
    ///
    /// Read-only; a mismatch is reported, never corrected.
    ///
    /// # Errors
    ///
    /// `RegisterMismatch` for the first disagreeing sub-channel, or a
    /// passed-through backend failure.
    pub fn verify_register(&self, id: ChannelId) -> Result<ControlWord> {
        let expected = self.read_register(id)?;
        for sub in SubChannel::BOTH {
            let observed = self.backend.read_device_register(id.ctrl_register(sub))?;
            if observed != expected.as_u32() {
                return Err(ArbiterError::RegisterMismatch {
                    channel: id,
                    sub,
                    expected,
                    observed,
                });
            }
        }
        Ok(expected)
    }

    /// Verify every pair in a set, stopping at the first mismatch
    ///
    /// # Errors
    ///
    /// As [`Self::verify_register`].
    pub fn verify_registers(&self, set: ChannelSet) -> Result<()> {
        set.iter().try_for_each(|id| self.verify_register(id).map(|_| ()))
    }

    /// Read the driver's processed/input flag of a pair
    ///
    /// # Errors
    ///
    /// `UnknownChannel`, or a passed-through backend failure.
    pub fn read_processed_input(&self, id: ChannelId) -> Result<bool> {
        let handle = self.channel(id)?.handles.dac(SubChannel::I);
        self.backend
            .read_attribute(handle, attrs::INPUT, AttrKind::Bool)?
            .as_bool()
            .ok_or(ArbiterError::Backend(crate::backend::BackendError::BadValue))
    }
}
