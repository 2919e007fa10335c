//! In-Memory AD9081 Simulator
//!
//! `SimTxDevice` behaves like the patched transmit driver: per-pair `raw`
//! and `input` flags, a scan mask, one buffer at a time and control
//! registers derived from the flags. The driver refuses conflicting
//! requests with `EBUSY` just like the hardware, so the arbiter can be
//! exercised end to end on a host.
//!
//! Faults can be injected through a shared reference, which lets tests
//! keep the simulator inside a `ModeArbiter` while steering it.
//!
//! Dropping a [`SimBuffer`] destroys the buffer, as dropping an
//! `iio::Buffer` does on hardware.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::backend::{
    AttrKind, AttrValue, BackendError, BackendResult, DeviceRole, TxBackend, EBUSY, EINVAL,
};
use crate::config::{attrs, regs, MAX_TX_CHANNELS};
use crate::types::{ControlWord, SubChannel, Tone};

/// Channel handle handed out by the simulator
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SimChannel {
    /// DMA channel `voltage{pair}_{i|q}` on the DAC device
    Dac {
        /// Pair index
        pair: u8,
        /// I or Q
        sub: SubChannel,
    },
    /// DDS channel `TX{pair+1}_{I|Q}_F{1|2}` on the DAC device
    Tone {
        /// Pair index
        pair: u8,
        /// Tone slot
        tone: Tone,
        /// I or Q
        sub: SubChannel,
    },
    /// NCO channel `voltage{pair}_{i|q}` on the PHY device
    Phy {
        /// Pair index
        pair: u8,
        /// I or Q
        sub: SubChannel,
        /// Output (transmit) or input (receive) direction
        output: bool,
    },
}

impl SimChannel {
    const fn pair(self) -> u8 {
        match self {
            Self::Dac { pair, .. } | Self::Tone { pair, .. } | Self::Phy { pair, .. } => pair,
        }
    }
}

/// Open buffer handle
#[derive(Debug, PartialEq, Eq)]
pub struct SimBuffer {
    id: u32,
    sample_count: usize,
    cyclic: bool,
    alive: Rc<()>,
}

impl SimBuffer {
    /// Total number of samples
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Cyclic (repeating) buffer
    #[must_use]
    pub const fn cyclic(&self) -> bool {
        self.cyclic
    }
}

/// Stored attribute value
#[derive(Clone, Debug, PartialEq)]
pub enum SimValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Text
    Text(String),
}

impl From<AttrValue<'_>> for SimValue {
    fn from(value: AttrValue<'_>) -> Self {
        match value {
            AttrValue::Bool(b) => Self::Bool(b),
            AttrValue::Int(v) => Self::Int(v),
            AttrValue::Float(v) => Self::Float(v),
            AttrValue::Text(s) => Self::Text(s.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct PairFlags {
    raw: bool,
    input: bool,
}

/// Buffer the driver currently streams from
#[derive(Debug)]
struct LiveBuffer {
    id: u32,
    pairs: BTreeSet<usize>,
    alive: Weak<()>,
}

/// Simulated AD9081 transmit driver
#[derive(Debug)]
pub struct SimTxDevice {
    pairs: Vec<PairFlags>,
    scan: BTreeSet<u8>,
    open_buffer: Option<LiveBuffer>,
    next_buffer_id: u32,
    restores_dds: bool,
    channel_attrs: BTreeMap<(SimChannel, String), SimValue>,
    device_attrs: BTreeMap<(DeviceRole, String), SimValue>,
    hidden: BTreeSet<(DeviceRole, String)>,
    writes: usize,
    fail_write: Cell<Option<BackendError>>,
    fail_buffer: Cell<bool>,
    pokes: RefCell<BTreeMap<u32, u32>>,
}

impl SimTxDevice {
    /// Device with `pairs` I/Q pairs, tone generators on (as after boot)
    #[must_use]
    pub fn new(pairs: usize) -> Self {
        let flags = PairFlags {
            raw: true,
            ..PairFlags::default()
        };
        Self {
            pairs: vec![flags; pairs.min(MAX_TX_CHANNELS)],
            scan: BTreeSet::new(),
            open_buffer: None,
            next_buffer_id: 1,
            restores_dds: false,
            channel_attrs: BTreeMap::new(),
            device_attrs: BTreeMap::new(),
            hidden: BTreeSet::new(),
            writes: 0,
            fail_write: Cell::new(None),
            fail_buffer: Cell::new(false),
            pokes: RefCell::new(BTreeMap::new()),
        }
    }

    /// Engage processed/input on a pair, bypassing any checks
    ///
    /// Models a pair left in processed mode by an earlier user.
    #[must_use]
    pub fn with_processed(mut self, pair: usize) -> Self {
        if let Some(flags) = self.pairs.get_mut(pair) {
            flags.input = true;
        }
        self
    }

    /// Put pairs back on the tone generator whenever a buffer or
    /// processed/input releases them
    ///
    /// Models the driver found on boards, which sets `raw` on release
    /// instead of keeping the last request.
    #[must_use]
    pub const fn restoring_dds(mut self) -> Self {
        self.restores_dds = true;
        self
    }

    /// Make a channel name unresolvable on one device
    #[must_use]
    pub fn without_channel(mut self, device: DeviceRole, name: &str) -> Self {
        self.hidden.insert((device, name.to_string()));
        self
    }

    /// Fail the next attribute write with the given error
    pub fn fail_next_write(&self, err: BackendError) {
        self.fail_write.set(Some(err));
    }

    /// Fail the next buffer creation
    pub fn fail_next_buffer(&self) {
        self.fail_buffer.set(true);
    }

    /// Override what a register reads back, until cleared
    pub fn poke_register(&self, address: u32, value: u32) {
        self.pokes.borrow_mut().insert(address, value);
    }

    /// Drop all register overrides
    pub fn clear_pokes(&self) {
        self.pokes.borrow_mut().clear();
    }

    /// Number of simulated pairs
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Driver's `raw` flag of a pair
    #[must_use]
    pub fn raw(&self, pair: usize) -> Option<bool> {
        self.pairs.get(pair).map(|f| f.raw || self.restore_pending(pair))
    }

    /// Driver's `input` flag of a pair
    #[must_use]
    pub fn input(&self, pair: usize) -> Option<bool> {
        self.pairs.get(pair).map(|f| f.input)
    }

    /// Check if a buffer currently streams a pair
    #[must_use]
    pub fn streaming(&self, pair: usize) -> Option<bool> {
        (pair < self.pairs.len()).then(|| self.is_streaming(pair))
    }

    /// Check if a DAC sub-channel is in the scan mask
    #[must_use]
    pub fn scan_enabled(&self, dac_index: u8) -> bool {
        self.scan.contains(&dac_index)
    }

    /// Check if a buffer is open
    #[must_use]
    pub fn buffer_open(&self) -> bool {
        self.live_buffer().is_some()
    }

    /// Attribute writes attempted so far (accepted or not)
    #[must_use]
    pub const fn write_count(&self) -> usize {
        self.writes
    }

    /// Stored value of a generic channel attribute
    #[must_use]
    pub fn attribute(&self, channel: SimChannel, name: &str) -> Option<&SimValue> {
        self.channel_attrs.get(&(channel, name.to_string()))
    }

    /// Stored value of a device attribute
    #[must_use]
    pub fn device_attribute(&self, device: DeviceRole, name: &str) -> Option<&SimValue> {
        self.device_attrs.get(&(device, name.to_string()))
    }

    /// Control word the hardware would hold for a pair
    #[must_use]
    pub fn control_word(&self, pair: usize) -> Option<ControlWord> {
        self.pairs.get(pair).map(|f| {
            let raw = f.raw || self.restore_pending(pair);
            ControlWord::from_flags(raw, self.is_streaming(pair), f.input)
        })
    }

    /// Open buffer whose handle has not been dropped yet
    fn live_buffer(&self) -> Option<&LiveBuffer> {
        self.open_buffer
            .as_ref()
            .filter(|buffer| buffer.alive.strong_count() > 0)
    }

    fn is_streaming(&self, pair: usize) -> bool {
        self.live_buffer()
            .is_some_and(|buffer| buffer.pairs.contains(&pair))
    }

    /// Pair streamed by a dropped buffer on a driver that restores DDS
    fn restore_pending(&self, pair: usize) -> bool {
        self.restores_dds
            && self.live_buffer().is_none()
            && self
                .open_buffer
                .as_ref()
                .is_some_and(|buffer| buffer.pairs.contains(&pair))
    }

    /// Forget a buffer whose handle was dropped
    fn reap_buffer(&mut self) {
        if self.open_buffer.is_some() && self.live_buffer().is_none() {
            self.release_buffer();
        }
    }

    fn release_buffer(&mut self) {
        let Some(buffer) = self.open_buffer.take() else {
            return;
        };
        if self.restores_dds {
            for &p in &buffer.pairs {
                if let Some(flags) = self.pairs.get_mut(p) {
                    flags.raw = true;
                }
            }
        }
        trace!(id = buffer.id, "buffer destroyed");
    }

    fn flags_mut(&mut self, channel: SimChannel) -> BackendResult<&mut PairFlags> {
        self.pairs
            .get_mut(usize::from(channel.pair()))
            .ok_or(BackendError::NotFound)
    }

    fn apply_write(
        &mut self,
        channel: SimChannel,
        name: &str,
        value: AttrValue<'_>,
    ) -> BackendResult<()> {
        self.reap_buffer();
        let streaming = self.is_streaming(usize::from(channel.pair()));
        let restores_dds = self.restores_dds;
        match (channel, name) {
            (SimChannel::Tone { .. }, attrs::RAW) => {
                let requested = value.as_bool().ok_or(BackendError::Errno(EINVAL))?;
                let flags = self.flags_mut(channel)?;
                if flags.input {
                    return Err(BackendError::Errno(EBUSY));
                }
                flags.raw = requested;
            }
            (SimChannel::Dac { .. }, attrs::INPUT) => {
                let enabled = value.as_bool().ok_or(BackendError::Errno(EINVAL))?;
                let flags = self.flags_mut(channel)?;
                if enabled && streaming {
                    return Err(BackendError::Errno(EBUSY));
                }
                if restores_dds && flags.input && !enabled {
                    flags.raw = true;
                }
                flags.input = enabled;
            }
            _ => {
                self.channel_attrs.insert((channel, name.to_string()), value.into());
            }
        }
        Ok(())
    }

    fn parse_channel(
        &self,
        device: DeviceRole,
        name: &str,
        is_output: bool,
    ) -> Option<SimChannel> {
        if self.hidden.contains(&(device, name.to_string())) {
            return None;
        }
        let channel = match device {
            DeviceRole::Dac if is_output => parse_dac(name).or_else(|| parse_tone(name))?,
            DeviceRole::Dac => return None,
            DeviceRole::Phy => {
                let SimChannel::Dac { pair, sub } = parse_dac(name)? else {
                    return None;
                };
                SimChannel::Phy {
                    pair,
                    sub,
                    output: is_output,
                }
            }
        };
        (usize::from(channel.pair()) < self.pairs.len()).then_some(channel)
    }
}

fn parse_sub(s: &str) -> Option<SubChannel> {
    match s {
        "i" | "I" => Some(SubChannel::I),
        "q" | "Q" => Some(SubChannel::Q),
        _ => None,
    }
}

/// `voltage{n}_{i|q}`
fn parse_dac(name: &str) -> Option<SimChannel> {
    let (index, sub) = name.strip_prefix("voltage")?.split_once('_')?;
    Some(SimChannel::Dac {
        pair: index.parse().ok()?,
        sub: parse_sub(sub)?,
    })
}

/// `TX{n+1}_{I|Q}_F{1|2}`
fn parse_tone(name: &str) -> Option<SimChannel> {
    let mut parts = name.strip_prefix("TX")?.split('_');
    let number: u8 = parts.next()?.parse().ok()?;
    let sub = parse_sub(parts.next()?)?;
    let tone = match parts.next()? {
        "F1" => Tone::F1,
        "F2" => Tone::F2,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(SimChannel::Tone {
        pair: number.checked_sub(1)?,
        tone,
        sub,
    })
}

impl TxBackend for SimTxDevice {
    type Channel = SimChannel;
    type Buffer = SimBuffer;

    fn find_channel(
        &self,
        device: DeviceRole,
        name: &str,
        is_output: bool,
    ) -> BackendResult<SimChannel> {
        self.parse_channel(device, name, is_output)
            .ok_or(BackendError::NotFound)
    }

    fn write_attribute(
        &mut self,
        channel: &SimChannel,
        name: &str,
        value: AttrValue<'_>,
    ) -> BackendResult<()> {
        self.writes += 1;
        if let Some(err) = self.fail_write.take() {
            trace!(?channel, attr = name, %err, "injected write failure");
            return Err(err);
        }
        let result = self.apply_write(*channel, name, value);
        trace!(?channel, attr = name, ?value, ok = result.is_ok(), "attribute write");
        result
    }

    fn read_attribute(
        &self,
        channel: &SimChannel,
        name: &str,
        kind: AttrKind,
    ) -> BackendResult<AttrValue<'static>> {
        let flags = self
            .pairs
            .get(usize::from(channel.pair()))
            .ok_or(BackendError::NotFound)?;
        let stored = match (channel, name) {
            (SimChannel::Tone { .. }, attrs::RAW) => {
                SimValue::Bool(flags.raw || self.restore_pending(usize::from(channel.pair())))
            }
            (SimChannel::Dac { .. }, attrs::INPUT) => SimValue::Bool(flags.input),
            _ => self
                .channel_attrs
                .get(&(*channel, name.to_string()))
                .cloned()
                .ok_or(BackendError::NotFound)?,
        };
        match (kind, stored) {
            (AttrKind::Bool, SimValue::Bool(b)) => Ok(AttrValue::Bool(b)),
            (AttrKind::Bool, SimValue::Int(v)) => Ok(AttrValue::Bool(v != 0)),
            (AttrKind::Int, SimValue::Int(v)) => Ok(AttrValue::Int(v)),
            (AttrKind::Int, SimValue::Bool(b)) => Ok(AttrValue::Int(i64::from(b))),
            (AttrKind::Float, SimValue::Float(v)) => Ok(AttrValue::Float(v)),
            #[allow(clippy::cast_precision_loss)]
            (AttrKind::Float, SimValue::Int(v)) => Ok(AttrValue::Float(v as f64)),
            _ => Err(BackendError::BadValue),
        }
    }

    fn write_device_attribute(
        &mut self,
        device: DeviceRole,
        name: &str,
        value: AttrValue<'_>,
    ) -> BackendResult<()> {
        self.writes += 1;
        if let Some(err) = self.fail_write.take() {
            return Err(err);
        }
        self.device_attrs.insert((device, name.to_string()), value.into());
        Ok(())
    }

    fn enable_channel(&mut self, channel: &SimChannel) {
        if let SimChannel::Dac { pair, sub } = *channel {
            self.scan.insert(pair * 2 + u8::from(sub == SubChannel::Q));
        }
    }

    fn disable_channel(&mut self, channel: &SimChannel) {
        if let SimChannel::Dac { pair, sub } = *channel {
            self.scan.remove(&(pair * 2 + u8::from(sub == SubChannel::Q)));
        }
    }

    fn open_buffer(&mut self, sample_count: usize, cyclic: bool) -> BackendResult<SimBuffer> {
        if self.fail_buffer.replace(false) {
            return Err(BackendError::BufferUnavailable);
        }
        self.reap_buffer();
        if self.open_buffer.is_some() {
            return Err(BackendError::Errno(EBUSY));
        }
        let pairs: BTreeSet<usize> = self.scan.iter().map(|&k| usize::from(k / 2)).collect();
        if pairs.is_empty() || sample_count == 0 {
            return Err(BackendError::Errno(EINVAL));
        }
        if pairs.iter().any(|&p| self.pairs.get(p).map_or(true, |f| f.input)) {
            return Err(BackendError::Errno(EBUSY));
        }

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        let alive = Rc::new(());
        trace!(id, sample_count, cyclic, ?pairs, "buffer created");
        self.open_buffer = Some(LiveBuffer {
            id,
            pairs,
            alive: Rc::downgrade(&alive),
        });
        Ok(SimBuffer {
            id,
            sample_count,
            cyclic,
            alive,
        })
    }

    fn close_buffer(&mut self, buffer: SimBuffer) {
        if self.open_buffer.as_ref().map(|live| live.id) == Some(buffer.id) {
            self.release_buffer();
        }
    }

    fn read_device_register(&self, address: u32) -> BackendResult<u32> {
        if let Some(&value) = self.pokes.borrow().get(&address) {
            return Ok(value);
        }
        let offset = address
            .checked_sub(regs::DAC_CH_REG_BASE)
            .ok_or(BackendError::NotFound)?;
        if offset % regs::DAC_CH_REG_STEP != regs::DAC_CH_CTRL_OFFSET {
            return Err(BackendError::NotFound);
        }
        let dac_index = offset / regs::DAC_CH_REG_STEP;
        let pair = usize::try_from(dac_index / 2).map_err(|_| BackendError::NotFound)?;
        self.control_word(pair)
            .map(ControlWord::as_u32)
            .ok_or(BackendError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_resolve() {
        let sim = SimTxDevice::new(8);
        assert_eq!(
            sim.find_channel(DeviceRole::Dac, "voltage3_q", true),
            Ok(SimChannel::Dac {
                pair: 3,
                sub: SubChannel::Q
            })
        );
        assert_eq!(
            sim.find_channel(DeviceRole::Dac, "TX8_I_F2", true),
            Ok(SimChannel::Tone {
                pair: 7,
                tone: Tone::F2,
                sub: SubChannel::I
            })
        );
        assert_eq!(
            sim.find_channel(DeviceRole::Phy, "voltage0_i", false),
            Ok(SimChannel::Phy {
                pair: 0,
                sub: SubChannel::I,
                output: false
            })
        );
    }

    #[test]
    fn unknown_names_are_not_found() {
        let sim = SimTxDevice::new(2);
        let names = ["voltage2_i", "TX0_I_F1", "TX3_I_F1", "TX1_X_F1", "TX1_I_F3", "altvoltage0"];
        for name in names {
            assert_eq!(
                sim.find_channel(DeviceRole::Dac, name, true),
                Err(BackendError::NotFound)
            );
        }
        assert_eq!(
            sim.find_channel(DeviceRole::Dac, "voltage0_i", false),
            Err(BackendError::NotFound)
        );
    }

    #[test]
    fn register_address_decoding() {
        let sim = SimTxDevice::new(2);
        assert_eq!(sim.read_device_register(0x418), Ok(0x0));
        assert_eq!(sim.read_device_register(0x458), Ok(0x0));
        assert_eq!(sim.read_device_register(0x4d8), Ok(0x0));
        assert_eq!(sim.read_device_register(0x518), Err(BackendError::NotFound));
        assert_eq!(sim.read_device_register(0x41c), Err(BackendError::NotFound));
        assert_eq!(sim.read_device_register(0x18), Err(BackendError::NotFound));
    }

    #[test]
    fn pokes_override_registers() {
        let sim = SimTxDevice::new(1);
        sim.poke_register(0x418, 0x7);
        assert_eq!(sim.read_device_register(0x418), Ok(0x7));
        sim.clear_pokes();
        assert_eq!(sim.read_device_register(0x418), Ok(0x0));
    }
}
