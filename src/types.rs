//! Shared types used across the crate
//!
//! Domain types for the AD9081 transmit path: channel identifiers,
//! channel groups, the DAC control word and the resulting drive mode.

use core::fmt::{self, Write};

use heapless::String;

use crate::config::{regs, MAX_TX_CHANNELS};

/// Fixed-capacity channel or attribute name
pub type Name = String<24>;

/// Index of an I/Q transmit channel pair
///
/// Pair `n` is made of DAC sub-channels `2n` (I) and `2n + 1` (Q).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Create a channel id, returns None if beyond `MAX_TX_CHANNELS`
    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < MAX_TX_CHANNELS {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Zero-based pair index
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// Index of the given sub-channel among all DAC channels
    #[must_use]
    pub const fn dac_index(self, sub: SubChannel) -> u8 {
        self.0 * 2 + sub.offset()
    }

    /// Address of the control register for one sub-channel
    #[must_use]
    pub const fn ctrl_register(self, sub: SubChannel) -> u32 {
        regs::ctrl_register(self.dac_index(sub))
    }

    /// DMA channel name, e.g. `voltage3_q`
    #[must_use]
    pub fn dac_name(self, sub: SubChannel) -> Name {
        let mut name = Name::new();
        // Capacity covers the longest possible name
        let _ = write!(name, "voltage{}_{}", self.0, sub.suffix());
        name
    }

    /// DDS tone channel name, e.g. `TX4_I_F2`
    ///
    /// Tone channels are numbered from 1.
    #[must_use]
    pub fn tone_name(self, tone: Tone, sub: SubChannel) -> Name {
        let mut name = Name::new();
        let _ = write!(
            name,
            "TX{}_{}_F{}",
            self.0 + 1,
            sub.letter(),
            tone.number()
        );
        name
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ChannelId {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ch{}", self.0);
    }
}

/// In-phase or quadrature half of a channel pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubChannel {
    /// In-phase
    I,
    /// Quadrature
    Q,
}

impl SubChannel {
    /// Both halves, I first
    pub const BOTH: [Self; 2] = [Self::I, Self::Q];

    const fn offset(self) -> u8 {
        match self {
            Self::I => 0,
            Self::Q => 1,
        }
    }

    const fn suffix(self) -> char {
        match self {
            Self::I => 'i',
            Self::Q => 'q',
        }
    }

    const fn letter(self) -> char {
        match self {
            Self::I => 'I',
            Self::Q => 'Q',
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SubChannel {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::I => defmt::write!(f, "I"),
            Self::Q => defmt::write!(f, "Q"),
        }
    }
}

/// DDS tone generator slot (two per sub-channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tone {
    /// First tone (`F1`)
    F1,
    /// Second tone (`F2`)
    F2,
}

impl Tone {
    const fn number(self) -> u8 {
        match self {
            Self::F1 => 1,
            Self::F2 => 2,
        }
    }
}

/// Set of channel pairs, addressed as a group
///
/// Stored as a bitmask so group decisions cost nothing to copy.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ChannelSet(u16);

impl ChannelSet {
    /// The empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Set of the first `count` channels (saturates at `MAX_TX_CHANNELS`)
    #[must_use]
    pub const fn first(count: usize) -> Self {
        if count >= MAX_TX_CHANNELS {
            Self(u16::MAX)
        } else {
            Self((1u16 << count) - 1)
        }
    }

    /// Set holding a single channel
    #[must_use]
    pub const fn single(id: ChannelId) -> Self {
        Self(1 << id.0)
    }

    /// Add a channel (returns new set)
    #[must_use]
    pub const fn with(self, id: ChannelId) -> Self {
        Self(self.0 | (1 << id.0))
    }

    /// Remove a channel (returns new set)
    #[must_use]
    pub const fn without(self, id: ChannelId) -> Self {
        Self(self.0 & !(1 << id.0))
    }

    /// Check membership
    #[must_use]
    pub const fn contains(self, id: ChannelId) -> bool {
        self.0 & (1 << id.0) != 0
    }

    /// Number of channels in the set
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Check if the set is empty
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bitmask, bit `n` for channel `n`
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Iterate members in ascending order
    pub fn iter(self) -> impl Iterator<Item = ChannelId> {
        (0..MAX_TX_CHANNELS as u8)
            .filter(move |&i| self.0 & (1 << i) != 0)
            .map(ChannelId)
    }
}

impl FromIterator<ChannelId> for ChannelSet {
    fn from_iter<T: IntoIterator<Item = ChannelId>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(ChannelId::index)).finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ChannelSet {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ChannelSet({=u16:#06x})", self.0);
    }
}

/// DAC data-source selection as seen in the channel control register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlWord {
    /// DDS tone generator drives the DAC
    Dds = 0x0,
    /// DMA path drives the DAC (streamed buffer or processed input)
    Dma = 0x2,
    /// Output forced to zero
    Zero = 0x3,
}

impl ControlWord {
    /// Control word for a combination of channel flags
    ///
    /// Processed input and an open buffer both select the DMA path.
    #[must_use]
    pub const fn from_flags(
        raw_requested: bool,
        buffer_open: bool,
        processed_enabled: bool,
    ) -> Self {
        if processed_enabled || buffer_open {
            Self::Dma
        } else if raw_requested {
            Self::Dds
        } else {
            Self::Zero
        }
    }

    /// Register value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.as_u32())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ControlWord {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Dds => defmt::write!(f, "DDS(0x0)"),
            Self::Dma => defmt::write!(f, "DMA(0x2)"),
            Self::Zero => defmt::write!(f, "ZERO(0x3)"),
        }
    }
}

/// Source currently driving a channel pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DriveMode {
    /// Tone generator (output forced to zero while raw is deasserted)
    #[default]
    DdsTone,
    /// Streamed DMA buffer
    DmaStream,
    /// Directly written processed/input samples
    ProcessedInput,
}

impl DriveMode {
    /// Mode selected by a combination of channel flags
    #[must_use]
    pub const fn from_flags(buffer_open: bool, processed_enabled: bool) -> Self {
        if processed_enabled {
            Self::ProcessedInput
        } else if buffer_open {
            Self::DmaStream
        } else {
            Self::DdsTone
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DriveMode {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::DdsTone => defmt::write!(f, "DDS"),
            Self::DmaStream => defmt::write!(f, "DMA"),
            Self::ProcessedInput => defmt::write!(f, "PROCESSED"),
        }
    }
}
