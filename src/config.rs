//! System configuration and hardware constants
//!
//! Register map, IIO device/attribute names and default tables for the
//! AD9081 transmit path are centralized here. `TxConfig` gathers the
//! values the arbiter needs at runtime.

use core::time::Duration;

use crate::setup::{RxPathPlan, TonePlan, TxPathPlan};

/// Maximum number of I/Q channel pairs a `ChannelSet` can address
pub const MAX_TX_CHANNELS: usize = 16;

/// Default number of configured I/Q pairs (8 pairs of I and Q)
pub const DEFAULT_TX_CHANNELS: usize = 8;

/// Samples per channel per buffer (64K)
pub const BUFFER_SAMPLES_PER_CHANNEL: usize = 0x10000;

/// Time the driver needs to restore registers after a buffer is released
pub const BUFFER_SETTLE_TIME: Duration = Duration::from_millis(500);

/// DAC channel register map
pub mod regs {
    //! Direct register addresses on the DAC/TPL device

    /// First DAC channel register block
    pub const DAC_CH_REG_BASE: u32 = 0x400;

    /// Stride between per-channel register blocks
    pub const DAC_CH_REG_STEP: u32 = 0x40;

    /// Offset of the control register (CTRL7) inside a channel block
    pub const DAC_CH_CTRL_OFFSET: u32 = 0x18;

    /// Control register address for a DAC sub-channel index
    #[must_use]
    pub const fn ctrl_register(dac_index: u8) -> u32 {
        DAC_CH_REG_BASE + dac_index as u32 * DAC_CH_REG_STEP + DAC_CH_CTRL_OFFSET
    }
}

/// IIO device names
pub mod devices {
    //! Devices are found by their IIO name

    /// DAC/TPL device: DDS engines, DMA channels and register access
    pub const DAC: &str = "axi-ad9081-tx-hpc";

    /// PHY device: NCO configuration for both directions
    pub const PHY: &str = "axi-ad9081-rx-hpc";
}

/// IIO attribute names
pub mod attrs {
    //! Channel and device attribute names used by the driver

    /// DDS engine enable (global effect on the DAC data source)
    pub const RAW: &str = "raw";

    /// Processed/input mode on a DAC channel
    pub const INPUT: &str = "input";

    /// DDS tone frequency in Hz
    pub const FREQUENCY: &str = "frequency";

    /// DDS tone linear scale (0.0-1.0)
    pub const SCALE: &str = "scale";

    /// DDS tone phase in millidegrees
    pub const PHASE: &str = "phase";

    /// Coarse (main) NCO frequency in Hz
    pub const MAIN_NCO_FREQUENCY: &str = "main_nco_frequency";

    /// Coarse (main) NCO phase in millidegrees
    pub const MAIN_NCO_PHASE: &str = "main_nco_phase";

    /// Fine (channel) NCO frequency in Hz
    pub const CHANNEL_NCO_FREQUENCY: &str = "channel_nco_frequency";

    /// Fine (channel) NCO phase in millidegrees
    pub const CHANNEL_NCO_PHASE: &str = "channel_nco_phase";

    /// Fine (channel) NCO gain scale
    pub const CHANNEL_NCO_GAIN_SCALE: &str = "channel_nco_gain_scale";

    /// Channel enable
    pub const EN: &str = "en";

    /// RX test pattern mode
    pub const TEST_MODE: &str = "test_mode";

    /// RX Nyquist zone
    pub const NYQUIST_ZONE: &str = "nyquist_zone";

    /// Device loopback mode
    pub const LOOPBACK_MODE: &str = "loopback_mode";
}

/// Default RX path configuration (one entry per pair)
pub const DEFAULT_RX_PATHS: [RxPathPlan; DEFAULT_TX_CHANNELS] = [
    RxPathPlan::new(10_000_000, 0, 100_000_000, 1000),
    RxPathPlan::new(20_000_000, 0, 200_000_000, 0),
    RxPathPlan::new(30_000_000, 0, 100_000_000, 1000),
    RxPathPlan::new(40_000_000, 0, 200_000_000, 0),
    RxPathPlan::new(50_000_000, 1000, 700_000_000, 1000),
    RxPathPlan::new(60_000_000, 1000, 900_000_000, 1000),
    RxPathPlan::new(70_000_000, 0, 700_000_000, 1000),
    RxPathPlan::new(80_000_000, 1000, 900_000_000, 1000),
];

/// Default TX path configuration (one entry per pair)
pub const DEFAULT_TX_PATHS: [TxPathPlan; DEFAULT_TX_CHANNELS] = [
    TxPathPlan::new(1.0, 6_000_000, 0, 100_000_000, 0),
    TxPathPlan::new(0.700_122_1, 16_000_000, 0, 100_000_000, 0),
    TxPathPlan::new(0.569_963_3, 0, 0, 100_000_000, 0),
    TxPathPlan::new(0.500_122_1, 100_000_000, 2000, 400_000_000, 0),
    TxPathPlan::new(0.500_122_1, 0, 0, 700_000_000, 0),
    TxPathPlan::new(0.500_122_1, 0, 0, 700_000_000, 0),
    TxPathPlan::new(0.500_122_1, 0, 0, 900_000_000, 0),
    TxPathPlan::new(0.480_097_68, 0, 0, 900_000_000, 0),
];

/// Default DDS tones (one entry per pair, single tone with I/Q in quadrature)
pub const DEFAULT_TONES: [TonePlan; DEFAULT_TX_CHANNELS] = [
    TonePlan::new(4_018_290, 90.0, -12.0),
    TonePlan::new(8_005_900, 90.0, -10.0),
    TonePlan::new(3_000_940, 90.0, -13.0),
    TonePlan::disabled(),
    TonePlan::new(10_996_668, 90.0, -17.0),
    TonePlan::new(6_012_054, 90.0, -15.0),
    TonePlan::new(11_993_591, 90.0, -14.0),
    TonePlan::new(12_990_513, 90.0, -13.0),
];

/// Runtime configuration for a mode arbiter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxConfig {
    /// Number of I/Q pairs to discover and manage
    pub channels: usize,
    /// Samples per channel per stream buffer
    pub buffer_samples_per_channel: usize,
    /// Open stream buffers in cyclic mode
    pub cyclic: bool,
    /// Wait after a buffer is released before trusting register reads
    pub settle_time: Duration,
}

impl TxConfig {
    /// Configuration with a given channel count (clamped to `1..=MAX_TX_CHANNELS`)
    #[must_use]
    pub fn with_channels(channels: usize) -> Self {
        Self {
            channels: channels.clamp(1, MAX_TX_CHANNELS),
            ..Self::default()
        }
    }

    /// Total sample count of a buffer streaming `pairs` I/Q pairs
    #[must_use]
    pub const fn buffer_samples(&self, pairs: usize) -> usize {
        self.buffer_samples_per_channel * pairs * 2
    }
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_TX_CHANNELS,
            buffer_samples_per_channel: BUFFER_SAMPLES_PER_CHANNEL,
            cyclic: false,
            settle_time: BUFFER_SETTLE_TIME,
        }
    }
}
