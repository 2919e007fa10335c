//! Configuration Glue
//!
//! Applies NCO and DDS tone tables to the AD9081. These writes are
//! fire-and-forget: a failed attribute is logged and counted, and the
//! remaining attributes are still attempted. Only the `raw` request goes
//! through the arbiter, everything else is a plain attribute write.

use tracing::{debug, warn};

use crate::arbiter::ModeArbiter;
use crate::backend::{AttrValue, DeviceRole, TxBackend};
use crate::config::attrs;
use crate::types::{ChannelId, SubChannel, Tone};
// F32Ext provides powf for no_std; in std it is built-in
#[cfg(not(feature = "std"))]
use micromath::F32Ext;

/// DDS tone settings for one pair
///
/// A single tone is generated, with Q leading I by 90 degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TonePlan {
    /// Tone 1 is driven; when false both tones are scaled to zero
    pub enabled: bool,
    /// Tone frequency in Hz
    pub frequency_hz: i64,
    /// Q phase in degrees (I sits 90 degrees behind)
    pub phase_deg: f32,
    /// Tone level in dBFS (0 dBFS is full scale)
    pub scale_dbfs: f32,
}

impl TonePlan {
    /// Enabled tone
    #[must_use]
    pub const fn new(frequency_hz: i64, phase_deg: f32, scale_dbfs: f32) -> Self {
        Self {
            enabled: true,
            frequency_hz,
            phase_deg,
            scale_dbfs,
        }
    }

    /// Silent pair
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            frequency_hz: 0,
            phase_deg: 0.0,
            scale_dbfs: 0.0,
        }
    }

    /// Linear tone scale
    #[must_use]
    pub fn linear_scale(&self) -> f32 {
        dbfs_to_linear(self.scale_dbfs)
    }

    /// I phase in millidegrees
    #[must_use]
    pub fn i_phase_mdeg(&self) -> i64 {
        to_mdeg(normalize_degrees(self.phase_deg - 90.0))
    }

    /// Q phase in millidegrees
    #[must_use]
    pub fn q_phase_mdeg(&self) -> i64 {
        to_mdeg(normalize_degrees(self.phase_deg))
    }
}

/// Transmit NCO settings for one pair (PHY output channel)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TxPathPlan {
    /// Output channel enable
    pub enabled: bool,
    /// Fine NCO gain scale
    pub gain_scale: f32,
    /// Fine NCO frequency in Hz
    pub nco_frequency_hz: i64,
    /// Fine NCO phase in millidegrees
    pub nco_phase_mdeg: i64,
    /// Coarse NCO frequency in Hz
    pub main_nco_frequency_hz: i64,
    /// Coarse NCO phase in millidegrees
    pub main_nco_phase_mdeg: i64,
}

impl TxPathPlan {
    /// Enabled transmit path
    #[must_use]
    pub const fn new(
        gain_scale: f32,
        nco_frequency_hz: i64,
        nco_phase_mdeg: i64,
        main_nco_frequency_hz: i64,
        main_nco_phase_mdeg: i64,
    ) -> Self {
        Self {
            enabled: true,
            gain_scale,
            nco_frequency_hz,
            nco_phase_mdeg,
            main_nco_frequency_hz,
            main_nco_phase_mdeg,
        }
    }
}

/// Receive NCO settings for one pair (PHY input channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxPathPlan {
    /// Fine NCO frequency in Hz
    pub nco_frequency_hz: i64,
    /// Fine NCO phase in millidegrees
    pub nco_phase_mdeg: i64,
    /// Coarse NCO frequency in Hz
    pub main_nco_frequency_hz: i64,
    /// Coarse NCO phase in millidegrees
    pub main_nco_phase_mdeg: i64,
}

impl RxPathPlan {
    /// Receive path settings
    #[must_use]
    pub const fn new(
        nco_frequency_hz: i64,
        nco_phase_mdeg: i64,
        main_nco_frequency_hz: i64,
        main_nco_phase_mdeg: i64,
    ) -> Self {
        Self {
            nco_frequency_hz,
            nco_phase_mdeg,
            main_nco_frequency_hz,
            main_nco_phase_mdeg,
        }
    }
}

/// Outcome of a configuration pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetupSummary {
    /// Writes attempted
    pub writes: usize,
    /// Writes (or lookups) that failed
    pub failures: usize,
}

impl SetupSummary {
    /// Check if every write was accepted
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failures == 0
    }

    /// Combine two summaries
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            writes: self.writes + other.writes,
            failures: self.failures + other.failures,
        }
    }

    fn record<E: core::fmt::Display>(&mut self, result: Result<(), E>, what: &str, id: ChannelId) {
        self.writes += 1;
        if let Err(err) = result {
            self.failures += 1;
            warn!(channel = %id, attr = what, %err, "configuration write failed");
        }
    }
}

/// Convert a dBFS level to a linear tone scale
///
/// The input range is not checked; the tone generator accepts 0.0-1.0.
#[must_use]
pub fn dbfs_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Wrap an angle in degrees into `[0, 360)`
#[must_use]
pub fn normalize_degrees(degrees: f32) -> f32 {
    let wrapped = degrees % 360.0;
    let wrapped = if wrapped < 0.0 { wrapped + 360.0 } else { wrapped };
    // Tiny negative inputs round up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_mdeg(degrees: f32) -> i64 {
    (degrees * 1000.0) as i64
}

/// Program the DDS tones of the configured pairs
///
/// Plans are matched to pairs by index; extra plans are ignored. Enabled
/// tones finish with a `raw = true` request through the arbiter, which is
/// refused (and counted) on pairs held by processed/input.
pub fn configure_tones<B: TxBackend>(
    arbiter: &mut ModeArbiter<B>,
    plans: &[TonePlan],
) -> SetupSummary {
    let mut summary = SetupSummary::default();

    for (id, plan) in arbiter.all_channels().iter().zip(plans) {
        let Ok(channel) = arbiter.channel(id) else {
            continue;
        };
        let handles = channel.handles().clone();
        let backend = arbiter.backend_mut();

        // Only tone 1 is used
        let silent = AttrValue::Float(0.0);
        for sub in SubChannel::BOTH {
            let result = backend.write_attribute(handles.tone(Tone::F2, sub), attrs::SCALE, silent);
            summary.record(result, attrs::SCALE, id);
        }

        if !plan.enabled {
            for sub in SubChannel::BOTH {
                let tone = handles.tone(Tone::F1, sub);
                let result = backend.write_attribute(tone, attrs::SCALE, silent);
                summary.record(result, attrs::SCALE, id);
            }
            debug!(channel = %id, "tone disabled");
            continue;
        }

        let scale = f64::from(plan.linear_scale());
        for sub in SubChannel::BOTH {
            let tone = handles.tone(Tone::F1, sub);
            let phase = match sub {
                SubChannel::I => plan.i_phase_mdeg(),
                SubChannel::Q => plan.q_phase_mdeg(),
            };
            let frequency = AttrValue::Int(plan.frequency_hz);
            let result = backend.write_attribute(tone, attrs::FREQUENCY, frequency);
            summary.record(result, attrs::FREQUENCY, id);
            let result = backend.write_attribute(tone, attrs::SCALE, AttrValue::Float(scale));
            summary.record(result, attrs::SCALE, id);
            let result = backend.write_attribute(tone, attrs::PHASE, AttrValue::Int(phase));
            summary.record(result, attrs::PHASE, id);
        }

        summary.record(arbiter.set_raw(id, true), attrs::RAW, id);
        debug!(channel = %id, frequency_hz = plan.frequency_hz, "tone configured");
    }

    summary
}

/// Program the transmit NCOs on the PHY output channels
///
/// Attributes written on the I channel apply to both I and Q.
pub fn configure_tx_paths<B: TxBackend>(
    arbiter: &mut ModeArbiter<B>,
    plans: &[TxPathPlan],
) -> SetupSummary {
    let mut summary = SetupSummary::default();

    for (id, plan) in arbiter.all_channels().iter().zip(plans) {
        let backend = arbiter.backend_mut();
        let Some(channel) = phy_channel(backend, id, true, &mut summary) else {
            continue;
        };

        let writes = [
            (attrs::MAIN_NCO_FREQUENCY, AttrValue::Int(plan.main_nco_frequency_hz)),
            (attrs::MAIN_NCO_PHASE, AttrValue::Int(plan.main_nco_phase_mdeg)),
            (attrs::CHANNEL_NCO_FREQUENCY, AttrValue::Int(plan.nco_frequency_hz)),
            (attrs::CHANNEL_NCO_PHASE, AttrValue::Int(plan.nco_phase_mdeg)),
            (attrs::CHANNEL_NCO_GAIN_SCALE, AttrValue::Float(f64::from(plan.gain_scale))),
            (attrs::EN, AttrValue::Bool(plan.enabled)),
        ];
        for (name, value) in writes {
            summary.record(backend.write_attribute(&channel, name, value), name, id);
        }
    }

    summary
}

/// Program the receive NCOs and the global receive settings
///
/// Test mode, Nyquist zone and loopback are global; they are written once
/// through the first pair.
pub fn configure_rx_paths<B: TxBackend>(
    arbiter: &mut ModeArbiter<B>,
    plans: &[RxPathPlan],
) -> SetupSummary {
    let mut summary = SetupSummary::default();
    let mut globals_done = false;

    for (id, plan) in arbiter.all_channels().iter().zip(plans) {
        let backend = arbiter.backend_mut();
        let Some(channel) = phy_channel(backend, id, false, &mut summary) else {
            continue;
        };

        if !globals_done {
            let globals = [
                (attrs::TEST_MODE, AttrValue::Text("off")),
                (attrs::NYQUIST_ZONE, AttrValue::Text("odd")),
            ];
            for (name, value) in globals {
                summary.record(backend.write_attribute(&channel, name, value), name, id);
            }
            let loopback = AttrValue::Int(0);
            let result =
                backend.write_device_attribute(DeviceRole::Phy, attrs::LOOPBACK_MODE, loopback);
            summary.record(result, attrs::LOOPBACK_MODE, id);
            globals_done = true;
        }

        let writes = [
            (attrs::MAIN_NCO_FREQUENCY, plan.main_nco_frequency_hz),
            (attrs::MAIN_NCO_PHASE, plan.main_nco_phase_mdeg),
            (attrs::CHANNEL_NCO_FREQUENCY, plan.nco_frequency_hz),
            (attrs::CHANNEL_NCO_PHASE, plan.nco_phase_mdeg),
        ];
        for (name, value) in writes {
            let result = backend.write_attribute(&channel, name, AttrValue::Int(value));
            summary.record(result, name, id);
        }
    }

    summary
}

fn phy_channel<B: TxBackend>(
    backend: &B,
    id: ChannelId,
    is_output: bool,
    summary: &mut SetupSummary,
) -> Option<B::Channel> {
    let name = id.dac_name(SubChannel::I);
    match backend.find_channel(DeviceRole::Phy, &name, is_output) {
        Ok(channel) => Some(channel),
        Err(err) => {
            summary.failures += 1;
            warn!(channel = %name, is_output, %err, "PHY channel not found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbfs_conversion() {
        assert!((dbfs_to_linear(0.0) - 1.0).abs() < 1e-4);
        assert!((dbfs_to_linear(-20.0) - 0.1).abs() < 1e-3);
        assert!((dbfs_to_linear(-6.0) - 0.501).abs() < 1e-2);
    }

    #[test]
    fn degree_normalization() {
        assert!((normalize_degrees(0.0)).abs() < 1e-4);
        assert!((normalize_degrees(-90.0) - 270.0).abs() < 1e-4);
        assert!((normalize_degrees(450.0) - 90.0).abs() < 1e-4);
        assert!((normalize_degrees(360.0)).abs() < 1e-4);
    }

    #[test]
    fn quadrature_phases() {
        let plan = TonePlan::new(1_000_000, 90.0, -12.0);
        assert_eq!(plan.i_phase_mdeg(), 0);
        assert_eq!(plan.q_phase_mdeg(), 90_000);

        let plan = TonePlan::new(1_000_000, 45.0, -12.0);
        assert_eq!(plan.i_phase_mdeg(), 315_000);
        assert_eq!(plan.q_phase_mdeg(), 45_000);
    }

    #[test]
    fn summary_merge() {
        let a = SetupSummary { writes: 3, failures: 1 };
        let b = SetupSummary { writes: 2, failures: 0 };
        assert_eq!(a.merge(b), SetupSummary { writes: 5, failures: 1 });
        assert!(!a.is_clean());
        assert!(b.is_clean());
    }
}
