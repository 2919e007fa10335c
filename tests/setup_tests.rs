//! Tests for the configuration glue
//!
//! Tests that the default tables land on the right channels and that
//! failed writes are counted instead of aborting the pass.
//! Run with: cargo test --features std --test setup_tests

use std::time::Duration;

use ad9081_tx::backend::{BackendError, DeviceRole, TxBackend, EBUSY};
use ad9081_tx::config::{DEFAULT_RX_PATHS, DEFAULT_TONES, DEFAULT_TX_PATHS};
use ad9081_tx::prelude::*;
use ad9081_tx::setup::{
    configure_rx_paths, configure_tones, configure_tx_paths, dbfs_to_linear, TonePlan,
};
use ad9081_tx::sim::{SimChannel, SimValue};

fn arbiter(sim: SimTxDevice) -> ModeArbiter<SimTxDevice> {
    let config = TxConfig {
        settle_time: Duration::ZERO,
        ..TxConfig::with_channels(sim.pair_count())
    };
    ModeArbiter::discover(sim, config).unwrap()
}

fn ch(index: u8) -> ChannelId {
    ChannelId::new(index).unwrap()
}

fn tone(pair: u8, tone: Tone, sub: SubChannel) -> SimChannel {
    SimChannel::Tone { pair, tone, sub }
}

fn float(value: Option<&SimValue>) -> f64 {
    match value {
        Some(SimValue::Float(v)) => *v,
        other => panic!("expected float, got {other:?}"),
    }
}

// =============================================================================
// Tone Tests
// =============================================================================

#[test]
fn test_tones_programmed_from_table() {
    let mut arbiter = arbiter(SimTxDevice::new(8));
    arbiter.set_raw(ch(0), false).unwrap();

    let summary = configure_tones(&mut arbiter, &DEFAULT_TONES);
    assert!(summary.is_clean(), "{summary:?}");

    let sim = arbiter.backend();
    let i = tone(0, Tone::F1, SubChannel::I);
    let q = tone(0, Tone::F1, SubChannel::Q);
    assert_eq!(sim.attribute(i, "frequency"), Some(&SimValue::Int(4_018_290)));
    assert_eq!(sim.attribute(q, "frequency"), Some(&SimValue::Int(4_018_290)));
    assert_eq!(sim.attribute(i, "phase"), Some(&SimValue::Int(0)));
    assert_eq!(sim.attribute(q, "phase"), Some(&SimValue::Int(90_000)));
    let expected = f64::from(dbfs_to_linear(-12.0));
    assert!((float(sim.attribute(i, "scale")) - expected).abs() < 1e-6);

    // Tone 2 always silent
    for sub in SubChannel::BOTH {
        assert_eq!(float(sim.attribute(tone(0, Tone::F2, sub), "scale")), 0.0);
    }

    // raw went through the arbiter
    assert!(arbiter.raw_requested(ch(0)).unwrap());
    assert_eq!(arbiter.read_register(ch(0)).unwrap(), ControlWord::Dds);
}

#[test]
fn test_disabled_tone_scaled_to_zero() {
    let mut arbiter = arbiter(SimTxDevice::new(4));
    let plans = [TonePlan::disabled(); 4];

    let summary = configure_tones(&mut arbiter, &plans);
    // Four scale writes per pair, no raw request
    assert_eq!(summary.writes, 16);
    assert!(summary.is_clean());

    let sim = arbiter.backend();
    for pair in 0..4 {
        for t in [Tone::F1, Tone::F2] {
            for sub in SubChannel::BOTH {
                assert_eq!(float(sim.attribute(tone(pair, t, sub), "scale")), 0.0);
            }
        }
        assert_eq!(sim.attribute(tone(pair, Tone::F1, SubChannel::I), "frequency"), None);
    }
}

#[test]
fn test_tone_raw_refused_under_processed_is_counted() {
    let mut arbiter = arbiter(SimTxDevice::new(2).with_processed(1));
    let summary = configure_tones(&mut arbiter, &DEFAULT_TONES);

    assert_eq!(summary.failures, 1);
    assert!(arbiter.processed_enabled(ch(1)).unwrap());
    assert_eq!(arbiter.read_register(ch(1)).unwrap(), ControlWord::Dma);
}

#[test]
fn test_tone_write_failure_does_not_stop_pass() {
    let mut arbiter = arbiter(SimTxDevice::new(1));
    arbiter.backend().fail_next_write(BackendError::Errno(EBUSY));

    let summary = configure_tones(&mut arbiter, &DEFAULT_TONES);
    assert_eq!(summary.failures, 1);
    // Two tone 2 scales, three attributes on each tone 1 channel, raw
    assert_eq!(summary.writes, 9);
    assert_eq!(
        arbiter
            .backend()
            .attribute(tone(0, Tone::F1, SubChannel::Q), "frequency"),
        Some(&SimValue::Int(4_018_290))
    );
}

#[test]
fn test_extra_plans_ignored() {
    let mut arbiter = arbiter(SimTxDevice::new(2));
    let summary = configure_tones(&mut arbiter, &DEFAULT_TONES);
    assert_eq!(summary.writes, 18);
}

// =============================================================================
// NCO Path Tests
// =============================================================================

#[test]
fn test_tx_paths_written_on_phy_outputs() {
    let mut arbiter = arbiter(SimTxDevice::new(8));
    let summary = configure_tx_paths(&mut arbiter, &DEFAULT_TX_PATHS);
    assert_eq!(summary.writes, 8 * 6);
    assert!(summary.is_clean());

    let sim = arbiter.backend();
    let out3 = sim.find_channel(DeviceRole::Phy, "voltage3_i", true).unwrap();
    assert_eq!(sim.attribute(out3, "main_nco_frequency"), Some(&SimValue::Int(400_000_000)));
    assert_eq!(sim.attribute(out3, "channel_nco_frequency"), Some(&SimValue::Int(100_000_000)));
    assert_eq!(sim.attribute(out3, "channel_nco_phase"), Some(&SimValue::Int(2000)));
    assert_eq!(sim.attribute(out3, "en"), Some(&SimValue::Bool(true)));
    assert!((float(sim.attribute(out3, "channel_nco_gain_scale")) - 0.500_122_1).abs() < 1e-6);

    // Input direction untouched
    let in3 = sim.find_channel(DeviceRole::Phy, "voltage3_i", false).unwrap();
    assert_eq!(sim.attribute(in3, "main_nco_frequency"), None);
}

#[test]
fn test_rx_paths_and_globals() {
    let mut arbiter = arbiter(SimTxDevice::new(8));
    let summary = configure_rx_paths(&mut arbiter, &DEFAULT_RX_PATHS);
    assert_eq!(summary.writes, 3 + 8 * 4);
    assert!(summary.is_clean());

    let sim = arbiter.backend();
    let in0 = sim.find_channel(DeviceRole::Phy, "voltage0_i", false).unwrap();
    assert_eq!(sim.attribute(in0, "test_mode"), Some(&SimValue::Text("off".into())));
    assert_eq!(sim.attribute(in0, "nyquist_zone"), Some(&SimValue::Text("odd".into())));
    assert_eq!(sim.device_attribute(DeviceRole::Phy, "loopback_mode"), Some(&SimValue::Int(0)));

    let in7 = sim.find_channel(DeviceRole::Phy, "voltage7_i", false).unwrap();
    assert_eq!(sim.attribute(in7, "channel_nco_frequency"), Some(&SimValue::Int(80_000_000)));
    assert_eq!(sim.attribute(in7, "main_nco_phase"), Some(&SimValue::Int(1000)));
    // Globals only go through the first pair
    assert_eq!(sim.attribute(in7, "test_mode"), None);
}

#[test]
fn test_missing_phy_channel_counted() {
    let sim = SimTxDevice::new(2).without_channel(DeviceRole::Phy, "voltage1_i");
    let mut arbiter = arbiter(sim);

    let summary = configure_tx_paths(&mut arbiter, &DEFAULT_TX_PATHS);
    assert_eq!(summary.writes, 6);
    assert_eq!(summary.failures, 1);

    // The hidden name covers both directions
    let summary = configure_rx_paths(&mut arbiter, &DEFAULT_RX_PATHS);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.writes, 3 + 4);
}
