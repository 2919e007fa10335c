//! Tests for the simulated AD9081 driver
//!
//! The simulator has to refuse the same requests the patched driver does,
//! otherwise arbiter tests against it prove nothing.
//! Run with: cargo test --features std --test sim_tests

use ad9081_tx::backend::{AttrKind, AttrValue, BackendError, DeviceRole, TxBackend, EBUSY, EINVAL};
use ad9081_tx::sim::{SimChannel, SimTxDevice, SimValue};
use ad9081_tx::types::{ControlWord, SubChannel, Tone};

fn dac(pair: u8, sub: SubChannel) -> SimChannel {
    SimChannel::Dac { pair, sub }
}

fn tone1_i(pair: u8) -> SimChannel {
    SimChannel::Tone {
        pair,
        tone: Tone::F1,
        sub: SubChannel::I,
    }
}

// =============================================================================
// Boot State Tests
// =============================================================================

#[test]
fn test_boots_with_tone_generator_on() {
    let sim = SimTxDevice::new(8);
    assert_eq!(sim.pair_count(), 8);
    for pair in 0..8 {
        assert_eq!(sim.raw(pair), Some(true));
        assert_eq!(sim.input(pair), Some(false));
        assert_eq!(sim.control_word(pair), Some(ControlWord::Dds));
    }
    assert!(!sim.buffer_open());
}

#[test]
fn test_pair_count_capped() {
    assert_eq!(SimTxDevice::new(40).pair_count(), 16);
}

// =============================================================================
// Driver Refusal Tests
// =============================================================================

#[test]
fn test_raw_refused_while_input_engaged() {
    let mut sim = SimTxDevice::new(1);
    sim.write_attribute(&dac(0, SubChannel::I), "input", AttrValue::Bool(true))
        .unwrap();

    for value in [false, true] {
        assert_eq!(
            sim.write_attribute(&tone1_i(0), "raw", AttrValue::Bool(value)),
            Err(BackendError::Errno(EBUSY))
        );
    }
    assert_eq!(sim.raw(0), Some(true));
    assert_eq!(sim.control_word(0), Some(ControlWord::Dma));
}

#[test]
fn test_input_refused_while_streaming() {
    let mut sim = SimTxDevice::new(1);
    sim.enable_channel(&dac(0, SubChannel::I));
    sim.enable_channel(&dac(0, SubChannel::Q));
    let buffer = sim.open_buffer(1024, false).unwrap();

    assert_eq!(
        sim.write_attribute(&dac(0, SubChannel::I), "input", AttrValue::Bool(true)),
        Err(BackendError::Errno(EBUSY))
    );
    // Releasing is always accepted
    sim.write_attribute(&dac(0, SubChannel::I), "input", AttrValue::Bool(false))
        .unwrap();

    sim.close_buffer(buffer);
    assert_eq!(sim.streaming(0), Some(false));
}

#[test]
fn test_buffer_refused_while_input_engaged() {
    let mut sim = SimTxDevice::new(2).with_processed(1);
    sim.enable_channel(&dac(1, SubChannel::I));
    assert_eq!(sim.open_buffer(1024, false), Err(BackendError::Errno(EBUSY)));
    assert!(!sim.buffer_open());
}

#[test]
fn test_one_buffer_at_a_time() {
    let mut sim = SimTxDevice::new(2);
    sim.enable_channel(&dac(0, SubChannel::I));
    let buffer = sim.open_buffer(1024, true).unwrap();
    assert!(buffer.cyclic());
    assert_eq!(sim.open_buffer(1024, false), Err(BackendError::Errno(EBUSY)));
    sim.close_buffer(buffer);
    assert!(!sim.buffer_open());
}

#[test]
fn test_buffer_needs_enabled_channels() {
    let mut sim = SimTxDevice::new(2);
    assert_eq!(sim.open_buffer(1024, false), Err(BackendError::Errno(EINVAL)));
}

#[test]
fn test_malformed_raw_value_rejected() {
    let mut sim = SimTxDevice::new(1);
    assert_eq!(
        sim.write_attribute(&tone1_i(0), "raw", AttrValue::Text("yes")),
        Err(BackendError::Errno(EINVAL))
    );
}

#[test]
fn test_dropped_buffer_is_destroyed() {
    let mut sim = SimTxDevice::new(2);
    sim.enable_channel(&dac(0, SubChannel::I));
    let buffer = sim.open_buffer(1024, false).unwrap();
    assert_eq!(sim.control_word(0), Some(ControlWord::Dma));

    drop(buffer);
    assert!(!sim.buffer_open());
    assert_eq!(sim.streaming(0), Some(false));
    assert_eq!(sim.control_word(0), Some(ControlWord::Dds));

    // Processed input and a new buffer are accepted again
    sim.write_attribute(&dac(0, SubChannel::I), "input", AttrValue::Bool(true))
        .unwrap();
    sim.write_attribute(&dac(0, SubChannel::I), "input", AttrValue::Bool(false))
        .unwrap();
    assert!(sim.open_buffer(1024, false).is_ok());
}

#[test]
fn test_restoring_driver_raises_raw_on_release() {
    let mut sim = SimTxDevice::new(2).restoring_dds();
    sim.write_attribute(&tone1_i(0), "raw", AttrValue::Bool(false)).unwrap();
    sim.write_attribute(&tone1_i(1), "raw", AttrValue::Bool(false)).unwrap();

    sim.enable_channel(&dac(0, SubChannel::I));
    let buffer = sim.open_buffer(1024, false).unwrap();
    sim.close_buffer(buffer);
    assert_eq!(sim.raw(0), Some(true));
    assert_eq!(sim.control_word(0), Some(ControlWord::Dds));
    // Pair 1 was not streamed
    assert_eq!(sim.raw(1), Some(false));

    sim.write_attribute(&dac(1, SubChannel::I), "input", AttrValue::Bool(true))
        .unwrap();
    sim.write_attribute(&dac(1, SubChannel::I), "input", AttrValue::Bool(false))
        .unwrap();
    assert_eq!(sim.raw(1), Some(true));
}

// =============================================================================
// Register Tests
// =============================================================================

#[test]
fn test_registers_follow_driver_flags() {
    let mut sim = SimTxDevice::new(2);

    sim.write_attribute(&tone1_i(0), "raw", AttrValue::Bool(false)).unwrap();
    assert_eq!(sim.read_device_register(0x418), Ok(0x3));
    assert_eq!(sim.read_device_register(0x458), Ok(0x3));
    // Pair 1 untouched
    assert_eq!(sim.read_device_register(0x498), Ok(0x0));

    sim.enable_channel(&dac(0, SubChannel::I));
    sim.enable_channel(&dac(0, SubChannel::Q));
    let buffer = sim.open_buffer(0x20000, false).unwrap();
    assert_eq!(sim.read_device_register(0x418), Ok(0x2));
    assert_eq!(sim.read_device_register(0x498), Ok(0x0));

    sim.close_buffer(buffer);
    assert_eq!(sim.read_device_register(0x418), Ok(0x3));
}

// =============================================================================
// Attribute Store Tests
// =============================================================================

#[test]
fn test_generic_attributes_round_trip() {
    let mut sim = SimTxDevice::new(1);
    let phy = sim.find_channel(DeviceRole::Phy, "voltage0_i", true).unwrap();

    sim.write_attribute(&phy, "main_nco_frequency", AttrValue::Int(100_000_000))
        .unwrap();
    assert_eq!(
        sim.read_attribute(&phy, "main_nco_frequency", AttrKind::Int),
        Ok(AttrValue::Int(100_000_000))
    );
    assert_eq!(
        sim.attribute(phy, "main_nco_frequency"),
        Some(&SimValue::Int(100_000_000))
    );
    assert_eq!(
        sim.read_attribute(&phy, "channel_nco_phase", AttrKind::Int),
        Err(BackendError::NotFound)
    );
}

#[test]
fn test_device_attributes_stored() {
    let mut sim = SimTxDevice::new(1);
    sim.write_device_attribute(DeviceRole::Phy, "loopback_mode", AttrValue::Int(0))
        .unwrap();
    assert_eq!(
        sim.device_attribute(DeviceRole::Phy, "loopback_mode"),
        Some(&SimValue::Int(0))
    );
    assert_eq!(sim.device_attribute(DeviceRole::Dac, "loopback_mode"), None);
}

// =============================================================================
// Fault Injection Tests
// =============================================================================

#[test]
fn test_injected_write_failure_is_one_shot() {
    let mut sim = SimTxDevice::new(1);
    sim.fail_next_write(BackendError::Errno(EBUSY));

    assert_eq!(
        sim.write_attribute(&tone1_i(0), "raw", AttrValue::Bool(false)),
        Err(BackendError::Errno(EBUSY))
    );
    assert_eq!(sim.raw(0), Some(true));

    sim.write_attribute(&tone1_i(0), "raw", AttrValue::Bool(false)).unwrap();
    assert_eq!(sim.raw(0), Some(false));
    assert_eq!(sim.write_count(), 2);
}

#[test]
fn test_injected_buffer_failure_is_one_shot() {
    let mut sim = SimTxDevice::new(1);
    sim.enable_channel(&dac(0, SubChannel::I));
    sim.fail_next_buffer();
    assert_eq!(sim.open_buffer(16, false), Err(BackendError::BufferUnavailable));
    assert!(sim.open_buffer(16, false).is_ok());
}

#[test]
fn test_hidden_channel_not_found() {
    let sim = SimTxDevice::new(2).without_channel(DeviceRole::Dac, "voltage1_q");
    assert!(sim.find_channel(DeviceRole::Dac, "voltage1_i", true).is_ok());
    assert_eq!(
        sim.find_channel(DeviceRole::Dac, "voltage1_q", true),
        Err(BackendError::NotFound)
    );
    // Same name on the PHY device still resolves
    assert!(sim.find_channel(DeviceRole::Phy, "voltage1_q", true).is_ok());
}
