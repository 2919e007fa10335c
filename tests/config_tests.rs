//! Configuration and Constants Tests
//!
//! Tests to verify configuration values are valid and consistent.
//! Run with: cargo test --features std --test config_tests

use std::time::Duration;

use ad9081_tx::config::*;

// =============================================================================
// Register Map Tests
// =============================================================================

#[test]
fn test_register_map_constants() {
    assert_eq!(regs::DAC_CH_REG_BASE, 0x400);
    assert_eq!(regs::DAC_CH_REG_STEP, 0x40);
    assert_eq!(regs::DAC_CH_CTRL_OFFSET, 0x18);
}

#[test]
fn test_control_registers_do_not_overlap() {
    let addrs: Vec<u32> = (0..(MAX_TX_CHANNELS as u8) * 2).map(regs::ctrl_register).collect();
    for pair in addrs.windows(2) {
        assert_eq!(pair[1] - pair[0], regs::DAC_CH_REG_STEP);
    }
}

// =============================================================================
// Device and Channel Limits
// =============================================================================

#[test]
fn test_device_names() {
    assert_eq!(devices::DAC, "axi-ad9081-tx-hpc");
    assert_eq!(devices::PHY, "axi-ad9081-rx-hpc");
}

#[test]
fn test_channel_limits() {
    assert_eq!(DEFAULT_TX_CHANNELS, 8);
    assert!(DEFAULT_TX_CHANNELS <= MAX_TX_CHANNELS);
    // ChannelSet is a 16-bit mask
    assert_eq!(MAX_TX_CHANNELS, 16);
}

// =============================================================================
// TxConfig Tests
// =============================================================================

#[test]
fn test_tx_config_default() {
    let config = TxConfig::default();
    assert_eq!(config.channels, 8);
    assert_eq!(config.buffer_samples_per_channel, 0x10000);
    assert!(!config.cyclic);
    assert_eq!(config.settle_time, Duration::from_millis(500));
}

#[test]
fn test_tx_config_buffer_samples() {
    let config = TxConfig::default();
    // 64K samples per channel, I and Q per pair
    assert_eq!(config.buffer_samples(8), 0x10000 * 8 * 2);
    assert_eq!(config.buffer_samples(1), 0x20000);
}

#[test]
fn test_tx_config_channels_clamped() {
    assert_eq!(TxConfig::with_channels(0).channels, 1);
    assert_eq!(TxConfig::with_channels(4).channels, 4);
    assert_eq!(TxConfig::with_channels(64).channels, MAX_TX_CHANNELS);
}

// =============================================================================
// Default Tables
// =============================================================================

#[test]
fn test_default_tables_cover_default_channels() {
    assert_eq!(DEFAULT_RX_PATHS.len(), DEFAULT_TX_CHANNELS);
    assert_eq!(DEFAULT_TX_PATHS.len(), DEFAULT_TX_CHANNELS);
    assert_eq!(DEFAULT_TONES.len(), DEFAULT_TX_CHANNELS);
}

#[test]
fn test_default_tones_in_range() {
    for tone in DEFAULT_TONES.iter().filter(|t| t.enabled) {
        assert!(tone.scale_dbfs <= 0.0);
        let scale = tone.linear_scale();
        assert!(scale > 0.0 && scale <= 1.0);
    }
    // Pair 3 is silent
    assert!(!DEFAULT_TONES[3].enabled);
}

#[test]
fn test_default_tx_gain_in_range() {
    for path in &DEFAULT_TX_PATHS {
        assert!(path.enabled);
        assert!(path.gain_scale > 0.0 && path.gain_scale <= 1.0);
    }
}
