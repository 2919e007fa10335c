//! Transmit Mode Arbitration
//!
//! Mutual exclusion between the three sources that can drive a DAC
//! channel pair: the DDS tone generator, a streamed DMA buffer and
//! processed/input writes.

pub mod channel;
pub mod mode_arbiter;

pub use channel::{ChannelHandles, ChannelState};
pub use mode_arbiter::{ModeArbiter, StreamBuffer, TxChannel};
