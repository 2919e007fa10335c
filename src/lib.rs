//! AD9081 Transmit Mode Arbitration Library
//!
//! This library decides which source drives each I/Q channel pair of an
//! AD9081 MxFE transmitter: the DDS tone generator, a streamed DMA buffer
//! or processed/input samples written without a buffer. Conflicting
//! requests are refused with `Busy` and leave every channel untouched.
//!
//! # Architecture
//!
//! The library is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    APPLICATION LAYER                         │
//! │  Self-Test  │  Setup Tables  │  ad9081-patch-test CLI        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    ARBITRATION LAYER                         │
//! │  ModeArbiter  │  ChannelState transitions  │  StreamBuffer   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     BACKEND LAYER                            │
//! │  TxBackend trait  │  libiio (IioBackend)  │  SimTxDevice     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - **Immutable-by-default**: State transitions return new instances
//! - **All or nothing**: A refused or failed request changes no channel
//! - **Functional core, imperative shell**: Decisions are pure, I/O sits in backends
//! - **Explicit error handling**: All fallible operations return `Result`

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Mode Arbitration
///
/// Per-pair mode flags, transition rules and the arbiter that applies them.
pub mod arbiter;

/// Hardware Backend Interface
///
/// The collaborator trait the arbiter drives, and its error type.
pub mod backend;

/// Arbiter error types
pub mod error;

/// Configuration Glue
///
/// NCO and DDS tone tables applied on top of the arbiter.
pub mod setup;

/// In-memory driver simulator for host tests
#[cfg(feature = "std")]
pub mod sim;

/// Processed-input patch self-test
#[cfg(feature = "std")]
pub mod selftest;

/// libiio backend for real hardware
#[cfg(feature = "iio")]
pub mod iio;

/// Shared types used across modules
pub mod types;

/// System configuration and constants
pub mod config;

/// Prelude module for common imports
pub mod prelude {
    //! Convenient re-exports for common types and traits.

    pub use crate::arbiter::{ModeArbiter, StreamBuffer};
    pub use crate::backend::{AttrKind, AttrValue, BackendError, DeviceRole, TxBackend};
    pub use crate::config::{TxConfig, DEFAULT_TX_CHANNELS, MAX_TX_CHANNELS};
    pub use crate::error::{ArbiterError, Blocker};
    pub use crate::types::*;

    #[cfg(feature = "std")]
    pub use crate::sim::SimTxDevice;

    #[cfg(feature = "iio")]
    pub use crate::iio::IioBackend;
}
