//! Hardware Collaborator Interface
//!
//! The arbiter never talks to libiio directly. Everything it needs from the
//! hardware goes through `TxBackend`: channel lookup, attribute access,
//! the buffer scan mask, buffer lifetime and a read-only register peek.

use core::fmt;

use thiserror::Error;

use crate::config::devices;

/// Errno reported by the driver when a mode conflict blocks a request
pub const EBUSY: i32 = 16;

/// Errno reported for a missing channel, device or attribute
pub const ENOENT: i32 = 2;

/// Errno for a generic I/O failure
pub const EIO: i32 = 5;

/// Errno reported when the device is gone
pub const ENODEV: i32 = 19;

/// Errno reported when a driver call timed out
pub const ETIMEDOUT: i32 = 110;

/// Errno reported for a malformed attribute value
pub const EINVAL: i32 = 22;

/// Collaborator operation result
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by the hardware collaborator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Requested device, channel or attribute does not exist
    #[error("not found")]
    NotFound,
    /// Driver call failed with an errno code
    #[error("driver error (errno {0})")]
    Errno(i32),
    /// Buffer could not be created
    #[error("buffer unavailable")]
    BufferUnavailable,
    /// Attribute value did not parse as the requested kind
    #[error("unexpected attribute value")]
    BadValue,
}

impl BackendError {
    /// Check if the driver refused the call as busy
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Errno(EBUSY))
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BackendError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::NotFound => defmt::write!(f, "NotFound"),
            Self::Errno(code) => defmt::write!(f, "Errno({})", code),
            Self::BufferUnavailable => defmt::write!(f, "BufferUnavailable"),
            Self::BadValue => defmt::write!(f, "BadValue"),
        }
    }
}

/// Which of the two AD9081 IIO devices an operation targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceRole {
    /// DAC/TPL device (DDS, DMA, registers)
    Dac,
    /// PHY device (NCO configuration)
    Phy,
}

impl DeviceRole {
    /// IIO device name
    #[must_use]
    pub const fn iio_name(self) -> &'static str {
        match self {
            Self::Dac => devices::DAC,
            Self::Phy => devices::PHY,
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.iio_name())
    }
}

/// Attribute value written to (or read from) the driver
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttrValue<'a> {
    /// Boolean attribute
    Bool(bool),
    /// Integer attribute
    Int(i64),
    /// Floating-point attribute
    Float(f64),
    /// Free-form text attribute
    Text(&'a str),
}

impl AttrValue<'_> {
    /// Boolean payload, if this is a boolean
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Kind of value expected from an attribute read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrKind {
    /// Read as boolean
    Bool,
    /// Read as integer
    Int,
    /// Read as float
    Float,
}

/// Hardware collaborator used by the mode arbiter
///
/// Implemented by the libiio adapter on real hardware and by the
/// in-memory simulator for host tests.
pub trait TxBackend {
    /// Channel handle
    type Channel: Clone;

    /// Open sample buffer handle
    type Buffer;

    /// Look up a channel by name on one of the devices
    fn find_channel(
        &self,
        device: DeviceRole,
        name: &str,
        is_output: bool,
    ) -> BackendResult<Self::Channel>;

    /// Write a channel attribute
    fn write_attribute(
        &mut self,
        channel: &Self::Channel,
        name: &str,
        value: AttrValue<'_>,
    ) -> BackendResult<()>;

    /// Read a channel attribute
    fn read_attribute(
        &self,
        channel: &Self::Channel,
        name: &str,
        kind: AttrKind,
    ) -> BackendResult<AttrValue<'static>>;

    /// Write a device-wide attribute
    fn write_device_attribute(
        &mut self,
        device: DeviceRole,
        name: &str,
        value: AttrValue<'_>,
    ) -> BackendResult<()>;

    /// Add a channel to the DAC device's buffer scan mask
    fn enable_channel(&mut self, channel: &Self::Channel);

    /// Remove a channel from the DAC device's buffer scan mask
    fn disable_channel(&mut self, channel: &Self::Channel);

    /// Create a sample buffer on the DAC device over the enabled channels
    fn open_buffer(&mut self, sample_count: usize, cyclic: bool) -> BackendResult<Self::Buffer>;

    /// Release a sample buffer
    fn close_buffer(&mut self, buffer: Self::Buffer);

    /// Direct register peek on the DAC device (verification only)
    fn read_device_register(&self, address: u32) -> BackendResult<u32>;
}

/// Recover an errno code from a driver error message
///
/// Understands the `(os error N)` suffix of OS errors and the symbolic
/// `EBUSY: ...` prefix of errno names. `None` when neither is present.
#[must_use]
pub fn errno_from_message(message: &str) -> Option<i32> {
    if let Some((_, rest)) = message.rsplit_once("os error ") {
        let digits = rest.trim_end_matches(|c: char| !c.is_ascii_digit());
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|word| match word {
            "ENOENT" => Some(ENOENT),
            "EIO" => Some(EIO),
            "EBUSY" => Some(EBUSY),
            "ENODEV" => Some(ENODEV),
            "EINVAL" => Some(EINVAL),
            "ETIMEDOUT" => Some(ETIMEDOUT),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_from_os_error() {
        assert_eq!(errno_from_message("Device or resource busy (os error 16)"), Some(EBUSY));
        assert_eq!(errno_from_message("Invalid argument (os error 22)"), Some(EINVAL));
        assert_eq!(errno_from_message("No such device (os error 19)"), Some(ENODEV));
    }

    #[test]
    fn errno_from_symbolic_name() {
        assert_eq!(errno_from_message("EBUSY: Device or resource busy"), Some(EBUSY));
        assert_eq!(errno_from_message("ETIMEDOUT: Connection timed out"), Some(ETIMEDOUT));
        assert_eq!(errno_from_message("ENOENT: No such file or directory"), Some(ENOENT));
        assert_eq!(errno_from_message("Error: EINVAL: Invalid argument"), Some(EINVAL));
    }

    #[test]
    fn errno_unknown_message() {
        assert_eq!(errno_from_message("Wrong data type"), None);
        assert_eq!(errno_from_message("Error reading buffer"), None);
        assert_eq!(errno_from_message(""), None);
    }
}
