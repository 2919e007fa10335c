//! libiio Hardware Backend
//!
//! Talks to the AD9081 through an IIO context, either local or remote
//! (`ip:`, `usb:` URIs). Driver errors carry an errno; `EBUSY` from the
//! patched driver is passed through unchanged so that callers can tell a
//! hardware-side refusal from any other failure.
//!
//! The errno is taken from an `io::Error` in the error's source chain, or
//! else parsed from the error messages. Errors that carry neither (wrong
//! data type, bad return size) are reported as `EIO`.

use std::error::Error as StdError;
use std::io;

use industrial_io as iio;
use tracing::{debug, error};

use crate::backend::{
    errno_from_message, AttrKind, AttrValue, BackendError, BackendResult, DeviceRole, TxBackend,
    EIO,
};
use crate::config::devices;

/// AD9081 reached through libiio
pub struct IioBackend {
    dac: iio::Device,
    phy: iio::Device,
}

impl IioBackend {
    /// Open the default context, or the context at `uri`
    ///
    /// # Errors
    ///
    /// `NotFound` if the context cannot be created or either AD9081
    /// device is missing from it.
    pub fn connect(uri: Option<&str>) -> BackendResult<Self> {
        let ctx = match uri {
            Some(uri) => iio::Context::from_uri(uri),
            None => iio::Context::new(),
        }
        .map_err(|err| {
            error!(?uri, %err, "could not create IIO context");
            BackendError::NotFound
        })?;
        Self::from_context(&ctx)
    }

    /// Locate both AD9081 devices in an existing context
    ///
    /// # Errors
    ///
    /// `NotFound` if either device is missing.
    pub fn from_context(ctx: &iio::Context) -> BackendResult<Self> {
        let find = |name: &str| {
            ctx.find_device(name).ok_or_else(|| {
                error!(device = name, "IIO device not found");
                BackendError::NotFound
            })
        };
        let dac = find(devices::DAC)?;
        let phy = find(devices::PHY)?;
        debug!(dac = devices::DAC, phy = devices::PHY, "AD9081 devices found");
        Ok(Self { dac, phy })
    }

    const fn device(&self, role: DeviceRole) -> &iio::Device {
        match role {
            DeviceRole::Dac => &self.dac,
            DeviceRole::Phy => &self.phy,
        }
    }
}

/// Best-effort errno of an IIO error
fn errno(err: &iio::Error) -> i32 {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = source {
        let os_code = cause
            .downcast_ref::<io::Error>()
            .and_then(io::Error::raw_os_error);
        if let Some(code) = os_code.or_else(|| errno_from_message(&cause.to_string())) {
            return code;
        }
        source = cause.source();
    }
    EIO
}

fn map_err(err: &iio::Error) -> BackendError {
    BackendError::Errno(errno(err))
}

impl TxBackend for IioBackend {
    type Channel = iio::Channel;
    type Buffer = iio::Buffer;

    fn find_channel(
        &self,
        device: DeviceRole,
        name: &str,
        is_output: bool,
    ) -> BackendResult<iio::Channel> {
        let dir = if is_output {
            iio::Direction::Output
        } else {
            iio::Direction::Input
        };
        self.device(device)
            .find_channel(name, dir)
            .ok_or(BackendError::NotFound)
    }

    fn write_attribute(
        &mut self,
        channel: &iio::Channel,
        name: &str,
        value: AttrValue<'_>,
    ) -> BackendResult<()> {
        match value {
            AttrValue::Bool(b) => channel.attr_write_bool(name, b),
            AttrValue::Int(v) => channel.attr_write_int(name, v),
            AttrValue::Float(v) => channel.attr_write_float(name, v),
            AttrValue::Text(s) => channel.attr_write_str(name, s),
        }
        .map_err(|err| map_err(&err))
    }

    fn read_attribute(
        &self,
        channel: &iio::Channel,
        name: &str,
        kind: AttrKind,
    ) -> BackendResult<AttrValue<'static>> {
        match kind {
            AttrKind::Bool => channel.attr_read_bool(name).map(AttrValue::Bool),
            AttrKind::Int => channel.attr_read_int(name).map(AttrValue::Int),
            AttrKind::Float => channel.attr_read_float(name).map(AttrValue::Float),
        }
        .map_err(|err| map_err(&err))
    }

    fn write_device_attribute(
        &mut self,
        device: DeviceRole,
        name: &str,
        value: AttrValue<'_>,
    ) -> BackendResult<()> {
        let dev = self.device(device);
        match value {
            AttrValue::Bool(b) => dev.attr_write_bool(name, b),
            AttrValue::Int(v) => dev.attr_write_int(name, v),
            AttrValue::Float(v) => dev.attr_write_float(name, v),
            AttrValue::Text(s) => dev.attr_write_str(name, s),
        }
        .map_err(|err| map_err(&err))
    }

    fn enable_channel(&mut self, channel: &iio::Channel) {
        channel.enable();
    }

    fn disable_channel(&mut self, channel: &iio::Channel) {
        channel.disable();
    }

    fn open_buffer(&mut self, sample_count: usize, cyclic: bool) -> BackendResult<iio::Buffer> {
        self.dac.create_buffer(sample_count, cyclic).map_err(|err| {
            debug!(%err, sample_count, "buffer creation failed");
            match errno(&err) {
                EIO => BackendError::BufferUnavailable,
                code => BackendError::Errno(code),
            }
        })
    }

    fn close_buffer(&mut self, buffer: iio::Buffer) {
        // The buffer is destroyed on drop
        drop(buffer);
    }

    fn read_device_register(&self, address: u32) -> BackendResult<u32> {
        self.dac.reg_read(address).map_err(|err| map_err(&err))
    }
}
