//! Processed-Input Self-Test
//!
//! Walks every configured pair through the DDS, streamed-buffer and
//! processed/input modes, checking at each step that conflicting requests
//! are refused, that the driver's `input` flag reads back as expected and
//! that the DAC control registers hold the right word.
//!
//! The routine stops at the first failed step. An open stream buffer is
//! always released before returning.
//!
//! Drivers differ in what a pair falls back to once a buffer or
//! processed/input lets go of it. [`ReleaseCheck`] selects which behaviour
//! the release steps expect.

use std::thread;

use thiserror::Error;
use tracing::info;

use crate::arbiter::{ModeArbiter, StreamBuffer};
use crate::backend::TxBackend;
use crate::error::ArbiterError;
use crate::types::{ChannelId, ChannelSet, ControlWord, SubChannel};

/// Register contents expected right after a pair is released
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReleaseCheck {
    /// Registers follow the stored tone request (`0x0` or `0x3`)
    #[default]
    Table,
    /// The driver puts every released pair back on the tone generator
    /// (`0x0`) whatever was requested before
    Dds,
}

/// Self-test settings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelfTestOptions {
    /// Expected register contents after a release
    pub release: ReleaseCheck,
}

/// Summary of a successful run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelfTestReport {
    /// Steps completed
    pub steps: usize,
    /// Control registers read back and matched
    pub registers_verified: usize,
    /// Conflicting requests refused as expected
    pub refusals: usize,
}

/// Failed self-test step
#[derive(Debug, Error)]
pub enum SelfTestError {
    /// Arbiter or backend failure where success was expected
    #[error("{step}: {source}")]
    Arbiter {
        /// Step name
        step: &'static str,
        /// Underlying failure
        #[source]
        source: ArbiterError,
    },
    /// A request that must be refused was accepted (or failed otherwise)
    #[error("{step}: {channel} accepted a conflicting request")]
    NotRefused {
        /// Step name
        step: &'static str,
        /// Pair that did not refuse
        channel: ChannelId,
    },
    /// Driver `input` flag reads the wrong value
    #[error("{step}: {channel} processed/input reads {observed}, expected {expected}")]
    InputReadback {
        /// Step name
        step: &'static str,
        /// Pair read
        channel: ChannelId,
        /// Expected flag
        expected: bool,
        /// Flag read from the driver
        observed: bool,
    },
    /// Pair is in a different mode than the step requires
    #[error("{step}: {channel} control word is {observed}, expected {expected}")]
    WrongMode {
        /// Step name
        step: &'static str,
        /// Pair checked
        channel: ChannelId,
        /// Word the step requires
        expected: ControlWord,
        /// Word the pair holds
        observed: ControlWord,
    },
}

impl SelfTestError {
    /// Name of the failed step
    #[must_use]
    pub const fn step(&self) -> &'static str {
        match self {
            Self::Arbiter { step, .. }
            | Self::NotRefused { step, .. }
            | Self::InputReadback { step, .. }
            | Self::WrongMode { step, .. } => step,
        }
    }
}

type StepResult<T = ()> = Result<T, SelfTestError>;

/// Run the full sequence over every configured pair with default options
///
/// # Errors
///
/// The first failed step, see [`SelfTestError`].
pub fn run<B: TxBackend>(arbiter: &mut ModeArbiter<B>) -> StepResult<SelfTestReport> {
    run_with(arbiter, SelfTestOptions::default())
}

/// Run the full sequence over every configured pair
///
/// # Errors
///
/// The first failed step, see [`SelfTestError`].
pub fn run_with<B: TxBackend>(
    arbiter: &mut ModeArbiter<B>,
    options: SelfTestOptions,
) -> StepResult<SelfTestReport> {
    let set = arbiter.all_channels();
    let mut test = SelfTest {
        arbiter,
        set,
        options,
        report: SelfTestReport::default(),
    };

    test.check_input("initial state", false)?;

    // Streamed buffer with the tone generator off
    test.quiesce()?;
    let stream = test.open("open buffer")?;
    let checked = test.buffer_lockout("buffer lockout");
    test.close(stream);
    checked?;
    test.verify_released("buffer released")?;

    // Processed input with the tone generator off
    test.quiesce()?;
    test.processed_cycle()?;

    // Streaming still works after processed input was released
    let stream = test.open("reopen buffer")?;
    let checked = test.buffer_lockout("buffer lockout after processed");
    test.close(stream);
    checked?;
    test.verify_released("buffer released again")?;

    // Processed input with the tone generator on
    test.raw("tone on", true)?;
    test.check_input("tone on", false)?;
    test.verify("tone on", ControlWord::Dds)?;
    test.processed_cycle()?;
    test.verify("tone restored", ControlWord::Dds)?;

    info!(
        steps = test.report.steps,
        registers = test.report.registers_verified,
        refusals = test.report.refusals,
        "self-test passed"
    );
    Ok(test.report)
}

struct SelfTest<'a, B: TxBackend> {
    arbiter: &'a mut ModeArbiter<B>,
    set: ChannelSet,
    options: SelfTestOptions,
    report: SelfTestReport,
}

impl<B: TxBackend> SelfTest<'_, B> {
    fn begin(&mut self, step: &'static str) {
        self.report.steps += 1;
        info!(step, channels = self.set.len(), "self-test step");
    }

    fn quiesce(&mut self) -> StepResult {
        self.raw("tone off", false)?;
        self.check_input("tone off", false)?;
        self.verify("tone off", ControlWord::Zero)
    }

    /// Engage processed input, check every lockout, then release it
    fn processed_cycle(&mut self) -> StepResult {
        self.processed("enable processed", true)?;
        self.check_input("enable processed", true)?;
        self.verify("enable processed", ControlWord::Dma)?;

        self.begin("raw lockout");
        for requested in [false, true] {
            for id in self.set.iter() {
                let result = self.arbiter.set_raw(id, requested);
                self.expect_busy("raw lockout", id, result)?;
            }
        }

        self.begin("buffer lockout while processed");
        match self.arbiter.open_stream_buffer(self.set) {
            Err(ArbiterError::Busy { .. }) => self.report.refusals += 1,
            Err(source) => {
                return Err(SelfTestError::Arbiter {
                    step: "buffer lockout while processed",
                    source,
                })
            }
            Ok(stream) => {
                let opened = stream.channels();
                self.arbiter.close_stream_buffer(stream);
                if let Some(channel) = opened.iter().next() {
                    return Err(SelfTestError::NotRefused {
                        step: "buffer lockout while processed",
                        channel,
                    });
                }
            }
        }

        self.processed("disable processed", false)?;
        self.check_input("disable processed", false)?;
        self.verify_released("disable processed")
    }

    /// Checks while a stream buffer owns every pair
    fn buffer_lockout(&mut self, step: &'static str) -> StepResult {
        self.begin(step);
        for id in self.set.iter() {
            let result = self.arbiter.set_processed_input(id, true);
            self.expect_busy(step, id, result)?;
        }
        self.check_input(step, false)?;
        self.verify(step, ControlWord::Dma)
    }

    fn open(&mut self, step: &'static str) -> StepResult<StreamBuffer<B::Buffer>> {
        self.begin(step);
        self.arbiter
            .open_stream_buffer(self.set)
            .map_err(|source| SelfTestError::Arbiter { step, source })
    }

    fn close(&mut self, stream: StreamBuffer<B::Buffer>) {
        self.begin("close buffer");
        self.arbiter.close_stream_buffer(stream);
        let settle = self.arbiter.config().settle_time;
        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }

    fn raw(&mut self, step: &'static str, requested: bool) -> StepResult {
        self.begin(step);
        for id in self.set.iter() {
            self.arbiter
                .set_raw(id, requested)
                .map_err(|source| SelfTestError::Arbiter { step, source })?;
        }
        Ok(())
    }

    fn processed(&mut self, step: &'static str, enabled: bool) -> StepResult {
        self.begin(step);
        for id in self.set.iter() {
            self.arbiter
                .set_processed_input(id, enabled)
                .map_err(|source| SelfTestError::Arbiter { step, source })?;
        }
        Ok(())
    }

    fn expect_busy(
        &mut self,
        step: &'static str,
        channel: ChannelId,
        result: Result<(), ArbiterError>,
    ) -> StepResult {
        match result {
            Err(err) if err.is_busy() => {
                self.report.refusals += 1;
                Ok(())
            }
            Err(source) => Err(SelfTestError::Arbiter { step, source }),
            Ok(()) => Err(SelfTestError::NotRefused { step, channel }),
        }
    }

    fn check_input(&self, step: &'static str, expected: bool) -> StepResult {
        for channel in self.set.iter() {
            let observed = self
                .arbiter
                .read_processed_input(channel)
                .map_err(|source| SelfTestError::Arbiter { step, source })?;
            if observed != expected {
                return Err(SelfTestError::InputReadback {
                    step,
                    channel,
                    expected,
                    observed,
                });
            }
        }
        Ok(())
    }

    /// Registers must match the arbiter and the arbiter must be in `expected`
    fn verify(&mut self, step: &'static str, expected: ControlWord) -> StepResult {
        for channel in self.set.iter() {
            let observed = self
                .arbiter
                .verify_register(channel)
                .map_err(|source| SelfTestError::Arbiter { step, source })?;
            if observed != expected {
                return Err(SelfTestError::WrongMode {
                    step,
                    channel,
                    expected,
                    observed,
                });
            }
            self.report.registers_verified += 2;
        }
        Ok(())
    }

    /// Registers must hold what the driver falls back to after a release
    fn verify_released(&mut self, step: &'static str) -> StepResult {
        self.begin(step);
        match self.options.release {
            ReleaseCheck::Table => self
                .arbiter
                .verify_registers(self.set)
                .map_err(|source| SelfTestError::Arbiter { step, source })?,
            ReleaseCheck::Dds => {
                self.check_dds(step)?;
                // The driver raised raw on its own; record it
                for id in self.set.iter() {
                    self.arbiter
                        .set_raw(id, true)
                        .map_err(|source| SelfTestError::Arbiter { step, source })?;
                }
            }
        }
        self.report.registers_verified += self.set.len() * 2;
        Ok(())
    }

    fn check_dds(&self, step: &'static str) -> StepResult {
        let expected = ControlWord::Dds;
        for channel in self.set.iter() {
            for sub in SubChannel::BOTH {
                let observed = self
                    .arbiter
                    .backend()
                    .read_device_register(channel.ctrl_register(sub))
                    .map_err(|err| SelfTestError::Arbiter {
                        step,
                        source: err.into(),
                    })?;
                if observed != expected.as_u32() {
                    return Err(SelfTestError::Arbiter {
                        step,
                        source: ArbiterError::RegisterMismatch {
                            channel,
                            sub,
                            expected,
                            observed,
                        },
                    });
                }
            }
        }
        Ok(())
    }
}
