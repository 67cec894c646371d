use miette::Diagnostic;
use sideband_assembly::{CodeType, ProfileSource, Property};
use thiserror::Error;

use crate::{Pid, UsageState};

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("invalid file `{path}`: {message}")]
    #[diagnostic(code(platform::invalid_file))]
    InvalidFile { path: String, message: String },

    #[error("device is in an invalid state: {message}")]
    #[diagnostic(code(platform::invalid_state))]
    InvalidState { message: String },

    #[error("execute failed: {message}")]
    #[diagnostic(code(platform::execute_failed))]
    ExecuteFailed { message: String },

    #[error("device has departed the domain")]
    #[diagnostic(code(platform::device_departed))]
    Departed,
}

/// The load/execute surface of a registered device.
pub trait Device: Send + Sync {
    fn label(&self) -> String;

    fn usage_state(&self) -> UsageState;

    /// Whether the device is still reachable. Unwind consults this before
    /// attempting to undo loads on a device that may have departed.
    fn exists(&self) -> bool {
        true
    }

    fn load(
        &self,
        source: &dyn ProfileSource,
        path: &str,
        code_type: CodeType,
    ) -> Result<(), DeviceError>;

    fn unload(&self, path: &str) -> Result<(), DeviceError>;

    fn execute(
        &self,
        entry_point: &str,
        options: &[Property],
        parameters: &[Property],
    ) -> Result<Pid, DeviceError>;
}
