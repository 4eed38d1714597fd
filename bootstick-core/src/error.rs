//! Error taxonomy for a provisioning run.
use std::io;
use thiserror::Error;

/// Everything that can end a provisioning run.
///
/// Non-fatal conditions (a stuck unmount during cleanup, a failed boot loader
/// install) are never turned into a `ProvisionError`; they are logged at
/// warning severity where they happen and the run carries on.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The request was rejected before anything was touched on disk.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// An external program could not be started or exited unsuccessfully.
    #[error("{program} failed{}: {stderr}", exit_suffix(*code))]
    ToolInvocation {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The device never reached the state a stage expected, within its retry budget.
    #[error("{0}")]
    DeviceState(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn exit_suffix(code: Option<i32>) -> String {
    code.map(|c| format!(" with exit code {c}")).unwrap_or_default()
}

impl ProvisionError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Short machine-friendly name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ToolInvocation { .. } => "tool-invocation",
            Self::DeviceState(_) => "device-state",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
