//! Error taxonomy for a single PBD run (spec: ERROR HANDLING DESIGN).
//!
//! Four variants map onto the four pre-exit failure classes: bad
//! invocation, bad/unsupported debug info, failure to spawn the tracee,
//! and an unexpected ptrace/memory failure while the tracee was supposed
//! to be stopped. "Under-specified storage" and "normal child
//! termination" are not errors; see the controller and variable reader.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PbdError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    DebugInfo(String),

    #[error("failed to spawn traced process: {0}")]
    Spawn(#[source] io::Error),

    #[error("tracing fatal at {}: {source}", address.map(|a| format!("{:#x}", a)).unwrap_or_else(|| "<unknown>".into()))]
    TracingFatal {
        address: Option<u64>,
        #[source]
        source: nix::Error,
    },
}

impl PbdError {
    /// Exit code a CLI entry point should use for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            PbdError::Configuration(_) => 1,
            PbdError::DebugInfo(_) => 2,
            PbdError::Spawn(_) => 3,
            PbdError::TracingFatal { .. } => 4,
        }
    }

    pub fn tracing_fatal(address: Option<u64>, source: nix::Error) -> Self {
        PbdError::TracingFatal { address, source }
    }
}

pub type Result<T> = std::result::Result<T, PbdError>;
