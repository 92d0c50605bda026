// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Caller-side driver API forwarded to a remote worker
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests in `client` + `tests/surface.rs`
//!
//! PUBLIC API:
//!   - KapiClient: owns the caller channel and the function layout cache
//!   - KapiClient::submit(): send one encoded command, sync or async by opcode
//!   - Cuda / Hip: typed call surfaces for the two driver families
//!   - KapiError: client error type
//!
//! DEPENDENCIES:
//!   - kapi-ipc: caller channel and configuration
//!   - kapi-wire: command and reply frames
//!   - kapi-kargs: launch argument layouts
//!
//! Async calls (kernel launches, stream copies) do not report their own outcome. A failed async
//! call is remembered by the channel and returned by every later async call as
//! [`KapiError::AsyncFailure`]; the code is never cleared and may be stale.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod client;
mod cuda;
mod hip;

pub use client::KapiClient;
pub use cuda::Cuda;
pub use hip::Hip;

pub use kapi_ipc::{KapiConfig, Wait};
pub use kapi_wire::{Handle, LaunchHeader, Opcode, ResultCode};

use kapi_ipc::ChannelError;
use kapi_kargs::{LayoutError, MarshalError};
use kapi_wire::EncodeError;
use thiserror::Error;

/// Result alias for client operations.
pub type Result<T> = core::result::Result<T, KapiError>;

/// Errors surfaced to callers.
#[derive(Debug, Error)]
pub enum KapiError {
    /// Channel or correlation failure; the call may not have reached the worker.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Command could not be framed.
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),
    /// Worker ran the call and the driver reported a failure.
    #[error("{opcode} failed: {status}")]
    Driver {
        /// Failed opcode.
        opcode: Opcode,
        /// Driver status.
        status: ResultCode,
    },
    /// Some earlier async call failed; not necessarily the one just issued.
    #[error("an earlier async call failed: {0}")]
    AsyncFailure(ResultCode),
    /// Mangled name could not be turned into an argument layout.
    #[error("no argument layout for {name}: {source}")]
    Layout {
        /// Mangled symbol name.
        name: String,
        /// Parser failure.
        #[source]
        source: LayoutError,
    },
    /// Launch arguments do not match the function layout.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// Launch target was never resolved through this client.
    #[error("function {0} has no known argument layout")]
    UnknownFunction(Handle),
}

impl KapiError {
    /// Driver status carried by this error, if any.
    pub fn status(&self) -> Option<ResultCode> {
        match self {
            Self::Driver { status, .. } => Some(*status),
            Self::AsyncFailure(status) => Some(*status),
            _ => None,
        }
    }
}
