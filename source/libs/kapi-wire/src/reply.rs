// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reply frames: `[status:u32le, reserved:u32le = 0, value:u64le, aux:u64le]`.
//!
//! A reply carries no opcode. Its meaning is fixed by the request the caller remembers sending
//! under the same correlation tag.

use crate::status::{Handle, ResultCode};

/// Encoded reply length.
pub const REPLY_LEN: usize = 24;

/// Result of one remote call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Reply {
    /// Driver status.
    pub status: ResultCode,
    /// Opcode-dependent result (pointer, ordinal, handle, counter).
    pub value: u64,
    /// Secondary result; the pitch for pitched allocations, zero otherwise.
    pub aux: u64,
}

impl Reply {
    /// Successful reply without a value.
    pub const fn success() -> Self {
        Self { status: ResultCode::SUCCESS, value: 0, aux: 0 }
    }

    /// Successful reply carrying `value`.
    pub const fn value(value: u64) -> Self {
        Self { status: ResultCode::SUCCESS, value, aux: 0 }
    }

    /// Successful reply carrying a handle.
    pub const fn handle(handle: Handle) -> Self {
        Self::value(handle.0)
    }

    /// Failed reply.
    pub const fn failure(status: ResultCode) -> Self {
        Self { status, value: 0, aux: 0 }
    }

    /// Converts a handler result into a reply.
    pub fn from_result(result: Result<Reply, ResultCode>) -> Self {
        result.unwrap_or_else(Self::failure)
    }

    /// Frame bytes.
    pub fn encode(&self) -> [u8; REPLY_LEN] {
        let mut out = [0u8; REPLY_LEN];
        out[0..4].copy_from_slice(&self.status.0.to_le_bytes());
        out[8..16].copy_from_slice(&self.value.to_le_bytes());
        out[16..24].copy_from_slice(&self.aux.to_le_bytes());
        out
    }

    /// Parses a reply frame; `None` unless exactly [`REPLY_LEN`] bytes.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let frame: &[u8; REPLY_LEN] = frame.try_into().ok()?;
        let status = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let mut value = [0u8; 8];
        let mut aux = [0u8; 8];
        value.copy_from_slice(&frame[8..16]);
        aux.copy_from_slice(&frame[16..24]);
        Some(Self {
            status: ResultCode(status),
            value: u64::from_le_bytes(value),
            aux: u64::from_le_bytes(aux),
        })
    }
}
