// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// Driver result code carried in every reply. Values follow the driver's own numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ResultCode(pub u32);

impl ResultCode {
    /// Call succeeded.
    pub const SUCCESS: Self = Self(0);
    /// Malformed or out-of-range argument.
    pub const INVALID_VALUE: Self = Self(1);
    /// Allocation failed.
    pub const OUT_OF_MEMORY: Self = Self(2);
    /// Driver not initialised.
    pub const NOT_INITIALIZED: Self = Self(3);
    /// Host OS call failed.
    pub const OPERATING_SYSTEM: Self = Self(304);
    /// Unknown or stale handle.
    pub const INVALID_HANDLE: Self = Self(400);
    /// Named symbol not found.
    pub const NOT_FOUND: Self = Self(500);
    /// Kernel launch failed.
    pub const LAUNCH_FAILED: Self = Self(719);
    /// Operation not available on this worker.
    pub const NOT_SUPPORTED: Self = Self(801);
    /// Unclassified failure.
    pub const UNKNOWN: Self = Self(999);

    /// True for `SUCCESS`.
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Symbolic name for known codes.
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "SUCCESS",
            1 => "INVALID_VALUE",
            2 => "OUT_OF_MEMORY",
            3 => "NOT_INITIALIZED",
            304 => "OPERATING_SYSTEM",
            400 => "INVALID_HANDLE",
            500 => "NOT_FOUND",
            719 => "LAUNCH_FAILED",
            801 => "NOT_SUPPORTED",
            999 => "UNKNOWN",
            _ => return None,
        })
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "code {}", self.0),
        }
    }
}

/// Opaque pointer-sized driver value (device pointer, context, module, function, stream).
///
/// Never dereferenced on either side of the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub u64);

impl Handle {
    /// The null handle; as a stream it selects the default stream.
    pub const NULL: Self = Self(0);

    /// True for the null handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Handle {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
