// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Remoted driver call wire format (fixed-layout byte frames; closed opcode set)
//!
//! OWNERS: @runtime
//!
//! STATUS: Functional
//!
//! API_STABILITY: Unstable (opcode numbers are stable)
//!
//! TEST_COVERAGE: Unit tests per module + `tests/frames.rs`
//!   - Decode: exact-length checks, unknown opcodes, malformed names
//!   - Encode: per-opcode field order, async copy opcode selection, name bounds
//!   - Property tests for panic-freedom on arbitrary input
//!
//! Both ends share one word size and byte order; fixed fields are little-endian and the launch
//! trailer is copied verbatim.

mod command;
mod opcode;
mod reply;
mod status;

pub use command::{
    fixed_len, Command, DecodeError, EncodeError, LaunchHeader, LAUNCH_HEADER_LEN,
    MAX_FIXED_COMMAND_LEN, NAME_FIELD_LEN,
};
pub use opcode::{Api, CallMode, Opcode, OPCODE_COUNT};
pub use reply::{Reply, REPLY_LEN};
pub use status::{Handle, ResultCode};
