// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Launch-argument trailer marshaling.
//!
//! The trailer is the concatenation of every argument's bytes in declaration order, with no
//! padding. Both ends share one word size and byte order, so argument bytes are copied as-is.

use thiserror::Error;

use crate::layout::FunctionLayout;

/// Errors raised while packing or unpacking a trailer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MarshalError {
    /// Caller supplied a different number of arguments than the layout declares.
    #[error("expected {expected} arguments, got {got}")]
    ArgCount {
        /// Declared argument count.
        expected: usize,
        /// Supplied argument count.
        got: usize,
    },
    /// One argument's byte length does not match its slot.
    #[error("argument {index}: expected {expected} bytes, got {got}")]
    ArgSize {
        /// Zero-based argument index.
        index: usize,
        /// Slot size.
        expected: usize,
        /// Supplied length.
        got: usize,
    },
    /// Received trailer length differs from the layout's total size.
    #[error("trailer is {got} bytes, layout needs {expected}")]
    TrailerLength {
        /// Layout total size.
        expected: usize,
        /// Received length.
        got: usize,
    },
}

/// Appends the packed arguments to `out`.
///
/// On error nothing is appended.
pub fn pack_into(
    layout: &FunctionLayout,
    args: &[&[u8]],
    out: &mut Vec<u8>,
) -> Result<(), MarshalError> {
    if args.len() != layout.argc() {
        return Err(MarshalError::ArgCount { expected: layout.argc(), got: args.len() });
    }
    for (index, (slot, arg)) in layout.args().iter().zip(args).enumerate() {
        if arg.len() != slot.size {
            return Err(MarshalError::ArgSize { index, expected: slot.size, got: arg.len() });
        }
    }
    out.reserve(layout.total_size());
    for arg in args {
        out.extend_from_slice(arg);
    }
    Ok(())
}

/// Packs `args` into a fresh trailer.
pub fn pack(layout: &FunctionLayout, args: &[&[u8]]) -> Result<Vec<u8>, MarshalError> {
    let mut out = Vec::with_capacity(layout.total_size());
    pack_into(layout, args, &mut out)?;
    Ok(out)
}

/// Splits a received trailer into per-argument views. Nothing is copied.
pub fn unpack<'a>(layout: &FunctionLayout, trailer: &'a [u8]) -> Result<Vec<&'a [u8]>, MarshalError> {
    if trailer.len() != layout.total_size() {
        return Err(MarshalError::TrailerLength {
            expected: layout.total_size(),
            got: trailer.len(),
        });
    }
    Ok(layout
        .args()
        .iter()
        .zip(layout.offsets())
        .map(|(slot, at)| &trailer[at..at + slot.size])
        .collect())
}
