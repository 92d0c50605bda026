// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mangled-name scanner producing kernel argument layouts.
//!
//! Names follow the `_Z<len><name><params>` convention. Only the parameter list matters here;
//! the scan is a single forward pass without backtracking:
//!
//! | code | meaning | argument |
//! |------|---------|----------|
//! | `P` | pointer (followed by a pointee code or a `<len><name>` back-reference) | handle |
//! | `f` `i` `j` | float / int / unsigned int | 4 bytes |
//! | `l` | long | 8 bytes |
//! | `c` `h` | char / unsigned char | 1 byte |
//! | `S` | substitution, runs to the next `_` | handle |
//! | `v` | void, ends the parameter list | - |

use core::fmt;

use thiserror::Error;

/// Width of a handle-sized argument (device pointers, opaque driver handles).
pub const HANDLE_SIZE: usize = 8;

/// Upper bound on parsed arguments per function.
pub const MAX_ARGS: usize = 64;

const PREFIX: &str = "_Z";

/// Pointee codes accepted right after `P`.
const POINTEE_CODES: &[u8] = b"fijlhcvm";

/// One argument in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArgSlot {
    /// Number of bytes the argument occupies in the launch trailer.
    pub size: usize,
    /// True for pointers and other opaque handles.
    pub is_handle: bool,
}

impl ArgSlot {
    /// Handle-sized argument.
    pub const fn handle() -> Self {
        Self { size: HANDLE_SIZE, is_handle: true }
    }

    /// Plain scalar of `size` bytes.
    pub const fn scalar(size: usize) -> Self {
        Self { size, is_handle: false }
    }
}

/// Argument schema of one remotely launched function.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FunctionLayout {
    args: Vec<ArgSlot>,
    total_size: usize,
}

impl FunctionLayout {
    /// Builds a layout from explicit slots.
    pub fn from_slots(args: Vec<ArgSlot>) -> Self {
        let total_size = args.iter().map(|slot| slot.size).sum();
        Self { args, total_size }
    }

    /// Number of arguments.
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Sum of all argument sizes; the exact length of the packed trailer.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Per-argument slots in declaration order.
    pub fn args(&self) -> &[ArgSlot] {
        &self.args
    }

    /// Byte offset of every argument inside the packed trailer.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.args.iter().scan(0usize, |offset, slot| {
            let at = *offset;
            *offset += slot.size;
            Some(at)
        })
    }

    fn push(&mut self, slot: ArgSlot) -> Result<(), LayoutError> {
        if self.args.len() == MAX_ARGS {
            return Err(LayoutError::TooManyArguments { max: MAX_ARGS });
        }
        self.total_size += slot.size;
        self.args.push(slot);
        Ok(())
    }
}

impl fmt::Display for FunctionLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "argc={} size={} [", self.argc(), self.total_size)?;
        for (i, slot) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}{}", slot.size, if slot.is_handle { "h" } else { "" })?;
        }
        f.write_str("]")
    }
}

/// Reasons a mangled name cannot be turned into a layout.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// Name does not start with `_Z`.
    #[error("missing `_Z` prefix")]
    MissingPrefix,
    /// No decimal length follows the prefix.
    #[error("missing base-name length at offset {offset}")]
    MissingNameLength {
        /// Byte offset where the digits were expected.
        offset: usize,
    },
    /// A length prefix points past the end of the name.
    #[error("length {len} at offset {offset} runs past the end of the name")]
    Truncated {
        /// Offset of the first digit of the length.
        offset: usize,
        /// Decoded length.
        len: usize,
    },
    /// `P` followed by neither a pointee code nor a back-reference.
    #[error("pointer at offset {offset} has no valid pointee")]
    BadPointer {
        /// Offset of the `P`.
        offset: usize,
    },
    /// Unrecognised parameter type code.
    #[error("unrecognised type code {code:?} at offset {offset}")]
    UnknownType {
        /// Offending character.
        code: char,
        /// Its byte offset.
        offset: usize,
    },
    /// More parameters than the trailer format supports.
    #[error("more than {max} arguments")]
    TooManyArguments {
        /// The limit.
        max: usize,
    },
}

/// Derives the argument layout from a mangled function name.
///
/// Any unrecognised code fails the whole parse; no partial layout is returned.
pub fn parse_mangled(name: &str) -> Result<FunctionLayout, LayoutError> {
    let bytes = name.as_bytes();
    if !name.starts_with(PREFIX) {
        return Err(LayoutError::MissingPrefix);
    }

    let base_at = PREFIX.len();
    let (base_len, mut i) = read_decimal(bytes, base_at);
    if i == base_at {
        return Err(LayoutError::MissingNameLength { offset: base_at });
    }
    i = i
        .checked_add(base_len)
        .filter(|end| *end <= bytes.len())
        .ok_or(LayoutError::Truncated { offset: base_at, len: base_len })?;

    let mut layout = FunctionLayout::default();
    while i < bytes.len() {
        match bytes[i] {
            b'P' => {
                layout.push(ArgSlot::handle())?;
                i = skip_pointee(bytes, i)?;
            }
            b'f' | b'i' | b'j' => layout.push(ArgSlot::scalar(4))?,
            b'l' => layout.push(ArgSlot::scalar(8))?,
            b'c' | b'h' => layout.push(ArgSlot::scalar(1))?,
            b'S' => {
                layout.push(ArgSlot::handle())?;
                while i < bytes.len() && bytes[i] != b'_' {
                    i += 1;
                }
            }
            b'v' => break,
            other => {
                return Err(LayoutError::UnknownType { code: char::from(other), offset: i });
            }
        }
        i += 1;
    }
    Ok(layout)
}

/// Returns the index of the last byte belonging to the pointer type starting at `at`.
fn skip_pointee(bytes: &[u8], at: usize) -> Result<usize, LayoutError> {
    let next = at + 1;
    match bytes.get(next) {
        Some(code) if POINTEE_CODES.contains(code) => Ok(next),
        Some(code) if code.is_ascii_digit() => {
            let (len, end) = read_decimal(bytes, next);
            // `end` is one past the digits; the referenced name occupies `len` bytes from there.
            (end - 1)
                .checked_add(len)
                .filter(|last| *last < bytes.len())
                .ok_or(LayoutError::Truncated { offset: next, len })
        }
        _ => Err(LayoutError::BadPointer { offset: at }),
    }
}

/// Reads a decimal run starting at `at`; returns `(value, index after the run)`.
fn read_decimal(bytes: &[u8], at: usize) -> (usize, usize) {
    let mut value = 0usize;
    let mut i = at;
    while let Some(digit) = bytes.get(i).filter(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add(usize::from(digit - b'0'));
        i += 1;
    }
    (value, i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_then_substitution() {
        let layout = parse_mangled("_Z3fooPfS_").unwrap();
        assert_eq!(layout.argc(), 2);
        assert_eq!(layout.total_size(), 16);
        assert!(layout.args().iter().all(|slot| slot.is_handle && slot.size == HANDLE_SIZE));
    }

    #[test]
    fn void_stops_the_scan() {
        let layout = parse_mangled("_Z4initvxyz").unwrap();
        assert_eq!(layout.argc(), 0);
        assert_eq!(layout.total_size(), 0);
    }

    #[test]
    fn pointer_back_reference_skips_type_name() {
        let layout = parse_mangled("_Z4drawP5Pointi").unwrap();
        assert_eq!(layout.args(), &[ArgSlot::handle(), ArgSlot::scalar(4)]);
    }

    #[test]
    fn pointer_at_end_is_rejected() {
        assert_eq!(parse_mangled("_Z3fooP"), Err(LayoutError::BadPointer { offset: 6 }));
    }

    #[test]
    fn back_reference_past_end_is_rejected() {
        assert!(matches!(parse_mangled("_Z3fooP9ab"), Err(LayoutError::Truncated { .. })));
    }

    #[test]
    fn argument_limit() {
        let name = format!("_Z1k{}", "i".repeat(MAX_ARGS + 1));
        assert_eq!(
            parse_mangled(&name),
            Err(LayoutError::TooManyArguments { max: MAX_ARGS })
        );
        let name = format!("_Z1k{}", "i".repeat(MAX_ARGS));
        assert_eq!(parse_mangled(&name).unwrap().argc(), MAX_ARGS);
    }

    #[test]
    fn offsets_follow_sizes() {
        let layout = parse_mangled("_Z1kclPfh").unwrap();
        assert_eq!(layout.offsets().collect::<Vec<_>>(), vec![0, 1, 9, 17]);
        assert_eq!(layout.to_string(), "argc=4 size=18 [1, 8, 8h, 1]");
    }
}
