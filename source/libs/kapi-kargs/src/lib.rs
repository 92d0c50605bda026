// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel argument layouts for generic launch calls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + `tests/layout_table.rs` (table + property tests)
//!
//! PUBLIC API:
//!   - `parse_mangled()`: mangled kernel name -> `FunctionLayout`
//!   - `FunctionLayout` / `ArgSlot`: runtime argument schema (size + handle flag per argument)
//!   - `pack()` / `pack_into()` / `unpack()`: launch-argument trailer marshaling
//!   - `LayoutCache`: concurrent function-identity -> layout map (build once, read often)
//!
//! INVARIANTS:
//!   - A malformed name never yields a partial layout
//!   - `unpack(pack(args))` views are bit-identical to the packed arguments
//!   - Cached layouts are immutable and never evicted before `clear()`
//!
//! DEPENDENCIES:
//!   - parking_lot::RwLock: cache guard (readers never wait on a parse)
//!   - thiserror: error enums

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod cache;
mod layout;
mod marshal;

pub use cache::LayoutCache;
pub use layout::{parse_mangled, ArgSlot, FunctionLayout, LayoutError, HANDLE_SIZE, MAX_ARGS};
pub use marshal::{pack, pack_into, unpack, MarshalError};
