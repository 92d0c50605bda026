// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Driver worker executing remoted CUDA/HIP calls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + `tests/dispatch.rs`
//!
//! PUBLIC API:
//!   - Driver trait: family-neutral driver entry points
//!   - HandlerRegistry / Dispatcher: opcode-indexed request handling
//!   - EmulatedDriver / HostRegion: in-memory backend
//!   - run_with_transport() / service_main_loop(): announce and serve
//!
//! DEPENDENCIES:
//!   - kapi-ipc: worker channel, transports, configuration
//!   - kapi-wire: command and reply frames
//!   - kapi-kargs: launch argument layouts

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod dispatcher;
mod driver;
mod emulated;
mod server;

pub use dispatcher::{Dispatcher, Handler, HandlerRegistry};
pub use driver::{Driver, DriverResult};
pub use emulated::{EmulatedDriver, HostRegion, LaunchRecord, HOST_MAPPED_BASE, LAUNCH_HISTORY};
pub use server::{build_driver, run_with_transport, service_main_loop, ReadyNotifier, Result, ServerError};
