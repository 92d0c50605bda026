// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Driver boundary.
//!
//! One trait covers both API families; the dispatcher maps CUDA and HIP twins onto the same
//! method. Host addresses are offsets into the shared host region. Optional extensions default
//! to [`ResultCode::NOT_SUPPORTED`].

use kapi_wire::{Handle, LaunchHeader, ResultCode};

/// Result of one driver call.
pub type DriverResult<T> = Result<T, ResultCode>;

/// Driver entry points the worker can execute.
pub trait Driver: Send + Sync {
    /// Initialises the driver.
    fn init(&self, flags: u32) -> DriverResult<()>;
    /// Device handle for `ordinal`.
    fn device_get(&self, ordinal: i32) -> DriverResult<i32>;
    /// Creates a context on `device`.
    fn ctx_create(&self, flags: u32, device: i32) -> DriverResult<Handle>;
    /// Destroys a context.
    fn ctx_destroy(&self, ctx: Handle) -> DriverResult<()>;
    /// Waits for all outstanding device work.
    fn ctx_synchronize(&self) -> DriverResult<()>;
    /// Loads a module image from `path`.
    fn module_load(&self, path: &str) -> DriverResult<Handle>;
    /// Unloads a module and every function resolved from it.
    fn module_unload(&self, module: Handle) -> DriverResult<()>;
    /// Resolves the mangled symbol `name` in `module`.
    fn module_get_function(&self, module: Handle, name: &str) -> DriverResult<Handle>;
    /// Launches `launch.function` with one byte slice per argument, in declaration order.
    fn launch_kernel(&self, launch: &LaunchHeader, args: &[&[u8]]) -> DriverResult<()>;
    /// Allocates device memory.
    fn mem_alloc(&self, size: u64) -> DriverResult<Handle>;
    /// Allocates a pitched 2D buffer; returns the pointer and the row pitch.
    fn mem_alloc_pitch(&self, width: u64, height: u64, element_size: u32) -> DriverResult<(Handle, u64)>;
    /// Frees device memory.
    fn mem_free(&self, ptr: Handle) -> DriverResult<()>;
    /// Copies `count` bytes from host offset `src` to device `dst`.
    fn memcpy_htod(&self, dst: Handle, src: u64, count: u64, stream: Option<Handle>) -> DriverResult<()>;
    /// Copies `count` bytes from device `src` to host offset `dst`.
    fn memcpy_dtoh(&self, dst: u64, src: Handle, count: u64, stream: Option<Handle>) -> DriverResult<()>;
    /// Creates a stream.
    fn stream_create(&self, flags: u32) -> DriverResult<Handle>;
    /// Waits for the work queued on `stream`.
    fn stream_synchronize(&self, stream: Handle) -> DriverResult<()>;
    /// Destroys a stream.
    fn stream_destroy(&self, stream: Handle) -> DriverResult<()>;

    /// Allocates page-locked host memory; returns its host offset.
    fn host_malloc(&self, _size: u64, _flags: u32) -> DriverResult<u64> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Device address of mapped host memory.
    fn host_get_device_pointer(&self, _host: u64, _flags: u32) -> DriverResult<Handle> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Frees memory from [`host_malloc`](Self::host_malloc).
    fn host_free(&self, _host: u64) -> DriverResult<()> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Page-locks an existing host range.
    fn host_register(&self, _host: u64, _size: u64, _flags: u32) -> DriverResult<()> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Reverses [`host_register`](Self::host_register).
    fn host_unregister(&self, _host: u64) -> DriverResult<()> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Loads an inference model from the host region.
    fn model_load(&self, _src: u64, _len: u64) -> DriverResult<()> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Runs the loaded model over a batch in the host region.
    fn model_infer(&self, _src: u64, _len: u64, _use_gpu: bool) -> DriverResult<()> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Drops inference scratch state.
    fn model_gc(&self) -> DriverResult<()> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Processes currently holding a device context.
    fn running_processes(&self) -> DriverResult<u64> {
        Err(ResultCode::NOT_SUPPORTED)
    }
    /// Device utilisation in percent.
    fn utilization(&self) -> DriverResult<u64> {
        Err(ResultCode::NOT_SUPPORTED)
    }
}
