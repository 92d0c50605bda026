// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-memory driver backend for hosts without a GPU
//!
//! Device memory is a set of byte buffers behind bump-allocated addresses. Host addresses are
//! offsets into a [`HostRegion`] that stands in for the memory both sides map. Launches are
//! recorded with their argument bytes instead of being executed.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use kapi_wire::{Handle, LaunchHeader, ResultCode};
use log::{debug, info};
use parking_lot::Mutex;

use crate::driver::{Driver, DriverResult};

const DEVICE_BASE: u64 = 0x7000_0000_0000;
const DEVICE_ALIGN: u64 = 256;
const PITCH_ALIGN: u64 = 512;
const HANDLE_BASE: u64 = 0x1000;
/// Device view of mapped host memory: `HOST_MAPPED_BASE + offset`.
pub const HOST_MAPPED_BASE: u64 = 0x4000_0000_0000;
/// Launches kept by [`EmulatedDriver::launches`]; older ones are dropped.
pub const LAUNCH_HISTORY: usize = 1024;

/// Host memory shared with callers, addressed by offset.
#[derive(Debug)]
pub struct HostRegion {
    bytes: Mutex<Vec<u8>>,
}

impl HostRegion {
    /// Zero-filled region of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { bytes: Mutex::new(vec![0; len]) }
    }

    /// Region size in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.lock().len() as u64
    }

    /// True for a zero-sized region.
    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }

    /// Copies `data` to `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> DriverResult<()> {
        let mut bytes = self.bytes.lock();
        let range = span(offset, data.len() as u64, bytes.len() as u64)?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Copies `len` bytes out of `offset`.
    pub fn read(&self, offset: u64, len: u64) -> DriverResult<Vec<u8>> {
        let bytes = self.bytes.lock();
        let range = span(offset, len, bytes.len() as u64)?;
        Ok(bytes[range].to_vec())
    }
}

/// `offset..offset + len` as an index range, if it fits in `limit`.
fn span(offset: u64, len: u64, limit: u64) -> DriverResult<std::ops::Range<usize>> {
    let end = offset.checked_add(len).filter(|&end| end <= limit).ok_or(ResultCode::INVALID_VALUE)?;
    Ok(offset as usize..end as usize)
}

fn align_up(value: u64, align: u64) -> Option<u64> {
    value.checked_add(align - 1).map(|v| v / align * align)
}

/// One recorded kernel launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Mangled name of the launched function.
    pub name: String,
    /// Launch parameters as received.
    pub header: LaunchHeader,
    /// Argument bytes, one entry per argument.
    pub args: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Function {
    module: u64,
    name: String,
}

#[derive(Debug, Default)]
struct State {
    initialized: bool,
    next_handle: u64,
    next_device: u64,
    device_used: u64,
    contexts: HashSet<u64>,
    modules: HashMap<u64, String>,
    functions: HashMap<u64, Function>,
    streams: HashSet<u64>,
    allocations: BTreeMap<u64, Vec<u8>>,
    host_allocations: BTreeMap<u64, u64>,
    registered: HashMap<u64, u64>,
    launches: VecDeque<LaunchRecord>,
    pending: u64,
    model: Option<Vec<u8>>,
    inferences: u64,
}

impl State {
    fn handle(&mut self) -> Handle {
        self.next_handle += 1;
        Handle(HANDLE_BASE + self.next_handle)
    }

    fn ready(&self) -> DriverResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ResultCode::NOT_INITIALIZED)
        }
    }

    fn check_stream(&self, stream: Option<Handle>) -> DriverResult<()> {
        match stream {
            Some(stream) if !stream.is_null() && !self.streams.contains(&stream.0) => {
                Err(ResultCode::INVALID_HANDLE)
            }
            _ => Ok(()),
        }
    }

    /// Buffer holding `ptr..ptr + len` and the index range within it.
    fn device_span(&mut self, ptr: Handle, len: u64) -> DriverResult<(&mut Vec<u8>, std::ops::Range<usize>)> {
        let (&base, buffer) =
            self.allocations.range_mut(..=ptr.0).next_back().ok_or(ResultCode::INVALID_VALUE)?;
        let range = span(ptr.0 - base, len, buffer.len() as u64)?;
        Ok((buffer, range))
    }

    fn host_mapped(&self, host: u64) -> bool {
        let within = |(&start, &size): (&u64, &u64)| host >= start && host < start + size;
        self.host_allocations.iter().any(within) || self.registered.iter().any(within)
    }

    /// Lowest aligned offset with `size` free bytes below `limit`.
    fn first_fit_host(&self, size: u64, limit: u64) -> DriverResult<u64> {
        let needed = align_up(size, DEVICE_ALIGN).ok_or(ResultCode::OUT_OF_MEMORY)?;
        let mut cursor = 0;
        for (&start, &len) in &self.host_allocations {
            if start.saturating_sub(cursor) >= needed {
                return Ok(cursor);
            }
            cursor = align_up(start + len, DEVICE_ALIGN).ok_or(ResultCode::OUT_OF_MEMORY)?;
        }
        match cursor.checked_add(needed) {
            Some(end) if end <= limit => Ok(cursor),
            _ => Err(ResultCode::OUT_OF_MEMORY),
        }
    }

    fn record_launch(&mut self, record: LaunchRecord) {
        if self.launches.len() == LAUNCH_HISTORY {
            self.launches.pop_front();
        }
        self.launches.push_back(record);
    }
}

/// In-memory [`Driver`].
#[derive(Debug)]
pub struct EmulatedDriver {
    device_memory: u64,
    device_count: i32,
    host: Arc<HostRegion>,
    state: Mutex<State>,
}

impl EmulatedDriver {
    /// Driver with `device_memory` bytes of device memory over `host`.
    pub fn new(device_memory: u64, host: Arc<HostRegion>) -> Self {
        Self {
            device_memory,
            device_count: 1,
            host,
            state: Mutex::new(State { next_device: DEVICE_BASE, ..State::default() }),
        }
    }

    /// Shared host region.
    pub fn host(&self) -> &Arc<HostRegion> {
        &self.host
    }

    /// The last [`LAUNCH_HISTORY`] launches, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.iter().cloned().collect()
    }

    /// Drains the launch history, oldest first.
    pub fn take_launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.drain(..).collect()
    }

    /// Device bytes currently allocated.
    pub fn device_used(&self) -> u64 {
        self.state.lock().device_used
    }

    /// Reads device memory directly.
    pub fn read_device(&self, ptr: Handle, len: u64) -> DriverResult<Vec<u8>> {
        let mut state = self.state.lock();
        let (buffer, range) = state.device_span(ptr, len)?;
        Ok(buffer[range].to_vec())
    }

    /// Number of inference runs.
    pub fn inferences(&self) -> u64 {
        self.state.lock().inferences
    }
}

impl Driver for EmulatedDriver {
    fn init(&self, flags: u32) -> DriverResult<()> {
        if flags != 0 {
            return Err(ResultCode::INVALID_VALUE);
        }
        let mut state = self.state.lock();
        if !state.initialized {
            info!("kapid: emulated driver initialised ({} bytes device memory)", self.device_memory);
        }
        state.initialized = true;
        Ok(())
    }

    fn device_get(&self, ordinal: i32) -> DriverResult<i32> {
        self.state.lock().ready()?;
        if (0..self.device_count).contains(&ordinal) {
            Ok(ordinal)
        } else {
            Err(ResultCode::INVALID_VALUE)
        }
    }

    fn ctx_create(&self, _flags: u32, device: i32) -> DriverResult<Handle> {
        let mut state = self.state.lock();
        state.ready()?;
        if !(0..self.device_count).contains(&device) {
            return Err(ResultCode::INVALID_VALUE);
        }
        let ctx = state.handle();
        state.contexts.insert(ctx.0);
        Ok(ctx)
    }

    fn ctx_destroy(&self, ctx: Handle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        if state.contexts.remove(&ctx.0) {
            Ok(())
        } else {
            Err(ResultCode::INVALID_HANDLE)
        }
    }

    fn ctx_synchronize(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        state.pending = 0;
        Ok(())
    }

    fn module_load(&self, path: &str) -> DriverResult<Handle> {
        let mut state = self.state.lock();
        state.ready()?;
        if path.is_empty() {
            return Err(ResultCode::NOT_FOUND);
        }
        let module = state.handle();
        state.modules.insert(module.0, path.to_string());
        debug!("kapid: loaded {path} as {module}");
        Ok(module)
    }

    fn module_unload(&self, module: Handle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        state.modules.remove(&module.0).ok_or(ResultCode::INVALID_HANDLE)?;
        state.functions.retain(|_, function| function.module != module.0);
        Ok(())
    }

    fn module_get_function(&self, module: Handle, name: &str) -> DriverResult<Handle> {
        let mut state = self.state.lock();
        state.ready()?;
        if !state.modules.contains_key(&module.0) {
            return Err(ResultCode::INVALID_HANDLE);
        }
        if name.is_empty() {
            return Err(ResultCode::NOT_FOUND);
        }
        let existing = state
            .functions
            .iter()
            .find(|(_, function)| function.module == module.0 && function.name == name)
            .map(|(&handle, _)| Handle(handle));
        if let Some(function) = existing {
            return Ok(function);
        }
        let function = state.handle();
        state.functions.insert(function.0, Function { module: module.0, name: name.to_string() });
        Ok(function)
    }

    fn launch_kernel(&self, launch: &LaunchHeader, args: &[&[u8]]) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        let name = state
            .functions
            .get(&launch.function.0)
            .map(|function| function.name.clone())
            .ok_or(ResultCode::INVALID_HANDLE)?;
        state.check_stream(Some(launch.stream))?;
        if launch.grid.contains(&0) || launch.block.contains(&0) {
            return Err(ResultCode::INVALID_VALUE);
        }
        state.record_launch(LaunchRecord {
            name,
            header: *launch,
            args: args.iter().map(|arg| arg.to_vec()).collect(),
        });
        state.pending += 1;
        Ok(())
    }

    fn mem_alloc(&self, size: u64) -> DriverResult<Handle> {
        let mut state = self.state.lock();
        state.ready()?;
        if size == 0 {
            return Err(ResultCode::INVALID_VALUE);
        }
        let reserved = align_up(size, DEVICE_ALIGN).ok_or(ResultCode::OUT_OF_MEMORY)?;
        if state.device_used.saturating_add(reserved) > self.device_memory {
            return Err(ResultCode::OUT_OF_MEMORY);
        }
        let ptr = state.next_device;
        state.next_device += reserved;
        state.device_used += reserved;
        state.allocations.insert(ptr, vec![0; size as usize]);
        Ok(Handle(ptr))
    }

    fn mem_alloc_pitch(&self, width: u64, height: u64, element_size: u32) -> DriverResult<(Handle, u64)> {
        if !matches!(element_size, 4 | 8 | 16) || width == 0 || height == 0 {
            return Err(ResultCode::INVALID_VALUE);
        }
        let pitch = align_up(width, PITCH_ALIGN).ok_or(ResultCode::INVALID_VALUE)?;
        let size = pitch.checked_mul(height).ok_or(ResultCode::OUT_OF_MEMORY)?;
        Ok((self.mem_alloc(size)?, pitch))
    }

    fn mem_free(&self, ptr: Handle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        let buffer = state.allocations.remove(&ptr.0).ok_or(ResultCode::INVALID_VALUE)?;
        state.device_used -= align_up(buffer.len() as u64, DEVICE_ALIGN).unwrap_or(0);
        Ok(())
    }

    fn memcpy_htod(&self, dst: Handle, src: u64, count: u64, stream: Option<Handle>) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        state.check_stream(stream)?;
        let data = self.host.read(src, count)?;
        let (buffer, range) = state.device_span(dst, count)?;
        buffer[range].copy_from_slice(&data);
        Ok(())
    }

    fn memcpy_dtoh(&self, dst: u64, src: Handle, count: u64, stream: Option<Handle>) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        state.check_stream(stream)?;
        let (buffer, range) = state.device_span(src, count)?;
        self.host.write(dst, &buffer[range])
    }

    fn stream_create(&self, _flags: u32) -> DriverResult<Handle> {
        let mut state = self.state.lock();
        state.ready()?;
        let stream = state.handle();
        state.streams.insert(stream.0);
        Ok(stream)
    }

    fn stream_synchronize(&self, stream: Handle) -> DriverResult<()> {
        let state = self.state.lock();
        state.ready()?;
        state.check_stream(Some(stream))
    }

    fn stream_destroy(&self, stream: Handle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        if state.streams.remove(&stream.0) {
            Ok(())
        } else {
            Err(ResultCode::INVALID_HANDLE)
        }
    }

    fn host_malloc(&self, size: u64, _flags: u32) -> DriverResult<u64> {
        let mut state = self.state.lock();
        state.ready()?;
        if size == 0 {
            return Err(ResultCode::INVALID_VALUE);
        }
        let offset = state.first_fit_host(size, self.host.len())?;
        state.host_allocations.insert(offset, size);
        Ok(offset)
    }

    fn host_get_device_pointer(&self, host: u64, _flags: u32) -> DriverResult<Handle> {
        let state = self.state.lock();
        state.ready()?;
        if state.host_mapped(host) {
            Ok(Handle(HOST_MAPPED_BASE + host))
        } else {
            Err(ResultCode::INVALID_VALUE)
        }
    }

    fn host_free(&self, host: u64) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        state.host_allocations.remove(&host).map(|_| ()).ok_or(ResultCode::INVALID_VALUE)
    }

    fn host_register(&self, host: u64, size: u64, _flags: u32) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        span(host, size, self.host.len())?;
        if size == 0 || state.registered.contains_key(&host) {
            return Err(ResultCode::INVALID_VALUE);
        }
        state.registered.insert(host, size);
        Ok(())
    }

    fn host_unregister(&self, host: u64) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ready()?;
        state.registered.remove(&host).map(|_| ()).ok_or(ResultCode::INVALID_VALUE)
    }

    fn model_load(&self, src: u64, len: u64) -> DriverResult<()> {
        let model = self.host.read(src, len)?;
        let mut state = self.state.lock();
        state.ready()?;
        debug!("kapid: model of {len} bytes loaded");
        state.model = Some(model);
        Ok(())
    }

    fn model_infer(&self, src: u64, len: u64, _use_gpu: bool) -> DriverResult<()> {
        self.host.read(src, len)?;
        let mut state = self.state.lock();
        state.ready()?;
        if state.model.is_none() {
            return Err(ResultCode::NOT_INITIALIZED);
        }
        state.inferences += 1;
        Ok(())
    }

    fn model_gc(&self) -> DriverResult<()> {
        self.state.lock().ready()
    }

    fn running_processes(&self) -> DriverResult<u64> {
        let state = self.state.lock();
        Ok(u64::from(!state.contexts.is_empty()))
    }

    fn utilization(&self) -> DriverResult<u64> {
        Ok(self.state.lock().pending.min(100))
    }
}
