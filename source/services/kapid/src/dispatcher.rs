// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Opcode-indexed dispatch of request frames onto a [`Driver`]
//!
//! PUBLIC API:
//!   - HandlerRegistry: one optional handler per opcode, built once before serving
//!   - Dispatcher::dispatch(): frame in, reply out; never panics on a bad frame
//!
//! ERROR CONDITIONS (reply status):
//!   - NOT_SUPPORTED: opcode unknown or without a registered handler
//!   - INVALID_VALUE: frame does not decode, or launch arguments do not match the layout
//!   - INVALID_HANDLE: launch of a function never resolved through this worker
//!   - anything the driver returns

use std::collections::HashMap;
use std::sync::Arc;

use kapi_kargs::{unpack, FunctionLayout, LayoutCache};
use kapi_wire::{Command, DecodeError, Handle, Opcode, Reply, ResultCode, OPCODE_COUNT};
use log::{debug, error, warn};
use parking_lot::RwLock;

use crate::driver::{Driver, DriverResult};

/// One opcode's handler.
pub type Handler<D> = fn(&Dispatcher<D>, &Command<'_>) -> DriverResult<Reply>;

/// Opcode -> handler table.
pub struct HandlerRegistry<D: Driver> {
    handlers: [Option<Handler<D>>; OPCODE_COUNT],
}

impl<D: Driver> HandlerRegistry<D> {
    /// Registry with no handlers; every opcode answers NOT_SUPPORTED.
    pub fn empty() -> Self {
        Self { handlers: [None; OPCODE_COUNT] }
    }

    /// Registry with the built-in handler for every opcode.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for &opcode in Opcode::ALL {
            registry.register(opcode, default_handler::<D>(opcode));
        }
        registry
    }

    /// Installs `handler` for `opcode`, returning the one it replaces.
    pub fn register(&mut self, opcode: Opcode, handler: Handler<D>) -> Option<Handler<D>> {
        self.handlers[opcode.index()].replace(handler)
    }

    /// Removes the handler for `opcode`.
    pub fn unregister(&mut self, opcode: Opcode) -> Option<Handler<D>> {
        self.handlers[opcode.index()].take()
    }

    /// Handler registered for `opcode`.
    pub fn get(&self, opcode: Opcode) -> Option<Handler<D>> {
        self.handlers[opcode.index()]
    }

    /// Number of opcodes with a handler.
    pub fn len(&self) -> usize {
        self.handlers.iter().filter(|handler| handler.is_some()).count()
    }

    /// True when no opcode has a handler.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Driver> Default for HandlerRegistry<D> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Decodes frames, runs the registered handler and encodes the outcome as a reply.
pub struct Dispatcher<D: Driver> {
    driver: Arc<D>,
    registry: HandlerRegistry<D>,
    layouts: LayoutCache,
    functions: RwLock<HashMap<u64, ResolvedFunction>>,
}

struct ResolvedFunction {
    module: Handle,
    name: String,
}

impl<D: Driver> Dispatcher<D> {
    /// Dispatcher with the default handlers.
    pub fn new(driver: Arc<D>) -> Self {
        Self::with_registry(driver, HandlerRegistry::with_defaults())
    }

    /// Dispatcher with a caller-built registry.
    pub fn with_registry(driver: Arc<D>, registry: HandlerRegistry<D>) -> Self {
        Self { driver, registry, layouts: LayoutCache::new(), functions: RwLock::new(HashMap::new()) }
    }

    /// Driver calls are forwarded to.
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Layouts built for launched functions.
    pub fn layouts(&self) -> &LayoutCache {
        &self.layouts
    }

    /// Mangled name recorded when `function` was resolved.
    pub fn function_name(&self, function: Handle) -> Option<String> {
        self.functions.read().get(&function.0).map(|resolved| resolved.name.clone())
    }

    /// Handles one request frame.
    pub fn dispatch(&self, frame: &[u8]) -> Reply {
        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(DecodeError::UnknownOpcode(raw)) => {
                warn!("kapid: unknown opcode {raw}");
                return Reply::failure(ResultCode::NOT_SUPPORTED);
            }
            Err(err) => {
                warn!("kapid: rejecting frame: {err}");
                return Reply::failure(ResultCode::INVALID_VALUE);
            }
        };
        let opcode = command.opcode();
        let Some(handler) = self.registry.get(opcode) else {
            warn!("kapid: no handler for {opcode}");
            return Reply::failure(ResultCode::NOT_SUPPORTED);
        };
        let result = handler(self, &command);
        match &result {
            Ok(reply) => debug!("kapid: {opcode} ok value={:#x}", reply.value),
            Err(status) => error!("kapid: {opcode} failed: {status}"),
        }
        Reply::from_result(result)
    }

    /// Remembers the name behind `function` for lazy layout building.
    fn record_function(&self, module: Handle, function: Handle, name: &str) {
        let resolved = ResolvedFunction { module, name: name.to_string() };
        let previous = self.functions.write().insert(function.0, resolved);
        if previous.is_some_and(|old| old.name != name) {
            // Handle recycled for another symbol.
            self.layouts.remove(function.0);
        }
    }

    fn forget_module(&self, module: Handle) {
        let mut functions = self.functions.write();
        functions.retain(|&function, resolved| {
            let keep = resolved.module != module;
            if !keep {
                self.layouts.remove(function);
            }
            keep
        });
    }

    fn layout_for(&self, function: Handle) -> DriverResult<Arc<FunctionLayout>> {
        if let Some(layout) = self.layouts.get(function.0) {
            return Ok(layout);
        }
        let name = self.function_name(function).ok_or_else(|| {
            warn!("kapid: launch of unresolved function {function}");
            ResultCode::INVALID_HANDLE
        })?;
        self.layouts.get_or_build(function.0, &name).map_err(|err| {
            warn!("kapid: cannot derive layout for {name}: {err}");
            ResultCode::INVALID_VALUE
        })
    }
}

fn default_handler<D: Driver>(opcode: Opcode) -> Handler<D> {
    use Opcode::*;
    match opcode {
        CuInit | HipInit => init::<D>,
        CuDeviceGet | HipDeviceGet => device_get::<D>,
        CuCtxCreate | HipCtxCreate => ctx_create::<D>,
        CuCtxDestroy | HipCtxDestroy => ctx_destroy::<D>,
        CuCtxSynchronize | HipDeviceSynchronize => ctx_synchronize::<D>,
        CuModuleLoad | HipModuleLoad => module_load::<D>,
        CuModuleUnload => module_unload::<D>,
        CuModuleGetFunction | HipModuleGetFunction => module_get_function::<D>,
        CuLaunchKernel | HipModuleLaunchKernel => launch_kernel::<D>,
        CuMemAlloc | HipMalloc => mem_alloc::<D>,
        CuMemAllocPitch => mem_alloc_pitch::<D>,
        CuMemFree | HipFree => mem_free::<D>,
        CuMemcpyHtoD | CuMemcpyHtoDAsync | HipMemcpyHtoD | HipMemcpyHtoDAsync => memcpy_htod::<D>,
        CuMemcpyDtoH | CuMemcpyDtoHAsync | HipMemcpyDtoH | HipMemcpyDtoHAsync => memcpy_dtoh::<D>,
        CuStreamCreate | HipStreamCreate => stream_create::<D>,
        CuStreamSynchronize | HipStreamSynchronize => stream_synchronize::<D>,
        CuStreamDestroy | HipStreamDestroy => stream_destroy::<D>,
        KleioLoadModel => model_load::<D>,
        KleioInference => model_infer::<D>,
        KleioForceGc => model_gc::<D>,
        NvmlRunningProcs => running_processes::<D>,
        NvmlUtilRate => utilization::<D>,
        HipHostMalloc => host_malloc::<D>,
        HipHostGetDevicePointer => host_get_device_pointer::<D>,
        HipHostFree => host_free::<D>,
        HipHostRegister => host_register::<D>,
        HipHostUnregister => host_unregister::<D>,
    }
}

/// A handler was registered for an opcode whose command it cannot read.
fn mismatch(command: &Command<'_>) -> ResultCode {
    error!("kapid: handler mismatch for {}", command.opcode());
    ResultCode::INVALID_VALUE
}

fn done(result: DriverResult<()>) -> DriverResult<Reply> {
    result.map(|()| Reply::success())
}

fn init<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::Init { flags, .. } => done(d.driver.init(flags)),
        _ => Err(mismatch(command)),
    }
}

fn device_get<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::DeviceGet { ordinal, .. } => {
            d.driver.device_get(ordinal).map(|device| Reply::value(device as i64 as u64))
        }
        _ => Err(mismatch(command)),
    }
}

fn ctx_create<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::CtxCreate { flags, device, .. } => d.driver.ctx_create(flags, device).map(Reply::handle),
        _ => Err(mismatch(command)),
    }
}

fn ctx_destroy<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::CtxDestroy { ctx, .. } => done(d.driver.ctx_destroy(ctx)),
        _ => Err(mismatch(command)),
    }
}

fn ctx_synchronize<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::CtxSynchronize { .. } => done(d.driver.ctx_synchronize()),
        _ => Err(mismatch(command)),
    }
}

fn module_load<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::ModuleLoad { path, .. } => d.driver.module_load(path).map(Reply::handle),
        _ => Err(mismatch(command)),
    }
}

fn module_unload<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    let Command::ModuleUnload { module } = *command else {
        return Err(mismatch(command));
    };
    d.driver.module_unload(module)?;
    d.forget_module(module);
    Ok(Reply::success())
}

fn module_get_function<D: Driver>(
    d: &Dispatcher<D>,
    command: &Command<'_>,
) -> DriverResult<Reply> {
    let Command::ModuleGetFunction { module, name, .. } = *command else {
        return Err(mismatch(command));
    };
    let function = d.driver.module_get_function(module, name)?;
    d.record_function(module, function, name);
    Ok(Reply::handle(function))
}

fn launch_kernel<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    let Command::LaunchKernel { header, params, .. } = *command else {
        return Err(mismatch(command));
    };
    let layout = d.layout_for(header.function)?;
    let args = unpack(&layout, params).map_err(|err| {
        warn!("kapid: launch of {}: {err}", header.function);
        ResultCode::INVALID_VALUE
    })?;
    done(d.driver.launch_kernel(&header, &args))
}

fn mem_alloc<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::MemAlloc { size, .. } => d.driver.mem_alloc(size).map(Reply::handle),
        _ => Err(mismatch(command)),
    }
}

fn mem_alloc_pitch<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    let Command::MemAllocPitch { width, height, element_size } = *command else {
        return Err(mismatch(command));
    };
    let (ptr, pitch) = d.driver.mem_alloc_pitch(width, height, element_size)?;
    Ok(Reply { aux: pitch, ..Reply::handle(ptr) })
}

fn mem_free<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::MemFree { ptr, .. } => done(d.driver.mem_free(ptr)),
        _ => Err(mismatch(command)),
    }
}

fn memcpy_htod<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::MemcpyHtoD { dst, src, count, stream, .. } => {
            done(d.driver.memcpy_htod(dst, src, count, stream))
        }
        _ => Err(mismatch(command)),
    }
}

fn memcpy_dtoh<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::MemcpyDtoH { dst, src, count, stream, .. } => {
            done(d.driver.memcpy_dtoh(dst, src, count, stream))
        }
        _ => Err(mismatch(command)),
    }
}

fn stream_create<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::StreamCreate { flags, .. } => d.driver.stream_create(flags).map(Reply::handle),
        _ => Err(mismatch(command)),
    }
}

fn stream_synchronize<D: Driver>(
    d: &Dispatcher<D>,
    command: &Command<'_>,
) -> DriverResult<Reply> {
    match *command {
        Command::StreamSynchronize { stream, .. } => done(d.driver.stream_synchronize(stream)),
        _ => Err(mismatch(command)),
    }
}

fn stream_destroy<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::StreamDestroy { stream, .. } => done(d.driver.stream_destroy(stream)),
        _ => Err(mismatch(command)),
    }
}

fn model_load<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::KleioLoadModel { src, len } => done(d.driver.model_load(src, len)),
        _ => Err(mismatch(command)),
    }
}

fn model_infer<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::KleioInference { src, len, use_gpu } => {
            done(d.driver.model_infer(src, len, use_gpu != 0))
        }
        _ => Err(mismatch(command)),
    }
}

fn model_gc<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::KleioForceGc => done(d.driver.model_gc()),
        _ => Err(mismatch(command)),
    }
}

fn running_processes<D: Driver>(
    d: &Dispatcher<D>,
    command: &Command<'_>,
) -> DriverResult<Reply> {
    match *command {
        Command::NvmlRunningProcs => d.driver.running_processes().map(Reply::value),
        _ => Err(mismatch(command)),
    }
}

fn utilization<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::NvmlUtilRate => d.driver.utilization().map(Reply::value),
        _ => Err(mismatch(command)),
    }
}

fn host_malloc<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::HostMalloc { size, flags } => d.driver.host_malloc(size, flags).map(Reply::value),
        _ => Err(mismatch(command)),
    }
}

fn host_get_device_pointer<D: Driver>(
    d: &Dispatcher<D>,
    command: &Command<'_>,
) -> DriverResult<Reply> {
    match *command {
        Command::HostGetDevicePointer { host, flags } => {
            d.driver.host_get_device_pointer(host, flags).map(Reply::handle)
        }
        _ => Err(mismatch(command)),
    }
}

fn host_free<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::HostFree { host } => done(d.driver.host_free(host)),
        _ => Err(mismatch(command)),
    }
}

fn host_register<D: Driver>(d: &Dispatcher<D>, command: &Command<'_>) -> DriverResult<Reply> {
    match *command {
        Command::HostRegister { host, size, flags } => done(d.driver.host_register(host, size, flags)),
        _ => Err(mismatch(command)),
    }
}

fn host_unregister<D: Driver>(
    d: &Dispatcher<D>,
    command: &Command<'_>,
) -> DriverResult<Reply> {
    match *command {
        Command::HostUnregister { host } => done(d.driver.host_unregister(host)),
        _ => Err(mismatch(command)),
    }
}
