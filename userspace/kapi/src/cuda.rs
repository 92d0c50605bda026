// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CUDA-flavoured call surface.
//!
//! Host addresses (`src` of a host-to-device copy, `dst` of a device-to-host copy, model
//! buffers) are offsets into the host region shared with the worker, never caller pointers.

use kapi_ipc::DatagramTransport;
use kapi_wire::{Api, Command, Handle, LaunchHeader};

use crate::client::KapiClient;
use crate::Result;

const API: Api = Api::Cuda;

/// Borrowed view issuing CUDA opcodes.
pub struct Cuda<'a, T: DatagramTransport + 'static> {
    client: &'a KapiClient<T>,
}

impl<'a, T: DatagramTransport + 'static> Cuda<'a, T> {
    pub(crate) fn new(client: &'a KapiClient<T>) -> Self {
        Self { client }
    }

    /// `cuInit`.
    pub fn init(&self, flags: u32) -> Result<()> {
        self.client.call(&Command::Init { api: API, flags }).map(|_| ())
    }

    /// `cuDeviceGet`.
    pub fn device_get(&self, ordinal: i32) -> Result<i32> {
        let reply = self.client.call(&Command::DeviceGet { api: API, ordinal })?;
        Ok(reply.value as i32)
    }

    /// `cuCtxCreate`.
    pub fn ctx_create(&self, flags: u32, device: i32) -> Result<Handle> {
        let reply = self.client.call(&Command::CtxCreate { api: API, flags, device })?;
        Ok(Handle(reply.value))
    }

    /// `cuCtxDestroy`.
    pub fn ctx_destroy(&self, ctx: Handle) -> Result<()> {
        self.client.call(&Command::CtxDestroy { api: API, ctx }).map(|_| ())
    }

    /// `cuCtxSynchronize`.
    pub fn ctx_synchronize(&self) -> Result<()> {
        self.client.call(&Command::CtxSynchronize { api: API }).map(|_| ())
    }

    /// `cuModuleLoad`; `path` is resolved on the worker.
    pub fn module_load(&self, path: &str) -> Result<Handle> {
        let reply = self.client.call(&Command::ModuleLoad { api: API, path })?;
        Ok(Handle(reply.value))
    }

    /// `cuModuleUnload`.
    pub fn module_unload(&self, module: Handle) -> Result<()> {
        self.client.call(&Command::ModuleUnload { module }).map(|_| ())
    }

    /// `cuModuleGetFunction`. `name` must be the mangled symbol; its argument layout is recorded
    /// so the function can be launched.
    pub fn module_get_function(&self, module: Handle, name: &str) -> Result<Handle> {
        self.client.resolve_function(API, module, name)
    }

    /// `cuLaunchKernel`. `args` holds each argument's bytes in declaration order.
    pub fn launch_kernel(&self, header: LaunchHeader, args: &[&[u8]]) -> Result<()> {
        self.client.launch(API, header, args)
    }

    /// `cuMemAlloc`.
    pub fn mem_alloc(&self, size: u64) -> Result<Handle> {
        let reply = self.client.call(&Command::MemAlloc { api: API, size })?;
        Ok(Handle(reply.value))
    }

    /// `cuMemAllocPitch`; returns the pointer and the row pitch.
    pub fn mem_alloc_pitch(&self, width: u64, height: u64, element_size: u32) -> Result<(Handle, u64)> {
        let reply = self.client.call(&Command::MemAllocPitch { width, height, element_size })?;
        Ok((Handle(reply.value), reply.aux))
    }

    /// `cuMemFree`.
    pub fn mem_free(&self, ptr: Handle) -> Result<()> {
        self.client.call(&Command::MemFree { api: API, ptr }).map(|_| ())
    }

    /// `cuMemcpyHtoD`.
    pub fn memcpy_htod(&self, dst: Handle, src: u64, count: u64) -> Result<()> {
        self.client
            .call(&Command::MemcpyHtoD { api: API, dst, src, count, stream: None })
            .map(|_| ())
    }

    /// `cuMemcpyHtoDAsync`.
    pub fn memcpy_htod_async(&self, dst: Handle, src: u64, count: u64, stream: Handle) -> Result<()> {
        self.client
            .call(&Command::MemcpyHtoD { api: API, dst, src, count, stream: Some(stream) })
            .map(|_| ())
    }

    /// `cuMemcpyDtoH`.
    pub fn memcpy_dtoh(&self, dst: u64, src: Handle, count: u64) -> Result<()> {
        self.client
            .call(&Command::MemcpyDtoH { api: API, dst, src, count, stream: None })
            .map(|_| ())
    }

    /// `cuMemcpyDtoHAsync`.
    pub fn memcpy_dtoh_async(&self, dst: u64, src: Handle, count: u64, stream: Handle) -> Result<()> {
        self.client
            .call(&Command::MemcpyDtoH { api: API, dst, src, count, stream: Some(stream) })
            .map(|_| ())
    }

    /// `cuStreamCreate`.
    pub fn stream_create(&self, flags: u32) -> Result<Handle> {
        let reply = self.client.call(&Command::StreamCreate { api: API, flags })?;
        Ok(Handle(reply.value))
    }

    /// `cuStreamSynchronize`.
    pub fn stream_synchronize(&self, stream: Handle) -> Result<()> {
        self.client.call(&Command::StreamSynchronize { api: API, stream }).map(|_| ())
    }

    /// `cuStreamDestroy`.
    pub fn stream_destroy(&self, stream: Handle) -> Result<()> {
        self.client.call(&Command::StreamDestroy { api: API, stream }).map(|_| ())
    }

    /// Loads an inference model staged at `src` in the shared host region.
    pub fn kleio_load_model(&self, src: u64, len: u64) -> Result<()> {
        self.client.call(&Command::KleioLoadModel { src, len }).map(|_| ())
    }

    /// Runs inference over a batch staged at `src`.
    pub fn kleio_inference(&self, src: u64, len: u64, use_gpu: bool) -> Result<()> {
        self.client
            .call(&Command::KleioInference { src, len, use_gpu: i32::from(use_gpu) })
            .map(|_| ())
    }

    /// Releases inference scratch memory.
    pub fn kleio_force_gc(&self) -> Result<()> {
        self.client.call(&Command::KleioForceGc).map(|_| ())
    }

    /// Number of processes using the device.
    pub fn nvml_running_procs(&self) -> Result<u64> {
        Ok(self.client.call(&Command::NvmlRunningProcs)?.value)
    }

    /// Device utilisation in percent.
    pub fn nvml_util_rate(&self) -> Result<u64> {
        Ok(self.client.call(&Command::NvmlUtilRate)?.value)
    }
}
