// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! HIP-flavoured call surface. Host addresses are shared-region offsets, as for [`Cuda`].
//!
//! [`Cuda`]: crate::Cuda

use kapi_ipc::DatagramTransport;
use kapi_wire::{Api, Command, Handle, LaunchHeader};

use crate::client::KapiClient;
use crate::Result;

const API: Api = Api::Hip;

/// Borrowed view issuing HIP opcodes.
pub struct Hip<'a, T: DatagramTransport + 'static> {
    client: &'a KapiClient<T>,
}

impl<'a, T: DatagramTransport + 'static> Hip<'a, T> {
    pub(crate) fn new(client: &'a KapiClient<T>) -> Self {
        Self { client }
    }

    /// `hipInit`.
    pub fn init(&self, flags: u32) -> Result<()> {
        self.client.call(&Command::Init { api: API, flags }).map(|_| ())
    }

    /// `hipDeviceGet`.
    pub fn device_get(&self, ordinal: i32) -> Result<i32> {
        let reply = self.client.call(&Command::DeviceGet { api: API, ordinal })?;
        Ok(reply.value as i32)
    }

    /// `hipCtxCreate`.
    pub fn ctx_create(&self, flags: u32, device: i32) -> Result<Handle> {
        let reply = self.client.call(&Command::CtxCreate { api: API, flags, device })?;
        Ok(Handle(reply.value))
    }

    /// `hipCtxDestroy`.
    pub fn ctx_destroy(&self, ctx: Handle) -> Result<()> {
        self.client.call(&Command::CtxDestroy { api: API, ctx }).map(|_| ())
    }

    /// `hipDeviceSynchronize`.
    pub fn device_synchronize(&self) -> Result<()> {
        self.client.call(&Command::CtxSynchronize { api: API }).map(|_| ())
    }

    /// `hipModuleLoad`.
    pub fn module_load(&self, path: &str) -> Result<Handle> {
        let reply = self.client.call(&Command::ModuleLoad { api: API, path })?;
        Ok(Handle(reply.value))
    }

    /// `hipModuleGetFunction`; records the argument layout of the mangled `name`.
    pub fn module_get_function(&self, module: Handle, name: &str) -> Result<Handle> {
        self.client.resolve_function(API, module, name)
    }

    /// `hipModuleLaunchKernel`.
    pub fn module_launch_kernel(&self, header: LaunchHeader, args: &[&[u8]]) -> Result<()> {
        self.client.launch(API, header, args)
    }

    /// `hipMalloc`.
    pub fn malloc(&self, size: u64) -> Result<Handle> {
        let reply = self.client.call(&Command::MemAlloc { api: API, size })?;
        Ok(Handle(reply.value))
    }

    /// `hipFree`.
    pub fn free(&self, ptr: Handle) -> Result<()> {
        self.client.call(&Command::MemFree { api: API, ptr }).map(|_| ())
    }

    /// `hipMemcpyHtoD`.
    pub fn memcpy_htod(&self, dst: Handle, src: u64, count: u64) -> Result<()> {
        self.client
            .call(&Command::MemcpyHtoD { api: API, dst, src, count, stream: None })
            .map(|_| ())
    }

    /// `hipMemcpyHtoDAsync`.
    pub fn memcpy_htod_async(&self, dst: Handle, src: u64, count: u64, stream: Handle) -> Result<()> {
        self.client
            .call(&Command::MemcpyHtoD { api: API, dst, src, count, stream: Some(stream) })
            .map(|_| ())
    }

    /// `hipMemcpyDtoH`.
    pub fn memcpy_dtoh(&self, dst: u64, src: Handle, count: u64) -> Result<()> {
        self.client
            .call(&Command::MemcpyDtoH { api: API, dst, src, count, stream: None })
            .map(|_| ())
    }

    /// `hipMemcpyDtoHAsync`.
    pub fn memcpy_dtoh_async(&self, dst: u64, src: Handle, count: u64, stream: Handle) -> Result<()> {
        self.client
            .call(&Command::MemcpyDtoH { api: API, dst, src, count, stream: Some(stream) })
            .map(|_| ())
    }

    /// `hipStreamCreate`.
    pub fn stream_create(&self, flags: u32) -> Result<Handle> {
        let reply = self.client.call(&Command::StreamCreate { api: API, flags })?;
        Ok(Handle(reply.value))
    }

    /// `hipStreamSynchronize`.
    pub fn stream_synchronize(&self, stream: Handle) -> Result<()> {
        self.client.call(&Command::StreamSynchronize { api: API, stream }).map(|_| ())
    }

    /// `hipStreamDestroy`.
    pub fn stream_destroy(&self, stream: Handle) -> Result<()> {
        self.client.call(&Command::StreamDestroy { api: API, stream }).map(|_| ())
    }

    /// `hipHostMalloc`; returns the shared-region offset of the new host buffer.
    pub fn host_malloc(&self, size: u64, flags: u32) -> Result<u64> {
        Ok(self.client.call(&Command::HostMalloc { size, flags })?.value)
    }

    /// `hipHostGetDevicePointer`.
    pub fn host_get_device_pointer(&self, host: u64, flags: u32) -> Result<Handle> {
        let reply = self.client.call(&Command::HostGetDevicePointer { host, flags })?;
        Ok(Handle(reply.value))
    }

    /// `hipHostFree`.
    pub fn host_free(&self, host: u64) -> Result<()> {
        self.client.call(&Command::HostFree { host }).map(|_| ())
    }

    /// `hipHostRegister`.
    pub fn host_register(&self, host: u64, size: u64, flags: u32) -> Result<()> {
        self.client.call(&Command::HostRegister { host, size, flags }).map(|_| ())
    }

    /// `hipHostUnregister`.
    pub fn host_unregister(&self, host: u64) -> Result<()> {
        self.client.call(&Command::HostUnregister { host }).map(|_| ())
    }
}
