// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client core shared by the typed surfaces.

use std::sync::Arc;

use kapi_ipc::{CallerChannel, DatagramTransport, KapiConfig, Wait};
use kapi_kargs::{pack, parse_mangled, FunctionLayout, LayoutCache};
use kapi_wire::{Api, CallMode, Command, Handle, LaunchHeader, Reply};
use log::{debug, warn};

use crate::cuda::Cuda;
use crate::hip::Hip;
use crate::{KapiError, Result};

/// Remote driver client.
///
/// Safe to share between threads; every call is correlated independently.
pub struct KapiClient<T: DatagramTransport + 'static> {
    channel: CallerChannel<T>,
    layouts: LayoutCache,
}

impl<T: DatagramTransport + 'static> KapiClient<T> {
    /// Wraps an already started channel.
    pub fn new(channel: CallerChannel<T>) -> Self {
        Self { channel, layouts: LayoutCache::new() }
    }

    /// Starts a channel over `transport` and waits for the worker announcement.
    pub fn connect(transport: T, config: &KapiConfig, wait: Wait) -> Result<Self> {
        let channel = CallerChannel::start(transport, &config.channel)?;
        channel.wait_for_peer(wait)?;
        Ok(Self::new(channel))
    }

    /// Underlying channel.
    pub fn channel(&self) -> &CallerChannel<T> {
        &self.channel
    }

    /// Layouts of every function resolved through this client.
    pub fn layouts(&self) -> &LayoutCache {
        &self.layouts
    }

    /// CUDA-flavoured calls.
    pub fn cuda(&self) -> Cuda<'_, T> {
        Cuda::new(self)
    }

    /// HIP-flavoured calls.
    pub fn hip(&self) -> Hip<'_, T> {
        Hip::new(self)
    }

    /// Sends `command` and returns the worker's reply.
    ///
    /// Sync opcodes block for the reply. Async opcodes return as soon as the frame is sent; the
    /// returned reply is then synthesised: success, or a failure carrying the last async error
    /// seen on this channel.
    pub fn submit(&self, command: &Command<'_>) -> Result<Reply> {
        let frame = command.encode()?;
        let reply = match command.mode() {
            CallMode::Sync => self.channel.call_sync(&frame)?,
            CallMode::Async => {
                self.channel.call_async(&frame)?;
                self.channel.last_async_failure().map_or(Reply::success(), Reply::failure)
            }
        };
        debug!("kapi: {} -> {}", command.opcode(), reply.status);
        Ok(reply)
    }

    /// [`submit`](Self::submit), turning a failure status into an error.
    pub(crate) fn call(&self, command: &Command<'_>) -> Result<Reply> {
        let reply = self.submit(command)?;
        if reply.status.is_success() {
            return Ok(reply);
        }
        Err(match command.mode() {
            CallMode::Sync => KapiError::Driver { opcode: command.opcode(), status: reply.status },
            CallMode::Async => KapiError::AsyncFailure(reply.status),
        })
    }

    /// Resolves `name` in `module` and records its argument layout under the returned handle.
    pub(crate) fn resolve_function(&self, api: Api, module: Handle, name: &str) -> Result<Handle> {
        let reply = self.call(&Command::ModuleGetFunction { api, module, name })?;
        let function = Handle(reply.value);
        match parse_mangled(name) {
            Ok(layout) => {
                debug!("kapi: {name} at {function}: {layout}");
                self.layouts.insert(function.0, layout);
                Ok(function)
            }
            Err(source) => {
                warn!("kapi: {name} resolved to {function} but cannot be launched: {source}");
                Err(KapiError::Layout { name: name.to_string(), source })
            }
        }
    }

    /// Layout recorded for `function`.
    pub(crate) fn layout(&self, function: Handle) -> Result<Arc<FunctionLayout>> {
        self.layouts.get(function.0).ok_or(KapiError::UnknownFunction(function))
    }

    /// Packs `args` against the function's layout and issues the async launch.
    pub(crate) fn launch(&self, api: Api, header: LaunchHeader, args: &[&[u8]]) -> Result<()> {
        let layout = self.layout(header.function)?;
        let params = pack(&layout, args)?;
        self.call(&Command::LaunchKernel { api, header, params: &params })?;
        Ok(())
    }
}
