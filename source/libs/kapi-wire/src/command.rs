// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request frames.
//!
//! Every frame is `[opcode:u32le]` followed by the opcode's fixed fields (little-endian, no
//! padding). Launch frames additionally carry the packed argument trailer. CUDA/HIP twins share
//! one variant tagged with [`Api`]; the opcode is derived from the variant and its family.

use thiserror::Error;

use crate::opcode::{Api, CallMode, Opcode};
use crate::status::Handle;

/// Width of the NUL-padded path/name field.
pub const NAME_FIELD_LEN: usize = 256;

/// Fixed part of a launch frame, opcode included.
pub const LAUNCH_HEADER_LEN: usize = 4 + 8 + 12 + 12 + 4 + 8 + 4;

/// Largest fixed-size (non-launch) frame.
pub const MAX_FIXED_COMMAND_LEN: usize = 4 + 8 + NAME_FIELD_LEN;

/// Fixed launch parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LaunchHeader {
    /// Function handle obtained from a get-function call.
    pub function: Handle,
    /// Grid dimensions.
    pub grid: [u32; 3],
    /// Block dimensions.
    pub block: [u32; 3],
    /// Dynamic shared memory in bytes.
    pub shared_mem: u32,
    /// Target stream; null selects the default stream.
    pub stream: Handle,
}

/// One logical remote call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// `cuInit` / `hipInit`.
    Init { api: Api, flags: u32 },
    /// `cuDeviceGet` / `hipDeviceGet`.
    DeviceGet { api: Api, ordinal: i32 },
    /// `cuCtxCreate` / `hipCtxCreate`.
    CtxCreate { api: Api, flags: u32, device: i32 },
    /// `cuCtxDestroy` / `hipCtxDestroy`.
    CtxDestroy { api: Api, ctx: Handle },
    /// `cuCtxSynchronize` / `hipDeviceSynchronize`.
    CtxSynchronize { api: Api },
    /// `cuModuleLoad` / `hipModuleLoad`.
    ModuleLoad { api: Api, path: &'a str },
    /// `cuModuleUnload`.
    ModuleUnload { module: Handle },
    /// `cuModuleGetFunction` / `hipModuleGetFunction`; `name` is the mangled symbol.
    ModuleGetFunction { api: Api, module: Handle, name: &'a str },
    /// `cuLaunchKernel` / `hipModuleLaunchKernel`; `params` is the packed argument trailer.
    LaunchKernel { api: Api, header: LaunchHeader, params: &'a [u8] },
    /// `cuMemAlloc` / `hipMalloc`.
    MemAlloc { api: Api, size: u64 },
    /// `cuMemFree` / `hipFree`.
    MemFree { api: Api, ptr: Handle },
    /// Host to device copy; a stream selects the async opcode.
    MemcpyHtoD { api: Api, dst: Handle, src: u64, count: u64, stream: Option<Handle> },
    /// Device to host copy; a stream selects the async opcode.
    MemcpyDtoH { api: Api, dst: u64, src: Handle, count: u64, stream: Option<Handle> },
    /// `cuStreamCreate` / `hipStreamCreate`.
    StreamCreate { api: Api, flags: u32 },
    /// `cuStreamSynchronize` / `hipStreamSynchronize`.
    StreamSynchronize { api: Api, stream: Handle },
    /// `cuStreamDestroy` / `hipStreamDestroy`.
    StreamDestroy { api: Api, stream: Handle },
    /// `cuMemAllocPitch`; reply `aux` carries the pitch.
    MemAllocPitch { width: u64, height: u64, element_size: u32 },
    /// Loads an inference model from the shared host region.
    KleioLoadModel { src: u64, len: u64 },
    /// Runs inference over a batch in the shared host region.
    KleioInference { src: u64, len: u64, use_gpu: i32 },
    /// Releases inference scratch memory.
    KleioForceGc,
    /// Number of processes running on the device.
    NvmlRunningProcs,
    /// Device utilisation percentage.
    NvmlUtilRate,
    /// `hipHostMalloc`.
    HostMalloc { size: u64, flags: u32 },
    /// `hipHostGetDevicePointer`.
    HostGetDevicePointer { host: u64, flags: u32 },
    /// `hipHostFree`.
    HostFree { host: u64 },
    /// `hipHostRegister`.
    HostRegister { host: u64, size: u64, flags: u32 },
    /// `hipHostUnregister`.
    HostUnregister { host: u64 },
}

/// Encode-side failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Name does not fit the fixed field with its terminator.
    #[error("name is {len} bytes, limit is {}", NAME_FIELD_LEN - 1)]
    NameTooLong {
        /// Name length in bytes.
        len: usize,
    },
    /// Name contains a NUL byte.
    #[error("name contains an interior NUL")]
    InteriorNul,
    /// Launch trailer length does not fit the `u32` size field.
    #[error("launch parameters of {len} bytes exceed the size field")]
    ParamsTooLarge {
        /// Trailer length.
        len: usize,
    },
}

/// Decode-side failures.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame shorter than the opcode field.
    #[error("frame of {len} bytes has no opcode")]
    Truncated {
        /// Frame length.
        len: usize,
    },
    /// Opcode outside the catalog.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    /// Frame length differs from what the opcode requires.
    #[error("{opcode}: expected {expected} bytes, got {got}")]
    Length {
        /// Decoded opcode.
        opcode: Opcode,
        /// Required length.
        expected: usize,
        /// Actual length.
        got: usize,
    },
    /// Name field without a terminator or not UTF-8.
    #[error("{opcode}: malformed name field")]
    BadName {
        /// Decoded opcode.
        opcode: Opcode,
    },
}

const fn pick(api: Api, cuda: Opcode, hip: Opcode) -> Opcode {
    match api {
        Api::Cuda => cuda,
        Api::Hip => hip,
    }
}

impl<'a> Command<'a> {
    /// Wire opcode for this command.
    pub fn opcode(&self) -> Opcode {
        use Opcode::*;
        match *self {
            Command::Init { api, .. } => pick(api, CuInit, HipInit),
            Command::DeviceGet { api, .. } => pick(api, CuDeviceGet, HipDeviceGet),
            Command::CtxCreate { api, .. } => pick(api, CuCtxCreate, HipCtxCreate),
            Command::CtxDestroy { api, .. } => pick(api, CuCtxDestroy, HipCtxDestroy),
            Command::CtxSynchronize { api } => pick(api, CuCtxSynchronize, HipDeviceSynchronize),
            Command::ModuleLoad { api, .. } => pick(api, CuModuleLoad, HipModuleLoad),
            Command::ModuleUnload { .. } => CuModuleUnload,
            Command::ModuleGetFunction { api, .. } => {
                pick(api, CuModuleGetFunction, HipModuleGetFunction)
            }
            Command::LaunchKernel { api, .. } => pick(api, CuLaunchKernel, HipModuleLaunchKernel),
            Command::MemAlloc { api, .. } => pick(api, CuMemAlloc, HipMalloc),
            Command::MemFree { api, .. } => pick(api, CuMemFree, HipFree),
            Command::MemcpyHtoD { api, stream: None, .. } => pick(api, CuMemcpyHtoD, HipMemcpyHtoD),
            Command::MemcpyHtoD { api, stream: Some(_), .. } => {
                pick(api, CuMemcpyHtoDAsync, HipMemcpyHtoDAsync)
            }
            Command::MemcpyDtoH { api, stream: None, .. } => pick(api, CuMemcpyDtoH, HipMemcpyDtoH),
            Command::MemcpyDtoH { api, stream: Some(_), .. } => {
                pick(api, CuMemcpyDtoHAsync, HipMemcpyDtoHAsync)
            }
            Command::StreamCreate { api, .. } => pick(api, CuStreamCreate, HipStreamCreate),
            Command::StreamSynchronize { api, .. } => {
                pick(api, CuStreamSynchronize, HipStreamSynchronize)
            }
            Command::StreamDestroy { api, .. } => pick(api, CuStreamDestroy, HipStreamDestroy),
            Command::MemAllocPitch { .. } => CuMemAllocPitch,
            Command::KleioLoadModel { .. } => KleioLoadModel,
            Command::KleioInference { .. } => KleioInference,
            Command::KleioForceGc => KleioForceGc,
            Command::NvmlRunningProcs => NvmlRunningProcs,
            Command::NvmlUtilRate => NvmlUtilRate,
            Command::HostMalloc { .. } => HipHostMalloc,
            Command::HostGetDevicePointer { .. } => HipHostGetDevicePointer,
            Command::HostFree { .. } => HipHostFree,
            Command::HostRegister { .. } => HipHostRegister,
            Command::HostUnregister { .. } => HipHostUnregister,
        }
    }

    /// Call mode of the underlying opcode.
    pub fn mode(&self) -> CallMode {
        self.opcode().mode()
    }

    /// Exact encoded length.
    pub fn encoded_len(&self) -> usize {
        match self {
            Command::LaunchKernel { params, .. } => LAUNCH_HEADER_LEN + params.len(),
            _ => fixed_len(self.opcode()).unwrap_or(LAUNCH_HEADER_LEN),
        }
    }

    /// Encodes into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Appends the frame to `out`. On error `out` is left unchanged.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.validate()?;
        let mut w = Writer(out);
        w.u32(self.opcode() as u32);
        match *self {
            Command::Init { flags, .. } | Command::StreamCreate { flags, .. } => w.u32(flags),
            Command::DeviceGet { ordinal, .. } => w.i32(ordinal),
            Command::CtxCreate { flags, device, .. } => {
                w.u32(flags);
                w.i32(device);
            }
            Command::CtxDestroy { ctx: h, .. }
            | Command::ModuleUnload { module: h }
            | Command::MemFree { ptr: h, .. }
            | Command::StreamSynchronize { stream: h, .. }
            | Command::StreamDestroy { stream: h, .. } => w.u64(h.0),
            Command::HostFree { host } | Command::HostUnregister { host } => w.u64(host),
            Command::CtxSynchronize { .. }
            | Command::KleioForceGc
            | Command::NvmlRunningProcs
            | Command::NvmlUtilRate => {}
            Command::ModuleLoad { path, .. } => w.name(path),
            Command::ModuleGetFunction { module, name, .. } => {
                w.u64(module.0);
                w.name(name);
            }
            Command::LaunchKernel { header, params, .. } => {
                // [f:u64, grid:3*u32, block:3*u32, shared:u32, stream:u64, params_len:u32, params]
                w.u64(header.function.0);
                header.grid.iter().for_each(|v| w.u32(*v));
                header.block.iter().for_each(|v| w.u32(*v));
                w.u32(header.shared_mem);
                w.u64(header.stream.0);
                w.u32(params.len() as u32);
                w.0.extend_from_slice(params);
            }
            Command::MemAlloc { size, .. } => w.u64(size),
            Command::MemcpyHtoD { dst, src, count, stream, .. } => {
                w.u64(dst.0);
                w.u64(src);
                w.u64(count);
                if let Some(stream) = stream {
                    w.u64(stream.0);
                }
            }
            Command::MemcpyDtoH { dst, src, count, stream, .. } => {
                w.u64(dst);
                w.u64(src.0);
                w.u64(count);
                if let Some(stream) = stream {
                    w.u64(stream.0);
                }
            }
            Command::MemAllocPitch { width, height, element_size } => {
                w.u64(width);
                w.u64(height);
                w.u32(element_size);
            }
            Command::KleioLoadModel { src, len } => {
                w.u64(src);
                w.u64(len);
            }
            Command::KleioInference { src, len, use_gpu } => {
                w.u64(src);
                w.u64(len);
                w.i32(use_gpu);
            }
            Command::HostMalloc { size: a, flags } | Command::HostGetDevicePointer { host: a, flags } => {
                w.u64(a);
                w.u32(flags);
            }
            Command::HostRegister { host, size, flags } => {
                w.u64(host);
                w.u64(size);
                w.u32(flags);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), EncodeError> {
        match self {
            Command::ModuleLoad { path: name, .. } | Command::ModuleGetFunction { name, .. } => {
                if name.len() >= NAME_FIELD_LEN {
                    return Err(EncodeError::NameTooLong { len: name.len() });
                }
                if name.as_bytes().contains(&0) {
                    return Err(EncodeError::InteriorNul);
                }
            }
            Command::LaunchKernel { params, .. } if u32::try_from(params.len()).is_err() => {
                return Err(EncodeError::ParamsTooLarge { len: params.len() });
            }
            _ => {}
        }
        Ok(())
    }

    /// Decodes a request frame. Borrowed fields point into `frame`.
    pub fn decode(frame: &'a [u8]) -> Result<Self, DecodeError> {
        let raw = frame
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or(DecodeError::Truncated { len: frame.len() })?;
        let opcode = Opcode::from_u32(raw).ok_or(DecodeError::UnknownOpcode(raw))?;
        let expected = match fixed_len(opcode) {
            Some(len) => len,
            None => {
                let declared = frame
                    .get(LAUNCH_HEADER_LEN - 4..LAUNCH_HEADER_LEN)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize);
                LAUNCH_HEADER_LEN.saturating_add(declared.unwrap_or(0))
            }
        };
        if frame.len() != expected {
            return Err(DecodeError::Length { opcode, expected, got: frame.len() });
        }
        let mut r = Reader { buf: frame, pos: 4, opcode };
        Self::decode_body(opcode, &mut r)
    }

    fn decode_body(opcode: Opcode, r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        use Opcode::*;
        let api = opcode.api();
        let cmd = match opcode {
            CuInit | HipInit => Command::Init { api, flags: r.u32()? },
            CuDeviceGet | HipDeviceGet => Command::DeviceGet { api, ordinal: r.i32()? },
            CuCtxCreate | HipCtxCreate => {
                Command::CtxCreate { api, flags: r.u32()?, device: r.i32()? }
            }
            CuCtxDestroy | HipCtxDestroy => Command::CtxDestroy { api, ctx: r.handle()? },
            CuCtxSynchronize | HipDeviceSynchronize => Command::CtxSynchronize { api },
            CuModuleLoad | HipModuleLoad => Command::ModuleLoad { api, path: r.name()? },
            CuModuleUnload => Command::ModuleUnload { module: r.handle()? },
            CuModuleGetFunction | HipModuleGetFunction => {
                Command::ModuleGetFunction { api, module: r.handle()?, name: r.name()? }
            }
            CuLaunchKernel | HipModuleLaunchKernel => {
                let function = r.handle()?;
                let grid = [r.u32()?, r.u32()?, r.u32()?];
                let block = [r.u32()?, r.u32()?, r.u32()?];
                let shared_mem = r.u32()?;
                let stream = r.handle()?;
                let len = r.u32()? as usize;
                let params = r.take(len)?;
                let header = LaunchHeader { function, grid, block, shared_mem, stream };
                Command::LaunchKernel { api, header, params }
            }
            CuMemAlloc | HipMalloc => Command::MemAlloc { api, size: r.u64()? },
            CuMemFree | HipFree => Command::MemFree { api, ptr: r.handle()? },
            CuMemcpyHtoD | HipMemcpyHtoD | CuMemcpyHtoDAsync | HipMemcpyHtoDAsync => {
                let (dst, src, count) = (r.handle()?, r.u64()?, r.u64()?);
                let stream = r.stream_if(opcode.mode())?;
                Command::MemcpyHtoD { api, dst, src, count, stream }
            }
            CuMemcpyDtoH | HipMemcpyDtoH | CuMemcpyDtoHAsync | HipMemcpyDtoHAsync => {
                let (dst, src, count) = (r.u64()?, r.handle()?, r.u64()?);
                let stream = r.stream_if(opcode.mode())?;
                Command::MemcpyDtoH { api, dst, src, count, stream }
            }
            CuStreamCreate | HipStreamCreate => Command::StreamCreate { api, flags: r.u32()? },
            CuStreamSynchronize | HipStreamSynchronize => {
                Command::StreamSynchronize { api, stream: r.handle()? }
            }
            CuStreamDestroy | HipStreamDestroy => {
                Command::StreamDestroy { api, stream: r.handle()? }
            }
            CuMemAllocPitch => Command::MemAllocPitch {
                width: r.u64()?,
                height: r.u64()?,
                element_size: r.u32()?,
            },
            KleioLoadModel => Command::KleioLoadModel { src: r.u64()?, len: r.u64()? },
            KleioInference => {
                Command::KleioInference { src: r.u64()?, len: r.u64()?, use_gpu: r.i32()? }
            }
            KleioForceGc => Command::KleioForceGc,
            NvmlRunningProcs => Command::NvmlRunningProcs,
            NvmlUtilRate => Command::NvmlUtilRate,
            HipHostMalloc => Command::HostMalloc { size: r.u64()?, flags: r.u32()? },
            HipHostGetDevicePointer => {
                Command::HostGetDevicePointer { host: r.u64()?, flags: r.u32()? }
            }
            HipHostFree => Command::HostFree { host: r.u64()? },
            HipHostRegister => {
                Command::HostRegister { host: r.u64()?, size: r.u64()?, flags: r.u32()? }
            }
            HipHostUnregister => Command::HostUnregister { host: r.u64()? },
        };
        Ok(cmd)
    }
}

/// Exact frame length for fixed-shape opcodes; `None` for launches.
pub const fn fixed_len(opcode: Opcode) -> Option<usize> {
    use Opcode::*;
    let body = match opcode {
        CuLaunchKernel | HipModuleLaunchKernel => return None,
        CuCtxSynchronize | HipDeviceSynchronize | KleioForceGc | NvmlRunningProcs
        | NvmlUtilRate => 0,
        CuInit | HipInit | CuDeviceGet | HipDeviceGet | CuStreamCreate | HipStreamCreate => 4,
        CuCtxCreate | HipCtxCreate => 8,
        CuCtxDestroy | HipCtxDestroy | CuModuleUnload | CuMemAlloc | HipMalloc | CuMemFree
        | HipFree | CuStreamSynchronize | HipStreamSynchronize | CuStreamDestroy
        | HipStreamDestroy | HipHostFree | HipHostUnregister => 8,
        HipHostMalloc | HipHostGetDevicePointer => 12,
        KleioLoadModel => 16,
        KleioInference | CuMemAllocPitch | HipHostRegister => 20,
        CuMemcpyHtoD | HipMemcpyHtoD | CuMemcpyDtoH | HipMemcpyDtoH => 24,
        CuMemcpyHtoDAsync | HipMemcpyHtoDAsync | CuMemcpyDtoHAsync | HipMemcpyDtoHAsync => 32,
        CuModuleLoad | HipModuleLoad => NAME_FIELD_LEN,
        CuModuleGetFunction | HipModuleGetFunction => 8 + NAME_FIELD_LEN,
    };
    Some(4 + body)
}

struct Writer<'o>(&'o mut Vec<u8>);

impl Writer<'_> {
    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn name(&mut self, name: &str) {
        let start = self.0.len();
        self.0.extend_from_slice(name.as_bytes());
        self.0.resize(start + NAME_FIELD_LEN, 0);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    opcode: Opcode,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = self
            .pos
            .checked_add(n)
            .and_then(|end| self.buf.get(self.pos..end))
            .ok_or(DecodeError::Length {
                opcode: self.opcode,
                expected: self.pos.saturating_add(n),
                got: self.buf.len(),
            })?;
        self.pos += n;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.u32().map(|v| v as i32)
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn handle(&mut self) -> Result<Handle, DecodeError> {
        self.u64().map(Handle)
    }

    fn stream_if(&mut self, mode: CallMode) -> Result<Option<Handle>, DecodeError> {
        match mode {
            CallMode::Async => self.handle().map(Some),
            CallMode::Sync => Ok(None),
        }
    }

    fn name(&mut self) -> Result<&'a str, DecodeError> {
        let field = self.take(NAME_FIELD_LEN)?;
        let bad = DecodeError::BadName { opcode: self.opcode };
        let end = field.iter().position(|b| *b == 0).ok_or(bad)?;
        core::str::from_utf8(&field[..end]).map_err(|_| bad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_alloc_frame() {
        let frame = Command::MemAlloc { api: Api::Cuda, size: 4096 }.encode().unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[..4], &8u32.to_le_bytes());
        assert_eq!(&frame[4..], &4096u64.to_le_bytes());
        assert_eq!(
            Command::decode(&frame).unwrap(),
            Command::MemAlloc { api: Api::Cuda, size: 4096 }
        );
    }

    #[test]
    fn memcpy_stream_selects_async_opcode() {
        let sync = Command::MemcpyHtoD {
            api: Api::Hip,
            dst: Handle(0x10),
            src: 0,
            count: 64,
            stream: None,
        };
        let with_stream = Command::MemcpyHtoD {
            api: Api::Hip,
            dst: Handle(0x10),
            src: 0,
            count: 64,
            stream: Some(Handle(3)),
        };
        assert_eq!(sync.opcode(), Opcode::HipMemcpyHtoD);
        assert_eq!(with_stream.opcode(), Opcode::HipMemcpyHtoDAsync);
        assert_eq!(with_stream.mode(), CallMode::Async);
        let frame = with_stream.encode().unwrap();
        assert_eq!(frame.len(), 36);
        assert_eq!(Command::decode(&frame).unwrap(), with_stream);
    }

    #[test]
    fn names_are_padded_and_bounded() {
        let cmd = Command::ModuleGetFunction {
            api: Api::Cuda,
            module: Handle(1),
            name: "_Z3fooPfS_",
        };
        let frame = cmd.encode().unwrap();
        assert_eq!(frame.len(), MAX_FIXED_COMMAND_LEN);
        assert_eq!(Command::decode(&frame).unwrap(), cmd);

        let long = "x".repeat(NAME_FIELD_LEN);
        let cmd = Command::ModuleLoad { api: Api::Hip, path: &long };
        assert_eq!(cmd.encode(), Err(EncodeError::NameTooLong { len: NAME_FIELD_LEN }));
        let fits = &long[..NAME_FIELD_LEN - 1];
        assert!(Command::ModuleLoad { api: Api::Hip, path: fits }.encode().is_ok());
        assert_eq!(
            Command::ModuleLoad { api: Api::Hip, path: "a\0b" }.encode(),
            Err(EncodeError::InteriorNul)
        );
    }

    #[test]
    fn unterminated_name_is_rejected() {
        let mut frame = (Opcode::CuModuleLoad as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(&[b'a'; NAME_FIELD_LEN]);
        assert_eq!(
            Command::decode(&frame),
            Err(DecodeError::BadName { opcode: Opcode::CuModuleLoad })
        );
    }

    #[test]
    fn launch_trailer_length_must_match() {
        let params = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let cmd = Command::LaunchKernel {
            api: Api::Cuda,
            header: LaunchHeader {
                function: Handle(0xf00),
                grid: [4, 1, 1],
                block: [256, 1, 1],
                shared_mem: 0,
                stream: Handle::NULL,
            },
            params: &params,
        };
        let mut frame = cmd.encode().unwrap();
        assert_eq!(frame.len(), LAUNCH_HEADER_LEN + params.len());
        assert_eq!(Command::decode(&frame).unwrap(), cmd);

        frame.pop();
        assert_eq!(
            Command::decode(&frame),
            Err(DecodeError::Length {
                opcode: Opcode::CuLaunchKernel,
                expected: LAUNCH_HEADER_LEN + params.len(),
                got: LAUNCH_HEADER_LEN + params.len() - 1,
            })
        );
    }

    #[test]
    fn header_errors() {
        assert_eq!(Command::decode(&[8, 0]), Err(DecodeError::Truncated { len: 2 }));
        assert_eq!(Command::decode(&99u32.to_le_bytes()), Err(DecodeError::UnknownOpcode(99)));
        assert_eq!(
            Command::decode(&8u32.to_le_bytes()),
            Err(DecodeError::Length { opcode: Opcode::CuMemAlloc, expected: 12, got: 4 })
        );
    }
}
