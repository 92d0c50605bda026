// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Closed opcode catalog. Numbers are part of the wire format and never change.

use core::fmt;

/// Driver family a command belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Api {
    /// CUDA driver API and its companions (NVML, kleio).
    Cuda,
    /// HIP runtime API.
    Hip,
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Api::Cuda => "cuda",
            Api::Hip => "hip",
        })
    }
}

/// Whether the caller blocks for the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallMode {
    /// Caller blocks until the reply arrives.
    Sync,
    /// Caller returns once the request is sent; failures surface later.
    Async,
}

macro_rules! opcodes {
    ($( $name:ident = $value:literal, $api:ident, $mode:ident; )*) => {
        /// Remote operation identifier; first field of every request frame.
        #[repr(u32)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[allow(missing_docs)]
        pub enum Opcode {
            $( $name = $value, )*
        }

        impl Opcode {
            /// Every opcode in numeric order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Maps a wire value back to an opcode.
            pub const fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $( $value => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            /// Driver family of this opcode.
            pub const fn api(self) -> Api {
                match self {
                    $( Opcode::$name => Api::$api, )*
                }
            }

            /// Call mode of this opcode.
            pub const fn mode(self) -> CallMode {
                match self {
                    $( Opcode::$name => CallMode::$mode, )*
                }
            }

            /// Stable diagnostic name.
            pub const fn name(self) -> &'static str {
                match self {
                    $( Opcode::$name => stringify!($name), )*
                }
            }
        }
    };
}

opcodes! {
    CuInit = 0, Cuda, Sync;
    CuDeviceGet = 1, Cuda, Sync;
    CuCtxCreate = 2, Cuda, Sync;
    CuModuleLoad = 3, Cuda, Sync;
    CuModuleUnload = 4, Cuda, Sync;
    CuModuleGetFunction = 5, Cuda, Sync;
    CuLaunchKernel = 6, Cuda, Async;
    CuCtxDestroy = 7, Cuda, Sync;
    CuMemAlloc = 8, Cuda, Sync;
    CuMemcpyHtoD = 9, Cuda, Sync;
    CuMemcpyDtoH = 10, Cuda, Sync;
    CuCtxSynchronize = 11, Cuda, Sync;
    CuMemFree = 12, Cuda, Sync;
    CuStreamCreate = 13, Cuda, Sync;
    CuStreamSynchronize = 14, Cuda, Sync;
    CuStreamDestroy = 15, Cuda, Sync;
    CuMemcpyHtoDAsync = 16, Cuda, Async;
    CuMemcpyDtoHAsync = 17, Cuda, Async;
    CuMemAllocPitch = 18, Cuda, Sync;
    KleioLoadModel = 19, Cuda, Sync;
    KleioInference = 20, Cuda, Sync;
    KleioForceGc = 21, Cuda, Sync;
    NvmlRunningProcs = 22, Cuda, Sync;
    NvmlUtilRate = 23, Cuda, Sync;
    HipInit = 24, Hip, Sync;
    HipDeviceGet = 25, Hip, Sync;
    HipHostMalloc = 26, Hip, Sync;
    HipHostGetDevicePointer = 27, Hip, Sync;
    HipHostFree = 28, Hip, Sync;
    HipHostRegister = 29, Hip, Sync;
    HipHostUnregister = 30, Hip, Sync;
    HipCtxCreate = 31, Hip, Sync;
    HipModuleGetFunction = 32, Hip, Sync;
    HipMalloc = 33, Hip, Sync;
    HipFree = 34, Hip, Sync;
    HipMemcpyHtoDAsync = 35, Hip, Async;
    HipMemcpyHtoD = 36, Hip, Sync;
    HipMemcpyDtoH = 37, Hip, Sync;
    HipDeviceSynchronize = 38, Hip, Sync;
    HipModuleLaunchKernel = 39, Hip, Async;
    HipModuleLoad = 40, Hip, Sync;
    HipStreamCreate = 41, Hip, Sync;
    HipStreamSynchronize = 42, Hip, Sync;
    HipStreamDestroy = 43, Hip, Sync;
    HipCtxDestroy = 44, Hip, Sync;
    HipMemcpyDtoHAsync = 45, Hip, Async;
}

/// Number of opcodes; registries size their tables with it.
pub const OPCODE_COUNT: usize = Opcode::ALL.len();

impl Opcode {
    /// Dense table index.
    pub const fn index(self) -> usize {
        self as u32 as usize
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), *self as u32)
    }
}
