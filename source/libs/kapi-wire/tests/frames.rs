// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host tests for request/reply frame encoding across the opcode catalog
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: catalog coverage + property tests

use kapi_wire::{
    fixed_len, Api, Command, DecodeError, Handle, LaunchHeader, Opcode, Reply, ResultCode,
    LAUNCH_HEADER_LEN,
};
use proptest::prelude::*;

/// One representative command per opcode.
fn sample(op: Opcode) -> Command<'static> {
    use Opcode::*;
    let api = op.api();
    let h = Handle(0x7f00_1000 + op as u64);
    match op {
        CuInit | HipInit => Command::Init { api, flags: 0 },
        CuDeviceGet | HipDeviceGet => Command::DeviceGet { api, ordinal: 1 },
        CuCtxCreate | HipCtxCreate => Command::CtxCreate { api, flags: 4, device: 0 },
        CuCtxDestroy | HipCtxDestroy => Command::CtxDestroy { api, ctx: h },
        CuCtxSynchronize | HipDeviceSynchronize => Command::CtxSynchronize { api },
        CuModuleLoad | HipModuleLoad => Command::ModuleLoad { api, path: "/lib/kernels.cubin" },
        CuModuleUnload => Command::ModuleUnload { module: h },
        CuModuleGetFunction | HipModuleGetFunction => {
            Command::ModuleGetFunction { api, module: h, name: "_Z6kernelPfPiij" }
        }
        CuLaunchKernel | HipModuleLaunchKernel => Command::LaunchKernel {
            api,
            header: LaunchHeader { function: h, grid: [2, 2, 1], block: [32, 8, 1], ..Default::default() },
            params: &[0xaa; 24],
        },
        CuMemAlloc | HipMalloc => Command::MemAlloc { api, size: 4096 },
        CuMemFree | HipFree => Command::MemFree { api, ptr: h },
        CuMemcpyHtoD | HipMemcpyHtoD => {
            Command::MemcpyHtoD { api, dst: h, src: 64, count: 128, stream: None }
        }
        CuMemcpyHtoDAsync | HipMemcpyHtoDAsync => {
            Command::MemcpyHtoD { api, dst: h, src: 64, count: 128, stream: Some(Handle(9)) }
        }
        CuMemcpyDtoH | HipMemcpyDtoH => {
            Command::MemcpyDtoH { api, dst: 64, src: h, count: 128, stream: None }
        }
        CuMemcpyDtoHAsync | HipMemcpyDtoHAsync => {
            Command::MemcpyDtoH { api, dst: 64, src: h, count: 128, stream: Some(Handle(9)) }
        }
        CuStreamCreate | HipStreamCreate => Command::StreamCreate { api, flags: 1 },
        CuStreamSynchronize | HipStreamSynchronize => Command::StreamSynchronize { api, stream: h },
        CuStreamDestroy | HipStreamDestroy => Command::StreamDestroy { api, stream: h },
        CuMemAllocPitch => Command::MemAllocPitch { width: 100, height: 3, element_size: 4 },
        KleioLoadModel => Command::KleioLoadModel { src: 0, len: 512 },
        KleioInference => Command::KleioInference { src: 512, len: 64, use_gpu: 1 },
        KleioForceGc => Command::KleioForceGc,
        NvmlRunningProcs => Command::NvmlRunningProcs,
        NvmlUtilRate => Command::NvmlUtilRate,
        HipHostMalloc => Command::HostMalloc { size: 256, flags: 0 },
        HipHostGetDevicePointer => Command::HostGetDevicePointer { host: 256, flags: 0 },
        HipHostFree => Command::HostFree { host: 256 },
        HipHostRegister => Command::HostRegister { host: 0, size: 4096, flags: 2 },
        HipHostUnregister => Command::HostUnregister { host: 0 },
    }
}

#[test]
fn every_opcode_has_a_distinct_exact_frame() {
    for op in Opcode::ALL {
        let cmd = sample(*op);
        assert_eq!(cmd.opcode(), *op, "sample for {op}");
        let frame = cmd.encode().unwrap();
        assert_eq!(frame[..4], (*op as u32).to_le_bytes(), "{op}");
        assert_eq!(frame.len(), cmd.encoded_len(), "{op}");
        if let Some(len) = fixed_len(*op) {
            assert_eq!(frame.len(), len, "{op}");
        }
        assert_eq!(Command::decode(&frame).unwrap(), cmd, "{op}");

        let mut longer = frame.clone();
        longer.push(0);
        assert!(matches!(Command::decode(&longer), Err(DecodeError::Length { .. })), "{op}");
    }
}

#[test]
fn malloc_scenario() {
    let frame = Command::MemAlloc { api: Api::Cuda, size: 4096 }.encode().unwrap();
    match Command::decode(&frame).unwrap() {
        Command::MemAlloc { api, size } => {
            assert_eq!(api, Api::Cuda);
            assert_eq!(size, 4096);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn launch_header_field_order() {
    let params = 7u32.to_ne_bytes();
    let cmd = Command::LaunchKernel {
        api: Api::Hip,
        header: LaunchHeader {
            function: Handle(0x1122),
            grid: [1, 2, 3],
            block: [4, 5, 6],
            shared_mem: 48,
            stream: Handle(0x33),
        },
        params: &params,
    };
    let frame = cmd.encode().unwrap();
    assert_eq!(frame[..4], 39u32.to_le_bytes());
    assert_eq!(frame[4..12], 0x1122u64.to_le_bytes());
    assert_eq!(frame[12..16], 1u32.to_le_bytes());
    assert_eq!(frame[32..36], 6u32.to_le_bytes());
    assert_eq!(frame[36..40], 48u32.to_le_bytes());
    assert_eq!(frame[40..48], 0x33u64.to_le_bytes());
    assert_eq!(frame[48..52], 4u32.to_le_bytes());
    assert_eq!(frame[LAUNCH_HEADER_LEN..], params);
}

#[test]
fn reply_carries_pitch() {
    let reply = Reply { status: ResultCode::SUCCESS, value: 0x2000, aux: 512 };
    assert_eq!(Reply::decode(&reply.encode()), Some(reply));
    assert_eq!(ResultCode::LAUNCH_FAILED.to_string(), "LAUNCH_FAILED(719)");
    assert_eq!(ResultCode(12345).to_string(), "code 12345");
}

proptest! {
    #[test]
    fn decode_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..400)) {
        let _ = Command::decode(&frame);
    }

    #[test]
    fn decode_with_valid_opcode_never_panics(
        op in 0u32..46,
        body in proptest::collection::vec(any::<u8>(), 0..300),
    ) {
        let mut frame = op.to_le_bytes().to_vec();
        frame.extend_from_slice(&body);
        if let Ok(cmd) = Command::decode(&frame) {
            let again = cmd.encode().unwrap();
            prop_assert_eq!(again.len(), frame.len());
            prop_assert_eq!(Command::decode(&again).unwrap(), cmd);
        }
    }
}
