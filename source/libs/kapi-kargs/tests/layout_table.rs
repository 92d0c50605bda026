// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host tests for mangled-name parsing and trailer marshaling
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: table of accepted/rejected names + property tests
//!
//! TEST_SCENARIOS:
//!   - accepted_names(): known kernels map to the expected slot sizes and handle flags
//!   - rejected_names(): malformed names fail without a layout
//!   - generated layouts: the parser agrees with a name rebuilt from random slots
//!   - pack/unpack: views equal the packed argument bytes for any slot mix

use kapi_kargs::{pack, parse_mangled, unpack, ArgSlot, FunctionLayout, LayoutError};
use proptest::prelude::*;

fn sizes(layout: &FunctionLayout) -> Vec<usize> {
    layout.args().iter().map(|slot| slot.size).collect()
}

fn handles(layout: &FunctionLayout) -> Vec<bool> {
    layout.args().iter().map(|slot| slot.is_handle).collect()
}

#[test]
fn accepted_names() {
    let table: &[(&str, &[usize], &[bool])] = &[
        ("_Z3fooPfS_", &[8, 8], &[true, true]),
        ("_Z6kernelPfPiij", &[8, 8, 4, 4], &[true, true, false, false]),
        ("_Z4testlch", &[8, 1, 1], &[false, false, false]),
        ("_Z3foov", &[], &[]),
        ("_Z3foo", &[], &[]),
        ("_Z3fooP5Pointi", &[8, 4], &[true, false]),
    ];
    for (name, want_sizes, want_handles) in table {
        let layout = parse_mangled(name).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(sizes(&layout), *want_sizes, "{name}");
        assert_eq!(handles(&layout), *want_handles, "{name}");
        assert_eq!(layout.total_size(), want_sizes.iter().sum::<usize>(), "{name}");
    }
}

#[test]
fn const_pointee_is_unsupported() {
    assert_eq!(
        parse_mangled("_Z9vectorAddPKfS0_Pfi"),
        Err(LayoutError::BadPointer { offset: 12 })
    );
}

#[test]
fn rejected_names() {
    assert_eq!(parse_mangled("foo"), Err(LayoutError::MissingPrefix));
    assert_eq!(parse_mangled("_Zfoo"), Err(LayoutError::MissingNameLength { offset: 2 }));
    assert_eq!(parse_mangled("_Z10foo"), Err(LayoutError::Truncated { offset: 2, len: 10 }));
    assert_eq!(parse_mangled("_Z3fooPd"), Err(LayoutError::BadPointer { offset: 6 }));
    assert_eq!(parse_mangled("_Z3foox"), Err(LayoutError::UnknownType { code: 'x', offset: 6 }));
    assert_eq!(parse_mangled("_Z3fooP"), Err(LayoutError::BadPointer { offset: 6 }));
}

#[test]
fn kernel_launch_trailer() {
    let layout = parse_mangled("_Z6kernelPfPiij").unwrap();
    let a = 0x7f00_0000_1000u64.to_ne_bytes();
    let b = 0x7f00_0000_2000u64.to_ne_bytes();
    let n = 1024i32.to_ne_bytes();
    let m = 3u32.to_ne_bytes();
    let trailer = pack(&layout, &[&a, &b, &n, &m]).unwrap();
    assert_eq!(trailer.len(), 24);
    assert_eq!(&trailer[16..20], &n);

    let views = unpack(&layout, &trailer).unwrap();
    assert_eq!(views[1], &b);
    assert_eq!(views[3], &m);
}

fn arb_slot() -> impl Strategy<Value = (ArgSlot, &'static str)> {
    prop_oneof![
        Just((ArgSlot::handle(), "Pf")),
        Just((ArgSlot::handle(), "Pi")),
        Just((ArgSlot::handle(), "Pv")),
        Just((ArgSlot::handle(), "P6float4")),
        Just((ArgSlot::scalar(4), "f")),
        Just((ArgSlot::scalar(4), "i")),
        Just((ArgSlot::scalar(4), "j")),
        Just((ArgSlot::scalar(8), "l")),
        Just((ArgSlot::scalar(1), "c")),
        Just((ArgSlot::scalar(1), "h")),
    ]
}

fn arb_layout() -> impl Strategy<Value = Vec<ArgSlot>> {
    proptest::collection::vec(arb_slot().prop_map(|(slot, _)| slot), 0..16)
}

proptest! {
    #[test]
    fn parser_matches_generated_names(
        base in "[a-zA-Z]{1,20}",
        params in proptest::collection::vec(arb_slot(), 0..24),
    ) {
        let mut name = format!("_Z{}{}", base.len(), base);
        for (_, code) in &params {
            name.push_str(code);
        }
        let layout = parse_mangled(&name).unwrap();
        let want: Vec<ArgSlot> = params.iter().map(|(slot, _)| *slot).collect();
        prop_assert_eq!(layout.args(), want.as_slice());
    }

    #[test]
    fn unpack_views_equal_packed_args(slots in arb_layout(), fill in any::<u8>()) {
        let layout = FunctionLayout::from_slots(slots);
        let owned: Vec<Vec<u8>> = layout
            .args()
            .iter()
            .enumerate()
            .map(|(i, slot)| vec![fill.wrapping_add(i as u8); slot.size])
            .collect();
        let args: Vec<&[u8]> = owned.iter().map(Vec::as_slice).collect();
        let trailer = pack(&layout, &args).unwrap();
        prop_assert_eq!(trailer.len(), layout.total_size());
        prop_assert_eq!(unpack(&layout, &trailer).unwrap(), args);
    }

    #[test]
    fn parser_never_panics(name in "_Z[0-9]{0,3}[a-zA-Z0-9_]{0,40}") {
        let _ = parse_mangled(&name);
    }
}
