//! In-process tests against small WebAssembly text modules.
//!
//! Nothing here writes through a read-only mapping or touches a guard page:
//! those hard-fault the test process and are covered end to end by the
//! `warden` crate.

use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::fixture;

use crate::{ExportSpec, Sandbox};

mod engine_tests;

/// Guest with a bump allocator starting off a page boundary, accessors for
/// the shared-segment offsets and a few misbehaving exports.
pub(crate) const GUEST_WAT: &str = r#"
(module
  (import "env" "print_callback" (func $print (param i32)))
  (memory (export "memory") 4)
  (global $heap (mut i32) (i32.const 65552))
  (global $ro (mut i32) (i32.const 0))
  (global $ro_len (mut i32) (i32.const 0))
  (global $rw (mut i32) (i32.const 0))
  (global $rw_len (mut i32) (i32.const 0))
  (global (export "counter") i32 (i32.const 7))
  (data (i32.const 16) "hello from the guest\00")

  (func (export "malloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap
      (i32.and
        (i32.add (i32.add (local.get $ptr) (local.get $size)) (i32.const 7))
        (i32.const -8)))
    (if (result i32)
      (i32.gt_u (global.get $heap) (i32.shl (memory.size) (i32.const 16)))
      (then (global.set $heap (local.get $ptr)) (i32.const 0))
      (else (local.get $ptr))))

  (func (export "set_shared") (param i32 i32 i32 i32)
    (global.set $ro (local.get 0))
    (global.set $ro_len (local.get 1))
    (global.set $rw (local.get 2))
    (global.set $rw_len (local.get 3)))

  (func (export "shared") (param $index i32) (result i32)
    (block $rw_len_case
      (block $rw_case
        (block $ro_len_case
          (block $ro_case
            (br_table $ro_case $ro_len_case $rw_case $rw_len_case (local.get $index)))
          (return (global.get $ro)))
        (return (global.get $ro_len)))
      (return (global.get $rw)))
    (global.get $rw_len))

  (func (export "load") (param $addr i32) (result i32)
    (i32.load8_u (local.get $addr)))

  (func (export "store") (param $addr i32) (param $value i32)
    (i32.store8 (local.get $addr) (local.get $value)))

  (func (export "fill") (param $addr i32) (param $len i32) (param $value i32)
    (memory.fill (local.get $addr) (local.get $value) (local.get $len)))

  (func (export "say") (param $ptr i32)
    (call $print (local.get $ptr)))

  (func (export "boom")
    unreachable)

  (func (export "out_of_bounds") (result i32)
    (i32.load (i32.const -16)))

  (func (export "wide") (param i64)))
"#;

/// Export set the engine and mapper tests resolve.
pub(crate) const GUEST_EXPORTS: &[ExportSpec] = &[
    ExportSpec::required("malloc", 1),
    ExportSpec::required("set_shared", 4),
    ExportSpec::required("shared", 1),
    ExportSpec::required("load", 1),
    ExportSpec::required("store", 2),
    ExportSpec::required("fill", 3),
    ExportSpec::required("say", 1),
    ExportSpec::required("boom", 0),
    ExportSpec::required("out_of_bounds", 0),
    ExportSpec::optional("absent", 0),
];

#[fixture]
pub(crate) fn sandbox() -> Sandbox {
    Sandbox::from_bytes(GUEST_WAT.as_bytes(), "T", GUEST_EXPORTS).expect("guest instantiates")
}

/// Returns a shared-memory name unique to this process and call.
pub(crate) fn unique_segment_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let serial = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/warden-sandbox-{tag}-{}-{serial}", std::process::id())
}

pub(crate) fn call_value(sandbox: &mut Sandbox, name: &str, args: &[i32]) -> i32 {
    let handle = sandbox.export(name).expect("export resolved");
    sandbox
        .call(handle, args)
        .expect("arguments match")
        .value()
        .expect("call completes")
}

pub(crate) fn to_usize(value: i32) -> usize {
    usize::try_from(value).expect("non-negative guest value")
}
