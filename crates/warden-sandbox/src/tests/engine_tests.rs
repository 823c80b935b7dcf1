//! Tests for module loading, export resolution and guest calls.

use std::io::Write as _;

use rstest::rstest;

use super::{GUEST_EXPORTS, GUEST_WAT, call_value, sandbox};
use crate::{CallResult, ExportSpec, Sandbox, SandboxError};

#[rstest]
fn required_exports_resolve_and_optional_ones_may_be_absent(sandbox: Sandbox) {
    assert!(sandbox.export("malloc").is_some());
    assert!(sandbox.export("absent").is_none());
    assert_eq!(sandbox.label(), "T");
    let setter = sandbox.require_export("set_shared").expect("setter");
    assert_eq!(sandbox.arity(setter).expect("own handle"), 4);
}

#[rstest]
fn memory_view_reports_the_declared_size(sandbox: Sandbox) {
    let memory = sandbox.memory();
    assert_eq!(memory.len(), 4 * 65536);
    assert_ne!(memory.base(), 0);
}

#[rstest]
fn calls_pass_arguments_and_return_results(mut sandbox: Sandbox) {
    let first = call_value(&mut sandbox, "malloc", &[24]);
    let second = call_value(&mut sandbox, "malloc", &[8]);
    assert_eq!(first, 65552);
    assert_eq!(second, 65552 + 24);

    call_value(&mut sandbox, "store", &[first, 0xab]);
    assert_eq!(call_value(&mut sandbox, "load", &[first]), 0xab);
}

#[rstest]
fn functions_without_results_report_zero(mut sandbox: Sandbox) {
    let handle = sandbox.export("store").expect("store");
    assert_eq!(
        sandbox.call(handle, &[100, 1]).expect("call"),
        CallResult::Completed(0)
    );
}

#[rstest]
#[case("boom")]
#[case("out_of_bounds")]
fn traps_are_reported_not_raised(mut sandbox: Sandbox, #[case] name: &str) {
    let handle = sandbox.export(name).expect("export");
    let result = sandbox.call(handle, &[]).expect("call");
    assert!(!result.is_ok());
    assert_eq!(result.value(), None);

    // The instance stays usable after a trap.
    assert_eq!(call_value(&mut sandbox, "load", &[16]), i32::from(b'h'));
}

#[rstest]
fn fatal_calls_turn_traps_into_errors(mut sandbox: Sandbox) {
    let handle = sandbox.export("boom").expect("boom");
    let error = sandbox.call_fatal(handle, &[]).expect_err("trap");
    assert!(matches!(error, SandboxError::GuestTrap { ref name, .. } if name == "boom"));
}

#[rstest]
fn wrong_argument_counts_are_rejected(mut sandbox: Sandbox) {
    let handle = sandbox.export("load").expect("load");
    let error = sandbox.call(handle, &[1, 2]).expect_err("arity mismatch");
    assert!(matches!(
        error,
        SandboxError::Arity {
            name: "load",
            expected: 1,
            found: 2
        }
    ));
}

#[test]
fn handles_from_another_sandbox_are_rejected() {
    let specs = [
        ExportSpec::required("malloc", 1),
        ExportSpec::required("store", 2),
        ExportSpec::required("load", 1),
    ];
    let other = Sandbox::from_bytes(GUEST_WAT.as_bytes(), "U", &specs).expect("other sandbox");
    let foreign = other.export("load").expect("load");
    let mut small = Sandbox::from_bytes(GUEST_WAT.as_bytes(), "V", &specs[..1]).expect("small");

    assert!(matches!(
        small.call(foreign, &[16]),
        Err(SandboxError::UnknownHandle { index: 2 })
    ));
    assert!(matches!(small.arity(foreign), Err(SandboxError::UnknownHandle { .. })));
}

#[rstest]
fn print_callback_accepts_terminated_strings(mut sandbox: Sandbox) {
    let handle = sandbox.export("say").expect("say");
    assert!(sandbox.call(handle, &[16]).expect("call").is_ok());
}

#[rstest]
#[case(-1)]
#[case(4 * 65536)]
fn print_callback_rejects_pointers_outside_memory(mut sandbox: Sandbox, #[case] ptr: i32) {
    let handle = sandbox.export("say").expect("say");
    assert!(!sandbox.call(handle, &[ptr]).expect("call").is_ok());
}

#[rstest]
fn print_callback_rejects_unterminated_strings(mut sandbox: Sandbox) {
    call_value(&mut sandbox, "fill", &[70_000, 5000, i32::from(b'a')]);
    let handle = sandbox.export("say").expect("say");
    assert!(!sandbox.call(handle, &[70_000]).expect("call").is_ok());
}

#[rstest]
fn read_memory_copies_guest_bytes(sandbox: Sandbox) {
    let bytes = sandbox.read_memory(16, 5).expect("in range");
    assert_eq!(bytes, b"hello");
    assert!(sandbox.read_memory(4 * 65536 - 2, 5).is_err());
    assert!(matches!(
        sandbox.read_memory(usize::MAX, 2),
        Err(SandboxError::Layout(_))
    ));
}

#[rstest]
fn memory_data_spans_the_whole_memory(sandbox: Sandbox) {
    let data = sandbox.memory_data();
    assert_eq!(data.len(), sandbox.memory().len());
    assert_eq!(data.get(16..21), Some(b"hello".as_slice()));
}

#[test]
fn missing_required_export_is_named() {
    let specs = [ExportSpec::required("tick", 0)];
    let error = Sandbox::from_bytes(GUEST_WAT.as_bytes(), "T", &specs).err();
    assert!(matches!(error, Some(SandboxError::MissingExport { ref name }) if name == "tick"));
}

#[test]
fn non_function_exports_are_rejected() {
    let specs = [ExportSpec::required("counter", 0)];
    let error = Sandbox::from_bytes(GUEST_WAT.as_bytes(), "T", &specs).err();
    assert!(matches!(
        error,
        Some(SandboxError::ExportKind {
            expected: "function",
            ..
        })
    ));
}

#[rstest]
#[case(ExportSpec::required("wide", 1))]
#[case(ExportSpec::required("load", 2))]
fn mismatched_signatures_are_rejected(#[case] spec: ExportSpec) {
    let error = Sandbox::from_bytes(GUEST_WAT.as_bytes(), "T", &[spec]).err();
    assert!(matches!(error, Some(SandboxError::Signature { .. })));
}

#[test]
fn modules_without_memory_are_rejected() {
    let wat = r#"(module (func (export "malloc") (param i32) (result i32) (local.get 0)))"#;
    let error = Sandbox::from_bytes(wat.as_bytes(), "T", &[]).err();
    assert!(matches!(error, Some(SandboxError::MissingExport { ref name }) if name == "memory"));
}

#[test]
fn a_second_memory_export_is_rejected() {
    let wat = r#"(module (memory (export "memory") 1) (memory (export "scratch") 1))"#;
    let error = Sandbox::from_bytes(wat.as_bytes(), "T", &[]).err();
    // Engines without multi-memory refuse the module outright.
    assert!(matches!(
        error,
        Some(SandboxError::ExportMismatch { .. } | SandboxError::Compile { .. })
    ));
}

#[test]
fn invalid_bytes_fail_to_compile() {
    let error = Sandbox::from_bytes(b"\0asm-not-really", "T", &[]).err();
    assert!(matches!(error, Some(SandboxError::Compile { .. })));
}

#[test]
fn unknown_imports_fail_instantiation() {
    let wat = r#"(module (import "env" "clock" (func)) (memory (export "memory") 1))"#;
    let error = Sandbox::from_bytes(wat.as_bytes(), "T", &[]).err();
    assert!(matches!(error, Some(SandboxError::Instantiate { .. })));
}

#[test]
fn modules_load_from_files() {
    let mut file = tempfile::Builder::new()
        .suffix(".wat")
        .tempfile()
        .expect("temp file");
    file.write_all(GUEST_WAT.as_bytes()).expect("write module");
    let sandbox = Sandbox::from_file(file.path(), "F", GUEST_EXPORTS).expect("load");
    assert_eq!(sandbox.label(), "F");
}

#[test]
fn unreadable_module_paths_are_reported() {
    let error = Sandbox::from_file("/nonexistent/guest.wasm", "F", &[]).err();
    assert!(matches!(error, Some(SandboxError::ModuleRead { .. })));
}
