//! In-process tests of the command loop against the fixture guests.
//!
//! Requests that hard-fault (MODIFY, WRITE_RO, OVERFLOW with a guard) would
//! kill the test process; they are covered by the end-to-end tests.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::{fixture, rstest};
use warden_config::{ContainerArgs, LoggingArgs};
use warden_host::SharedSegment;
use warden_protocol::{SegmentAccess, SegmentDescriptor, check_verification_pattern};
use warden_sandbox::{Sandbox, SandboxError};

use super::*;

const GUEST_WAT: &str = include_str!("../../tests/fixtures/guest.wat");
const MINIMAL_WAT: &str = include_str!("../../tests/fixtures/minimal.wat");

struct Segments {
    ro: SharedSegment,
    rw: SharedSegment,
}

impl Segments {
    fn descriptors(&self) -> Vec<SegmentDescriptor> {
        vec![self.ro.descriptor().clone(), self.rw.descriptor().clone()]
    }
}

fn unique_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let serial = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/warden-{tag}-{}-{serial}", std::process::id())
}

#[fixture]
fn segments() -> Segments {
    let create = |tag: &str, size, access| {
        let descriptor = SegmentDescriptor::new(unique_name(tag), size, access);
        let mut segment = SharedSegment::create(descriptor).expect("segment");
        segment.fill_verification_pattern().expect("pattern");
        segment
    };
    Segments {
        ro: create("ro", 5000, SegmentAccess::ReadOnly),
        rw: create("rw", 1000, SegmentAccess::ReadWrite),
    }
}

fn runtime(wat: &str, segments: &Segments, guard: bool, seed: i32) -> ContainerRuntime {
    let sandbox = Sandbox::from_bytes(wat.as_bytes(), "T", GUEST_CONTRACT).expect("sandbox");
    ContainerRuntime::prepare(sandbox, &segments.descriptors(), guard, seed).expect("runtime")
}

fn serve(runtime: &mut ContainerRuntime, input: &[u8]) -> (LoopEnd, Vec<u8>) {
    let mut requests = Cursor::new(input.to_vec());
    let mut replies = Vec::new();
    let end = runtime.serve(&mut requests, &mut replies).expect("serve");
    (end, replies)
}

#[rstest]
fn requests_are_echoed_after_ready(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    let (end, replies) = serve(&mut runtime, b"ivwrtx");
    assert_eq!(end, LoopEnd::Exited);
    assert_eq!(replies, b"@ivwrtx");
}

#[rstest]
fn unknown_and_reply_bytes_fail_without_stopping_the_loop(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    let (end, replies) = serve(&mut runtime, b"?@*\0ix");
    assert_eq!(end, LoopEnd::Exited);
    assert_eq!(replies, b"@****ix");
}

#[rstest]
fn exit_stops_reading(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    let (end, replies) = serve(&mut runtime, b"xiii");
    assert_eq!(end, LoopEnd::Exited);
    assert_eq!(replies, b"@x");
}

#[rstest]
fn closed_request_pipes_end_the_loop(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    let (end, replies) = serve(&mut runtime, b"i");
    assert_eq!(end, LoopEnd::Disconnected);
    assert_eq!(replies, b"@i");
}

#[rstest]
fn forced_errors_acknowledge_only_when_the_guest_traps(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    assert_eq!(runtime.dispatch(b'e'), Command::ForceError);
}

#[rstest]
fn guest_writes_land_in_the_host_segment(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    assert_eq!(runtime.dispatch(b'w'), Command::WriteRw);
    let expected: Vec<u8> = (20..30).collect();
    assert_eq!(segments.rw.read(3, 10).expect("read"), expected);
}

#[rstest]
fn host_writes_before_init_are_visible_to_the_guest(mut segments: Segments) {
    let expected: Vec<u8> = (20..30).collect();
    segments.rw.write(3, &expected).expect("host write");
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    assert_eq!(runtime.dispatch(b'i'), Command::Init);
    assert_eq!(runtime.dispatch(b'r'), Command::ReadRw);
}

#[rstest]
fn corrupted_segments_fail_verification(mut segments: Segments) {
    segments.rw.write(10, &[0]).expect("host write");
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    assert_eq!(runtime.dispatch(b'v'), Command::Failed);
    assert_eq!(runtime.dispatch(b'r'), Command::Failed);
}

#[rstest]
#[expect(clippy::little_endian_bytes, reason = "guest memory is little-endian")]
fn tick_publishes_deterministic_state(mut segments: Segments) {
    let seed = 42_i32;
    let expected = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);

    let mut first = runtime(GUEST_WAT, &segments, false, seed);
    assert_eq!(first.dispatch(b'i'), Command::Init);
    assert_eq!(first.dispatch(b't'), Command::Tick);
    drop(first);
    assert_eq!(segments.rw.read(16, 4).expect("read"), expected.to_le_bytes());

    segments.rw.write(16, &[0; 4]).expect("host write");
    let mut second = runtime(GUEST_WAT, &segments, false, seed);
    assert_eq!(second.dispatch(b'i'), Command::Init);
    assert_eq!(second.dispatch(b't'), Command::Tick);
    assert_eq!(segments.rw.read(16, 4).expect("read"), expected.to_le_bytes());
}

#[rstest]
fn reinitialising_resets_the_state(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 7);
    runtime.dispatch(b'i');
    runtime.dispatch(b't');
    let first = segments.rw.read(16, 4).expect("read");
    runtime.dispatch(b't');
    assert_ne!(segments.rw.read(16, 4).expect("read"), first);
    runtime.dispatch(b'i');
    runtime.dispatch(b't');
    assert_eq!(segments.rw.read(16, 4).expect("read"), first);
}

#[rstest]
fn overflow_without_a_guard_corrupts_the_victim(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    assert_eq!(runtime.dispatch(b'o'), Command::Overflow);
}

#[rstest]
fn guards_sit_below_the_mapped_segments(segments: Segments) {
    let runtime = runtime(GUEST_WAT, &segments, true, 1);
    let guard = runtime.guard().expect("guard installed");
    for mapping in runtime.mappings() {
        assert!(mapping.guest_offset() >= guard.guest_offset() + guard.len());
    }
}

#[rstest]
fn missing_diagnostic_exports_fail(segments: Segments) {
    let mut runtime = runtime(MINIMAL_WAT, &segments, false, 1);
    let (end, replies) = serve(&mut runtime, b"itvwreoqhx");
    assert_eq!(end, LoopEnd::Exited);
    assert_eq!(replies, b"@it*******x");
}

#[rstest]
#[case(false)]
#[case(true)]
fn heap_test_fills_and_clears_the_heap(segments: Segments, #[case] guard: bool) {
    let mut runtime = runtime(GUEST_WAT, &segments, guard, 1);
    assert_eq!(runtime.dispatch(b'i'), Command::Init);
    let before = runtime.census();
    assert_eq!(runtime.dispatch(b'h'), Command::HeapTest);
    assert_eq!(runtime.census().filled, before.filled);

    // The mapped segments sit below the heap and survive the fill.
    assert_eq!(runtime.dispatch(b'v'), Command::Verify);
    let ro = segments.ro.read(0, 5000).expect("read");
    let rw = segments.rw.read(0, 1000).expect("read");
    assert_eq!(check_verification_pattern(SegmentAccess::ReadOnly, &ro), 0);
    assert_eq!(check_verification_pattern(SegmentAccess::ReadWrite, &rw), 0);
}

#[rstest]
fn heap_test_can_run_repeatedly(segments: Segments) {
    let mut runtime = runtime(GUEST_WAT, &segments, false, 1);
    let (end, replies) = serve(&mut runtime, b"hhwrhrx");
    assert_eq!(end, LoopEnd::Exited);
    assert_eq!(replies, b"@hhwrhrx");
    let expected: Vec<u8> = (20..30).collect();
    assert_eq!(segments.rw.read(3, 10).expect("read"), expected);
}

#[rstest]
fn census_skips_the_guard_page(segments: Segments) {
    let plain = runtime(GUEST_WAT, &segments, false, 1).census();
    let guarded = runtime(GUEST_WAT, &segments, true, 1);
    let guard_len = guarded.guard().expect("guard installed").len();
    assert_eq!(guarded.census().scanned + guard_len, plain.scanned);
}

#[rstest]
fn startup_fails_for_missing_segments() {
    let sandbox = Sandbox::from_bytes(GUEST_WAT.as_bytes(), "T", GUEST_CONTRACT).expect("sandbox");
    let descriptors = [
        SegmentDescriptor::new(unique_name("absent"), 64, SegmentAccess::ReadOnly),
        SegmentDescriptor::new(unique_name("absent"), 64, SegmentAccess::ReadWrite),
    ];
    let error = ContainerRuntime::prepare(sandbox, &descriptors, false, 1)
        .expect_err("segments do not exist");
    assert!(matches!(
        error,
        ContainerError::Sandbox(SandboxError::SharedMemoryOpen { .. })
    ));
}

#[rstest]
fn startup_validates_arguments(segments: Segments) {
    let args = ContainerArgs {
        module: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/guest.wat")),
        label: "has space".into(),
        request_fd: 0,
        reply_fd: 1,
        ro_name: segments.ro.descriptor().name().to_owned(),
        ro_size: 5000,
        rw_name: segments.rw.descriptor().name().to_owned(),
        rw_size: 1000,
        guard: false,
        seed: None,
        logging: LoggingArgs::default(),
    };
    assert!(matches!(
        ContainerRuntime::start(&args),
        Err(ContainerError::Config(_))
    ));
}

#[rstest]
fn startup_loads_the_module_from_disk(segments: Segments) {
    let args = ContainerArgs {
        module: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/guest.wat")),
        label: "A".into(),
        request_fd: 0,
        reply_fd: 1,
        ro_name: segments.ro.descriptor().name().to_owned(),
        ro_size: 5000,
        rw_name: segments.rw.descriptor().name().to_owned(),
        rw_size: 1000,
        guard: true,
        seed: Some(3),
        logging: LoggingArgs::default(),
    };
    let runtime = ContainerRuntime::start(&args).expect("runtime starts");
    assert_eq!(runtime.label(), "A");
    assert_eq!(runtime.mappings().len(), 2);
    assert!(runtime.guard().is_some());
}

#[test]
fn closed_descriptors_are_rejected() {
    assert!(matches!(
        open_pipe(-1),
        Err(ContainerError::Descriptor { fd: -1, .. })
    ));
}
