//! Stand-in container executables for session and orchestrator tests.
//!
//! Each stand-in is a shell script run by `/bin/sh` in place of the container
//! binary, with the script passed where the module path goes. The shell sees
//! the rest of the container argument vector, so the request descriptor is
//! `$2` and the reply descriptor `$3`. Running the script through the shell
//! avoids exec'ing a file that another test thread may still hold open.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

/// Sends READY, then echoes every request byte, exiting after EXIT.
pub(crate) const ECHO: &str = r#"req=$2; rep=$3
printf '@' >&"$rep"
while :; do
  c=$(dd bs=1 count=1 <&"$req" 2>/dev/null)
  [ -z "$c" ] && exit 1
  printf '%s' "$c" >&"$rep"
  [ "$c" = x ] && exit 0
done"#;

/// Like [`ECHO`] but answers VERIFY with FAILED.
pub(crate) const FAILS_VERIFY: &str = r#"req=$2; rep=$3
printf '@' >&"$rep"
while :; do
  c=$(dd bs=1 count=1 <&"$req" 2>/dev/null)
  [ -z "$c" ] && exit 1
  if [ "$c" = v ]; then printf '*' >&"$rep"; continue; fi
  printf '%s' "$c" >&"$rep"
  [ "$c" = x ] && exit 0
done"#;

/// Shell that runs the stand-in scripts.
pub(crate) const SHELL: &str = "/bin/sh";

/// Writes `body` as a script inside `dir`.
pub(crate) fn fake_container(dir: &TempDir, body: &str) -> PathBuf {
    static SERIAL: AtomicUsize = AtomicUsize::new(0);
    let serial = SERIAL.fetch_add(1, Ordering::Relaxed);
    let path = dir.path().join(format!("fake-container-{serial}.sh"));
    std::fs::write(&path, format!("{body}\n")).expect("write script");
    path
}

/// Shared-memory name unique to this process and call.
pub(crate) fn unique_segment_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let serial = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/warden-host-{tag}-{}-{serial}", std::process::id())
}
