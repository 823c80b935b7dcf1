use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use warden_config::{ContainerArgs, HostArgs, LoggingArgs};
use warden_protocol::SegmentDescriptor;

use super::{ContainerSession, SESSION_TARGET, pipe};
use crate::error::SessionError;

/// Everything needed to start containers that share one module and one pair
/// of segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLauncher {
    program: PathBuf,
    module: PathBuf,
    read_only: SegmentDescriptor,
    read_write: SegmentDescriptor,
    guard: bool,
    seed: Option<i32>,
    logging: LoggingArgs,
    reply_timeout: Option<Duration>,
}

impl ContainerLauncher {
    /// Creates a launcher for `program` running `module` with the given
    /// read-only and read-write segments.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        module: impl Into<PathBuf>,
        read_only: SegmentDescriptor,
        read_write: SegmentDescriptor,
    ) -> Self {
        Self {
            program: program.into(),
            module: module.into(),
            read_only,
            read_write,
            guard: false,
            seed: None,
            logging: LoggingArgs::default(),
            reply_timeout: None,
        }
    }

    /// Creates a launcher from the host command line.
    #[must_use]
    pub fn from_host_args(args: &HostArgs, program: impl Into<PathBuf>) -> Self {
        let [read_only, read_write] = args.segments();
        Self::new(program, args.module.clone(), read_only, read_write)
            .with_guard(args.guard)
            .with_seed(args.seed)
            .with_logging(args.logging.clone())
            .with_reply_timeout(args.reply_timeout())
    }

    /// Installs the guard page in every container.
    #[must_use]
    pub const fn with_guard(mut self, guard: bool) -> Self {
        self.guard = guard;
        self
    }

    /// Passes a fixed seed to every container's `init`.
    #[must_use]
    pub const fn with_seed(mut self, seed: Option<i32>) -> Self {
        self.seed = seed;
        self
    }

    /// Forwards telemetry settings to containers.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingArgs) -> Self {
        self.logging = logging;
        self
    }

    /// Bounds the wait for handshakes and acknowledgements.
    #[must_use]
    pub const fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Container executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Segments containers map, read-only first.
    #[must_use]
    pub const fn segments(&self) -> [&SegmentDescriptor; 2] {
        [&self.read_only, &self.read_write]
    }

    /// Spawns a container and waits for its READY byte.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Pipe`] or [`SessionError::Spawn`] when the
    /// process cannot be started, and [`SessionError::Handshake`],
    /// [`SessionError::Terminated`] or [`SessionError::Timeout`] when it does
    /// not become ready. A container that fails its handshake is killed.
    pub fn launch(&self, label: &str) -> Result<ContainerSession, SessionError> {
        let pipe_error = |source| SessionError::Pipe {
            label: label.to_owned(),
            source: Arc::new(source),
        };
        let (request_read, request_write) = pipe::pipe().map_err(pipe_error)?;
        let (reply_read, reply_write) = pipe::pipe().map_err(pipe_error)?;
        let (request_fd, reply_fd) = (request_read.as_raw_fd(), reply_write.as_raw_fd());
        let args = self.container_args(label, request_fd, reply_fd);

        let mut command = ProcessCommand::new(&self.program);
        command.args(args.to_args()).stdin(Stdio::null());
        // SAFETY: the hook only calls `fcntl`, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                pipe::inherit_on_exec(request_fd)?;
                pipe::inherit_on_exec(reply_fd)
            });
        }

        debug!(
            target: SESSION_TARGET,
            label,
            program = %self.program.display(),
            module = %self.module.display(),
            "spawning container"
        );
        let child = command.spawn().map_err(|source| SessionError::Spawn {
            label: label.to_owned(),
            program: self.program.clone(),
            source: Arc::new(source),
        })?;
        drop(request_read);
        drop(reply_write);

        let mut session = ContainerSession::new(
            label,
            File::from(request_write),
            File::from(reply_read),
            child,
            self.reply_timeout,
        );
        session.handshake()?;
        Ok(session)
    }

    fn container_args(&self, label: &str, request_fd: i32, reply_fd: i32) -> ContainerArgs {
        ContainerArgs {
            module: self.module.clone(),
            label: label.to_owned(),
            request_fd,
            reply_fd,
            ro_name: self.read_only.name().to_owned(),
            ro_size: self.read_only.size(),
            rw_name: self.read_write.name().to_owned(),
            rw_size: self.read_write.size(),
            guard: self.guard,
            seed: self.seed,
            logging: self.logging.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use clap::Parser;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use warden_protocol::{Command, SegmentAccess};

    use super::*;
    use crate::test_support::{ECHO, FAILS_VERIFY, SHELL, fake_container};

    fn descriptor(name: &str, access: SegmentAccess) -> SegmentDescriptor {
        SegmentDescriptor::new(name, 64, access)
    }

    #[fixture]
    fn dir() -> TempDir {
        TempDir::new().expect("temp dir")
    }

    fn launcher(script: PathBuf) -> ContainerLauncher {
        launcher_for(PathBuf::from(SHELL), script)
    }

    fn launcher_for(program: PathBuf, module: PathBuf) -> ContainerLauncher {
        ContainerLauncher::new(
            program,
            module,
            descriptor("/fake_ro", SegmentAccess::ReadOnly),
            descriptor("/fake_rw", SegmentAccess::ReadWrite),
        )
        .with_reply_timeout(Some(Duration::from_secs(5)))
    }

    #[rstest]
    fn echoing_containers_acknowledge_requests(dir: TempDir) {
        let mut session = launcher(fake_container(&dir, ECHO))
            .launch("a")
            .expect("handshake");
        session.send(Command::Init).expect("init");
        session.send(Command::Tick).expect("tick");
        let exit = session.exit().expect("exit");
        assert!(exit.success());
    }

    #[rstest]
    fn failed_replies_make_the_session_untrusted(dir: TempDir) {
        let mut session = launcher(fake_container(&dir, FAILS_VERIFY))
            .launch("a")
            .expect("handshake");
        assert!(matches!(
            session.send(Command::Verify),
            Err(SessionError::Failed { command: Command::Verify, .. })
        ));
        assert!(!session.is_trusted());
        assert!(matches!(
            session.send(Command::Tick),
            Err(SessionError::Untrusted { .. })
        ));
        session.send(Command::Exit).expect("exit is still allowed");
        assert!(!session.is_running());
    }

    #[rstest]
    fn mismatched_bytes_are_a_desync(dir: TempDir) {
        let body = r#"req=$2; rep=$3
printf '@' >&"$rep"
dd bs=1 count=1 <&"$req" 2>/dev/null >/dev/null
printf 'z' >&"$rep"
sleep 5"#;
        let mut session = launcher(fake_container(&dir, body))
            .launch("a")
            .expect("handshake");
        assert!(matches!(
            session.send(Command::Init),
            Err(SessionError::Desync { received: b'z', .. })
        ));
    }

    #[rstest]
    fn containers_that_die_before_ready_fail_the_handshake(dir: TempDir) {
        let error = launcher(fake_container(&dir, "exit 3"))
            .launch("a")
            .expect_err("no handshake");
        match error {
            SessionError::Terminated { exit, .. } => assert_eq!(exit.code(), Some(3)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    fn wrong_ready_bytes_fail_the_handshake(dir: TempDir) {
        let body = r#"printf '?' >&"$3"
sleep 5"#;
        let error = launcher(fake_container(&dir, body))
            .launch("a")
            .expect_err("no handshake");
        assert!(matches!(error, SessionError::Handshake { byte: b'?', .. }));
    }

    #[rstest]
    fn silent_containers_time_out(dir: TempDir) {
        let program = fake_container(&dir, "sleep 30");
        let error = launcher(program)
            .with_reply_timeout(Some(Duration::from_millis(100)))
            .launch("a")
            .expect_err("no handshake");
        assert!(matches!(error, SessionError::Timeout { .. }));
    }

    #[rstest]
    fn crashing_containers_report_their_signal(dir: TempDir) {
        let body = r#"req=$2; rep=$3
printf '@' >&"$rep"
dd bs=1 count=1 <&"$req" 2>/dev/null >/dev/null
kill -SEGV $$"#;
        let mut session = launcher(fake_container(&dir, body))
            .launch("a")
            .expect("handshake");
        match session.send(Command::WriteRo) {
            Err(SessionError::Terminated { exit, .. }) => assert!(exit.is_hard_fault()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[rstest]
    fn containers_that_hang_up_but_keep_running_are_killed(dir: TempDir) {
        let body = r#"req=$2; rep=$3
printf '@' >&"$rep"
dd bs=1 count=1 <&"$req" 2>/dev/null >/dev/null
eval "exec $rep>&-"
exec sleep 30"#;
        let mut session = launcher(fake_container(&dir, body))
            .with_reply_timeout(None)
            .launch("a")
            .expect("handshake");
        let started = Instant::now();
        match session.send(Command::Init) {
            Err(SessionError::Terminated { exit, .. }) => {
                assert_eq!(exit.signal(), Some(libc::SIGKILL));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(!session.is_running());
    }

    #[test]
    fn missing_programs_fail_to_spawn() {
        let launcher = launcher_for(
            PathBuf::from("/nonexistent/warden-container"),
            PathBuf::from("guest.wat"),
        );
        let error = launcher.launch("a").expect_err("spawn fails");
        assert!(matches!(error, SessionError::Spawn { .. }));
    }

    #[test]
    fn host_arguments_configure_segments_and_options() {
        let args = HostArgs::try_parse_from([
            "warden-host",
            "--module",
            "guest.wat",
            "--rw-name",
            "/scratch",
            "--rw-size",
            "128",
            "--guard",
            "--seed=-3",
            "--reply-timeout-ms",
            "750",
        ])
        .expect("host arguments parse");
        let launcher = ContainerLauncher::from_host_args(&args, "/opt/bin/box");
        let [read_only, read_write] = args.segments();
        assert_eq!(launcher.segments(), [&read_only, &read_write]);
        assert_eq!(launcher.program(), Path::new("/opt/bin/box"));

        let rendered = launcher.container_args("a", 5, 6);
        assert_eq!((rendered.rw_name.as_str(), rendered.rw_size), ("/scratch", 128));
        assert!(rendered.guard);
        assert_eq!(rendered.seed, Some(-3));
        assert_eq!(launcher.reply_timeout, Some(Duration::from_millis(750)));
    }

    #[test]
    fn container_arguments_carry_descriptors_and_segments() {
        let launcher = launcher(PathBuf::from("guest.wat")).with_guard(true);
        let args = launcher.container_args("a", 5, 6);
        assert_eq!((args.request_fd, args.reply_fd), (5, 6));
        assert_eq!(args.ro_name, "/fake_ro");
        assert_eq!(args.rw_name, "/fake_rw");
        assert!(args.guard);
        assert_eq!(launcher.segments()[1].access(), SegmentAccess::ReadWrite);
    }
}
