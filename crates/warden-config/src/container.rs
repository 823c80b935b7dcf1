use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::PathBuf;

use clap::Parser;

use warden_protocol::{SegmentAccess, SegmentDescriptor};

use crate::error::{ConfigError, validate_segment};
use crate::logging::LoggingArgs;

/// Arguments of a container process.
///
/// The eight positional arguments are the spawn contract and must appear in
/// exactly this order. `clap` rejects any other count, which the container
/// treats as a fatal startup error.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "warden-container", about = "Runs one WebAssembly module for a warden host")]
pub struct ContainerArgs {
    /// WebAssembly module (binary or text format).
    #[arg(value_name = "MODULE")]
    pub module: PathBuf,
    /// Label used to tag diagnostics from this container.
    #[arg(value_name = "LABEL")]
    pub label: String,
    /// Descriptor the host writes requests to.
    #[arg(value_name = "REQUEST_FD")]
    pub request_fd: RawFd,
    /// Descriptor the container writes replies to.
    #[arg(value_name = "REPLY_FD")]
    pub reply_fd: RawFd,
    /// Name of the read-only shared-memory segment.
    #[arg(value_name = "RO_NAME")]
    pub ro_name: String,
    /// Size of the read-only segment in bytes.
    #[arg(value_name = "RO_SIZE")]
    pub ro_size: usize,
    /// Name of the read-write shared-memory segment.
    #[arg(value_name = "RW_NAME")]
    pub rw_name: String,
    /// Size of the read-write segment in bytes.
    #[arg(value_name = "RW_SIZE")]
    pub rw_size: usize,
    /// Revoke access to a page inside the guest heap before mapping segments.
    #[arg(long)]
    pub guard: bool,
    /// Fixed seed passed to the guest's `init` export.
    #[arg(long, allow_hyphen_values = true)]
    pub seed: Option<i32>,
    /// Telemetry settings.
    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl ContainerArgs {
    /// Checks the parsed values against the spawn contract.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the label or either segment is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.is_empty() || self.label.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidLabel {
                label: self.label.clone(),
            });
        }
        validate_segment(&self.ro_name, self.ro_size)?;
        validate_segment(&self.rw_name, self.rw_size)
    }

    /// Returns the segments in the order they are mapped and reported to the
    /// guest: read-only first, then read-write.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentDescriptor> {
        vec![
            SegmentDescriptor::new(self.ro_name.clone(), self.ro_size, SegmentAccess::ReadOnly),
            SegmentDescriptor::new(self.rw_name.clone(), self.rw_size, SegmentAccess::ReadWrite),
        ]
    }

    /// Renders the arguments as the argv tail passed to the container binary.
    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.module.clone().into_os_string(),
            self.label.clone().into(),
            self.request_fd.to_string().into(),
            self.reply_fd.to_string().into(),
            self.ro_name.clone().into(),
            self.ro_size.to_string().into(),
            self.rw_name.clone().into(),
            self.rw_size.to_string().into(),
        ];
        if self.guard {
            args.push("--guard".into());
        }
        if let Some(seed) = self.seed {
            args.push(format!("--seed={seed}").into());
        }
        args.push(format!("--log-filter={}", self.logging.log_filter()).into());
        args.push(format!("--log-format={}", self.logging.log_format()).into());
        args
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::LogFormat;

    #[fixture]
    fn args() -> ContainerArgs {
        ContainerArgs {
            module: PathBuf::from("/tmp/module.wasm"),
            label: "A".into(),
            request_fd: 5,
            reply_fd: 8,
            ro_name: "/shared_ro".into(),
            ro_size: 5000,
            rw_name: "/shared_rw".into(),
            rw_size: 1000,
            guard: true,
            seed: Some(-7),
            logging: LoggingArgs {
                log_filter: "debug".into(),
                log_format: LogFormat::Json,
            },
        }
    }

    #[rstest]
    fn rendered_arguments_parse_back(args: ContainerArgs) {
        let argv = std::iter::once(OsString::from("warden-container")).chain(args.to_args());
        let parsed = ContainerArgs::try_parse_from(argv).expect("argv should parse");
        assert_eq!(parsed, args);
    }

    #[test]
    fn missing_positional_arguments_are_rejected() {
        let argv = ["warden-container", "module.wasm", "A", "5", "8", "/shared_ro", "5000"];
        assert!(ContainerArgs::try_parse_from(argv).is_err());
    }

    #[test]
    fn extra_positional_arguments_are_rejected() {
        let argv = [
            "warden-container",
            "module.wasm",
            "A",
            "5",
            "8",
            "/shared_ro",
            "5000",
            "/shared_rw",
            "1000",
            "surplus",
        ];
        assert!(ContainerArgs::try_parse_from(argv).is_err());
    }

    #[rstest]
    fn segments_are_read_only_then_read_write(args: ContainerArgs) {
        let segments = args.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].access(), SegmentAccess::ReadOnly);
        assert_eq!(segments[0].size(), 5000);
        assert_eq!(segments[1].access(), SegmentAccess::ReadWrite);
        assert_eq!(segments[1].name(), "/shared_rw");
    }

    #[rstest]
    #[case("shared_ro", 10)]
    #[case("/", 10)]
    #[case("/a/b", 10)]
    #[case("/shared_ro", 0)]
    fn invalid_segments_fail_validation(
        mut args: ContainerArgs,
        #[case] name: &str,
        #[case] size: usize,
    ) {
        args.ro_name = name.to_owned();
        args.ro_size = size;
        assert!(args.validate().is_err());
    }

    #[rstest]
    fn labels_with_whitespace_fail_validation(mut args: ContainerArgs) {
        args.label = "a b".into();
        assert!(matches!(
            args.validate(),
            Err(ConfigError::InvalidLabel { .. })
        ));
    }
}
