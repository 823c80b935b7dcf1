//! Runtime and binaries for sandboxed WebAssembly containers.
//!
//! Two processes cooperate. `warden-host` creates the named shared-memory
//! segments, fills them with the verification pattern and spawns one
//! `warden-container` per label in its script. Each container loads the
//! module, maps the segments page-aligned into guest linear memory (the
//! read-only one write-protected) and then answers single-byte requests on
//! a pair of pipes.
//!
//! Writes through a read-only mapping, or into the optional guard page,
//! are hardware faults. The container dies from them and the host observes
//! the signal through [`warden_host::ContainerExit`].
//!
//! The [`container`] module holds the command loop, [`host`] the driver
//! used by the host binary and [`telemetry`] the shared logging setup.

pub mod container;
pub mod host;
pub mod telemetry;
