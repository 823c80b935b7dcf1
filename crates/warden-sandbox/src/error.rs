//! Domain errors raised while embedding a guest module.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::layout::LayoutError;

/// Boxed engine error kept as the source of compile and instantiation failures.
pub type EngineError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while loading a module, resolving its exports or splicing
/// shared memory into it.
///
/// Every variant is fatal for the container that raised it: the sandbox is
/// unusable and the container never reports ready.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The module file could not be read.
    #[error("failed to read module '{path}': {source}")]
    ModuleRead {
        /// Module path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The engine rejected its configuration.
    #[error("failed to configure the WebAssembly engine: {source}")]
    Engine {
        /// Underlying engine error.
        #[source]
        source: EngineError,
    },

    /// The module bytes did not compile.
    #[error("failed to compile module: {source}")]
    Compile {
        /// Underlying engine error.
        #[source]
        source: EngineError,
    },

    /// The module could not be instantiated with the host imports.
    #[error("failed to instantiate module: {source}")]
    Instantiate {
        /// Underlying engine error.
        #[source]
        source: EngineError,
    },

    /// Module and instance disagree about their export lists.
    #[error("module exports do not line up with instance exports: {message}")]
    ExportMismatch {
        /// Description of the disagreement.
        message: String,
    },

    /// A required export is absent.
    #[error("export '{name}' not found")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    /// An export exists but is of the wrong kind.
    #[error("export '{name}' is not a {expected}")]
    ExportKind {
        /// Export name.
        name: String,
        /// Expected kind.
        expected: &'static str,
    },

    /// A function export does not have the expected signature.
    #[error("export '{name}' has signature {found}, expected {expected}")]
    Signature {
        /// Export name.
        name: String,
        /// Expected signature.
        expected: String,
        /// Declared signature.
        found: String,
    },

    /// A handle that this sandbox never issued was passed to it.
    #[error("no resolved export behind handle {index}")]
    UnknownHandle {
        /// Position the handle refers to.
        index: usize,
    },

    /// A guest call was given the wrong number of arguments.
    #[error("export '{name}' takes {expected} arguments, got {found}")]
    Arity {
        /// Export name.
        name: &'static str,
        /// Declared parameter count.
        expected: usize,
        /// Arguments supplied.
        found: usize,
    },

    /// A guest call trapped during a step the container cannot survive.
    #[error("guest call '{name}' trapped: {message}")]
    GuestTrap {
        /// Export name.
        name: String,
        /// Trap diagnostic.
        message: String,
    },

    /// The guest allocator returned no memory.
    #[error("guest allocator failed to reserve {size} bytes")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
    },

    /// Placement arithmetic failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// A shared-memory object could not be opened.
    #[error("failed to open shared-memory segment '{name}': {source}")]
    SharedMemoryOpen {
        /// Segment name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Mapping a shared-memory object failed.
    #[error("failed to map shared-memory segment '{name}': {source}")]
    Map {
        /// Segment name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The kernel placed a fixed mapping somewhere else.
    #[error("segment '{name}' mapped at {actual:#x} instead of {expected:#x}")]
    MapMisplaced {
        /// Segment name.
        name: String,
        /// Requested address.
        expected: usize,
        /// Address returned by the kernel.
        actual: usize,
    },

    /// Changing page protection failed.
    #[error("failed to protect {len} bytes at {address:#x}: {source}")]
    Protect {
        /// Start address.
        address: usize,
        /// Length in bytes.
        len: usize,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The system page size could not be determined.
    #[error("failed to determine the system page size")]
    PageSize,
}

impl SandboxError {
    pub(crate) fn engine(source: impl Into<EngineError>) -> Self {
        Self::Engine {
            source: source.into(),
        }
    }
}
