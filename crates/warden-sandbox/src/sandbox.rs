//! The loaded and instantiated guest module.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use wasmtime::Val;

use crate::call::CallResult;
use crate::engine::{EngineBinding, ExportHandle, ExportSpec, ExportTable};
use crate::error::SandboxError;
use crate::memory::LinearMemory;

/// Tracing target for guest calls.
const SANDBOX_TARGET: &str = "warden_sandbox::sandbox";

/// One guest module instance with its resolved exports.
///
/// The sandbox is single-threaded: every call takes `&mut self`.
pub struct Sandbox {
    exports: ExportTable,
    binding: EngineBinding,
}

impl Sandbox {
    /// Reads, compiles and instantiates the module at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ModuleRead`] when the file cannot be read, and
    /// otherwise the errors of [`Sandbox::from_bytes`].
    pub fn from_file(
        path: impl AsRef<Path>,
        label: impl Into<String>,
        specs: &[ExportSpec],
    ) -> Result<Self, SandboxError> {
        let module_path = path.as_ref();
        let bytes = std::fs::read(module_path).map_err(|source| SandboxError::ModuleRead {
            path: module_path.to_path_buf(),
            source: Arc::new(source),
        })?;
        Self::from_bytes(&bytes, label, specs)
    }

    /// Compiles and instantiates a module from binary or text bytes, then
    /// resolves the memory export and the functions named in `specs`.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] when compilation, instantiation or export
    /// resolution fails.
    pub fn from_bytes(
        bytes: &[u8],
        label: impl Into<String>,
        specs: &[ExportSpec],
    ) -> Result<Self, SandboxError> {
        let mut binding = EngineBinding::new(label)?;
        let module = binding.load(bytes)?;
        let linker = binding.default_imports()?;
        let instance = binding.instantiate(&module, &linker)?;
        let exports = binding.resolve_exports(&module, &instance, specs)?;
        debug!(
            target: SANDBOX_TARGET,
            label = binding.label(),
            "module instantiated"
        );
        Ok(Self { exports, binding })
    }

    /// Label of the owning container.
    #[must_use]
    pub fn label(&self) -> &str {
        self.binding.label()
    }

    /// Returns the handle of a resolved export, or `None` when the module
    /// omitted an optional export.
    #[must_use]
    pub fn export(&self, name: &str) -> Option<ExportHandle> {
        self.exports.handle(name)
    }

    /// Returns the handle of an export that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::MissingExport`] when it was not resolved.
    pub fn require_export(&self, name: &str) -> Result<ExportHandle, SandboxError> {
        self.export(name).ok_or_else(|| SandboxError::MissingExport {
            name: name.to_owned(),
        })
    }

    /// Number of `i32` parameters the export takes.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::UnknownHandle`] for a handle issued by another
    /// sandbox.
    pub fn arity(&self, handle: ExportHandle) -> Result<usize, SandboxError> {
        Ok(self.exports.get(handle)?.params)
    }

    /// Calls an export with `i32` arguments. A trap is reported as
    /// [`CallResult::Trapped`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::UnknownHandle`] for a foreign handle and
    /// [`SandboxError::Arity`] when `args` does not match the export.
    pub fn call(&mut self, handle: ExportHandle, args: &[i32]) -> Result<CallResult, SandboxError> {
        let export = self.exports.get(handle)?;
        if args.len() != export.params {
            return Err(SandboxError::Arity {
                name: export.name,
                expected: export.params,
                found: args.len(),
            });
        }
        let params: Vec<Val> = args.iter().copied().map(Val::I32).collect();
        let mut results = if export.returns_value {
            vec![Val::I32(0)]
        } else {
            Vec::new()
        };
        let name = export.name;
        let outcome = export
            .func
            .call(&mut self.binding.store, &params, &mut results);
        Ok(match outcome {
            Ok(()) => CallResult::Completed(results.first().and_then(Val::i32).unwrap_or(0)),
            Err(error) => {
                let message = format!("{error:#}");
                warn!(
                    target: SANDBOX_TARGET,
                    label = self.binding.label(),
                    export = name,
                    error = %message,
                    "guest call trapped"
                );
                CallResult::Trapped(message)
            }
        })
    }

    /// Calls an export whose trap the caller cannot recover from.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::GuestTrap`] when the call traps, and the
    /// errors of [`Sandbox::call`].
    pub fn call_fatal(&mut self, handle: ExportHandle, args: &[i32]) -> Result<i32, SandboxError> {
        match self.call(handle, args)? {
            CallResult::Completed(value) => Ok(value),
            CallResult::Trapped(message) => Err(SandboxError::GuestTrap {
                name: self.exports.get(handle)?.name.to_owned(),
                message,
            }),
        }
    }

    /// Returns where the linear memory currently lives.
    #[must_use]
    pub fn memory(&self) -> LinearMemory {
        let memory = self.exports.memory();
        LinearMemory::new(
            memory.data_ptr(&self.binding.store).expose_provenance(),
            memory.data_size(&self.binding.store),
        )
    }

    /// Borrows the whole linear memory.
    ///
    /// Pages revoked by a [`GuardPage`](crate::GuardPage) are part of the
    /// slice, and reading them faults the process.
    #[must_use]
    pub fn memory_data(&self) -> &[u8] {
        self.exports.memory().data(&self.binding.store)
    }

    /// Copies `len` bytes of linear memory starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Layout`] when the range is out of bounds.
    pub fn read_memory(&self, offset: usize, len: usize) -> Result<Vec<u8>, SandboxError> {
        offset
            .checked_add(len)
            .and_then(|end| self.memory_data().get(offset..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| self.memory().out_of_bounds(offset, len).into())
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("label", &self.label())
            .field("memory", &self.memory())
            .finish_non_exhaustive()
    }
}
