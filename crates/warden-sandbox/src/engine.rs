//! Engine configuration, host imports and export resolution.

use tracing::{debug, info};
use wasmtime::{
    Caller, Config, Engine, Extern, ExternType, Func, Instance, Linker, Memory, Module, Store,
    ValType,
};

use crate::error::SandboxError;
use crate::memory::read_c_string;

/// Name of the exported linear memory.
pub const MEMORY_EXPORT: &str = "memory";
/// Name of the guest allocator export, `(size: i32) -> i32`.
pub const ALLOCATOR_EXPORT: &str = "malloc";
/// Name of the export receiving segment offsets and sizes.
pub const SHARED_SETTER_EXPORT: &str = "set_shared";
/// Name of the host function guests import from the `env` module.
pub const PRINT_IMPORT: &str = "print_callback";

const IMPORT_MODULE: &str = "env";
const PRINT_LIMIT: usize = 4096;

/// Tracing target for engine operations.
const ENGINE_TARGET: &str = "warden_sandbox::engine";
/// Tracing target for text printed by guests.
const GUEST_TARGET: &str = "warden_sandbox::guest";

/// An export the embedder wants a typed handle for.
///
/// Every function export is expected to take `params` arguments of type `i32`
/// and to return either nothing or a single `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSpec {
    /// Export name.
    pub name: &'static str,
    /// Number of `i32` parameters.
    pub params: usize,
    /// Whether resolution fails when the export is absent.
    pub required: bool,
}

impl ExportSpec {
    /// Describes an export the module must provide.
    #[must_use]
    pub const fn required(name: &'static str, params: usize) -> Self {
        Self {
            name,
            params,
            required: true,
        }
    }

    /// Describes an export the module may omit.
    #[must_use]
    pub const fn optional(name: &'static str, params: usize) -> Self {
        Self {
            name,
            params,
            required: false,
        }
    }

    fn expected_signature(&self) -> String {
        let params = vec!["i32"; self.params].join(", ");
        format!("({params}) -> [i32]?")
    }
}

/// Opaque handle to a resolved function export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportHandle(usize);

#[derive(Debug, Clone)]
pub(crate) struct ResolvedExport {
    pub(crate) name: &'static str,
    pub(crate) func: Func,
    pub(crate) params: usize,
    pub(crate) returns_value: bool,
}

/// Exports resolved once after instantiation.
#[derive(Debug, Clone)]
pub struct ExportTable {
    memory: Memory,
    functions: Vec<ResolvedExport>,
}

impl ExportTable {
    /// Looks up a resolved function by name.
    #[must_use]
    pub fn handle(&self, name: &str) -> Option<ExportHandle> {
        self.functions
            .iter()
            .position(|export| export.name == name)
            .map(ExportHandle)
    }

    /// Returns the guest's linear memory.
    #[must_use]
    pub const fn memory(&self) -> Memory {
        self.memory
    }

    pub(crate) fn get(&self, handle: ExportHandle) -> Result<&ResolvedExport, SandboxError> {
        self.functions
            .get(handle.0)
            .ok_or(SandboxError::UnknownHandle { index: handle.0 })
    }
}

/// Per-store host state visible to imported functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestContext {
    /// Label of the owning container, attached to guest output.
    pub label: String,
}

/// An engine together with the single store a sandbox runs in.
pub struct EngineBinding {
    pub(crate) store: Store<GuestContext>,
    engine: Engine,
}

impl EngineBinding {
    /// Creates an engine whose faults inside linear memory are not recovered.
    ///
    /// Signal-based traps are disabled and linear memories carry no trailing
    /// guard region. Out-of-bounds accesses are still caught by explicit
    /// bounds checks, but a write to a page the host protected with `mprotect`
    /// raises a real `SIGSEGV` that terminates the process.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Engine`] when the configuration is rejected.
    pub fn new(label: impl Into<String>) -> Result<Self, SandboxError> {
        let mut config = Config::new();
        config.signals_based_traps(false);
        config.memory_guard_size(0);
        let engine = Engine::new(&config).map_err(SandboxError::engine)?;
        let store = Store::new(
            &engine,
            GuestContext {
                label: label.into(),
            },
        );
        Ok(Self { store, engine })
    }

    /// Label of the owning container.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.store.data().label
    }

    /// Compiles a module from binary or text bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Compile`] when the bytes are not a valid module.
    pub fn load(&self, bytes: &[u8]) -> Result<Module, SandboxError> {
        Module::new(&self.engine, bytes).map_err(|error| SandboxError::Compile {
            source: error.into(),
        })
    }

    /// Builds a linker providing `env.print_callback`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Engine`] if the import cannot be defined.
    pub fn default_imports(&self) -> Result<Linker<GuestContext>, SandboxError> {
        let mut linker = Linker::new(&self.engine);
        linker
            .func_wrap(IMPORT_MODULE, PRINT_IMPORT, print_callback)
            .map_err(SandboxError::engine)?;
        Ok(linker)
    }

    /// Instantiates `module` in this binding's store.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Instantiate`] when imports are unresolved or
    /// the start function traps.
    pub fn instantiate(
        &mut self,
        module: &Module,
        linker: &Linker<GuestContext>,
    ) -> Result<Instance, SandboxError> {
        linker
            .instantiate(&mut self.store, module)
            .map_err(|error| SandboxError::Instantiate {
                source: error.into(),
            })
    }

    /// Resolves the memory export and every function named in `specs`.
    ///
    /// The module's declared exports and the instance's live exports are
    /// walked in lock-step; a disagreement in count or names is an error.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] for a missing memory or required function,
    /// a kind mismatch, or a signature mismatch.
    pub fn resolve_exports(
        &mut self,
        module: &Module,
        instance: &Instance,
        specs: &[ExportSpec],
    ) -> Result<ExportTable, SandboxError> {
        let live: Vec<(String, Extern)> = instance
            .exports(&mut self.store)
            .map(|export| (export.name().to_owned(), export.into_extern()))
            .collect();
        let declared: Vec<(&str, ExternType)> = module
            .exports()
            .map(|export| (export.name(), export.ty()))
            .collect();
        if live.len() != declared.len() {
            return Err(SandboxError::ExportMismatch {
                message: format!(
                    "module declares {} exports, instance has {}",
                    declared.len(),
                    live.len()
                ),
            });
        }

        let mut found_memory = None;
        for ((declared_name, declared_ty), (live_name, item)) in declared.iter().zip(&live) {
            if *declared_name != live_name.as_str() {
                return Err(SandboxError::ExportMismatch {
                    message: format!("expected '{declared_name}', found '{live_name}'"),
                });
            }
            if *declared_name != MEMORY_EXPORT && matches!(declared_ty, ExternType::Memory(_)) {
                return Err(SandboxError::ExportMismatch {
                    message: format!("second memory export '{declared_name}'"),
                });
            }
            if *declared_name == MEMORY_EXPORT {
                if !matches!(declared_ty, ExternType::Memory(_)) {
                    return Err(SandboxError::ExportKind {
                        name: MEMORY_EXPORT.to_owned(),
                        expected: "memory",
                    });
                }
                found_memory = item.clone().into_memory();
            }
        }
        let memory = found_memory.ok_or_else(|| SandboxError::MissingExport {
            name: MEMORY_EXPORT.to_owned(),
        })?;

        let mut functions = Vec::with_capacity(specs.len());
        for spec in specs {
            let Some((_, item)) = live.iter().find(|(name, _)| name == spec.name) else {
                if spec.required {
                    return Err(SandboxError::MissingExport {
                        name: spec.name.to_owned(),
                    });
                }
                debug!(
                    target: ENGINE_TARGET,
                    label = self.label(),
                    export = spec.name,
                    "optional export absent"
                );
                continue;
            };
            let func = item.clone().into_func().ok_or_else(|| SandboxError::ExportKind {
                name: spec.name.to_owned(),
                expected: "function",
            })?;
            functions.push(self.check_signature(spec, func)?);
        }
        debug!(
            target: ENGINE_TARGET,
            label = self.label(),
            resolved = functions.len(),
            "exports resolved"
        );
        Ok(ExportTable { memory, functions })
    }

    fn check_signature(&self, spec: &ExportSpec, func: Func) -> Result<ResolvedExport, SandboxError> {
        let ty = func.ty(&self.store);
        let params_ok =
            ty.params().len() == spec.params && ty.params().all(|param| matches!(param, ValType::I32));
        let results: Vec<ValType> = ty.results().collect();
        let results_ok = match results.as_slice() {
            [] => true,
            [single] => matches!(single, ValType::I32),
            _ => false,
        };
        if !(params_ok && results_ok) {
            return Err(SandboxError::Signature {
                name: spec.name.to_owned(),
                expected: spec.expected_signature(),
                found: render_signature(ty.params(), results.iter().cloned()),
            });
        }
        Ok(ResolvedExport {
            name: spec.name,
            func,
            params: spec.params,
            returns_value: !results.is_empty(),
        })
    }
}

fn render_signature(
    params: impl Iterator<Item = ValType>,
    results: impl Iterator<Item = ValType>,
) -> String {
    let mut rendered = String::from("(");
    for (index, param) in params.enumerate() {
        if index > 0 {
            rendered.push_str(", ");
        }
        rendered.push_str(&param.to_string());
    }
    rendered.push_str(") -> [");
    for (index, result) in results.enumerate() {
        if index > 0 {
            rendered.push_str(", ");
        }
        rendered.push_str(&result.to_string());
    }
    rendered.push(']');
    rendered
}

fn print_callback(mut caller: Caller<'_, GuestContext>, ptr: i32) -> wasmtime::Result<()> {
    let Some(Extern::Memory(memory)) = caller.get_export(MEMORY_EXPORT) else {
        return Err(wasmtime::Error::msg("print_callback: guest exports no memory"));
    };
    let offset = usize::try_from(ptr)
        .map_err(|_| wasmtime::Error::msg(format!("print_callback: negative pointer {ptr}")))?;
    let text = read_c_string(memory.data(&caller), offset, PRINT_LIMIT).ok_or_else(|| {
        wasmtime::Error::msg(format!(
            "print_callback: no terminator within {PRINT_LIMIT} bytes of offset {offset}"
        ))
    })?;
    info!(target: GUEST_TARGET, label = caller.data().label.as_str(), "{text}");
    Ok(())
}
