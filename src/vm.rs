use std::{fs::File, io, path::Path, path::PathBuf};

use memmap::Mmap;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::{DecodeError, InstantiationError, InvokeError, StoreError, ValidationError},
    executor::{Executor, Imports, InterruptHandle},
    host::HostModule,
    statistics::Statistics,
    store::{ModuleAddr, Store},
    types::FuncType,
    validate::Validator,
    value::Value,
    Module,
};

/// Where a [`Vm`] is in the load, validate, instantiate workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VmStage {
    Inited,
    Loaded,
    Validated,
    Instantiated,
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("{operation} requires a {required:?} module, but the VM is {current:?}")]
    WrongWorkflow {
        operation: &'static str,
        required: VmStage,
        current: VmStage,
    },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Instantiation(#[from] InstantiationError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Loader, validator, executor and store behind one object.
///
/// One module at a time is loaded, validated and instantiated as the
/// *active* module; any number of others can be registered by name for it
/// to import from.
///
/// ```no_run
/// use wasm_vm::{Config, Value, Vm};
///
/// # fn main() -> Result<(), wasm_vm::VmError> {
/// let mut vm = Vm::new(Config::default());
/// let result = vm.run_file("fibonacci.wasm", "fib", &[Value::I32(18)])?;
/// assert_eq!(result, vec![Value::I32(2584)]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Vm {
    executor: Executor,
    store: Store,
    stage: VmStage,
    module: Option<Module>,
    active: Option<ModuleAddr>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Vm {
    pub fn new(config: Config) -> Self {
        Self {
            executor: Executor::new(config),
            store: Store::new(),
            stage: VmStage::Inited,
            module: None,
            active: None,
        }
    }

    pub fn stage(&self) -> VmStage {
        self.stage
    }

    fn expect_stage(&self, operation: &'static str, required: VmStage) -> Result<(), VmError> {
        if self.stage < required {
            return Err(VmError::WrongWorkflow {
                operation,
                required,
                current: self.stage,
            });
        }

        Ok(())
    }

    fn set_stage(&mut self, stage: VmStage) {
        debug!(from = ?self.stage, to = ?stage, "vm stage");
        self.stage = stage;
    }

    /// Decodes `bytes` as the active module, replacing any earlier one.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        let module = Module::new(bytes)?;
        self.load_module(module);
        Ok(())
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), VmError> {
        let module = read_module(path.as_ref())?;
        self.load_module(module);
        Ok(())
    }

    /// Makes an already decoded module the active one.
    pub fn load_module(&mut self, module: Module) {
        self.module = Some(module);
        self.active = None;
        self.set_stage(VmStage::Loaded);
    }

    pub fn validate(&mut self) -> Result<(), VmError> {
        self.expect_stage("validate", VmStage::Loaded)?;

        if let Some(module) = &self.module {
            Validator::new(self.executor.config()).validate(module)?;
        }

        self.set_stage(VmStage::Validated);

        Ok(())
    }

    /// Instantiates the active module against every registered module.
    pub fn instantiate(&mut self) -> Result<ModuleAddr, VmError> {
        self.expect_stage("instantiate", VmStage::Validated)?;

        let module = self.module.as_ref().ok_or(VmError::WrongWorkflow {
            operation: "instantiate",
            required: VmStage::Validated,
            current: VmStage::Inited,
        })?;

        let imports = Imports::from_store(&self.store);
        let addr = self
            .executor
            .instantiate(&mut self.store, module, &imports)?;

        self.active = Some(addr);
        self.set_stage(VmStage::Instantiated);

        Ok(addr)
    }

    /// Calls an export of the active module instance.
    pub fn execute(&mut self, func: &str, args: &[Value]) -> Result<Vec<Value>, VmError> {
        self.expect_stage("execute", VmStage::Instantiated)?;

        let module = self.active_module().ok_or(VmError::WrongWorkflow {
            operation: "execute",
            required: VmStage::Instantiated,
            current: self.stage,
        })?;

        Ok(self
            .executor
            .invoke_export(&mut self.store, module, func, args)?)
    }

    /// Calls an export of the module registered as `module`.
    pub fn execute_registered(
        &mut self,
        module: &str,
        func: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, VmError> {
        let addr = self
            .store
            .find_module(module)
            .ok_or_else(|| StoreError::UnknownModule(module.to_owned()))?;

        Ok(self
            .executor
            .invoke_export(&mut self.store, addr, func, args)?)
    }

    /// Decodes, validates and instantiates `bytes`, then registers the
    /// instance as `name`.
    pub fn register_module_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<ModuleAddr, VmError> {
        let module = Module::new(bytes)?;
        self.register_module(name, &module)
    }

    pub fn register_module_file(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<ModuleAddr, VmError> {
        let module = read_module(path.as_ref())?;
        self.register_module(name, &module)
    }

    /// An instantiated active module drops back to the validated stage, so
    /// re-instantiating it sees the newly registered exports.
    pub fn register_module(&mut self, name: &str, module: &Module) -> Result<ModuleAddr, VmError> {
        let addr = self
            .executor
            .register_module(&mut self.store, name, module)?;

        info!(name, "registered module");
        self.demote_instantiated();

        Ok(addr)
    }

    pub fn register_host_module(&mut self, host: HostModule) -> Result<ModuleAddr, VmError> {
        let name = host.name().to_owned();
        let addr = self.executor.register_host_module(&mut self.store, host)?;

        info!(%name, "registered host module");
        self.demote_instantiated();

        Ok(addr)
    }

    fn demote_instantiated(&mut self) {
        if self.stage == VmStage::Instantiated {
            self.active = None;
            self.set_stage(VmStage::Validated);
        }
    }

    /// Load, validate, instantiate and execute in one step.
    pub fn run_bytes(
        &mut self,
        bytes: &[u8],
        func: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, VmError> {
        self.load_bytes(bytes)?;
        self.validate()?;
        self.instantiate()?;
        self.execute(func, args)
    }

    pub fn run_file(
        &mut self,
        path: impl AsRef<Path>,
        func: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, VmError> {
        self.load_file(path)?;
        self.validate()?;
        self.instantiate()?;
        self.execute(func, args)
    }

    /// Exported functions of the active module with their types. Available
    /// from the validated stage on.
    pub fn function_list(&self) -> Vec<(String, FuncType)> {
        if self.stage < VmStage::Validated {
            return Vec::new();
        }

        match (self.active, &self.module) {
            (Some(addr), _) => self
                .store
                .list_functions(addr)
                .into_iter()
                .map(|(name, ty)| (name.to_owned(), ty.clone()))
                .collect(),
            (None, Some(module)) => module
                .exports()
                .iter()
                .filter_map(|export| {
                    let ty = module.export_func_type(&export.name)?;
                    Some((export.name.clone(), ty.clone()))
                })
                .collect(),
            (None, None) => Vec::new(),
        }
    }

    pub fn function_type(&self, name: &str) -> Option<FuncType> {
        if self.stage < VmStage::Validated {
            return None;
        }

        self.module.as_ref()?.export_func_type(name).cloned()
    }

    pub fn active_module(&self) -> Option<ModuleAddr> {
        self.active
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn statistics(&self) -> &Statistics {
        self.executor.statistics()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.executor.interrupt_handle()
    }

    /// Drops the store and the active module and resets the statistics.
    pub fn cleanup(&mut self) {
        self.store = Store::new();
        self.module = None;
        self.active = None;
        self.executor.statistics().reset();
        self.set_stage(VmStage::Inited);
    }
}

/// Decodes a module from a memory-mapped file.
pub(crate) fn read_module(path: &Path) -> Result<Module, VmError> {
    let io_error = |source| VmError::Io {
        path: path.to_owned(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;

    // zero-length files cannot be mapped
    if file.metadata().map_err(io_error)?.len() == 0 {
        return Ok(Module::new(&[])?);
    }

    // SAFETY: the map is read-only and dropped before returning; the module
    // copies everything it keeps out of the buffer
    let map = unsafe { Mmap::map(&file) }.map_err(io_error)?;

    Ok(Module::new(&map)?)
}
