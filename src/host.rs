use std::{fmt, sync::Arc};

use crate::{
    error::{HostError, InvokeError, Trap},
    executor::Executor,
    instance::MemInst,
    store::{FuncAddr, ModuleAddr, Store},
    types::{FuncType, GlobalType, MemoryType, TableType},
    value::Value,
};

/// A host-provided function callable from wasm.
pub type HostFunc = Arc<
    dyn Fn(&mut HostContext<'_>, &[Value]) -> Result<Vec<Value>, HostError> + Send + Sync,
>;

/// What a host function sees of the runtime while it runs.
pub struct HostContext<'a> {
    pub(crate) store: &'a mut Store,
    pub(crate) executor: &'a Executor,
    pub(crate) caller: Option<ModuleAddr>,
    pub(crate) depth: usize,
    /// Host functions below this one that are already inside `invoke`.
    pub(crate) reentrance: usize,
}

impl<'a> HostContext<'a> {
    /// The module instance whose code made the call; `None` when the host
    /// function was invoked directly.
    pub fn caller(&self) -> Option<ModuleAddr> {
        self.caller
    }

    /// Memory `idx` of the calling module.
    pub fn memory(&mut self, idx: u32) -> Option<&mut MemInst> {
        let addr = self.store.module(self.caller?).memory(idx)?;
        Some(self.store.memory_mut(addr))
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        self.store
    }

    /// Calls back into the runtime. Nested calls count against the same
    /// call depth limit as the caller, and traps with
    /// [`Trap::CallStackExhausted`] once more than
    /// [`Config::max_host_reentrance`] host functions are nested this way.
    ///
    /// [`Config::max_host_reentrance`]: crate::Config::max_host_reentrance
    pub fn invoke(&mut self, func: FuncAddr, args: &[Value]) -> Result<Vec<Value>, InvokeError> {
        if self.reentrance >= self.executor.config().max_host_reentrance {
            return Err(Trap::CallStackExhausted.into());
        }

        self.executor
            .invoke_at_depth(self.store, func, args, self.depth, self.reentrance + 1)
    }
}

pub(crate) enum HostEntity {
    Func(FuncType, HostFunc),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType, Value),
}

/// A named group of host functions, tables, memories and globals that wasm
/// modules can import from.
///
/// ```
/// use wasm_vm::{FuncType, HostError, HostModule, Value, ValueType};
///
/// let env = HostModule::new("env").with_func(
///     "double",
///     FuncType::new([ValueType::I32], [ValueType::I32]),
///     |_, args| match args {
///         [Value::I32(n)] => Ok(vec![Value::I32(n * 2)]),
///         _ => Err(HostError::from_code(1)),
///     },
/// );
/// assert_eq!(env.name(), "env");
/// ```
pub struct HostModule {
    pub(crate) name: String,
    pub(crate) entities: Vec<(String, HostEntity)>,
}

impl HostModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_func<F>(mut self, name: impl Into<String>, ty: FuncType, func: F) -> Self
    where
        F: Fn(&mut HostContext<'_>, &[Value]) -> Result<Vec<Value>, HostError>
            + Send
            + Sync
            + 'static,
    {
        self.entities
            .push((name.into(), HostEntity::Func(ty, Arc::new(func))));
        self
    }

    pub fn with_table(mut self, name: impl Into<String>, ty: TableType) -> Self {
        self.entities.push((name.into(), HostEntity::Table(ty)));
        self
    }

    pub fn with_memory(mut self, name: impl Into<String>, ty: MemoryType) -> Self {
        self.entities.push((name.into(), HostEntity::Memory(ty)));
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, ty: GlobalType, value: Value) -> Self {
        self.entities
            .push((name.into(), HostEntity::Global(ty, value)));
        self
    }
}

impl fmt::Debug for HostModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostModule")
            .field("name", &self.name)
            .field(
                "entities",
                &self
                    .entities
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
