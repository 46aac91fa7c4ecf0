use std::{any::Any, fmt, sync::Arc};

use tracing::debug;

use crate::{
    error::{HostError, StoreError},
    host::{HostContext, HostFunc},
    instance::{
        DataInst, ElemInst, ExternValue, FuncInst, GlobalInst, MemInst, ModuleInst, TableInst,
    },
    types::{FuncType, GlobalType, MemoryType, TableType},
    value::Value,
};

macro_rules! address {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);
    };
}

address!(
    /// Handle to a function instance in a [`Store`].
    FuncAddr
);
address!(
    /// Handle to a table instance in a [`Store`].
    TableAddr
);
address!(
    /// Handle to a memory instance in a [`Store`].
    MemAddr
);
address!(
    /// Handle to a global instance in a [`Store`].
    GlobalAddr
);
address!(
    /// Handle to a module instance in a [`Store`].
    ModuleAddr
);
address!(
    /// Handle to a host object referenced by `externref` values.
    ExternAddr
);

/// Owns every runtime instance. Handles are indices that are never reused;
/// instances live until the whole store is dropped.
///
/// Accessors panic when given a handle that was not allocated by this store.
#[derive(Default)]
pub struct Store {
    funcs: Vec<FuncInst>,
    tables: Vec<TableInst>,
    mems: Vec<MemInst>,
    globals: Vec<GlobalInst>,
    pub(crate) elems: Vec<ElemInst>,
    pub(crate) datas: Vec<DataInst>,
    modules: Vec<ModuleInst>,
    externs: Vec<Arc<dyn Any + Send + Sync>>,
    registry: Vec<(String, ModuleAddr)>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_func(&mut self, func: FuncInst) -> FuncAddr {
        let addr = FuncAddr(self.funcs.len());
        self.funcs.push(func);
        addr
    }

    pub fn alloc_host_func<F>(&mut self, ty: FuncType, func: F) -> FuncAddr
    where
        F: Fn(&mut HostContext<'_>, &[Value]) -> Result<Vec<Value>, HostError>
            + Send
            + Sync
            + 'static,
    {
        self.alloc_shared_host_func(ty, Arc::new(func))
    }

    pub(crate) fn alloc_shared_host_func(&mut self, ty: FuncType, func: HostFunc) -> FuncAddr {
        self.alloc_func(FuncInst::Host { ty, func })
    }

    pub fn alloc_table(&mut self, ty: TableType) -> TableAddr {
        let addr = TableAddr(self.tables.len());
        self.tables.push(TableInst::new(ty));
        addr
    }

    pub fn alloc_memory(&mut self, ty: MemoryType) -> MemAddr {
        let addr = MemAddr(self.mems.len());
        self.mems.push(MemInst::new(ty));
        addr
    }

    pub fn alloc_global(&mut self, ty: GlobalType, value: Value) -> GlobalAddr {
        let addr = GlobalAddr(self.globals.len());
        self.globals.push(GlobalInst::new(ty, value));
        addr
    }

    pub(crate) fn alloc_elem(&mut self, elem: ElemInst) -> usize {
        self.elems.push(elem);
        self.elems.len() - 1
    }

    pub(crate) fn alloc_data(&mut self, data: DataInst) -> usize {
        self.datas.push(data);
        self.datas.len() - 1
    }

    pub(crate) fn alloc_module(&mut self, module: ModuleInst) -> ModuleAddr {
        let addr = ModuleAddr(self.modules.len());
        self.modules.push(module);
        addr
    }

    /// Stores a host object so it can be passed to wasm as an `externref`.
    pub fn alloc_extern(&mut self, object: impl Any + Send + Sync) -> ExternAddr {
        let addr = ExternAddr(self.externs.len());
        self.externs.push(Arc::new(object));
        addr
    }

    pub fn extern_object(&self, addr: ExternAddr) -> &(dyn Any + Send + Sync) {
        &*self.externs[addr.0]
    }

    pub fn func(&self, addr: FuncAddr) -> &FuncInst {
        &self.funcs[addr.0]
    }

    pub fn table(&self, addr: TableAddr) -> &TableInst {
        &self.tables[addr.0]
    }

    pub fn table_mut(&mut self, addr: TableAddr) -> &mut TableInst {
        &mut self.tables[addr.0]
    }

    pub fn memory(&self, addr: MemAddr) -> &MemInst {
        &self.mems[addr.0]
    }

    pub fn memory_mut(&mut self, addr: MemAddr) -> &mut MemInst {
        &mut self.mems[addr.0]
    }

    pub fn global(&self, addr: GlobalAddr) -> &GlobalInst {
        &self.globals[addr.0]
    }

    pub fn global_mut(&mut self, addr: GlobalAddr) -> &mut GlobalInst {
        &mut self.globals[addr.0]
    }

    pub fn module(&self, addr: ModuleAddr) -> &ModuleInst {
        &self.modules[addr.0]
    }

    pub(crate) fn module_mut(&mut self, addr: ModuleAddr) -> &mut ModuleInst {
        &mut self.modules[addr.0]
    }

    /// Two distinct tables, borrowed together for `table.copy`.
    pub(crate) fn tables_pair_mut(
        &mut self,
        a: TableAddr,
        b: TableAddr,
    ) -> (&mut TableInst, &mut TableInst) {
        debug_assert_ne!(a, b);

        if a.0 < b.0 {
            let (lo, hi) = self.tables.split_at_mut(b.0);
            (&mut lo[a.0], &mut hi[0])
        } else {
            let (lo, hi) = self.tables.split_at_mut(a.0);
            (&mut hi[0], &mut lo[b.0])
        }
    }

    /// Makes `addr` resolvable under `name` for later imports.
    pub fn register(&mut self, name: &str, addr: ModuleAddr) -> Result<(), StoreError> {
        if self.find_module(name).is_some() {
            return Err(StoreError::DuplicateModuleName(name.to_owned()));
        }

        debug!(name, module = addr.0, "registered module");

        self.modules[addr.0].name = Some(name.to_owned());
        self.registry.push((name.to_owned(), addr));

        Ok(())
    }

    /// Registered module names in registration order.
    pub fn list_modules(&self) -> impl Iterator<Item = &str> + '_ {
        self.registry.iter().map(|(name, _)| name.as_str())
    }

    pub fn find_module(&self, name: &str) -> Option<ModuleAddr> {
        self.registry
            .iter()
            .find_map(|(registered, addr)| (registered == name).then_some(*addr))
    }

    pub(crate) fn registered(&self) -> impl Iterator<Item = (&str, ModuleAddr)> + '_ {
        self.registry
            .iter()
            .map(|(name, addr)| (name.as_str(), *addr))
    }

    /// Exported functions of a module instance with their types.
    pub fn list_functions(&self, addr: ModuleAddr) -> Vec<(&str, &FuncType)> {
        self.module(addr)
            .exports()
            .filter_map(|(name, value)| match value {
                ExternValue::Func(func) => Some((name, self.func(func).ty())),
                _ => None,
            })
            .collect()
    }

    /// The type of an entity, for import matching.
    pub(crate) fn extern_type(&self, value: ExternValue) -> crate::types::ExternType {
        use crate::types::ExternType;

        match value {
            ExternValue::Func(addr) => ExternType::Func(self.func(addr).ty().clone()),
            ExternValue::Table(addr) => ExternType::Table(self.table(addr).ty()),
            ExternValue::Mem(addr) => ExternType::Mem(self.memory(addr).ty()),
            ExternValue::Global(addr) => ExternType::Global(self.global(addr).ty()),
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("funcs", &self.funcs.len())
            .field("tables", &self.tables.len())
            .field("mems", &self.mems.len())
            .field("globals", &self.globals.len())
            .field("modules", &self.registry)
            .finish_non_exhaustive()
    }
}
