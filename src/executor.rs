use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use tracing::{debug, trace, warn};

use crate::{
    config::Config,
    error::{
        types, InstantiationError, InvokeError, SegmentKind, StoreError, Trap, ValidationError,
    },
    host::{HostEntity, HostModule},
    instance::{checked_range, DataInst, ElemInst, ExternValue, FuncInst, ModuleInst},
    interpreter::Interpreter,
    opcode::Instruction,
    statistics::Statistics,
    store::{FuncAddr, ModuleAddr, Store},
    types::{ExternType, Limit, ValueType},
    validate::Validator,
    value::Value,
    DataMode, ElemMode, ExportDescription, Expr, ImportDescription, Module,
};

/// Values offered to a module's imports, keyed by module and field name.
#[derive(Debug, Clone, Default)]
pub struct Imports {
    entries: HashMap<(String, String), ExternValue>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every export of every module registered in `store`.
    pub fn from_store(store: &Store) -> Self {
        let mut imports = Self::new();

        for (name, addr) in store.registered() {
            for (field, value) in store.module(addr).exports() {
                imports.define(name, field, value);
            }
        }

        imports
    }

    /// Offers `value` as `module.field`, replacing any earlier definition.
    pub fn define(
        &mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        value: ExternValue,
    ) -> &mut Self {
        self.entries.insert((module.into(), field.into()), value);
        self
    }

    pub fn get(&self, module: &str, field: &str) -> Option<ExternValue> {
        self.entries
            .get(&(module.to_owned(), field.to_owned()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stops a running invocation from another thread. The invocation traps with
/// [`Trap::Interrupted`] before its next instruction.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Instantiates modules into a [`Store`] and runs their functions.
#[derive(Debug)]
pub struct Executor {
    config: Config,
    statistics: Statistics,
    interrupt: Arc<AtomicBool>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Executor {
    pub fn new(config: Config) -> Self {
        Self {
            statistics: Statistics::new(config.statistics),
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.interrupt))
    }

    /// Consumes a pending interrupt request.
    pub(crate) fn check_interrupt(&self) -> Result<(), Trap> {
        if self.interrupt.load(Ordering::Relaxed) && self.interrupt.swap(false, Ordering::Relaxed)
        {
            return Err(Trap::Interrupted);
        }

        Ok(())
    }

    /// Validates `module`, resolves its imports against `imports` and
    /// allocates a new instance of it in `store`.
    ///
    /// Element and data segments are written in order; if one does not fit,
    /// instantiation fails but the writes of earlier segments remain.
    pub fn instantiate(
        &self,
        store: &mut Store,
        module: &Module,
        imports: &Imports,
    ) -> Result<ModuleAddr, InstantiationError> {
        Validator::new(&self.config).validate(module)?;

        let max = self.config.max_memory_pages;

        if let Some(mem) = module.mems.iter().find(|mem| mem.limit.min > max) {
            return Err(InstantiationError::MemoryLimitExceeded {
                pages: mem.limit.min,
                max,
            });
        }

        let max = self.config.max_table_elements;

        if let Some(table) = module.tables.iter().find(|table| table.limit.min > max) {
            return Err(InstantiationError::TableLimitExceeded {
                elements: table.limit.min,
                max,
            });
        }

        let mut inst = ModuleInst {
            types: module.types.clone(),
            ..ModuleInst::default()
        };

        self.resolve_imports(store, module, imports, &mut inst)?;

        // reserved up front so local functions can refer to their instance
        let addr = store.alloc_module(ModuleInst::default());

        for func in &module.funcs {
            let ty = module.types[func.type_idx as usize].clone();

            inst.func_addrs.push(store.alloc_func(FuncInst::Local {
                ty,
                module: addr,
                code: func.clone(),
            }));
        }

        for table in &module.tables {
            inst.table_addrs.push(store.alloc_table(*table));
        }

        for mem in &module.mems {
            inst.mem_addrs.push(store.alloc_memory(*mem));
        }

        for global in &module.globals {
            let value = eval_const(store, &inst, &global.init)?;
            inst.global_addrs
                .push(store.alloc_global(global.global_type, value));
        }

        inst.exports = module
            .exports
            .iter()
            .map(|export| {
                let value = match export.description {
                    ExportDescription::FuncIdx(idx) => {
                        ExternValue::Func(inst.func_addrs[idx as usize])
                    }
                    ExportDescription::TableIdx(idx) => {
                        ExternValue::Table(inst.table_addrs[idx as usize])
                    }
                    ExportDescription::MemIdx(idx) => ExternValue::Mem(inst.mem_addrs[idx as usize]),
                    ExportDescription::GlobalIdx(idx) => {
                        ExternValue::Global(inst.global_addrs[idx as usize])
                    }
                };

                (export.name.clone(), value)
            })
            .collect();

        for elem in &module.elems {
            let values = elem
                .init
                .iter()
                .map(|expr| eval_const(store, &inst, expr))
                .collect::<Result<Vec<_>, _>>()?;

            inst.elem_addrs
                .push(store.alloc_elem(ElemInst { elem: values }));
        }

        for data in &module.data {
            inst.data_addrs.push(store.alloc_data(DataInst {
                data: data.init.clone(),
            }));
        }

        *store.module_mut(addr) = inst;

        debug!(
            module = addr.0,
            funcs = module.funcs.len(),
            imports = module.imports.len(),
            "allocated module instance"
        );

        self.init_segments(store, module, addr)?;

        if let Some(start) = module.start {
            let func = store.module(addr).func_addrs[start as usize];

            trace!(func = func.0, "running start function");

            self.invoke(store, func, &[])
                .map_err(InstantiationError::Start)?;
        }

        Ok(addr)
    }

    fn resolve_imports(
        &self,
        store: &Store,
        module: &Module,
        imports: &Imports,
        inst: &mut ModuleInst,
    ) -> Result<(), InstantiationError> {
        for import in &module.imports {
            let value = imports
                .get(&import.mod_name, &import.name)
                .ok_or_else(|| {
                    debug!(module = %import.mod_name, name = %import.name, "unresolved import");

                    InstantiationError::UnresolvedImport {
                        module: import.mod_name.clone(),
                        name: import.name.clone(),
                    }
                })?;

            let matches = match (import.description, value) {
                (ImportDescription::Func(idx), ExternValue::Func(addr)) => {
                    store.func(addr).ty() == &module.types[idx as usize]
                }
                (ImportDescription::Table(expected), ExternValue::Table(addr)) => {
                    let table = store.table(addr);
                    let actual = Limit::new(table.size(), table.ty().limit.max);

                    table.ty().element == expected.element && actual.matches(&expected.limit)
                }
                (ImportDescription::Mem(expected), ExternValue::Mem(addr)) => {
                    let mem = store.memory(addr);
                    let actual = Limit::new(mem.size(), mem.ty().limit.max);

                    actual.matches(&expected.limit)
                }
                (ImportDescription::Global(expected), ExternValue::Global(..)) => {
                    store.extern_type(value) == ExternType::Global(expected)
                }
                _ => false,
            };

            if !matches {
                return Err(InstantiationError::SignatureMismatch {
                    module: import.mod_name.clone(),
                    name: import.name.clone(),
                });
            }

            trace!(module = %import.mod_name, name = %import.name, "resolved import");

            match value {
                ExternValue::Func(addr) => inst.func_addrs.push(addr),
                ExternValue::Table(addr) => inst.table_addrs.push(addr),
                ExternValue::Mem(addr) => inst.mem_addrs.push(addr),
                ExternValue::Global(addr) => inst.global_addrs.push(addr),
            }
        }

        Ok(())
    }

    /// Copies active segments into their table or memory, then drops every
    /// segment that is not passive.
    fn init_segments(
        &self,
        store: &mut Store,
        module: &Module,
        addr: ModuleAddr,
    ) -> Result<(), InstantiationError> {
        for (idx, elem) in module.elems.iter().enumerate() {
            let elem_addr = store.module(addr).elem_addrs[idx];

            match &elem.mode {
                ElemMode::Passive => continue,
                ElemMode::Declarative => {}
                ElemMode::Active { table_idx, offset } => {
                    let offset = eval_offset(store, store.module(addr), offset)?;
                    let table_addr = store.module(addr).table_addrs[*table_idx as usize];
                    let values = std::mem::take(&mut store.elems[elem_addr].elem);

                    let table = store.table_mut(table_addr);
                    let range = checked_range(offset, values.len() as u32, table.elem.len())
                        .ok_or(InstantiationError::OutOfBounds {
                            kind: SegmentKind::Element,
                            index: idx as u32,
                        })?;

                    table.elem[range].copy_from_slice(&values);
                }
            }

            store.elems[elem_addr].elem = Vec::new();
        }

        for (idx, data) in module.data.iter().enumerate() {
            let DataMode::Active { mem_idx, offset } = &data.mode else {
                continue;
            };

            let offset = eval_offset(store, store.module(addr), offset)?;
            let data_addr = store.module(addr).data_addrs[idx];
            let mem_addr = store.module(addr).mem_addrs[*mem_idx as usize];
            let bytes = std::mem::take(&mut store.datas[data_addr].data);

            let mem = store.memory_mut(mem_addr);
            let range = checked_range(offset, bytes.len() as u32, mem.data.len()).ok_or(
                InstantiationError::OutOfBounds {
                    kind: SegmentKind::Data,
                    index: idx as u32,
                },
            )?;

            mem.data[range].copy_from_slice(&bytes);
        }

        Ok(())
    }

    /// Instantiates `module` against everything registered in `store` and
    /// registers the new instance as `name`.
    pub fn register_module(
        &self,
        store: &mut Store,
        name: &str,
        module: &Module,
    ) -> Result<ModuleAddr, InstantiationError> {
        if store.find_module(name).is_some() {
            return Err(StoreError::DuplicateModuleName(name.to_owned()).into());
        }

        let imports = Imports::from_store(store);
        let addr = self.instantiate(store, module, &imports)?;

        store.register(name, addr)?;

        Ok(addr)
    }

    /// Allocates the entities of `host` and registers them as one module
    /// instance.
    pub fn register_host_module(
        &self,
        store: &mut Store,
        host: HostModule,
    ) -> Result<ModuleAddr, StoreError> {
        if store.find_module(&host.name).is_some() {
            return Err(StoreError::DuplicateModuleName(host.name));
        }

        let mut inst = ModuleInst::default();

        for (name, entity) in host.entities {
            let value = match entity {
                HostEntity::Func(ty, func) => {
                    let addr = store.alloc_shared_host_func(ty, func);
                    inst.func_addrs.push(addr);
                    ExternValue::Func(addr)
                }
                HostEntity::Table(ty) => {
                    let addr = store.alloc_table(ty);
                    inst.table_addrs.push(addr);
                    ExternValue::Table(addr)
                }
                HostEntity::Memory(ty) => {
                    let addr = store.alloc_memory(ty);
                    inst.mem_addrs.push(addr);
                    ExternValue::Mem(addr)
                }
                HostEntity::Global(ty, value) => {
                    if value.ty() != ty.val_type {
                        return Err(StoreError::GlobalTypeMismatch {
                            expected: ty.val_type,
                            found: value.ty(),
                        });
                    }

                    let addr = store.alloc_global(ty, value);
                    inst.global_addrs.push(addr);
                    ExternValue::Global(addr)
                }
            };

            inst.exports.push((name, value));
        }

        let addr = store.alloc_module(inst);
        store.register(&host.name, addr)?;

        Ok(addr)
    }

    /// Calls `func` with `args`, which must match its parameter types
    /// exactly.
    pub fn invoke(
        &self,
        store: &mut Store,
        func: FuncAddr,
        args: &[Value],
    ) -> Result<Vec<Value>, InvokeError> {
        self.invoke_at_depth(store, func, args, 0, 0)
    }

    /// Calls the function exported from `module` as `name`.
    pub fn invoke_export(
        &self,
        store: &mut Store,
        module: ModuleAddr,
        name: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, InvokeError> {
        match store.module(module).export(name) {
            Some(ExternValue::Func(func)) => self.invoke(store, func, args),
            Some(..) => Err(InvokeError::NotAFunction(name.to_owned())),
            None => Err(InvokeError::UnknownExport(name.to_owned())),
        }
    }

    pub(crate) fn invoke_at_depth(
        &self,
        store: &mut Store,
        func: FuncAddr,
        args: &[Value],
        depth: usize,
        reentrance: usize,
    ) -> Result<Vec<Value>, InvokeError> {
        let params = store.func(func).ty().params();

        if params.len() != args.len() || params.iter().zip(args).any(|(ty, arg)| arg.ty() != *ty) {
            return Err(InvokeError::ArgumentMismatch {
                expected: params.to_vec(),
                found: args.iter().map(Value::ty).collect(),
            });
        }

        trace!(func = func.0, depth, reentrance, "invoke");

        let start = Instant::now();
        let result = Interpreter::new(store, self, depth, reentrance).invoke(func, args);

        if depth == 0 {
            self.statistics.add_wasm_time(start.elapsed());

            if self.statistics.config().any() {
                debug!(
                    instructions = self.statistics.instr_count(),
                    cost = self.statistics.total_cost(),
                    "invocation finished"
                );
            }

            if let Err(err) = &result {
                warn!(func = func.0, %err, "invocation failed");
            }
        }

        result
    }
}

/// Evaluates a constant expression of a global, element or data segment.
fn eval_const(store: &Store, inst: &ModuleInst, expr: &Expr) -> Result<Value, InstantiationError> {
    let mut value = None;

    for instr in expr.instructions() {
        value = Some(match instr {
            Instruction::i32Const(n) => Value::I32(*n),
            Instruction::i64Const(n) => Value::I64(*n),
            Instruction::f32Const(n) => Value::F32(*n),
            Instruction::f64Const(n) => Value::F64(*n),
            Instruction::RefNull(ty) => ty.null(),
            Instruction::RefFunc(idx) => Value::FuncRef(Some(inst.func_addrs[*idx as usize])),
            Instruction::GlobalGet(idx) => store.global(inst.global_addrs[*idx as usize]).get(),
            Instruction::End => break,
            _ => return Err(ValidationError::ConstantExpressionRequired.into()),
        });
    }

    value.ok_or_else(|| ValidationError::ConstantExpressionRequired.into())
}

fn eval_offset(store: &Store, inst: &ModuleInst, expr: &Expr) -> Result<u32, InstantiationError> {
    match eval_const(store, inst, expr)? {
        Value::I32(offset) => Ok(offset as u32),
        other => Err(ValidationError::TypeMismatch {
            expected: types(&[ValueType::I32]),
            found: types(&[other.ty()]),
        }
        .into()),
    }
}
