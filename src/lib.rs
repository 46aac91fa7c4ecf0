//! A WebAssembly runtime: binary decoder, validator, store and interpreter.
//!
//! The engine components can be driven one by one:
//!
//! ```no_run
//! use wasm_vm::{Config, Executor, Imports, Module, Store, Value};
//!
//! # fn main() -> anyhow::Result<()> {
//! let bytes = std::fs::read("fibonacci.wasm")?;
//! let module = Module::new(&bytes)?;
//! wasm_vm::validate(&module)?;
//!
//! let mut store = Store::new();
//! let executor = Executor::new(Config::default());
//! let instance = executor.instantiate(&mut store, &module, &Imports::new())?;
//! let result = executor.invoke_export(&mut store, instance, "fib", &[Value::I32(18)])?;
//! assert_eq!(result, vec![Value::I32(2584)]);
//! # Ok(())
//! # }
//! ```
//!
//! or through [`Vm`], which composes them behind a staged workflow.

use std::sync::Arc;

pub use config::{Config, StatisticsConfig};
pub use error::{
    DecodeError, HostError, IndexSpace, InstantiationError, InvokeError, MalformedReason,
    SegmentKind, StoreError, Trap, ValidationError,
};
pub use executor::{Executor, Imports, InterruptHandle};
pub use host::{HostContext, HostFunc, HostModule};
pub use instance::{
    ExternValue, FuncInst, GlobalInst, MemInst, ModuleInst, TableInst, MAX_PAGES, PAGE_SIZE,
};
pub use opcode::{BlockLabel, Instruction, MemoryOperand};
pub use statistics::Statistics;
pub use store::{ExternAddr, FuncAddr, GlobalAddr, MemAddr, ModuleAddr, Store, TableAddr};
pub use types::{
    BlockType, ExternType, FuncType, GlobalType, Limit, MemoryType, Mutability, RefType,
    TableType, ValueType,
};
pub use validate::{validate, Validator};
pub use value::Value;
pub use vm::{Vm, VmError, VmStage};

use parse::ModuleParser;

mod config;
mod error;
mod executor;
mod host;
mod instance;
mod interpreter;
mod num;
mod opcode;
mod parse;
mod section;
mod stack;
mod statistics;
mod store;
mod types;
mod validate;
mod value;
mod vm;

/// A decoded WebAssembly module. Immutable once built; cheap to clone since
/// function bodies are shared.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub(crate) types: Vec<FuncType>,
    pub(crate) imports: Vec<Import>,
    pub(crate) funcs: Vec<Function>,
    pub(crate) tables: Vec<TableType>,
    pub(crate) mems: Vec<MemoryType>,
    pub(crate) globals: Vec<Global>,
    pub(crate) exports: Vec<Export>,
    pub(crate) start: Option<u32>,
    pub(crate) elems: Vec<Element>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) data_count: Option<u32>,
    pub(crate) customs: Vec<CustomSection>,
}

impl Module {
    pub fn new(buffer: &[u8]) -> Result<Self, DecodeError> {
        ModuleParser::new(buffer).parse()
    }

    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn functions(&self) -> &[Function] {
        &self.funcs
    }

    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    pub fn tables(&self) -> &[TableType] {
        &self.tables
    }

    pub fn memories(&self) -> &[MemoryType] {
        &self.mems
    }

    pub fn elements(&self) -> &[Element] {
        &self.elems
    }

    pub fn data(&self) -> &[DataSegment] {
        &self.data
    }

    pub fn start(&self) -> Option<u32> {
        self.start
    }

    pub fn custom_sections(&self) -> &[CustomSection] {
        &self.customs
    }

    /// Types of every function in the function index space, imports first.
    pub(crate) fn func_types(&self) -> Vec<Option<&FuncType>> {
        self.imports
            .iter()
            .filter_map(|import| match import.description {
                ImportDescription::Func(idx) => Some(self.types.get(idx as usize)),
                _ => None,
            })
            .chain(
                self.funcs
                    .iter()
                    .map(|func| self.types.get(func.type_idx as usize)),
            )
            .collect()
    }

    pub(crate) fn imported_mems(&self) -> impl Iterator<Item = MemoryType> + '_ {
        self.imports
            .iter()
            .filter_map(|import| match import.description {
                ImportDescription::Mem(ty) => Some(ty),
                _ => None,
            })
    }

    /// Type of an exported function, if `name` names one.
    pub fn export_func_type(&self, name: &str) -> Option<&FuncType> {
        let export = self.exports.iter().find(|export| export.name == name)?;

        match export.description {
            ExportDescription::FuncIdx(idx) => self.func_types().get(idx as usize).copied()?,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub ty: RefType,
    pub init: Vec<Expr>,
    pub mode: ElemMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElemMode {
    Passive,
    Active { table_idx: u32, offset: Expr },
    Declarative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub mod_name: String,
    pub name: String,
    pub description: ImportDescription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDescription {
    Func(u32),
    Table(TableType),
    Mem(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExportDescription {
    FuncIdx(u32),
    TableIdx(u32),
    MemIdx(u32),
    GlobalIdx(u32),
}

/// An instruction sequence terminated by `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(pub(crate) Arc<[Instruction]>);

impl Expr {
    pub fn instructions(&self) -> &[Instruction] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub description: ExportDescription,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub type_idx: u32,
    pub locals: Vec<ValueType>,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub init: Vec<u8>,
    pub mode: DataMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Passive,
    Active { mem_idx: u32, offset: Expr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSection {
    pub name: String,
    pub contents: Vec<u8>,
}

/// Decodes `bytes` into a [`Module`].
pub fn parse(bytes: &[u8]) -> Result<Module, DecodeError> {
    Module::new(bytes)
}
