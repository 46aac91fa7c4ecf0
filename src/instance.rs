use std::fmt;

use crate::{
    error::{StoreError, Trap},
    host::HostFunc,
    store::{FuncAddr, GlobalAddr, MemAddr, ModuleAddr, TableAddr},
    types::{FuncType, GlobalType, MemoryType, Mutability, TableType},
    value::Value,
    Function,
};

/// Size of one page of linear memory.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Largest number of pages addressable with 32-bit memory offsets.
pub const MAX_PAGES: u32 = 65536;

pub enum FuncInst {
    Local {
        ty: FuncType,
        module: ModuleAddr,
        code: Function,
    },
    Host {
        ty: FuncType,
        func: HostFunc,
    },
}

impl FuncInst {
    pub fn ty(&self) -> &FuncType {
        match self {
            Self::Local { ty, .. } | Self::Host { ty, .. } => ty,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host { .. })
    }
}

impl fmt::Debug for FuncInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { ty, module, .. } => f
                .debug_struct("Local")
                .field("ty", ty)
                .field("module", module)
                .finish_non_exhaustive(),
            Self::Host { ty, .. } => f
                .debug_struct("Host")
                .field("ty", ty)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableInst {
    pub(crate) ty: TableType,
    pub(crate) elem: Vec<Value>,
}

impl TableInst {
    pub fn new(ty: TableType) -> Self {
        Self {
            ty,
            elem: vec![ty.element.null(); ty.limit.min as usize],
        }
    }

    pub fn ty(&self) -> TableType {
        self.ty
    }

    pub fn size(&self) -> u32 {
        self.elem.len() as u32
    }

    pub fn get(&self, idx: u32) -> Result<Value, Trap> {
        self.elem
            .get(idx as usize)
            .copied()
            .ok_or(Trap::TableOutOfBounds)
    }

    pub fn set(&mut self, idx: u32, val: Value) -> Result<(), Trap> {
        if val.ref_type() != Some(self.ty.element) {
            return Err(Trap::InstrTypeMismatch);
        }

        let slot = self
            .elem
            .get_mut(idx as usize)
            .ok_or(Trap::TableOutOfBounds)?;

        *slot = val;

        Ok(())
    }

    /// Appends `n` copies of `init`, returning the previous size, or `None`
    /// if the table would exceed its own maximum or `max_elements`, or the
    /// elements cannot be allocated.
    pub fn grow(&mut self, n: u32, init: Value, max_elements: u32) -> Option<u32> {
        let old = self.size();
        let new = old.checked_add(n)?;

        if new > self.ty.limit.max.unwrap_or(u32::MAX).min(max_elements) {
            return None;
        }

        self.elem.try_reserve_exact(n as usize).ok()?;
        self.elem.resize(new as usize, init);
        self.ty.limit.min = new;

        Some(old)
    }

    pub(crate) fn fill(&mut self, start: u32, val: Value, n: u32) -> Result<(), Trap> {
        let range = checked_range(start, n, self.elem.len()).ok_or(Trap::TableOutOfBounds)?;

        self.elem[range].fill(val);

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemInst {
    pub(crate) ty: MemoryType,
    pub(crate) data: Vec<u8>,
}

impl MemInst {
    pub fn new(ty: MemoryType) -> Self {
        Self {
            ty,
            data: vec![0; ty.limit.min as usize * PAGE_SIZE],
        }
    }

    pub fn ty(&self) -> MemoryType {
        self.ty
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    /// Grows by `n` zeroed pages, returning the previous size in pages. Fails
    /// if the result would exceed the memory's own maximum or `max_pages`, or
    /// if the pages cannot be allocated.
    pub fn grow(&mut self, n: u32, max_pages: u32) -> Option<u32> {
        let old = self.size();
        let new = old.checked_add(n)?;

        let max = self
            .ty
            .limit
            .max
            .unwrap_or(MAX_PAGES)
            .min(max_pages)
            .min(MAX_PAGES);

        if new > max {
            return None;
        }

        self.data.try_reserve_exact(n as usize * PAGE_SIZE).ok()?;
        self.data.resize(new as usize * PAGE_SIZE, 0);
        self.ty.limit.min = new;

        Some(old)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn read(&self, addr: usize, len: usize) -> Result<&[u8], Trap> {
        let end = addr.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        self.data.get(addr..end).ok_or(Trap::MemoryOutOfBounds)
    }

    pub fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<(), Trap> {
        let end = addr.checked_add(bytes.len()).ok_or(Trap::MemoryOutOfBounds)?;

        self.data
            .get_mut(addr..end)
            .ok_or(Trap::MemoryOutOfBounds)?
            .copy_from_slice(bytes);

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GlobalInst {
    pub(crate) ty: GlobalType,
    pub(crate) value: Value,
}

impl GlobalInst {
    pub fn new(ty: GlobalType, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    pub fn get(&self) -> Value {
        self.value
    }

    pub fn set(&mut self, value: Value) -> Result<(), StoreError> {
        if self.ty.mutability == Mutability::Const {
            return Err(StoreError::ImmutableGlobal);
        }

        if value.ty() != self.ty.val_type {
            return Err(StoreError::GlobalTypeMismatch {
                expected: self.ty.val_type,
                found: value.ty(),
            });
        }

        self.value = value;

        Ok(())
    }
}

/// Runtime copy of an element segment for `table.init`. Emptied by
/// `elem.drop`.
#[derive(Debug, Clone)]
pub(crate) struct ElemInst {
    pub(crate) elem: Vec<Value>,
}

/// Runtime copy of a data segment for `memory.init`. Emptied by `data.drop`.
#[derive(Debug, Clone)]
pub(crate) struct DataInst {
    pub(crate) data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternValue {
    Func(FuncAddr),
    Table(TableAddr),
    Mem(MemAddr),
    Global(GlobalAddr),
}

#[derive(Debug, Clone, Default)]
pub struct ModuleInst {
    pub(crate) name: Option<String>,
    pub(crate) types: Vec<FuncType>,
    pub(crate) func_addrs: Vec<FuncAddr>,
    pub(crate) table_addrs: Vec<TableAddr>,
    pub(crate) mem_addrs: Vec<MemAddr>,
    pub(crate) global_addrs: Vec<GlobalAddr>,
    pub(crate) elem_addrs: Vec<usize>,
    pub(crate) data_addrs: Vec<usize>,
    pub(crate) exports: Vec<(String, ExternValue)>,
}

impl ModuleInst {
    /// The name the instance was registered under, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn export(&self, name: &str) -> Option<ExternValue> {
        self.exports
            .iter()
            .find_map(|(export, value)| (export == name).then_some(*value))
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, ExternValue)> + '_ {
        self.exports
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
    }

    pub fn memory(&self, idx: u32) -> Option<MemAddr> {
        self.mem_addrs.get(idx as usize).copied()
    }
}

/// `start..start + len` if it lies within `0..bound`.
pub(crate) fn checked_range(start: u32, len: u32, bound: usize) -> Option<std::ops::Range<usize>> {
    let start = start as usize;
    let end = start.checked_add(len as usize)?;

    (end <= bound).then_some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Limit, RefType, ValueType};

    #[test]
    fn memory_grows_within_limits() {
        let mut mem = MemInst::new(MemoryType::new(Limit::new(1, Some(5))));

        assert_eq!(mem.size(), 1);
        assert_eq!(mem.grow(2, MAX_PAGES), Some(1));
        assert_eq!(mem.size(), 3);
        assert_eq!(mem.grow(3, MAX_PAGES), None);
        assert_eq!(mem.grow(2, MAX_PAGES), Some(3));
        assert_eq!(mem.data().len(), 5 * PAGE_SIZE);
        assert_eq!(mem.grow(0, MAX_PAGES), Some(5));
    }

    #[test]
    fn memory_grow_respects_configured_ceiling() {
        let mut mem = MemInst::new(MemoryType::new(Limit::new(1, None)));

        assert_eq!(mem.grow(3, 2), None);
        assert_eq!(mem.grow(1, 2), Some(1));
        assert_eq!(mem.size(), 2);
    }

    #[test]
    fn memory_bounds() {
        let mut mem = MemInst::new(MemoryType::new(Limit::new(1, None)));

        assert!(mem.write(PAGE_SIZE - 2, &[1, 2]).is_ok());
        assert_eq!(mem.read(PAGE_SIZE - 2, 2), Ok(&[1, 2][..]));
        assert_eq!(mem.write(PAGE_SIZE - 1, &[1, 2]), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.read(usize::MAX, 2), Err(Trap::MemoryOutOfBounds));
    }

    #[test]
    fn table_grow_set_get() {
        let mut table = TableInst::new(TableType::new(
            RefType::FuncRef,
            Limit::new(10, Some(20)),
        ));

        assert_eq!(table.size(), 10);
        assert_eq!(table.grow(5, Value::FuncRef(None), u32::MAX), Some(10));
        assert_eq!(table.size(), 15);
        assert_eq!(table.grow(6, Value::FuncRef(None), u32::MAX), None);

        let func = Value::FuncRef(Some(FuncAddr(7)));
        table.set(3, func).unwrap();
        assert_eq!(table.get(3), Ok(func));
        assert_eq!(table.get(15), Err(Trap::TableOutOfBounds));
        assert_eq!(
            table.set(0, Value::ExternRef(None)),
            Err(Trap::InstrTypeMismatch)
        );
    }

    #[test]
    fn table_grow_respects_configured_ceiling() {
        let mut table = TableInst::new(TableType::new(RefType::FuncRef, Limit::new(0, None)));

        assert_eq!(table.grow(u32::MAX, Value::FuncRef(None), 1000), None);
        assert_eq!(table.size(), 0);
        assert_eq!(table.grow(1000, Value::FuncRef(None), 1000), Some(0));
        assert_eq!(table.grow(1, Value::FuncRef(None), 1000), None);
        assert_eq!(table.size(), 1000);
    }

    #[test]
    fn immutable_global_rejects_set() {
        let mut global = GlobalInst::new(
            GlobalType::new(ValueType::I32, Mutability::Const),
            Value::I32(1),
        );
        assert_eq!(global.set(Value::I32(2)), Err(StoreError::ImmutableGlobal));

        let mut global = GlobalInst::new(
            GlobalType::new(ValueType::I64, Mutability::Var),
            Value::I64(1),
        );
        assert!(global.set(Value::I32(2)).is_err());
        global.set(Value::I64(2)).unwrap();
        assert_eq!(global.get(), Value::I64(2));
    }
}
