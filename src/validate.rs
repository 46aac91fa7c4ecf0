use std::{collections::HashSet, fmt};

use tracing::{debug, trace, warn};

use crate::{
    config::Config,
    error::{types, IndexSpace, ValidationError},
    instance::MAX_PAGES,
    opcode::{Instruction, MemoryOperand},
    types::{
        BlockType, FuncType, GlobalType, Limit, MemoryType, Mutability, RefType, TableType,
        ValueType,
    },
    DataMode, ElemMode, ExportDescription, Expr, Function, ImportDescription, Module,
};

type VResult<T> = Result<T, ValidationError>;

/// An operand type; `None` stands for a type that is unconstrained because
/// the code producing it is unreachable.
type Operand = Option<ValueType>;

/// Checks `module` against the WebAssembly typing rules with the default
/// configuration.
pub fn validate(module: &Module) -> Result<(), ValidationError> {
    Validator::default().validate(module)
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: Config,
}

impl Validator {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn validate(&self, module: &Module) -> Result<(), ValidationError> {
        let result = Context::new(module).and_then(|ctx| ctx.validate());

        match &result {
            Ok(()) => {
                debug!(funcs = module.funcs.len(), "module validated");

                let max = self.config.max_memory_pages;

                if let Some(mem) = module
                    .imported_mems()
                    .chain(module.mems.iter().copied())
                    .find(|mem| mem.limit.min > max)
                {
                    warn!(
                        pages = mem.limit.min,
                        max, "memory exceeds the configured page limit and will not instantiate"
                    );
                }
            }
            Err(err) => debug!(%err, "validation failed"),
        }

        result
    }
}

fn mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> ValidationError {
    ValidationError::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn unknown(space: IndexSpace, index: u32) -> ValidationError {
    ValidationError::UnknownIndex { space, index }
}

fn describe(operands: &[Operand]) -> String {
    let inner = operands
        .iter()
        .map(|op| op.map_or_else(|| "unknown".to_owned(), |ty| ty.to_string()))
        .collect::<Vec<_>>()
        .join(" ");

    format!("[{inner}]")
}

/// Index spaces of the module being validated, imports first.
struct Context<'m> {
    module: &'m Module,
    funcs: Vec<&'m FuncType>,
    tables: Vec<TableType>,
    mems: Vec<MemoryType>,
    globals: Vec<GlobalType>,
    /// Functions that may be referenced by `ref.func` in function bodies.
    refs: HashSet<u32>,
}

impl<'m> Context<'m> {
    fn new(module: &'m Module) -> VResult<Self> {
        let mut ctx = Self {
            module,
            funcs: Vec::new(),
            tables: Vec::new(),
            mems: Vec::new(),
            globals: Vec::new(),
            refs: HashSet::new(),
        };

        for import in &module.imports {
            match import.description {
                ImportDescription::Func(idx) => {
                    let ty = ctx.func_type(idx)?;
                    ctx.funcs.push(ty);
                }
                ImportDescription::Table(ty) => {
                    check_table_type(&ty)?;
                    ctx.tables.push(ty);
                }
                ImportDescription::Mem(ty) => {
                    check_memory_type(&ty)?;
                    ctx.mems.push(ty);
                }
                ImportDescription::Global(ty) => ctx.globals.push(ty),
            }
        }

        for func in &module.funcs {
            let ty = ctx.func_type(func.type_idx)?;
            ctx.funcs.push(ty);
        }

        for ty in &module.tables {
            check_table_type(ty)?;
            ctx.tables.push(*ty);
        }

        for ty in &module.mems {
            check_memory_type(ty)?;
            ctx.mems.push(*ty);
        }

        if ctx.mems.len() > 1 {
            return Err(ValidationError::MultipleMemories);
        }

        ctx.collect_refs();

        Ok(ctx)
    }

    fn func_type(&self, idx: u32) -> VResult<&'m FuncType> {
        self.module
            .types
            .get(idx as usize)
            .ok_or(unknown(IndexSpace::Type, idx))
    }

    fn func(&self, idx: u32) -> VResult<&'m FuncType> {
        self.funcs
            .get(idx as usize)
            .copied()
            .ok_or(unknown(IndexSpace::Function, idx))
    }

    fn table(&self, idx: u32) -> VResult<TableType> {
        self.tables
            .get(idx as usize)
            .copied()
            .ok_or(unknown(IndexSpace::Table, idx))
    }

    fn global(&self, idx: u32) -> VResult<GlobalType> {
        self.globals
            .get(idx as usize)
            .copied()
            .ok_or(unknown(IndexSpace::Global, idx))
    }

    fn elem(&self, idx: u32) -> VResult<RefType> {
        self.module
            .elems
            .get(idx as usize)
            .map(|elem| elem.ty)
            .ok_or(unknown(IndexSpace::Element, idx))
    }

    fn memory(&self, idx: u32) -> VResult<MemoryType> {
        self.mems
            .get(idx as usize)
            .copied()
            .ok_or(unknown(IndexSpace::Memory, idx))
    }

    fn data(&self, idx: u32) -> VResult<()> {
        let count = self
            .module
            .data_count
            .ok_or(ValidationError::DataCountRequired)?;

        if idx >= count {
            return Err(unknown(IndexSpace::Data, idx));
        }

        Ok(())
    }

    fn collect_refs(&mut self) {
        let module = self.module;

        let exprs = module
            .elems
            .iter()
            .flat_map(|elem| elem.init.iter())
            .chain(module.globals.iter().map(|global| &global.init));

        for expr in exprs {
            for inst in expr.instructions() {
                if let Instruction::RefFunc(idx) = inst {
                    self.refs.insert(*idx);
                }
            }
        }

        for export in &module.exports {
            if let ExportDescription::FuncIdx(idx) = export.description {
                self.refs.insert(idx);
            }
        }
    }

    fn validate(mut self) -> VResult<()> {
        let module = self.module;

        for global in &module.globals {
            self.check_const_expr(&global.init, global.global_type.val_type)?;
            self.globals.push(global.global_type);
        }

        for elem in &module.elems {
            for init in &elem.init {
                self.check_const_expr(init, elem.ty.into())?;
            }

            if let ElemMode::Active { table_idx, offset } = &elem.mode {
                let table = self.table(*table_idx)?;

                if table.element != elem.ty {
                    return Err(mismatch(
                        ValueType::from(table.element),
                        ValueType::from(elem.ty),
                    ));
                }

                self.check_const_expr(offset, ValueType::I32)?;
            }
        }

        for data in &module.data {
            if let DataMode::Active { mem_idx, offset } = &data.mode {
                self.memory(*mem_idx)?;
                self.check_const_expr(offset, ValueType::I32)?;
            }
        }

        if let Some(start) = module.start {
            let ty = self.func(start)?;

            if !ty.params().is_empty() || !ty.results().is_empty() {
                return Err(ValidationError::InvalidStartFunction);
            }
        }

        let mut names = HashSet::new();

        for export in &module.exports {
            if !names.insert(export.name.as_str()) {
                return Err(ValidationError::DuplicateExport(export.name.clone()));
            }

            match export.description {
                ExportDescription::FuncIdx(idx) => {
                    self.func(idx)?;
                }
                ExportDescription::TableIdx(idx) => {
                    self.table(idx)?;
                }
                ExportDescription::MemIdx(idx) => {
                    self.memory(idx)?;
                }
                ExportDescription::GlobalIdx(idx) => {
                    self.global(idx)?;
                }
            }
        }

        let imported = self.funcs.len() - module.funcs.len();

        for (i, func) in module.funcs.iter().enumerate() {
            let ty = self.funcs[imported + i];

            trace!(func = imported + i, "validating function body");

            FuncValidator::new(&self, ty, func).validate(&func.expr)?;
        }

        Ok(())
    }

    /// Constant expressions may only use constants, null and function
    /// references, and reads of immutable globals already in scope.
    fn check_const_expr(&self, expr: &Expr, expected: ValueType) -> VResult<()> {
        let mut stack = Vec::new();

        for inst in expr.instructions() {
            let ty = match inst {
                Instruction::i32Const(..) => ValueType::I32,
                Instruction::i64Const(..) => ValueType::I64,
                Instruction::f32Const(..) => ValueType::F32,
                Instruction::f64Const(..) => ValueType::F64,
                Instruction::RefNull(ty) => ValueType::from(*ty),
                Instruction::RefFunc(idx) => {
                    self.func(*idx)?;
                    ValueType::FuncRef
                }
                Instruction::GlobalGet(idx) => {
                    let global = self.global(*idx)?;

                    if global.mutability != Mutability::Const {
                        return Err(ValidationError::ConstantExpressionRequired);
                    }

                    global.val_type
                }
                Instruction::End => break,
                _ => return Err(ValidationError::ConstantExpressionRequired),
            };

            stack.push(ty);
        }

        if stack != [expected] {
            return Err(mismatch(types(&[expected]), types(&stack)));
        }

        Ok(())
    }
}

fn check_limit(limit: &Limit, bound: u32, msg: &'static str) -> VResult<()> {
    if !limit.is_valid() {
        return Err(ValidationError::InvalidLimit(
            "size minimum must not be greater than maximum",
        ));
    }

    if limit.min > bound || limit.max.is_some_and(|max| max > bound) {
        return Err(ValidationError::InvalidLimit(msg));
    }

    Ok(())
}

fn check_table_type(ty: &TableType) -> VResult<()> {
    check_limit(&ty.limit, u32::MAX, "table size must be at most 2^32-1")
}

fn check_memory_type(ty: &MemoryType) -> VResult<()> {
    check_limit(
        &ty.limit,
        MAX_PAGES,
        "memory size must be at most 65536 pages (4GiB)",
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug)]
struct ControlFrame {
    kind: FrameKind,
    params: Vec<ValueType>,
    results: Vec<ValueType>,
    height: usize,
    unreachable: bool,
}

impl ControlFrame {
    fn label_types(&self) -> &[ValueType] {
        if self.kind == FrameKind::Loop {
            &self.params
        } else {
            &self.results
        }
    }
}

struct FuncValidator<'a, 'm> {
    ctx: &'a Context<'m>,
    locals: Vec<ValueType>,
    results: &'m [ValueType],
    operands: Vec<Operand>,
    frames: Vec<ControlFrame>,
}

impl<'a, 'm> FuncValidator<'a, 'm> {
    fn new(ctx: &'a Context<'m>, ty: &'m FuncType, func: &Function) -> Self {
        let mut locals = ty.params().to_vec();
        locals.extend_from_slice(&func.locals);

        Self {
            ctx,
            locals,
            results: ty.results(),
            operands: Vec::new(),
            frames: vec![ControlFrame {
                kind: FrameKind::Function,
                params: Vec::new(),
                results: ty.results().to_vec(),
                height: 0,
                unreachable: false,
            }],
        }
    }

    fn push(&mut self, ty: ValueType) {
        self.operands.push(Some(ty));
    }

    fn push_vals(&mut self, types: &[ValueType]) {
        self.operands.extend(types.iter().copied().map(Some));
    }

    fn frame(&self) -> VResult<&ControlFrame> {
        self.frames.last().ok_or(ValidationError::StackUnderflow)
    }

    fn pop(&mut self) -> VResult<Operand> {
        let frame = self.frame()?;

        if self.operands.len() == frame.height {
            return if frame.unreachable {
                Ok(None)
            } else {
                Err(ValidationError::StackUnderflow)
            };
        }

        Ok(self.operands.pop().flatten())
    }

    fn pop_expect(&mut self, expected: ValueType) -> VResult<Operand> {
        match self.pop()? {
            Some(actual) if actual != expected => Err(mismatch(expected, actual)),
            _ => Ok(Some(expected)),
        }
    }

    fn pop_vals(&mut self, types: &[ValueType]) -> VResult<Vec<Operand>> {
        let mut popped = Vec::with_capacity(types.len());

        for ty in types.iter().rev() {
            popped.push(self.pop_expect(*ty)?);
        }

        popped.reverse();

        Ok(popped)
    }

    fn pop_ref(&mut self) -> VResult<Operand> {
        match self.pop()? {
            Some(ty) if !ty.is_ref() => Err(mismatch("reference", ty)),
            op => Ok(op),
        }
    }

    fn push_ctrl(&mut self, kind: FrameKind, params: Vec<ValueType>, results: Vec<ValueType>) {
        self.push_vals(&params);

        self.frames.push(ControlFrame {
            kind,
            height: self.operands.len() - params.len(),
            params,
            results,
            unreachable: false,
        });
    }

    fn pop_ctrl(&mut self) -> VResult<ControlFrame> {
        let (results, height) = {
            let frame = self.frame()?;
            (frame.results.clone(), frame.height)
        };

        let before = self.operands.get(height..).map(<[_]>::to_vec);

        self.pop_vals(&results)?;

        if self.operands.len() != height {
            return Err(mismatch(
                types(&results),
                describe(&before.unwrap_or_default()),
            ));
        }

        self.frames.pop().ok_or(ValidationError::StackUnderflow)
    }

    fn set_unreachable(&mut self) -> VResult<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(ValidationError::StackUnderflow)?;

        self.operands.truncate(frame.height);
        frame.unreachable = true;

        Ok(())
    }

    fn label_types(&self, depth: u32) -> VResult<Vec<ValueType>> {
        let idx = self
            .frames
            .len()
            .checked_sub(depth as usize + 1)
            .ok_or(ValidationError::UnknownLabel(depth))?;

        Ok(self.frames[idx].label_types().to_vec())
    }

    fn block_type(&self, ty: BlockType) -> VResult<(Vec<ValueType>, Vec<ValueType>)> {
        Ok(match ty {
            BlockType::Empty => (Vec::new(), Vec::new()),
            BlockType::ValType(ty) => (Vec::new(), vec![ty]),
            BlockType::TypeIndex(idx) => {
                let ty = self.ctx.func_type(idx)?;
                (ty.params().to_vec(), ty.results().to_vec())
            }
        })
    }

    fn local(&self, idx: u32) -> VResult<ValueType> {
        self.locals
            .get(idx as usize)
            .copied()
            .ok_or(unknown(IndexSpace::Local, idx))
    }

    fn unop(&mut self, ty: ValueType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.push(ty);
        Ok(())
    }

    fn binop(&mut self, ty: ValueType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(ty);
        Ok(())
    }

    fn testop(&mut self, ty: ValueType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.push(ValueType::I32);
        Ok(())
    }

    fn relop(&mut self, ty: ValueType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(ValueType::I32);
        Ok(())
    }

    fn cvtop(&mut self, from: ValueType, to: ValueType) -> VResult<()> {
        self.pop_expect(from)?;
        self.push(to);
        Ok(())
    }

    fn load(&mut self, memarg: MemoryOperand, bytes: u32, ty: ValueType) -> VResult<()> {
        self.check_memarg(memarg, bytes)?;
        self.pop_expect(ValueType::I32)?;
        self.push(ty);
        Ok(())
    }

    fn store(&mut self, memarg: MemoryOperand, bytes: u32, ty: ValueType) -> VResult<()> {
        self.check_memarg(memarg, bytes)?;
        self.pop_expect(ty)?;
        self.pop_expect(ValueType::I32)?;
        Ok(())
    }

    fn check_memarg(&self, memarg: MemoryOperand, bytes: u32) -> VResult<()> {
        self.ctx.memory(0)?;

        if memarg.align >= 32 || 1u32 << memarg.align > bytes {
            return Err(ValidationError::InvalidAlignment);
        }

        Ok(())
    }

    fn pop_i32s(&mut self, n: usize) -> VResult<()> {
        for _ in 0..n {
            self.pop_expect(ValueType::I32)?;
        }

        Ok(())
    }

    fn validate(mut self, expr: &Expr) -> VResult<()> {
        use ValueType::{F32, F64, I32, I64};

        for inst in expr.instructions() {
            if self.frames.is_empty() {
                // trailing instructions after the function's final `end`
                return Err(ValidationError::InvalidResultArity);
            }

            match inst {
                Instruction::Unreachable => self.set_unreachable()?,
                Instruction::Nop => {}
                Instruction::Block(label) | Instruction::Loop(label) => {
                    let (params, results) = self.block_type(label.block_type)?;
                    self.pop_vals(&params)?;

                    let kind = if matches!(inst, Instruction::Loop(..)) {
                        FrameKind::Loop
                    } else {
                        FrameKind::Block
                    };

                    self.push_ctrl(kind, params, results);
                }
                Instruction::If(label) => {
                    let (params, results) = self.block_type(label.block_type)?;
                    self.pop_expect(I32)?;
                    self.pop_vals(&params)?;
                    self.push_ctrl(FrameKind::If, params, results);
                }
                Instruction::Else(..) => {
                    let frame = self.pop_ctrl()?;

                    if frame.kind != FrameKind::If {
                        return Err(mismatch("if", "else"));
                    }

                    self.push_ctrl(FrameKind::Else, frame.params, frame.results);
                }
                Instruction::End => {
                    let frame = self.pop_ctrl()?;

                    // an `if` without `else` behaves as if the missing branch
                    // passes its parameters through
                    if frame.kind == FrameKind::If && frame.params != frame.results {
                        return Err(mismatch(types(&frame.results), types(&frame.params)));
                    }

                    if frame.kind != FrameKind::Function {
                        self.push_vals(&frame.results);
                    }
                }
                Instruction::Branch(depth) => {
                    let types = self.label_types(*depth)?;
                    self.pop_vals(&types)?;
                    self.set_unreachable()?;
                }
                Instruction::BranchIf(depth) => {
                    self.pop_expect(I32)?;
                    let types = self.label_types(*depth)?;
                    self.pop_vals(&types)?;
                    self.push_vals(&types);
                }
                Instruction::BranchTable(depths, default) => {
                    self.pop_expect(I32)?;

                    let default_types = self.label_types(*default)?;

                    for depth in depths.iter() {
                        let types = self.label_types(*depth)?;

                        if types.len() != default_types.len() {
                            return Err(mismatch(
                                crate::error::types(&default_types),
                                crate::error::types(&types),
                            ));
                        }

                        let popped = self.pop_vals(&types)?;
                        self.operands.extend(popped);
                    }

                    self.pop_vals(&default_types)?;
                    self.set_unreachable()?;
                }
                Instruction::Return => {
                    self.pop_vals(self.results)?;
                    self.set_unreachable()?;
                }
                Instruction::Call(idx) => {
                    let ty = self.ctx.func(*idx)?;
                    self.pop_vals(ty.params())?;
                    self.push_vals(ty.results());
                }
                Instruction::CallIndirect(type_idx, table_idx) => {
                    let table = self.ctx.table(*table_idx)?;

                    if table.element != RefType::FuncRef {
                        return Err(mismatch(
                            ValueType::FuncRef,
                            ValueType::from(table.element),
                        ));
                    }

                    let ty = self.ctx.func_type(*type_idx)?;
                    self.pop_expect(I32)?;
                    self.pop_vals(ty.params())?;
                    self.push_vals(ty.results());
                }

                Instruction::Drop => {
                    self.pop()?;
                }
                Instruction::Select => {
                    self.pop_expect(I32)?;
                    let a = self.pop()?;
                    let b = self.pop()?;

                    for ty in [a, b].into_iter().flatten() {
                        if ty.is_ref() {
                            return Err(mismatch("numeric type", ty));
                        }
                    }

                    match (a, b) {
                        (Some(a), Some(b)) if a != b => return Err(mismatch(a, b)),
                        (None, op) | (op, None) => self.operands.push(op),
                        (op, _) => self.operands.push(op),
                    }
                }
                Instruction::SelectT(types) => {
                    let [ty] = **types else {
                        return Err(ValidationError::InvalidResultArity);
                    };

                    self.pop_expect(I32)?;
                    self.pop_expect(ty)?;
                    self.pop_expect(ty)?;
                    self.push(ty);
                }

                Instruction::LocalGet(idx) => {
                    let ty = self.local(*idx)?;
                    self.push(ty);
                }
                Instruction::LocalSet(idx) => {
                    let ty = self.local(*idx)?;
                    self.pop_expect(ty)?;
                }
                Instruction::LocalTee(idx) => {
                    let ty = self.local(*idx)?;
                    self.pop_expect(ty)?;
                    self.push(ty);
                }
                Instruction::GlobalGet(idx) => {
                    let global = self.ctx.global(*idx)?;
                    self.push(global.val_type);
                }
                Instruction::GlobalSet(idx) => {
                    let global = self.ctx.global(*idx)?;

                    if global.mutability != Mutability::Var {
                        return Err(ValidationError::ImmutableGlobal(*idx));
                    }

                    self.pop_expect(global.val_type)?;
                }

                Instruction::TableGet(idx) => {
                    let table = self.ctx.table(*idx)?;
                    self.pop_expect(I32)?;
                    self.push(table.element.into());
                }
                Instruction::TableSet(idx) => {
                    let table = self.ctx.table(*idx)?;
                    self.pop_expect(table.element.into())?;
                    self.pop_expect(I32)?;
                }
                Instruction::TableInit(elem_idx, table_idx) => {
                    let table = self.ctx.table(*table_idx)?;
                    let elem = self.ctx.elem(*elem_idx)?;

                    if table.element != elem {
                        return Err(mismatch(
                            ValueType::from(table.element),
                            ValueType::from(elem),
                        ));
                    }

                    self.pop_i32s(3)?;
                }
                Instruction::ElemDrop(idx) => {
                    self.ctx.elem(*idx)?;
                }
                Instruction::TableCopy(dst, src) => {
                    let dst = self.ctx.table(*dst)?;
                    let src = self.ctx.table(*src)?;

                    if dst.element != src.element {
                        return Err(mismatch(
                            ValueType::from(dst.element),
                            ValueType::from(src.element),
                        ));
                    }

                    self.pop_i32s(3)?;
                }
                Instruction::TableGrow(idx) => {
                    let table = self.ctx.table(*idx)?;
                    self.pop_expect(I32)?;
                    self.pop_expect(table.element.into())?;
                    self.push(I32);
                }
                Instruction::TableSize(idx) => {
                    self.ctx.table(*idx)?;
                    self.push(I32);
                }
                Instruction::TableFill(idx) => {
                    let table = self.ctx.table(*idx)?;
                    self.pop_expect(I32)?;
                    self.pop_expect(table.element.into())?;
                    self.pop_expect(I32)?;
                }

                Instruction::i32Load(m) => self.load(*m, 4, I32)?,
                Instruction::i64Load(m) => self.load(*m, 8, I64)?,
                Instruction::f32Load(m) => self.load(*m, 4, F32)?,
                Instruction::f64Load(m) => self.load(*m, 8, F64)?,
                Instruction::i32Load8Signed(m) | Instruction::i32Load8Unsigned(m) => {
                    self.load(*m, 1, I32)?
                }
                Instruction::i32Load16Signed(m) | Instruction::i32Load16Unsigned(m) => {
                    self.load(*m, 2, I32)?
                }
                Instruction::i64Load8Signed(m) | Instruction::i64Load8Unsigned(m) => {
                    self.load(*m, 1, I64)?
                }
                Instruction::i64Load16Signed(m) | Instruction::i64Load16Unsigned(m) => {
                    self.load(*m, 2, I64)?
                }
                Instruction::i64Load32Signed(m) | Instruction::i64Load32Unsigned(m) => {
                    self.load(*m, 4, I64)?
                }
                Instruction::i32Store(m) => self.store(*m, 4, I32)?,
                Instruction::i64Store(m) => self.store(*m, 8, I64)?,
                Instruction::f32Store(m) => self.store(*m, 4, F32)?,
                Instruction::f64Store(m) => self.store(*m, 8, F64)?,
                Instruction::i32Store8(m) => self.store(*m, 1, I32)?,
                Instruction::i32Store16(m) => self.store(*m, 2, I32)?,
                Instruction::i64Store8(m) => self.store(*m, 1, I64)?,
                Instruction::i64Store16(m) => self.store(*m, 2, I64)?,
                Instruction::i64Store32(m) => self.store(*m, 4, I64)?,
                Instruction::MemorySize => {
                    self.ctx.memory(0)?;
                    self.push(I32);
                }
                Instruction::MemoryGrow => {
                    self.ctx.memory(0)?;
                    self.unop(I32)?;
                }
                Instruction::MemoryInit(idx) => {
                    self.ctx.memory(0)?;
                    self.ctx.data(*idx)?;
                    self.pop_i32s(3)?;
                }
                Instruction::DataDrop(idx) => self.ctx.data(*idx)?,
                Instruction::MemoryCopy | Instruction::MemoryFill => {
                    self.ctx.memory(0)?;
                    self.pop_i32s(3)?;
                }

                Instruction::i32Const(..) => self.push(I32),
                Instruction::i64Const(..) => self.push(I64),
                Instruction::f32Const(..) => self.push(F32),
                Instruction::f64Const(..) => self.push(F64),

                Instruction::i32EqZero => self.testop(I32)?,
                Instruction::i64EqZero => self.testop(I64)?,

                Instruction::i32Eq
                | Instruction::i32Ne
                | Instruction::i32LtSigned
                | Instruction::i32LtUnsigned
                | Instruction::i32GtSigned
                | Instruction::i32GtUnsigned
                | Instruction::i32LeSigned
                | Instruction::i32LeUnsigned
                | Instruction::i32GeSigned
                | Instruction::i32GeUnsigned => self.relop(I32)?,

                Instruction::i64Eq
                | Instruction::i64Ne
                | Instruction::i64LtSigned
                | Instruction::i64LtUnsigned
                | Instruction::i64GtSigned
                | Instruction::i64GtUnsigned
                | Instruction::i64LeSigned
                | Instruction::i64LeUnsigned
                | Instruction::i64GeSigned
                | Instruction::i64GeUnsigned => self.relop(I64)?,

                Instruction::f32Eq
                | Instruction::f32Ne
                | Instruction::f32Lt
                | Instruction::f32Gt
                | Instruction::f32Le
                | Instruction::f32Ge => self.relop(F32)?,

                Instruction::f64Eq
                | Instruction::f64Ne
                | Instruction::f64Lt
                | Instruction::f64Gt
                | Instruction::f64Le
                | Instruction::f64Ge => self.relop(F64)?,

                Instruction::i32CountLeadingZeros
                | Instruction::i32CountTrailingZeros
                | Instruction::i32PopulationCount
                | Instruction::i32Extend8Signed
                | Instruction::i32Extend16Signed => self.unop(I32)?,

                Instruction::i64CountLeadingZeros
                | Instruction::i64CountTrailingZeros
                | Instruction::i64PopulationCount
                | Instruction::i64Extend8Signed
                | Instruction::i64Extend16Signed
                | Instruction::i64Extend32Signed => self.unop(I64)?,

                Instruction::i32Add
                | Instruction::i32Sub
                | Instruction::i32Mul
                | Instruction::i32SignedDiv
                | Instruction::i32UnsignedDiv
                | Instruction::i32SignedRem
                | Instruction::i32UnsignedRem
                | Instruction::i32BitwiseAnd
                | Instruction::i32BitwiseOr
                | Instruction::i32BitwiseXor
                | Instruction::i32BitwiseShiftLeft
                | Instruction::i32SignedBitwiseShiftRight
                | Instruction::i32UnsignedBitwiseShiftRight
                | Instruction::i32RotateLeft
                | Instruction::i32RotateRight => self.binop(I32)?,

                Instruction::i64Add
                | Instruction::i64Sub
                | Instruction::i64Mul
                | Instruction::i64SignedDiv
                | Instruction::i64UnsignedDiv
                | Instruction::i64SignedRem
                | Instruction::i64UnsignedRem
                | Instruction::i64BitwiseAnd
                | Instruction::i64BitwiseOr
                | Instruction::i64BitwiseXor
                | Instruction::i64BitwiseShiftLeft
                | Instruction::i64SignedBitwiseShiftRight
                | Instruction::i64UnsignedBitwiseShiftRight
                | Instruction::i64RotateLeft
                | Instruction::i64RotateRight => self.binop(I64)?,

                Instruction::f32Abs
                | Instruction::f32Neg
                | Instruction::f32Ceil
                | Instruction::f32Floor
                | Instruction::f32Trunc
                | Instruction::f32Nearest
                | Instruction::f32Sqrt => self.unop(F32)?,

                Instruction::f32Add
                | Instruction::f32Sub
                | Instruction::f32Mul
                | Instruction::f32Div
                | Instruction::f32Min
                | Instruction::f32Max
                | Instruction::f32CopySign => self.binop(F32)?,

                Instruction::f64Abs
                | Instruction::f64Neg
                | Instruction::f64Ceil
                | Instruction::f64Floor
                | Instruction::f64Trunc
                | Instruction::f64Nearest
                | Instruction::f64Sqrt => self.unop(F64)?,

                Instruction::f64Add
                | Instruction::f64Sub
                | Instruction::f64Mul
                | Instruction::f64Div
                | Instruction::f64Min
                | Instruction::f64Max
                | Instruction::f64CopySign => self.binop(F64)?,

                Instruction::i32WrapI64 => self.cvtop(I64, I32)?,
                Instruction::i32TruncF32Signed
                | Instruction::i32TruncF32Unsigned
                | Instruction::i32TruncSatf32Signed
                | Instruction::i32TruncSatf32Unsigned
                | Instruction::i32ReinterpretF32 => self.cvtop(F32, I32)?,
                Instruction::i32TruncF64Signed
                | Instruction::i32TruncF64Unsigned
                | Instruction::i32TruncSatf64Signed
                | Instruction::i32TruncSatf64Unsigned => self.cvtop(F64, I32)?,
                Instruction::i64Extendi32Signed | Instruction::i64Extendi32Unsigned => {
                    self.cvtop(I32, I64)?
                }
                Instruction::i64TruncF32Signed
                | Instruction::i64TruncF32Unsigned
                | Instruction::i64TruncSatf32Signed
                | Instruction::i64TruncSatf32Unsigned => self.cvtop(F32, I64)?,
                Instruction::i64TruncF64Signed
                | Instruction::i64TruncF64Unsigned
                | Instruction::i64TruncSatf64Signed
                | Instruction::i64TruncSatf64Unsigned
                | Instruction::i64ReinterpretF64 => self.cvtop(F64, I64)?,
                Instruction::f32SignedConvertI32
                | Instruction::f32UnsignedConvertI32
                | Instruction::f32ReinterpretI32 => self.cvtop(I32, F32)?,
                Instruction::f32SignedConvertI64 | Instruction::f32UnsignedConvertI64 => {
                    self.cvtop(I64, F32)?
                }
                Instruction::f32DemoteF64 => self.cvtop(F64, F32)?,
                Instruction::f64SignedConvertI32 | Instruction::f64UnsignedConvertI32 => {
                    self.cvtop(I32, F64)?
                }
                Instruction::f64SignedConvertI64
                | Instruction::f64UnsignedConvertI64
                | Instruction::f64ReinterpretI64 => self.cvtop(I64, F64)?,
                Instruction::f64PromoteF32 => self.cvtop(F32, F64)?,

                Instruction::RefNull(ty) => self.push((*ty).into()),
                Instruction::RefIsNull => {
                    self.pop_ref()?;
                    self.push(I32);
                }
                Instruction::RefFunc(idx) => {
                    self.ctx.func(*idx)?;

                    if !self.ctx.refs.contains(idx) {
                        return Err(ValidationError::UndeclaredFunctionReference(*idx));
                    }

                    self.push(ValueType::FuncRef);
                }
            }
        }

        if !self.frames.is_empty() {
            return Err(ValidationError::InvalidResultArity);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(wat: &str) -> VResult<()> {
        let bytes = wat::parse_str(wat).unwrap();
        validate(&Module::new(&bytes).unwrap())
    }

    #[test]
    fn accepts_well_typed_function() {
        check(
            r#"(module
                (func (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        )
        .unwrap();
    }

    #[test]
    fn rejects_operand_type_mismatch() {
        assert!(matches!(
            check(r#"(module (func (result i32) i64.const 1))"#),
            Err(ValidationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_underflow() {
        assert_eq!(
            check(r#"(module (func (result i32) i32.add))"#),
            Err(ValidationError::StackUnderflow)
        );
    }

    #[test]
    fn unreachable_code_is_polymorphic() {
        check(r#"(module (func (result i32) unreachable i32.add))"#).unwrap();
        check(r#"(module (func (result i64) (block (br 1)) i64.const 0))"#).unwrap_err();
        check(r#"(module (func (result f32) return))"#).unwrap_err();
        check(r#"(module (func (result f32) f32.const 0 return))"#).unwrap();
    }

    #[test]
    fn rejects_unknown_label_and_index() {
        assert_eq!(
            check(r#"(module (func br 1))"#),
            Err(ValidationError::UnknownLabel(1))
        );
        assert_eq!(
            check(r#"(module (func call 3))"#),
            Err(ValidationError::UnknownIndex {
                space: IndexSpace::Function,
                index: 3
            })
        );
    }

    #[test]
    fn rejects_bad_limits() {
        assert!(matches!(
            check(r#"(module (memory 2 1))"#),
            Err(ValidationError::InvalidLimit(..))
        ));
    }

    #[test]
    fn rejects_immutable_global_set() {
        assert_eq!(
            check(r#"(module (global i32 (i32.const 0)) (func i32.const 1 global.set 0))"#),
            Err(ValidationError::ImmutableGlobal(0))
        );
    }

    #[test]
    fn rejects_duplicate_export() {
        assert_eq!(
            check(r#"(module (func) (export "a" (func 0)) (export "a" (func 0)))"#),
            Err(ValidationError::DuplicateExport("a".to_owned()))
        );
    }

    #[test]
    fn rejects_non_constant_initializer() {
        assert_eq!(
            check(r#"(module (global i32 (i32.add (i32.const 1) (i32.const 2))))"#),
            Err(ValidationError::ConstantExpressionRequired)
        );
    }

    #[test]
    fn start_function_must_be_nullary() {
        assert_eq!(
            check(r#"(module (func (param i32)) (start 0))"#),
            Err(ValidationError::InvalidStartFunction)
        );
    }

    #[test]
    fn alignment_bounded_by_access_width() {
        assert_eq!(
            check(r#"(module (memory 1) (func i32.const 0 i32.load align=8 drop))"#),
            Err(ValidationError::InvalidAlignment)
        );
    }

    #[test]
    fn ref_func_requires_declaration() {
        assert_eq!(
            check(r#"(module (func (result funcref) ref.func 0))"#),
            Err(ValidationError::UndeclaredFunctionReference(0))
        );
        check(r#"(module (func (result funcref) ref.func 0) (elem declare func 0))"#).unwrap();
    }

    #[test]
    fn block_results_checked() {
        check(r#"(module (func (result i32) (block (result i32) i32.const 1)))"#).unwrap();
        assert!(check(r#"(module (func (block (result i32) i64.const 1) drop))"#).is_err());
        assert!(check(
            r#"(module (func (result i32) (if (result i32) (i32.const 1) (then i32.const 1))))"#
        )
        .is_err());
    }
}
