use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    error::{DecodeError, DecodeResult, MalformedReason},
    opcode::{BlockLabel, Instruction, MemoryOperand},
    section::{
        CodeSection, DataSection, ElementSection, ExportSection, FunctionSection, GlobalSection,
        ImportSection, MemorySection, Section, TableSection, TypeSection,
    },
    types::{
        BlockType, FuncType, GlobalType, Limit, MemoryType, Mutability, RefType, TableType,
        ValueType,
    },
    CustomSection, DataMode, DataSegment, ElemMode, Element, Export, ExportDescription, Expr,
    Function, Global, Import, ImportDescription, Module,
};

const MAGIC: &[u8] = b"\0asm";
const VERSION: &[u8] = &[1, 0, 0, 0];

/// Upper bound on the declared locals of one function body.
const MAX_LOCALS: u64 = 50_000;

/// Upper bound on the capacity reserved up front for a length-prefixed
/// vector; longer vectors still decode, they just grow as they go.
const MAX_PREALLOCATION: usize = 1024;

#[derive(Debug)]
pub(crate) struct FunctionBody {
    locals: Vec<ValueType>,
    expr: Expr,
}

pub(crate) struct ModuleParser<'a> {
    cursor: usize,
    /// Reads past this position fail with `UnexpectedEof`; narrowed while
    /// decoding a section or function body.
    end: usize,
    buffer: &'a [u8],
}

impl<'a> ModuleParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            cursor: 0,
            end: buffer.len(),
        }
    }

    pub fn parse(mut self) -> DecodeResult<Module> {
        self.expect_magic()?;
        self.expect_version()?;

        let mut module = Module::default();
        let mut type_idxs = None;
        let mut bodies = None;
        let mut last_order = 0;

        while self.buffer.len() > self.cursor {
            let id = self.next_byte()?;
            let size = self.read_u32()?;
            let start = self.cursor;
            let end = start
                .checked_add(size as usize)
                .filter(|end| *end <= self.buffer.len())
                .ok_or_else(|| self.malformed(MalformedReason::UnexpectedEof))?;

            if let Some(order) = Section::order(id) {
                if order == last_order {
                    return Err(self.malformed(MalformedReason::DuplicateSection { id }));
                }

                if order < last_order {
                    return Err(self.malformed(MalformedReason::InvalidSectionOrder { id }));
                }

                last_order = order;
            }

            trace!(id, size, offset = start, "decoding section");

            self.end = end;
            let section = self.parse_section(id, size)?;

            if self.cursor != end {
                return Err(DecodeError::Malformed {
                    offset: start,
                    reason: MalformedReason::SectionSizeMismatch {
                        declared: size,
                        consumed: self.cursor - start,
                    },
                });
            }

            self.end = self.buffer.len();

            match section {
                Section::Custom(custom) => module.customs.push(custom),
                Section::Type(ty) => module.types = ty.fn_types,
                Section::Import(import) => module.imports = import.imports,
                Section::Function(function) => type_idxs = Some(function.type_idxs),
                Section::Table(table) => module.tables = table.table_types,
                Section::Memory(memory) => module.mems = memory.mem_types,
                Section::Global(global) => module.globals = global.globals,
                Section::Export(export) => module.exports = export.exports,
                Section::Start(idx) => module.start = Some(idx),
                Section::Element(element) => module.elems = element.element_segments,
                Section::DataCount(count) => module.data_count = Some(count),
                Section::Code(code) => bodies = Some(code.bodies),
                Section::Data(data) => module.data = data.data_segments,
                Section::Unknown(id) => debug!(id, size, "skipped unknown section"),
            }
        }

        let type_idxs = type_idxs.unwrap_or_default();
        let bodies = bodies.unwrap_or_default();

        if type_idxs.len() != bodies.len() {
            return Err(self.malformed(MalformedReason::FunctionCodeMismatch));
        }

        if let Some(count) = module.data_count {
            if count as usize != module.data.len() {
                return Err(self.malformed(MalformedReason::DataCountMismatch));
            }
        }

        module.funcs = type_idxs
            .into_iter()
            .zip(bodies)
            .map(|(type_idx, body)| Function {
                type_idx,
                locals: body.locals,
                expr: body.expr,
            })
            .collect();

        debug!(
            types = module.types.len(),
            imports = module.imports.len(),
            funcs = module.funcs.len(),
            exports = module.exports.len(),
            "decoded module"
        );

        Ok(module)
    }

    fn malformed(&self, reason: MalformedReason) -> DecodeError {
        DecodeError::Malformed {
            offset: self.cursor,
            reason,
        }
    }

    fn expect_magic(&mut self) -> DecodeResult<()> {
        match self.read_range(4) {
            Ok(magic) if magic == MAGIC => Ok(()),
            _ => Err(DecodeError::BadMagic),
        }
    }

    fn expect_version(&mut self) -> DecodeResult<()> {
        match self.read_range(4) {
            Ok(version) if version == VERSION => Ok(()),
            _ => Err(DecodeError::BadVersion),
        }
    }

    fn expect_byte(&mut self, expected: u8) -> DecodeResult<()> {
        let found = self.next_byte()?;

        if found != expected {
            return Err(self.malformed(MalformedReason::ExpectedByte { expected, found }));
        }

        Ok(())
    }

    fn expect_zero_byte(&mut self) -> DecodeResult<()> {
        if self.next_byte()? != 0 {
            return Err(self.malformed(MalformedReason::ZeroByteExpected));
        }

        Ok(())
    }

    fn peek_byte(&self) -> DecodeResult<u8> {
        if self.cursor >= self.end {
            return Err(self.malformed(MalformedReason::UnexpectedEof));
        }

        Ok(self.buffer[self.cursor])
    }

    fn next_byte(&mut self) -> DecodeResult<u8> {
        let byte = self.peek_byte()?;
        self.cursor += 1;
        Ok(byte)
    }

    fn read_range(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        let start = self.cursor;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.end)
            .ok_or_else(|| self.malformed(MalformedReason::UnexpectedEof))?;

        self.cursor = end;

        Ok(&self.buffer[start..end])
    }

    /// Unsigned LEB128 of at most `bits` significant bits.
    fn read_unsigned(&mut self, bits: u32) -> DecodeResult<u64> {
        let max_bytes = bits.div_ceil(7);
        let mut result: u64 = 0;
        let mut shift = 0;

        for i in 0..max_bytes {
            let byte = self.next_byte()?;
            let low = u64::from(byte & 0b0111_1111);
            let high = byte & 0b1000_0000;

            if i == max_bytes - 1 {
                if high != 0 {
                    return Err(self.malformed(MalformedReason::IntegerTooLong));
                }

                let remaining = bits - shift;

                if remaining < 7 && low >> remaining != 0 {
                    return Err(self.malformed(MalformedReason::IntegerTooLarge));
                }
            }

            result |= low << shift;

            if high == 0 {
                break;
            }

            shift += 7;
        }

        Ok(result)
    }

    /// Signed LEB128 of at most `bits` significant bits.
    fn read_signed(&mut self, bits: u32) -> DecodeResult<i64> {
        let max_bytes = bits.div_ceil(7);
        let mut result: i64 = 0;
        let mut shift = 0;
        let mut byte = 0;

        for i in 0..max_bytes {
            byte = self.next_byte()?;
            let low = i64::from(byte & 0b0111_1111);
            let high = byte & 0b1000_0000;

            if i == max_bytes - 1 {
                if high != 0 {
                    return Err(self.malformed(MalformedReason::IntegerTooLong));
                }

                let remaining = bits - shift;

                if remaining < 7 {
                    // unused bits must all repeat the sign bit
                    let sign_bits = low >> (remaining - 1);

                    if sign_bits != 0 && sign_bits != 0x7f >> (remaining - 1) {
                        return Err(self.malformed(MalformedReason::IntegerTooLarge));
                    }
                }
            }

            result |= low << shift;
            shift += 7;

            if high == 0 {
                break;
            }
        }

        if shift < i64::BITS && (byte & 0x40) != 0 {
            result |= !0 << shift;
        }

        Ok(result)
    }

    fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(self.read_unsigned(32)? as u32)
    }

    fn read_i32(&mut self) -> DecodeResult<i32> {
        Ok(self.read_signed(32)? as i32)
    }

    fn read_i64(&mut self) -> DecodeResult<i64> {
        self.read_signed(64)
    }

    fn read_f32(&mut self) -> DecodeResult<f32> {
        let bytes = self.read_range(4)?;
        Ok(f32::from_bits(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }

    fn read_f64(&mut self) -> DecodeResult<f64> {
        let mut buf = [0; 8];
        buf.copy_from_slice(self.read_range(8)?);
        Ok(f64::from_bits(u64::from_le_bytes(buf)))
    }

    fn parse_section(&mut self, id: u8, size: u32) -> DecodeResult<Section> {
        Ok(match id {
            0 => Section::Custom(self.parse_custom_section()?),
            1 => Section::Type(self.parse_type_section()?),
            2 => Section::Import(self.parse_import_section()?),
            3 => Section::Function(self.parse_function_section()?),
            4 => Section::Table(self.parse_table_section()?),
            5 => Section::Memory(self.parse_memory_section()?),
            6 => Section::Global(self.parse_global_section()?),
            7 => Section::Export(self.parse_export_section()?),
            8 => Section::Start(self.read_u32()?),
            9 => Section::Element(self.parse_element_section()?),
            10 => Section::Code(self.parse_code_section()?),
            11 => Section::Data(self.parse_data_section()?),
            12 => Section::DataCount(self.read_u32()?),
            id => {
                self.read_range(size as usize)?;
                Section::Unknown(id)
            }
        })
    }

    fn parse_custom_section(&mut self) -> DecodeResult<CustomSection> {
        let name = self.parse_name()?;
        let contents = self.read_range(self.end - self.cursor)?.to_vec();

        Ok(CustomSection { name, contents })
    }

    fn parse_vec<T>(&mut self, parse: impl Fn(&mut Self) -> DecodeResult<T>) -> DecodeResult<Vec<T>> {
        let len = self.read_u32()?;

        let mut elems = Vec::with_capacity((len as usize).min(MAX_PREALLOCATION));

        for _ in 0..len {
            elems.push(parse(self)?);
        }

        Ok(elems)
    }

    fn parse_type_section(&mut self) -> DecodeResult<TypeSection> {
        let fn_types = self.parse_vec(Self::parse_func_type)?;
        Ok(TypeSection { fn_types })
    }

    fn parse_import_section(&mut self) -> DecodeResult<ImportSection> {
        let imports = self.parse_vec(Self::parse_import)?;
        Ok(ImportSection { imports })
    }

    fn parse_function_section(&mut self) -> DecodeResult<FunctionSection> {
        let type_idxs = self.parse_vec(Self::read_u32)?;
        Ok(FunctionSection { type_idxs })
    }

    fn parse_table_section(&mut self) -> DecodeResult<TableSection> {
        let table_types = self.parse_vec(Self::parse_table_type)?;
        Ok(TableSection { table_types })
    }

    fn parse_memory_section(&mut self) -> DecodeResult<MemorySection> {
        let mem_types = self.parse_vec(Self::parse_mem_type)?;
        Ok(MemorySection { mem_types })
    }

    fn parse_global_section(&mut self) -> DecodeResult<GlobalSection> {
        let globals = self.parse_vec(Self::parse_global)?;
        Ok(GlobalSection { globals })
    }

    fn parse_export_section(&mut self) -> DecodeResult<ExportSection> {
        let exports = self.parse_vec(Self::parse_export)?;
        Ok(ExportSection { exports })
    }

    fn parse_element_section(&mut self) -> DecodeResult<ElementSection> {
        let element_segments = self.parse_vec(Self::parse_element_segment)?;
        Ok(ElementSection { element_segments })
    }

    fn parse_code_section(&mut self) -> DecodeResult<CodeSection> {
        let bodies = self.parse_vec(Self::parse_function_body)?;
        Ok(CodeSection { bodies })
    }

    fn parse_data_section(&mut self) -> DecodeResult<DataSection> {
        let data_segments = self.parse_vec(Self::parse_data_segment)?;
        Ok(DataSection { data_segments })
    }

    fn func_idx_expr(idx: u32) -> Expr {
        Expr(Arc::from(vec![Instruction::RefFunc(idx), Instruction::End]))
    }

    fn parse_func_idx_init(&mut self) -> DecodeResult<Vec<Expr>> {
        Ok(self
            .parse_vec(Self::read_u32)?
            .into_iter()
            .map(Self::func_idx_expr)
            .collect())
    }

    fn parse_elem_kind(&mut self) -> DecodeResult<RefType> {
        self.expect_byte(0x00)?;
        Ok(RefType::FuncRef)
    }

    fn parse_element_segment(&mut self) -> DecodeResult<Element> {
        let kind = self.read_u32()?;

        let (ty, init, mode) = match kind {
            0 => {
                let offset = self.parse_expr()?;
                let init = self.parse_func_idx_init()?;
                let mode = ElemMode::Active {
                    table_idx: 0,
                    offset,
                };
                (RefType::FuncRef, init, mode)
            }
            1 => {
                let ty = self.parse_elem_kind()?;
                (ty, self.parse_func_idx_init()?, ElemMode::Passive)
            }
            2 => {
                let table_idx = self.read_u32()?;
                let offset = self.parse_expr()?;
                let ty = self.parse_elem_kind()?;
                let init = self.parse_func_idx_init()?;
                (ty, init, ElemMode::Active { table_idx, offset })
            }
            3 => {
                let ty = self.parse_elem_kind()?;
                (ty, self.parse_func_idx_init()?, ElemMode::Declarative)
            }
            4 => {
                let offset = self.parse_expr()?;
                let init = self.parse_vec(Self::parse_expr)?;
                let mode = ElemMode::Active {
                    table_idx: 0,
                    offset,
                };
                (RefType::FuncRef, init, mode)
            }
            5 => {
                let ty = self.parse_ref_type()?;
                (ty, self.parse_vec(Self::parse_expr)?, ElemMode::Passive)
            }
            6 => {
                let table_idx = self.read_u32()?;
                let offset = self.parse_expr()?;
                let ty = self.parse_ref_type()?;
                let init = self.parse_vec(Self::parse_expr)?;
                (ty, init, ElemMode::Active { table_idx, offset })
            }
            7 => {
                let ty = self.parse_ref_type()?;
                (ty, self.parse_vec(Self::parse_expr)?, ElemMode::Declarative)
            }
            n => return Err(self.malformed(MalformedReason::InvalidElementKind(n))),
        };

        Ok(Element { ty, init, mode })
    }

    fn parse_data_segment(&mut self) -> DecodeResult<DataSegment> {
        let mode = match self.read_u32()? {
            0 => DataMode::Active {
                mem_idx: 0,
                offset: self.parse_expr()?,
            },
            1 => DataMode::Passive,
            2 => DataMode::Active {
                mem_idx: self.read_u32()?,
                offset: self.parse_expr()?,
            },
            n => return Err(self.malformed(MalformedReason::InvalidDataKind(n))),
        };

        let init_len = self.read_u32()?;

        let init = self.read_range(init_len as usize)?.to_vec();

        Ok(DataSegment { init, mode })
    }

    fn parse_function_body(&mut self) -> DecodeResult<FunctionBody> {
        let size = self.read_u32()?;
        let section_end = self.end;
        let body_end = self
            .cursor
            .checked_add(size as usize)
            .filter(|end| *end <= section_end)
            .ok_or_else(|| self.malformed(MalformedReason::UnexpectedEof))?;

        self.end = body_end;

        let groups = self.parse_vec(|parser| Ok((parser.read_u32()?, parser.parse_value_type()?)))?;

        let total: u64 = groups.iter().map(|(n, _)| u64::from(*n)).sum();

        if total > MAX_LOCALS {
            return Err(self.malformed(MalformedReason::TooManyLocals));
        }

        let mut locals = Vec::with_capacity(total as usize);

        for (n, local_ty) in groups {
            locals.extend(std::iter::repeat(local_ty).take(n as usize));
        }

        let expr = self.parse_expr()?;

        if self.cursor != body_end {
            return Err(self.malformed(MalformedReason::BodySizeMismatch));
        }

        self.end = section_end;

        Ok(FunctionBody { locals, expr })
    }

    fn parse_export(&mut self) -> DecodeResult<Export> {
        let name = self.parse_name()?;
        let description = self.parse_export_description()?;
        Ok(Export { name, description })
    }

    fn parse_export_description(&mut self) -> DecodeResult<ExportDescription> {
        let kind = self.next_byte()?;

        let value = self.read_u32()?;

        Ok(match kind {
            0x00 => ExportDescription::FuncIdx(value),
            0x01 => ExportDescription::TableIdx(value),
            0x02 => ExportDescription::MemIdx(value),
            0x03 => ExportDescription::GlobalIdx(value),
            n => return Err(self.malformed(MalformedReason::InvalidExportKind(n))),
        })
    }

    fn parse_global(&mut self) -> DecodeResult<Global> {
        let global_type = self.parse_global_type()?;
        let init = self.parse_expr()?;

        Ok(Global { global_type, init })
    }

    /// Decodes instructions up to and including the `end` closing the
    /// expression, resolving the `else`/`end` positions of every block.
    fn parse_expr(&mut self) -> DecodeResult<Expr> {
        let mut instructions: Vec<Instruction> = Vec::new();

        // (index of the block instruction, index of its `else`)
        let mut nested: Vec<(usize, Option<usize>)> = Vec::new();

        loop {
            if self.cursor >= self.end {
                return Err(self.malformed(MalformedReason::MissingEnd));
            }

            let inst = match self.next_instruction()? {
                inst @ (Instruction::Block(..) | Instruction::Loop(..) | Instruction::If(..)) => {
                    nested.push((instructions.len(), None));
                    inst
                }
                Instruction::Else(..) => {
                    let pos = instructions.len();

                    match nested.last_mut() {
                        Some((block_idx, else_idx @ None))
                            if matches!(instructions[*block_idx], Instruction::If(..)) =>
                        {
                            instructions[*block_idx].set_label_else(pos);
                            *else_idx = Some(pos);
                        }
                        _ => return Err(self.malformed(MalformedReason::ElseWithoutIf)),
                    }

                    Instruction::Else(0)
                }
                Instruction::End => {
                    let end = instructions.len();

                    instructions.push(Instruction::End);

                    if let Some((block_idx, else_idx)) = nested.pop() {
                        instructions[block_idx].set_label_end(end);

                        if let Some(else_idx) = else_idx {
                            instructions[else_idx].set_label_end(end);
                        }

                        continue;
                    } else {
                        break;
                    }
                }
                inst => inst,
            };

            instructions.push(inst);
        }

        Ok(Expr(Arc::from(instructions)))
    }

    fn parse_import_description(&mut self) -> DecodeResult<ImportDescription> {
        Ok(match self.next_byte()? {
            0x00 => ImportDescription::Func(self.read_u32()?),
            0x01 => ImportDescription::Table(self.parse_table_type()?),
            0x02 => ImportDescription::Mem(self.parse_mem_type()?),
            0x03 => ImportDescription::Global(self.parse_global_type()?),
            n => return Err(self.malformed(MalformedReason::InvalidImportKind(n))),
        })
    }

    fn parse_import(&mut self) -> DecodeResult<Import> {
        let mod_name = self.parse_name()?;
        let name = self.parse_name()?;
        let description = self.parse_import_description()?;

        Ok(Import {
            mod_name,
            name,
            description,
        })
    }

    fn parse_table_type(&mut self) -> DecodeResult<TableType> {
        let element = self.parse_ref_type()?;
        let limit = self.parse_limit()?;

        Ok(TableType { element, limit })
    }

    fn parse_mem_type(&mut self) -> DecodeResult<MemoryType> {
        Ok(MemoryType {
            limit: self.parse_limit()?,
        })
    }

    fn parse_global_type(&mut self) -> DecodeResult<GlobalType> {
        let val_type = self.parse_value_type()?;
        let mutability = match self.next_byte()? {
            0x00 => Mutability::Const,
            0x01 => Mutability::Var,
            n => return Err(self.malformed(MalformedReason::InvalidMutability(n))),
        };

        Ok(GlobalType {
            val_type,
            mutability,
        })
    }

    fn parse_limit(&mut self) -> DecodeResult<Limit> {
        let limit_kind = self.next_byte()?;
        let min = self.read_u32()?;
        let max = match limit_kind {
            0x00 => None,
            0x01 => Some(self.read_u32()?),
            n => return Err(self.malformed(MalformedReason::InvalidLimitFlag(n))),
        };

        Ok(Limit { min, max })
    }

    fn parse_name(&mut self) -> DecodeResult<String> {
        let len = self.read_u32()?;
        let buffer = self.read_range(len as usize)?;

        std::str::from_utf8(buffer)
            .map(str::to_owned)
            .map_err(|_| self.malformed(MalformedReason::InvalidUtf8))
    }

    fn parse_func_type(&mut self) -> DecodeResult<FuncType> {
        self.expect_byte(0x60)?;

        let params = self.parse_result_type()?;
        let results = self.parse_result_type()?;

        Ok(FuncType::new(params, results))
    }

    fn value_type(byte: u8) -> Option<ValueType> {
        Some(match byte {
            0x7f => ValueType::I32,
            0x7e => ValueType::I64,
            0x7d => ValueType::F32,
            0x7c => ValueType::F64,
            0x70 => ValueType::FuncRef,
            0x6f => ValueType::ExternRef,
            _ => return None,
        })
    }

    fn parse_value_type(&mut self) -> DecodeResult<ValueType> {
        let byte = self.next_byte()?;
        Self::value_type(byte).ok_or_else(|| self.malformed(MalformedReason::InvalidValueType(byte)))
    }

    fn parse_ref_type(&mut self) -> DecodeResult<RefType> {
        Ok(match self.next_byte()? {
            0x70 => RefType::FuncRef,
            0x6f => RefType::ExternRef,
            n => return Err(self.malformed(MalformedReason::InvalidRefType(n))),
        })
    }

    fn parse_result_type(&mut self) -> DecodeResult<Vec<ValueType>> {
        self.parse_vec(Self::parse_value_type)
    }

    fn parse_block_type(&mut self) -> DecodeResult<BlockType> {
        let byte = self.peek_byte()?;

        if byte == 0x40 {
            self.cursor += 1;
            return Ok(BlockType::Empty);
        }

        if let Some(ty) = Self::value_type(byte) {
            self.cursor += 1;
            return Ok(BlockType::ValType(ty));
        }

        let idx = self.read_signed(33)?;

        u32::try_from(idx)
            .map(BlockType::TypeIndex)
            .map_err(|_| self.malformed(MalformedReason::InvalidValueType(byte)))
    }

    fn parse_block(&mut self) -> DecodeResult<BlockLabel> {
        Ok(BlockLabel::incomplete(self.parse_block_type()?))
    }

    fn parse_branch_table_immediate(&mut self) -> DecodeResult<(Box<[u32]>, u32)> {
        let l_star = self.parse_vec(Self::read_u32)?;
        let l_n = self.read_u32()?;

        Ok((l_star.into_boxed_slice(), l_n))
    }

    fn parse_select_immediate(&mut self) -> DecodeResult<Box<[ValueType]>> {
        Ok(self.parse_vec(Self::parse_value_type)?.into_boxed_slice())
    }

    fn parse_memory_operand(&mut self) -> DecodeResult<MemoryOperand> {
        let align = self.read_u32()?;
        let offset = self.read_u32()?;

        Ok(MemoryOperand { align, offset })
    }

    fn next_instruction(&mut self) -> DecodeResult<Instruction> {
        Ok(match self.next_byte()? {
            0x00 => Instruction::Unreachable,
            0x01 => Instruction::Nop,
            0x02 => Instruction::Block(self.parse_block()?),
            0x03 => Instruction::Loop(self.parse_block()?),
            0x04 => Instruction::If(self.parse_block()?),
            0x05 => Instruction::Else(0),
            0x0b => Instruction::End,
            0x0c => Instruction::Branch(self.read_u32()?),
            0x0d => Instruction::BranchIf(self.read_u32()?),
            0x0e => {
                let (a, b) = self.parse_branch_table_immediate()?;
                Instruction::BranchTable(a, b)
            }
            0x0f => Instruction::Return,
            0x10 => Instruction::Call(self.read_u32()?),
            0x11 => {
                let type_idx = self.read_u32()?;
                let table_idx = self.read_u32()?;
                Instruction::CallIndirect(type_idx, table_idx)
            }
            0x1a => Instruction::Drop,
            0x1b => Instruction::Select,
            0x1c => Instruction::SelectT(self.parse_select_immediate()?),
            0x20 => Instruction::LocalGet(self.read_u32()?),
            0x21 => Instruction::LocalSet(self.read_u32()?),
            0x22 => Instruction::LocalTee(self.read_u32()?),
            0x23 => Instruction::GlobalGet(self.read_u32()?),
            0x24 => Instruction::GlobalSet(self.read_u32()?),
            0x25 => Instruction::TableGet(self.read_u32()?),
            0x26 => Instruction::TableSet(self.read_u32()?),
            0x28 => Instruction::i32Load(self.parse_memory_operand()?),
            0x29 => Instruction::i64Load(self.parse_memory_operand()?),
            0x2a => Instruction::f32Load(self.parse_memory_operand()?),
            0x2b => Instruction::f64Load(self.parse_memory_operand()?),
            0x2c => Instruction::i32Load8Signed(self.parse_memory_operand()?),
            0x2d => Instruction::i32Load8Unsigned(self.parse_memory_operand()?),
            0x2e => Instruction::i32Load16Signed(self.parse_memory_operand()?),
            0x2f => Instruction::i32Load16Unsigned(self.parse_memory_operand()?),
            0x30 => Instruction::i64Load8Signed(self.parse_memory_operand()?),
            0x31 => Instruction::i64Load8Unsigned(self.parse_memory_operand()?),
            0x32 => Instruction::i64Load16Signed(self.parse_memory_operand()?),
            0x33 => Instruction::i64Load16Unsigned(self.parse_memory_operand()?),
            0x34 => Instruction::i64Load32Signed(self.parse_memory_operand()?),
            0x35 => Instruction::i64Load32Unsigned(self.parse_memory_operand()?),
            0x36 => Instruction::i32Store(self.parse_memory_operand()?),
            0x37 => Instruction::i64Store(self.parse_memory_operand()?),
            0x38 => Instruction::f32Store(self.parse_memory_operand()?),
            0x39 => Instruction::f64Store(self.parse_memory_operand()?),
            0x3a => Instruction::i32Store8(self.parse_memory_operand()?),
            0x3b => Instruction::i32Store16(self.parse_memory_operand()?),
            0x3c => Instruction::i64Store8(self.parse_memory_operand()?),
            0x3d => Instruction::i64Store16(self.parse_memory_operand()?),
            0x3e => Instruction::i64Store32(self.parse_memory_operand()?),
            0x3f => {
                self.expect_zero_byte()?;
                Instruction::MemorySize
            }
            0x40 => {
                self.expect_zero_byte()?;
                Instruction::MemoryGrow
            }
            0x41 => Instruction::i32Const(self.read_i32()?),
            0x42 => Instruction::i64Const(self.read_i64()?),
            0x43 => Instruction::f32Const(self.read_f32()?),
            0x44 => Instruction::f64Const(self.read_f64()?),
            0x45 => Instruction::i32EqZero,
            0x46 => Instruction::i32Eq,
            0x47 => Instruction::i32Ne,
            0x48 => Instruction::i32LtSigned,
            0x49 => Instruction::i32LtUnsigned,
            0x4a => Instruction::i32GtSigned,
            0x4b => Instruction::i32GtUnsigned,
            0x4c => Instruction::i32LeSigned,
            0x4d => Instruction::i32LeUnsigned,
            0x4e => Instruction::i32GeSigned,
            0x4f => Instruction::i32GeUnsigned,
            0x50 => Instruction::i64EqZero,
            0x51 => Instruction::i64Eq,
            0x52 => Instruction::i64Ne,
            0x53 => Instruction::i64LtSigned,
            0x54 => Instruction::i64LtUnsigned,
            0x55 => Instruction::i64GtSigned,
            0x56 => Instruction::i64GtUnsigned,
            0x57 => Instruction::i64LeSigned,
            0x58 => Instruction::i64LeUnsigned,
            0x59 => Instruction::i64GeSigned,
            0x5a => Instruction::i64GeUnsigned,
            0x5b => Instruction::f32Eq,
            0x5c => Instruction::f32Ne,
            0x5d => Instruction::f32Lt,
            0x5e => Instruction::f32Gt,
            0x5f => Instruction::f32Le,
            0x60 => Instruction::f32Ge,
            0x61 => Instruction::f64Eq,
            0x62 => Instruction::f64Ne,
            0x63 => Instruction::f64Lt,
            0x64 => Instruction::f64Gt,
            0x65 => Instruction::f64Le,
            0x66 => Instruction::f64Ge,
            0x67 => Instruction::i32CountLeadingZeros,
            0x68 => Instruction::i32CountTrailingZeros,
            0x69 => Instruction::i32PopulationCount,
            0x6a => Instruction::i32Add,
            0x6b => Instruction::i32Sub,
            0x6c => Instruction::i32Mul,
            0x6d => Instruction::i32SignedDiv,
            0x6e => Instruction::i32UnsignedDiv,
            0x6f => Instruction::i32SignedRem,
            0x70 => Instruction::i32UnsignedRem,
            0x71 => Instruction::i32BitwiseAnd,
            0x72 => Instruction::i32BitwiseOr,
            0x73 => Instruction::i32BitwiseXor,
            0x74 => Instruction::i32BitwiseShiftLeft,
            0x75 => Instruction::i32SignedBitwiseShiftRight,
            0x76 => Instruction::i32UnsignedBitwiseShiftRight,
            0x77 => Instruction::i32RotateLeft,
            0x78 => Instruction::i32RotateRight,
            0x79 => Instruction::i64CountLeadingZeros,
            0x7a => Instruction::i64CountTrailingZeros,
            0x7b => Instruction::i64PopulationCount,
            0x7c => Instruction::i64Add,
            0x7d => Instruction::i64Sub,
            0x7e => Instruction::i64Mul,
            0x7f => Instruction::i64SignedDiv,
            0x80 => Instruction::i64UnsignedDiv,
            0x81 => Instruction::i64SignedRem,
            0x82 => Instruction::i64UnsignedRem,
            0x83 => Instruction::i64BitwiseAnd,
            0x84 => Instruction::i64BitwiseOr,
            0x85 => Instruction::i64BitwiseXor,
            0x86 => Instruction::i64BitwiseShiftLeft,
            0x87 => Instruction::i64SignedBitwiseShiftRight,
            0x88 => Instruction::i64UnsignedBitwiseShiftRight,
            0x89 => Instruction::i64RotateLeft,
            0x8a => Instruction::i64RotateRight,
            0x8b => Instruction::f32Abs,
            0x8c => Instruction::f32Neg,
            0x8d => Instruction::f32Ceil,
            0x8e => Instruction::f32Floor,
            0x8f => Instruction::f32Trunc,
            0x90 => Instruction::f32Nearest,
            0x91 => Instruction::f32Sqrt,
            0x92 => Instruction::f32Add,
            0x93 => Instruction::f32Sub,
            0x94 => Instruction::f32Mul,
            0x95 => Instruction::f32Div,
            0x96 => Instruction::f32Min,
            0x97 => Instruction::f32Max,
            0x98 => Instruction::f32CopySign,
            0x99 => Instruction::f64Abs,
            0x9a => Instruction::f64Neg,
            0x9b => Instruction::f64Ceil,
            0x9c => Instruction::f64Floor,
            0x9d => Instruction::f64Trunc,
            0x9e => Instruction::f64Nearest,
            0x9f => Instruction::f64Sqrt,
            0xa0 => Instruction::f64Add,
            0xa1 => Instruction::f64Sub,
            0xa2 => Instruction::f64Mul,
            0xa3 => Instruction::f64Div,
            0xa4 => Instruction::f64Min,
            0xa5 => Instruction::f64Max,
            0xa6 => Instruction::f64CopySign,
            0xa7 => Instruction::i32WrapI64,
            0xa8 => Instruction::i32TruncF32Signed,
            0xa9 => Instruction::i32TruncF32Unsigned,
            0xaa => Instruction::i32TruncF64Signed,
            0xab => Instruction::i32TruncF64Unsigned,
            0xac => Instruction::i64Extendi32Signed,
            0xad => Instruction::i64Extendi32Unsigned,
            0xae => Instruction::i64TruncF32Signed,
            0xaf => Instruction::i64TruncF32Unsigned,
            0xb0 => Instruction::i64TruncF64Signed,
            0xb1 => Instruction::i64TruncF64Unsigned,
            0xb2 => Instruction::f32SignedConvertI32,
            0xb3 => Instruction::f32UnsignedConvertI32,
            0xb4 => Instruction::f32SignedConvertI64,
            0xb5 => Instruction::f32UnsignedConvertI64,
            0xb6 => Instruction::f32DemoteF64,
            0xb7 => Instruction::f64SignedConvertI32,
            0xb8 => Instruction::f64UnsignedConvertI32,
            0xb9 => Instruction::f64SignedConvertI64,
            0xba => Instruction::f64UnsignedConvertI64,
            0xbb => Instruction::f64PromoteF32,
            0xbc => Instruction::i32ReinterpretF32,
            0xbd => Instruction::i64ReinterpretF64,
            0xbe => Instruction::f32ReinterpretI32,
            0xbf => Instruction::f64ReinterpretI64,
            0xc0 => Instruction::i32Extend8Signed,
            0xc1 => Instruction::i32Extend16Signed,
            0xc2 => Instruction::i64Extend8Signed,
            0xc3 => Instruction::i64Extend16Signed,
            0xc4 => Instruction::i64Extend32Signed,
            0xd0 => Instruction::RefNull(self.parse_ref_type()?),
            0xd1 => Instruction::RefIsNull,
            0xd2 => Instruction::RefFunc(self.read_u32()?),
            0xfc => match self.read_u32()? {
                0x00 => Instruction::i32TruncSatf32Signed,
                0x01 => Instruction::i32TruncSatf32Unsigned,
                0x02 => Instruction::i32TruncSatf64Signed,
                0x03 => Instruction::i32TruncSatf64Unsigned,
                0x04 => Instruction::i64TruncSatf32Signed,
                0x05 => Instruction::i64TruncSatf32Unsigned,
                0x06 => Instruction::i64TruncSatf64Signed,
                0x07 => Instruction::i64TruncSatf64Unsigned,
                0x08 => {
                    let data_idx = self.read_u32()?;
                    self.expect_zero_byte()?;
                    Instruction::MemoryInit(data_idx)
                }
                0x09 => Instruction::DataDrop(self.read_u32()?),
                0x0a => {
                    self.expect_zero_byte()?;
                    self.expect_zero_byte()?;
                    Instruction::MemoryCopy
                }
                0x0b => {
                    self.expect_zero_byte()?;
                    Instruction::MemoryFill
                }
                0x0c => {
                    let elem_idx = self.read_u32()?;
                    let table_idx = self.read_u32()?;
                    Instruction::TableInit(elem_idx, table_idx)
                }
                0x0d => Instruction::ElemDrop(self.read_u32()?),
                0x0e => {
                    let dst = self.read_u32()?;
                    let src = self.read_u32()?;
                    Instruction::TableCopy(dst, src)
                }
                0x0f => Instruction::TableGrow(self.read_u32()?),
                0x10 => Instruction::TableSize(self.read_u32()?),
                0x11 => Instruction::TableFill(self.read_u32()?),
                op => {
                    return Err(self.malformed(MalformedReason::UnknownOpcode(0xfc_00 + op)));
                }
            },
            op => return Err(self.malformed(MalformedReason::UnknownOpcode(u32::from(op)))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(bytes: &[u8]) -> ModuleParser<'_> {
        ModuleParser::new(bytes)
    }

    #[test]
    fn unsigned_leb128() {
        assert_eq!(parser(&[0x00]).read_u32().unwrap(), 0);
        assert_eq!(parser(&[0xe5, 0x8e, 0x26]).read_u32().unwrap(), 624_485);
        assert_eq!(
            parser(&[0xff, 0xff, 0xff, 0xff, 0x0f]).read_u32().unwrap(),
            u32::MAX
        );
        // redundant zero padding is allowed within the byte budget
        assert_eq!(parser(&[0x80, 0x80, 0x00]).read_u32().unwrap(), 0);
    }

    #[test]
    fn unsigned_leb128_rejects_overflow() {
        assert!(matches!(
            parser(&[0xff, 0xff, 0xff, 0xff, 0x1f]).read_u32(),
            Err(DecodeError::Malformed {
                reason: MalformedReason::IntegerTooLarge,
                ..
            })
        ));
        assert!(matches!(
            parser(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]).read_u32(),
            Err(DecodeError::Malformed {
                reason: MalformedReason::IntegerTooLong,
                ..
            })
        ));
        assert!(matches!(
            parser(&[0x80, 0x80]).read_u32(),
            Err(DecodeError::Malformed {
                reason: MalformedReason::UnexpectedEof,
                ..
            })
        ));
    }

    #[test]
    fn signed_leb128() {
        assert_eq!(parser(&[0x7f]).read_i32().unwrap(), -1);
        assert_eq!(parser(&[0xc0, 0xbb, 0x78]).read_i32().unwrap(), -123_456);
        assert_eq!(
            parser(&[0x80, 0x80, 0x80, 0x80, 0x78]).read_i32().unwrap(),
            i32::MIN
        );
        assert_eq!(
            parser(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f])
                .read_i64()
                .unwrap(),
            i64::MIN
        );
    }

    #[test]
    fn signed_leb128_rejects_bad_sign_extension() {
        assert!(matches!(
            parser(&[0x80, 0x80, 0x80, 0x80, 0x70]).read_i32(),
            Err(DecodeError::Malformed {
                reason: MalformedReason::IntegerTooLarge,
                ..
            })
        ));
        assert!(matches!(
            parser(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]).read_i64(),
            Err(DecodeError::Malformed {
                reason: MalformedReason::IntegerTooLarge,
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_header() {
        assert_eq!(Module::new(b"\0asn\x01\0\0\0"), Err(DecodeError::BadMagic));
        assert_eq!(Module::new(b"\0as"), Err(DecodeError::BadMagic));
        assert_eq!(Module::new(b"\0asm\x02\0\0\0"), Err(DecodeError::BadVersion));
    }

    #[test]
    fn empty_module() {
        let module = Module::new(b"\0asm\x01\0\0\0").unwrap();
        assert_eq!(module, Module::default());
    }

    #[test]
    fn skips_unknown_and_custom_sections() {
        let bytes = [
            0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
            0x00, 0x04, 0x02, b'h', b'i', 0xaa, // custom "hi"
            0x2a, 0x02, 0xde, 0xad, // unknown id 42
        ];

        let module = Module::new(&bytes).unwrap();

        assert_eq!(
            module.custom_sections(),
            &[CustomSection {
                name: "hi".to_owned(),
                contents: vec![0xaa],
            }]
        );
    }

    #[test]
    fn section_size_mismatch() {
        // type section declares 5 bytes but holds a 4-byte type vector
        let bytes = [
            0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x05, 0x01, 0x60, 0x00, 0x00,
            0x00,
        ];

        assert!(matches!(
            Module::new(&bytes),
            Err(DecodeError::Malformed {
                reason: MalformedReason::SectionSizeMismatch {
                    declared: 5,
                    consumed: 4
                },
                ..
            })
        ));
    }

    #[test]
    fn resolves_block_positions() {
        let mut p = parser(&[
            0x04, 0x40, // if
            0x01, // nop
            0x05, // else
            0x01, // nop
            0x0b, // end
            0x0b, // end
        ]);

        let expr = p.parse_expr().unwrap();

        assert_eq!(
            expr.instructions(),
            &[
                Instruction::If(BlockLabel {
                    block_type: BlockType::Empty,
                    else_: Some(2),
                    end: 4,
                }),
                Instruction::Nop,
                Instruction::Else(4),
                Instruction::Nop,
                Instruction::End,
                Instruction::End,
            ]
        );
    }
}
