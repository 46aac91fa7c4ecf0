use crate::types::{BlockType, RefType, ValueType};

/// Static description of a structured instruction. The decoder fills in the
/// positions of the matching `else` and `end` so branches never need to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLabel {
    pub block_type: BlockType,
    pub else_: Option<usize>,
    pub end: usize,
}

impl BlockLabel {
    pub(crate) fn incomplete(block_type: BlockType) -> Self {
        Self {
            block_type,
            else_: None,
            end: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    pub align: u32,
    pub offset: u32,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Unreachable,
    Nop,
    Block(BlockLabel),
    Loop(BlockLabel),
    If(BlockLabel),
    /// Carries the position of the `end` closing the `if`.
    Else(usize),
    End,
    Branch(u32),
    BranchIf(u32),
    BranchTable(Box<[u32]>, u32),
    Return,
    Call(u32),
    /// Type index, table index.
    CallIndirect(u32, u32),

    Drop,
    Select,
    SelectT(Box<[ValueType]>),

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    TableGet(u32),
    TableSet(u32),
    /// Element index, table index.
    TableInit(u32, u32),
    ElemDrop(u32),
    /// Destination table, source table.
    TableCopy(u32, u32),
    TableGrow(u32),
    TableSize(u32),
    TableFill(u32),

    i32Load(MemoryOperand),
    i64Load(MemoryOperand),
    f32Load(MemoryOperand),
    f64Load(MemoryOperand),
    i32Load8Signed(MemoryOperand),
    i32Load8Unsigned(MemoryOperand),
    i32Load16Signed(MemoryOperand),
    i32Load16Unsigned(MemoryOperand),
    i64Load8Signed(MemoryOperand),
    i64Load8Unsigned(MemoryOperand),
    i64Load16Signed(MemoryOperand),
    i64Load16Unsigned(MemoryOperand),
    i64Load32Signed(MemoryOperand),
    i64Load32Unsigned(MemoryOperand),
    i32Store(MemoryOperand),
    i64Store(MemoryOperand),
    f32Store(MemoryOperand),
    f64Store(MemoryOperand),
    i32Store8(MemoryOperand),
    i32Store16(MemoryOperand),
    i64Store8(MemoryOperand),
    i64Store16(MemoryOperand),
    i64Store32(MemoryOperand),
    MemorySize,
    MemoryGrow,
    MemoryInit(u32),
    DataDrop(u32),
    MemoryCopy,
    MemoryFill,

    i32Const(i32),
    i64Const(i64),
    f32Const(f32),
    f64Const(f64),

    i32EqZero,
    i32Eq,
    i32Ne,
    i32LtSigned,
    i32LtUnsigned,
    i32GtSigned,
    i32GtUnsigned,
    i32LeSigned,
    i32LeUnsigned,
    i32GeSigned,
    i32GeUnsigned,

    i64EqZero,
    i64Eq,
    i64Ne,
    i64LtSigned,
    i64LtUnsigned,
    i64GtSigned,
    i64GtUnsigned,
    i64LeSigned,
    i64LeUnsigned,
    i64GeSigned,
    i64GeUnsigned,

    f32Eq,
    f32Ne,
    f32Lt,
    f32Gt,
    f32Le,
    f32Ge,

    f64Eq,
    f64Ne,
    f64Lt,
    f64Gt,
    f64Le,
    f64Ge,

    i32CountLeadingZeros,
    i32CountTrailingZeros,
    i32PopulationCount,
    i32Add,
    i32Sub,
    i32Mul,
    i32SignedDiv,
    i32UnsignedDiv,
    i32SignedRem,
    i32UnsignedRem,
    i32BitwiseAnd,
    i32BitwiseOr,
    i32BitwiseXor,
    i32BitwiseShiftLeft,
    i32SignedBitwiseShiftRight,
    i32UnsignedBitwiseShiftRight,
    i32RotateLeft,
    i32RotateRight,

    i64CountLeadingZeros,
    i64CountTrailingZeros,
    i64PopulationCount,
    i64Add,
    i64Sub,
    i64Mul,
    i64SignedDiv,
    i64UnsignedDiv,
    i64SignedRem,
    i64UnsignedRem,
    i64BitwiseAnd,
    i64BitwiseOr,
    i64BitwiseXor,
    i64BitwiseShiftLeft,
    i64SignedBitwiseShiftRight,
    i64UnsignedBitwiseShiftRight,
    i64RotateLeft,
    i64RotateRight,

    f32Abs,
    f32Neg,
    f32Ceil,
    f32Floor,
    f32Trunc,
    f32Nearest,
    f32Sqrt,
    f32Add,
    f32Sub,
    f32Mul,
    f32Div,
    f32Min,
    f32Max,
    f32CopySign,

    f64Abs,
    f64Neg,
    f64Ceil,
    f64Floor,
    f64Trunc,
    f64Nearest,
    f64Sqrt,
    f64Add,
    f64Sub,
    f64Mul,
    f64Div,
    f64Min,
    f64Max,
    f64CopySign,

    i32WrapI64,
    i32TruncF32Signed,
    i32TruncF32Unsigned,
    i32TruncF64Signed,
    i32TruncF64Unsigned,
    i64Extendi32Signed,
    i64Extendi32Unsigned,
    i64TruncF32Signed,
    i64TruncF32Unsigned,
    i64TruncF64Signed,
    i64TruncF64Unsigned,
    f32SignedConvertI32,
    f32UnsignedConvertI32,
    f32SignedConvertI64,
    f32UnsignedConvertI64,
    f32DemoteF64,
    f64SignedConvertI32,
    f64UnsignedConvertI32,
    f64SignedConvertI64,
    f64UnsignedConvertI64,
    f64PromoteF32,
    i32ReinterpretF32,
    i64ReinterpretF64,
    f32ReinterpretI32,
    f64ReinterpretI64,

    i32Extend8Signed,
    i32Extend16Signed,
    i64Extend8Signed,
    i64Extend16Signed,
    i64Extend32Signed,

    i32TruncSatf32Signed,
    i32TruncSatf32Unsigned,
    i32TruncSatf64Signed,
    i32TruncSatf64Unsigned,
    i64TruncSatf32Signed,
    i64TruncSatf32Unsigned,
    i64TruncSatf64Signed,
    i64TruncSatf64Unsigned,

    RefNull(RefType),
    RefIsNull,
    RefFunc(u32),
}

impl Instruction {
    pub(crate) fn set_label_end(&mut self, end: usize) {
        match self {
            Self::Block(label) | Self::Loop(label) | Self::If(label) => label.end = end,
            Self::Else(else_end) => *else_end = end,
            _ => {}
        }
    }

    pub(crate) fn set_label_else(&mut self, else_: usize) {
        if let Self::If(label) = self {
            label.else_ = Some(else_);
        }
    }
}
