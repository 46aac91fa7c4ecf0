use std::{fmt, num::NonZeroU32};

use thiserror::Error;

use crate::types::ValueType;

/// Failure to turn a byte buffer into a [`Module`](crate::Module).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("magic header not detected")]
    BadMagic,
    #[error("unknown binary version")]
    BadVersion,
    #[error("malformed module at offset {offset:#x}: {reason}")]
    Malformed {
        offset: usize,
        reason: MalformedReason,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    #[error("unexpected end")]
    UnexpectedEof,
    #[error("integer representation too long")]
    IntegerTooLong,
    #[error("integer too large")]
    IntegerTooLarge,
    #[error("section size mismatch: declared {declared}, consumed {consumed}")]
    SectionSizeMismatch { declared: u32, consumed: usize },
    #[error("section {id} out of order")]
    InvalidSectionOrder { id: u8 },
    #[error("duplicate section {id}")]
    DuplicateSection { id: u8 },
    #[error("invalid value type {0:#04x}")]
    InvalidValueType(u8),
    #[error("malformed reference type {0:#04x}")]
    InvalidRefType(u8),
    #[error("malformed UTF-8 encoding")]
    InvalidUtf8,
    #[error("illegal opcode {0:#x}")]
    UnknownOpcode(u32),
    #[error("expected byte {expected:#04x}, found {found:#04x}")]
    ExpectedByte { expected: u8, found: u8 },
    #[error("malformed import kind {0:#04x}")]
    InvalidImportKind(u8),
    #[error("malformed export kind {0:#04x}")]
    InvalidExportKind(u8),
    #[error("malformed limit flag {0:#04x}")]
    InvalidLimitFlag(u8),
    #[error("malformed mutability {0:#04x}")]
    InvalidMutability(u8),
    #[error("malformed elements segment kind {0}")]
    InvalidElementKind(u32),
    #[error("malformed data segment kind {0}")]
    InvalidDataKind(u32),
    #[error("function and code section have inconsistent lengths")]
    FunctionCodeMismatch,
    #[error("data count and data section have inconsistent lengths")]
    DataCountMismatch,
    #[error("too many locals")]
    TooManyLocals,
    #[error("END opcode expected")]
    MissingEnd,
    #[error("else without matching if")]
    ElseWithoutIf,
    #[error("function body size mismatch")]
    BodySizeMismatch,
    #[error("zero byte expected")]
    ZeroByteExpected,
}

/// Static type error reported by the validator. Validation stops at the first
/// failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("unknown label {0}")]
    UnknownLabel(u32),
    #[error("unknown {space} {index}")]
    UnknownIndex { space: IndexSpace, index: u32 },
    #[error("invalid limit: {0}")]
    InvalidLimit(&'static str),
    #[error("constant expression required")]
    ConstantExpressionRequired,
    #[error("global {0} is immutable")]
    ImmutableGlobal(u32),
    #[error("duplicate export name {0:?}")]
    DuplicateExport(String),
    #[error("start function must have type [] -> []")]
    InvalidStartFunction,
    #[error("alignment must not be larger than natural")]
    InvalidAlignment,
    #[error("multiple memories")]
    MultipleMemories,
    #[error("data count section required")]
    DataCountRequired,
    #[error("undeclared function reference {0}")]
    UndeclaredFunctionReference(u32),
    #[error("invalid result arity")]
    InvalidResultArity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSpace {
    Type,
    Function,
    Table,
    Memory,
    Global,
    Local,
    Element,
    Data,
}

impl fmt::Display for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Type => "type",
            Self::Function => "function",
            Self::Table => "table",
            Self::Memory => "memory",
            Self::Global => "global",
            Self::Local => "local",
            Self::Element => "elem segment",
            Self::Data => "data segment",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Element,
    Data,
}

/// Failure while instantiating a validated module. Side effects performed
/// before the failing step (segment writes, allocations) are kept.
#[derive(Debug, Error)]
pub enum InstantiationError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("unknown import {module}.{name}")]
    UnresolvedImport { module: String, name: String },
    #[error("incompatible import type for {module}.{name}")]
    SignatureMismatch { module: String, name: String },
    #[error("{kind:?} segment {index} does not fit")]
    OutOfBounds { kind: SegmentKind, index: u32 },
    #[error("memory of {pages} pages exceeds the configured maximum of {max}")]
    MemoryLimitExceeded { pages: u32, max: u32 },
    #[error("table of {elements} elements exceeds the configured maximum of {max}")]
    TableLimitExceeded { elements: u32, max: u32 },
    #[error("start function failed")]
    Start(#[source] InvokeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dynamic fault that aborts the current invocation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("unreachable")]
    Unreachable,
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    #[error("out of bounds table access")]
    TableOutOfBounds,
    #[error("undefined element")]
    UndefinedElement,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("cost limit exceeded")]
    CostLimitExceeded,
    #[error("execution interrupted")]
    Interrupted,
    #[error("host function returned values of the wrong type")]
    HostResultMismatch,
    #[error("instruction operand type mismatch")]
    InstrTypeMismatch,
}

/// Failure reported by a host function. Carries a non-zero code chosen by
/// the host.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("host function failed with code {code}: {message}")]
pub struct HostError {
    pub code: NonZeroU32,
    pub message: String,
}

impl HostError {
    pub fn new(code: NonZeroU32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convenience constructor; a zero `code` is bumped to 1.
    pub fn from_code(code: u32) -> Self {
        Self::new(NonZeroU32::new(code).unwrap_or(NonZeroU32::MIN), "")
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvokeError {
    #[error("argument mismatch: expected {}, found {}", types(expected), types(found))]
    ArgumentMismatch {
        expected: Vec<ValueType>,
        found: Vec<ValueType>,
    },
    #[error("unknown export {0:?}")]
    UnknownExport(String),
    #[error("export {0:?} is not a function")]
    NotAFunction(String),
    #[error(transparent)]
    Trap(#[from] Trap),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl InvokeError {
    pub fn trap(&self) -> Option<Trap> {
        match self {
            Self::Trap(trap) => Some(*trap),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("module name {0:?} is already registered")]
    DuplicateModuleName(String),
    #[error("unknown module {0:?}")]
    UnknownModule(String),
    #[error("global is immutable")]
    ImmutableGlobal,
    #[error("global type mismatch: expected {expected}, found {found}")]
    GlobalTypeMismatch {
        expected: ValueType,
        found: ValueType,
    },
}

pub(crate) fn types(types: &[ValueType]) -> String {
    let inner = types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    format!("[{inner}]")
}

pub type DecodeResult<T> = Result<T, DecodeError>;
