use std::fmt;

use crate::{
    error::Trap,
    store::{ExternAddr, FuncAddr},
    types::{RefType, ValueType},
};

/// A runtime value. Reference variants use `None` for the typed null
/// reference, which is a value in its own right and distinct from absence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    FuncRef(Option<FuncAddr>),
    ExternRef(Option<ExternAddr>),
}

impl Value {
    pub fn default_for(ty: ValueType) -> Self {
        match ty {
            ValueType::I32 => Self::I32(0),
            ValueType::I64 => Self::I64(0),
            ValueType::F32 => Self::F32(0.0),
            ValueType::F64 => Self::F64(0.0),
            ValueType::FuncRef => Self::FuncRef(None),
            ValueType::ExternRef => Self::ExternRef(None),
        }
    }

    pub fn ty(&self) -> ValueType {
        match self {
            Self::I32(..) => ValueType::I32,
            Self::I64(..) => ValueType::I64,
            Self::F32(..) => ValueType::F32,
            Self::F64(..) => ValueType::F64,
            Self::FuncRef(..) => ValueType::FuncRef,
            Self::ExternRef(..) => ValueType::ExternRef,
        }
    }

    pub fn ref_type(&self) -> Option<RefType> {
        match self {
            Self::FuncRef(..) => Some(RefType::FuncRef),
            Self::ExternRef(..) => Some(RefType::ExternRef),
            Self::I32(..) | Self::I64(..) | Self::F32(..) | Self::F64(..) => None,
        }
    }

    /// `true` only for null references; numbers are never null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::FuncRef(None) | Self::ExternRef(None))
    }

    pub fn assert_i32(self) -> Result<i32, Trap> {
        match self {
            Self::I32(n) => Ok(n),
            _ => Err(Trap::InstrTypeMismatch),
        }
    }

    pub fn assert_i64(self) -> Result<i64, Trap> {
        match self {
            Self::I64(n) => Ok(n),
            _ => Err(Trap::InstrTypeMismatch),
        }
    }

    pub fn assert_f32(self) -> Result<f32, Trap> {
        match self {
            Self::F32(n) => Ok(n),
            _ => Err(Trap::InstrTypeMismatch),
        }
    }

    pub fn assert_f64(self) -> Result<f64, Trap> {
        match self {
            Self::F64(n) => Ok(n),
            _ => Err(Trap::InstrTypeMismatch),
        }
    }

    pub fn assert_ref(self) -> Result<Self, Trap> {
        match self {
            Self::FuncRef(..) | Self::ExternRef(..) => Ok(self),
            _ => Err(Trap::InstrTypeMismatch),
        }
    }

    /// Bitwise equality: floats compare by bit pattern, so NaN payloads
    /// matter and `0.0` differs from `-0.0`.
    pub fn bit_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(n) => write!(f, "{n}"),
            Self::I64(n) => write!(f, "{n}"),
            Self::F32(n) => write!(f, "{n}"),
            Self::F64(n) => write!(f, "{n}"),
            Self::FuncRef(None) | Self::ExternRef(None) => f.write_str("null"),
            Self::FuncRef(Some(addr)) => write!(f, "funcref:{}", addr.0),
            Self::ExternRef(Some(addr)) => write!(f, "externref:{}", addr.0),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::I32(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::I64(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Self::F32(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::F64(n)
    }
}
