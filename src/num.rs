use crate::{error::Trap, value::Value};

/// A numeric type that can travel through linear memory and the operand
/// stack.
pub trait Num: Copy {
    const BYTES: usize;

    /// Reads `Self` from exactly `Self::BYTES` little-endian bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);

    fn as_value(self) -> Value;
    fn from_value(val: Value) -> Result<Self, Trap>;
}

macro_rules! impl_num {
    ($ty:ty, $bytes:literal, $variant:ident, $assert:ident, $stack:ty) => {
        impl Num for $ty {
            const BYTES: usize = $bytes;

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0; $bytes];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            fn write_le(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_le_bytes());
            }

            fn as_value(self) -> Value {
                Value::$variant(self as $stack)
            }

            fn from_value(val: Value) -> Result<Self, Trap> {
                Ok(val.$assert()? as $ty)
            }
        }
    };
}

impl_num!(i8, 1, I32, assert_i32, i32);
impl_num!(u8, 1, I32, assert_i32, i32);
impl_num!(i16, 2, I32, assert_i32, i32);
impl_num!(u16, 2, I32, assert_i32, i32);
impl_num!(i32, 4, I32, assert_i32, i32);
impl_num!(u32, 4, I32, assert_i32, i32);
impl_num!(i64, 8, I64, assert_i64, i64);
impl_num!(u64, 8, I64, assert_i64, i64);
impl_num!(f32, 4, F32, assert_f32, f32);
impl_num!(f64, 8, F64, assert_f64, f64);

/// Integer operations shared by the 32- and 64-bit instruction families.
pub trait Int: Num + Eq {
    fn checked_div_signed(self, rhs: Self) -> Result<Self, Trap>;
    fn checked_div_unsigned(self, rhs: Self) -> Result<Self, Trap>;
    fn checked_rem_signed(self, rhs: Self) -> Result<Self, Trap>;
    fn checked_rem_unsigned(self, rhs: Self) -> Result<Self, Trap>;
    fn shl(self, rhs: Self) -> Self;
    fn shr_signed(self, rhs: Self) -> Self;
    fn shr_unsigned(self, rhs: Self) -> Self;
    fn rotl(self, rhs: Self) -> Self;
    fn rotr(self, rhs: Self) -> Self;
    fn clz(self) -> Self;
    fn ctz(self) -> Self;
    fn popcnt(self) -> Self;
}

macro_rules! impl_int {
    ($signed:ty, $unsigned:ty) => {
        impl Int for $signed {
            fn checked_div_signed(self, rhs: Self) -> Result<Self, Trap> {
                if rhs == 0 {
                    return Err(Trap::DivideByZero);
                }

                self.checked_div(rhs).ok_or(Trap::IntegerOverflow)
            }

            fn checked_div_unsigned(self, rhs: Self) -> Result<Self, Trap> {
                if rhs == 0 {
                    return Err(Trap::DivideByZero);
                }

                Ok(((self as $unsigned) / (rhs as $unsigned)) as $signed)
            }

            fn checked_rem_signed(self, rhs: Self) -> Result<Self, Trap> {
                if rhs == 0 {
                    return Err(Trap::DivideByZero);
                }

                // MIN % -1 is defined as 0
                Ok(self.wrapping_rem(rhs))
            }

            fn checked_rem_unsigned(self, rhs: Self) -> Result<Self, Trap> {
                if rhs == 0 {
                    return Err(Trap::DivideByZero);
                }

                Ok(((self as $unsigned) % (rhs as $unsigned)) as $signed)
            }

            fn shl(self, rhs: Self) -> Self {
                self.wrapping_shl(rhs as u32)
            }

            fn shr_signed(self, rhs: Self) -> Self {
                self.wrapping_shr(rhs as u32)
            }

            fn shr_unsigned(self, rhs: Self) -> Self {
                (self as $unsigned).wrapping_shr(rhs as u32) as $signed
            }

            fn rotl(self, rhs: Self) -> Self {
                self.rotate_left((rhs as u32) % <$signed>::BITS)
            }

            fn rotr(self, rhs: Self) -> Self {
                self.rotate_right((rhs as u32) % <$signed>::BITS)
            }

            fn clz(self) -> Self {
                self.leading_zeros() as $signed
            }

            fn ctz(self) -> Self {
                self.trailing_zeros() as $signed
            }

            fn popcnt(self) -> Self {
                self.count_ones() as $signed
            }
        }
    };
}

impl_int!(i32, u32);
impl_int!(i64, u64);

/// Float operations with WebAssembly semantics. `abs`, `neg` and `copysign`
/// only touch the sign bit, so NaN payloads survive them.
pub trait Float: Num + PartialOrd {
    fn wasm_min(self, rhs: Self) -> Self;
    fn wasm_max(self, rhs: Self) -> Self;
    fn wasm_nearest(self) -> Self;
    fn wasm_abs(self) -> Self;
    fn wasm_neg(self) -> Self;
    fn wasm_copysign(self, rhs: Self) -> Self;
    fn wasm_ceil(self) -> Self;
    fn wasm_floor(self) -> Self;
    fn wasm_trunc(self) -> Self;
    fn wasm_sqrt(self) -> Self;
}

macro_rules! impl_float {
    ($ty:ty, $bits:ty) => {
        impl Float for $ty {
            fn wasm_min(self, rhs: Self) -> Self {
                if self.is_nan() || rhs.is_nan() {
                    return self + rhs;
                }

                if self == 0.0 && rhs == 0.0 {
                    // -0.0 orders below 0.0
                    return <$ty>::from_bits(self.to_bits() | rhs.to_bits());
                }

                if self < rhs {
                    self
                } else {
                    rhs
                }
            }

            fn wasm_max(self, rhs: Self) -> Self {
                if self.is_nan() || rhs.is_nan() {
                    return self + rhs;
                }

                if self == 0.0 && rhs == 0.0 {
                    return <$ty>::from_bits(self.to_bits() & rhs.to_bits());
                }

                if self > rhs {
                    self
                } else {
                    rhs
                }
            }

            fn wasm_nearest(self) -> Self {
                self.round_ties_even()
            }

            fn wasm_abs(self) -> Self {
                <$ty>::from_bits(self.to_bits() & !(1 << (<$bits>::BITS - 1)))
            }

            fn wasm_neg(self) -> Self {
                <$ty>::from_bits(self.to_bits() ^ (1 << (<$bits>::BITS - 1)))
            }

            fn wasm_copysign(self, rhs: Self) -> Self {
                let sign = 1 << (<$bits>::BITS - 1);
                <$ty>::from_bits((self.to_bits() & !sign) | (rhs.to_bits() & sign))
            }

            fn wasm_ceil(self) -> Self {
                self.ceil()
            }

            fn wasm_floor(self) -> Self {
                self.floor()
            }

            fn wasm_trunc(self) -> Self {
                self.trunc()
            }

            fn wasm_sqrt(self) -> Self {
                self.sqrt()
            }
        }
    };
}

impl_float!(f32, u32);
impl_float!(f64, u64);

/// Truncates `$val` towards zero into `$int`, trapping on NaN and on
/// results outside the target range. The bounds are exclusive and exactly
/// representable in the source float type.
macro_rules! trunc {
    ($val:expr, $float:ty, $int:ty, $lo:expr, $hi:expr) => {{
        let val: $float = $val;

        if val.is_nan() {
            Err(Trap::InvalidConversionToInteger)
        } else if !(val > $lo && val < $hi) {
            Err(Trap::IntegerOverflow)
        } else {
            Ok(val.trunc() as $int)
        }
    }};
}

pub(crate) fn i32_trunc_f32(val: f32) -> Result<i32, Trap> {
    trunc!(val, f32, i32, -2147483904.0_f32, 2147483648.0_f32)
}

pub(crate) fn u32_trunc_f32(val: f32) -> Result<u32, Trap> {
    trunc!(val, f32, u32, -1.0_f32, 4294967296.0_f32)
}

pub(crate) fn i32_trunc_f64(val: f64) -> Result<i32, Trap> {
    trunc!(val, f64, i32, -2147483649.0_f64, 2147483648.0_f64)
}

pub(crate) fn u32_trunc_f64(val: f64) -> Result<u32, Trap> {
    trunc!(val, f64, u32, -1.0_f64, 4294967296.0_f64)
}

pub(crate) fn i64_trunc_f32(val: f32) -> Result<i64, Trap> {
    trunc!(
        val,
        f32,
        i64,
        -9223373136366403584.0_f32,
        9223372036854775808.0_f32
    )
}

pub(crate) fn u64_trunc_f32(val: f32) -> Result<u64, Trap> {
    trunc!(val, f32, u64, -1.0_f32, 18446744073709551616.0_f32)
}

pub(crate) fn i64_trunc_f64(val: f64) -> Result<i64, Trap> {
    trunc!(
        val,
        f64,
        i64,
        -9223372036854777856.0_f64,
        9223372036854775808.0_f64
    )
}

pub(crate) fn u64_trunc_f64(val: f64) -> Result<u64, Trap> {
    trunc!(val, f64, u64, -1.0_f64, 18446744073709551616.0_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_overflow_traps() {
        assert_eq!(i32::MIN.checked_div_signed(-1), Err(Trap::IntegerOverflow));
        assert_eq!(i64::MIN.checked_div_signed(-1), Err(Trap::IntegerOverflow));
        assert_eq!(i32::MIN.checked_rem_signed(-1), Ok(0));
        assert_eq!(7i32.checked_div_unsigned(0), Err(Trap::DivideByZero));
    }

    #[test]
    fn unsigned_ops_reinterpret_bits() {
        assert_eq!((-1i32).checked_div_unsigned(2), Ok(i32::MAX));
        assert_eq!((-8i32).shr_unsigned(1), 0x7fff_fffc);
        assert_eq!((-8i32).shr_signed(1), -4);
        assert_eq!(1i32.shl(33), 2);
    }

    #[test]
    fn float_min_max_signed_zero_and_nan() {
        assert_eq!(0.0f32.wasm_min(-0.0).to_bits(), (-0.0f32).to_bits());
        assert_eq!((-0.0f64).wasm_max(0.0).to_bits(), 0.0f64.to_bits());
        assert!(f32::NAN.wasm_min(1.0).is_nan());
        assert!(1.0f64.wasm_max(f64::NAN).is_nan());
    }

    #[test]
    fn sign_ops_preserve_nan_payload() {
        let nan = f32::from_bits(0x7fa0_0001);
        assert_eq!(nan.wasm_neg().to_bits(), 0xffa0_0001);
        assert_eq!(nan.wasm_neg().wasm_abs().to_bits(), 0x7fa0_0001);
        assert_eq!(nan.wasm_copysign(-1.0).to_bits(), 0xffa0_0001);
    }

    #[test]
    fn nearest_rounds_ties_to_even() {
        assert_eq!(2.5f64.wasm_nearest(), 2.0);
        assert_eq!(3.5f32.wasm_nearest(), 4.0);
        assert_eq!((-0.5f64).wasm_nearest().to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn trapping_truncation() {
        assert_eq!(i32_trunc_f32(-2147483648.0), Ok(i32::MIN));
        assert_eq!(i32_trunc_f32(2147483648.0), Err(Trap::IntegerOverflow));
        assert_eq!(u32_trunc_f64(-0.9), Ok(0));
        assert_eq!(u32_trunc_f64(-1.0), Err(Trap::IntegerOverflow));
        assert_eq!(
            i64_trunc_f64(f64::NAN),
            Err(Trap::InvalidConversionToInteger)
        );
        assert_eq!(u64_trunc_f32(1.5), Ok(1));
    }
}
