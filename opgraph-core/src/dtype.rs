use std::{
    fmt::{Debug, Display},
    ops::{Add, Div, Mul, Sub},
};

#[cfg(feature = "bfloat")]
use half::bf16;
#[cfg(feature = "half")]
use half::f16;

/// Runtime tag for the element type recorded in every tensor descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    U8,
    U32,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl ElementType {
    pub const fn size_in_bytes(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F16 | Self::BF16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait DTypeOps:
    Copy
    + PartialOrd
    + Add<Output = Self>
    + Div<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
{
}

/// Marker trait for tensor datatypes.
pub trait DType: Debug + Clone + DTypeOps + Send + Sync + 'static {
    const ZERO: Self;
    const ONE: Self;
    /// Smallest representable value, the identity of a max reduction.
    const LOWEST: Self;
    const NAME: &'static str;
    const ELEMENT_TYPE: ElementType;
    const INTEGRAL: bool;
    const SIGNED: bool;

    fn to_f64(&self) -> f64;
    fn from_f64(x: f64) -> Self;

    /// Kernel arithmetic. Integral types wrap on overflow.
    fn elem_add(self, rhs: Self) -> Self;
    fn elem_sub(self, rhs: Self) -> Self;
    fn elem_mul(self, rhs: Self) -> Self;
    fn elem_neg(self) -> Self;
    /// `None` for integral division by zero or `MIN / -1`.
    fn elem_div(self, rhs: Self) -> Option<Self>;
}

macro_rules! elem_ops {
    (int) => {
        fn elem_add(self, rhs: Self) -> Self {
            self.wrapping_add(rhs)
        }
        fn elem_sub(self, rhs: Self) -> Self {
            self.wrapping_sub(rhs)
        }
        fn elem_mul(self, rhs: Self) -> Self {
            self.wrapping_mul(rhs)
        }
        fn elem_neg(self) -> Self {
            self.wrapping_neg()
        }
        fn elem_div(self, rhs: Self) -> Option<Self> {
            self.checked_div(rhs)
        }
    };
    (float) => {
        fn elem_add(self, rhs: Self) -> Self {
            self + rhs
        }
        fn elem_sub(self, rhs: Self) -> Self {
            self - rhs
        }
        fn elem_mul(self, rhs: Self) -> Self {
            self * rhs
        }
        fn elem_neg(self) -> Self {
            -self
        }
        fn elem_div(self, rhs: Self) -> Option<Self> {
            Some(self / rhs)
        }
    };
}

macro_rules! dtype {
    ($rt:ident, $zero:expr, $one:expr, $lowest:expr, $elem:ident, $integral:expr, $signed:expr, $ops:ident) => {
        impl DTypeOps for $rt {}
        impl DType for $rt {
            const ZERO: $rt = $zero;
            const ONE: $rt = $one;
            const LOWEST: $rt = $lowest;
            const NAME: &'static str = stringify!($rt);
            const ELEMENT_TYPE: ElementType = ElementType::$elem;
            const INTEGRAL: bool = $integral;
            const SIGNED: bool = $signed;

            fn to_f64(&self) -> f64 {
                *self as f64
            }
            fn from_f64(x: f64) -> Self {
                x as $rt
            }

            elem_ops!($ops);
        }
    };
}

dtype!(u8, 0u8, 1u8, u8::MIN, U8, true, false, int);
dtype!(u32, 0u32, 1u32, u32::MIN, U32, true, false, int);
dtype!(i32, 0i32, 1i32, i32::MIN, I32, true, true, int);
dtype!(i64, 0i64, 1i64, i64::MIN, I64, true, true, int);
dtype!(f32, 0f32, 1f32, f32::NEG_INFINITY, F32, false, true, float);
dtype!(f64, 0f64, 1f64, f64::NEG_INFINITY, F64, false, true, float);

#[cfg(feature = "half")]
impl DTypeOps for f16 {}
#[cfg(feature = "half")]
impl DType for f16 {
    const ZERO: f16 = f16::from_f64_const(0.0);
    const ONE: f16 = f16::from_f64_const(1.0);
    const LOWEST: f16 = f16::NEG_INFINITY;
    const NAME: &'static str = "f16";
    const ELEMENT_TYPE: ElementType = ElementType::F16;
    const INTEGRAL: bool = false;
    const SIGNED: bool = true;

    fn to_f64(&self) -> f64 {
        self.to_f64_const()
    }
    fn from_f64(x: f64) -> Self {
        Self::from_f64_const(x)
    }

    elem_ops!(float);
}

#[cfg(feature = "bfloat")]
impl DTypeOps for bf16 {}
#[cfg(feature = "bfloat")]
impl DType for bf16 {
    const ZERO: bf16 = bf16::from_f64_const(0.0);
    const ONE: bf16 = bf16::from_f64_const(1.0);
    const LOWEST: bf16 = bf16::NEG_INFINITY;
    const NAME: &'static str = "bf16";
    const ELEMENT_TYPE: ElementType = ElementType::BF16;
    const INTEGRAL: bool = false;
    const SIGNED: bool = true;

    fn to_f64(&self) -> f64 {
        self.to_f64_const()
    }
    fn from_f64(x: f64) -> Self {
        Self::from_f64_const(x)
    }

    elem_ops!(float);
}
