//! Target values
//!
//! A [`Tarval`] is a constant of the target machine: an integer truncated to
//! its mode's width, or a float carried as its bit pattern. Arithmetic wraps
//! at the mode width, which makes the folder independent of host integer
//! semantics. Equality and hashing are bit-exact, so `-0.0` and `+0.0` are
//! distinct values (the folder relies on this for float neutral elements).

use super::Mode;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A constant value of a data mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tarval {
    mode: Mode,
    bits: u64,
}

impl Tarval {
    /// Build a value from a host integer, truncating to the mode width.
    pub fn new(mode: Mode, value: i64) -> Self {
        debug_assert!(mode.is_int(), "integer tarval of mode {mode}");
        Self {
            mode,
            bits: truncate(mode, value as u64),
        }
    }

    pub fn from_f32(value: f32) -> Self {
        Self {
            mode: Mode::F32,
            bits: value.to_bits() as u64,
        }
    }

    pub fn from_f64(value: f64) -> Self {
        Self {
            mode: Mode::F64,
            bits: value.to_bits(),
        }
    }

    pub fn bool_val(value: bool) -> Self {
        Self {
            mode: Mode::B,
            bits: value as u64,
        }
    }

    pub fn b_true() -> Self {
        Self::bool_val(true)
    }

    pub fn b_false() -> Self {
        Self::bool_val(false)
    }

    /// The neutral element of addition for a mode.
    pub fn null(mode: Mode) -> Self {
        if mode.is_float() {
            Self { mode, bits: 0 }
        } else {
            Self::new(mode, 0)
        }
    }

    /// The neutral element of multiplication for a mode.
    pub fn one(mode: Mode) -> Self {
        if mode == Mode::F32 {
            Self::from_f32(1.0)
        } else if mode == Mode::F64 {
            Self::from_f64(1.0)
        } else {
            Self::new(mode, 1)
        }
    }

    /// The neutral element of And for a mode (all bits set).
    pub fn all_one(mode: Mode) -> Self {
        debug_assert!(mode.is_int());
        Self {
            mode,
            bits: truncate(mode, u64::MAX),
        }
    }

    pub fn mode(self) -> Mode {
        self.mode
    }

    pub fn is_null(self) -> bool {
        self == Self::null(self.mode)
    }

    pub fn is_one(self) -> bool {
        self == Self::one(self.mode)
    }

    pub fn is_all_one(self) -> bool {
        self.mode.is_int() && self == Self::all_one(self.mode)
    }

    pub fn is_true(self) -> bool {
        self.mode == Mode::B && self.bits != 0
    }

    pub fn is_false(self) -> bool {
        self.mode == Mode::B && self.bits == 0
    }

    /// Signed interpretation of the value; used for switch table lookup.
    pub fn as_long(self) -> i64 {
        if self.mode.is_signed() {
            sign_extend(self.mode, self.bits)
        } else {
            self.bits as i64
        }
    }

    pub fn raw_bits(self) -> u64 {
        self.bits
    }

    fn f64_value(self) -> f64 {
        match self.mode {
            Mode::F32 => f32::from_bits(self.bits as u32) as f64,
            Mode::F64 => f64::from_bits(self.bits),
            _ => unreachable!("float access on {}", self.mode),
        }
    }

    fn from_float(mode: Mode, value: f64) -> Self {
        match mode {
            Mode::F32 => Self::from_f32(value as f32),
            Mode::F64 => Self::from_f64(value),
            _ => unreachable!("float result of mode {mode}"),
        }
    }

    pub fn add(self, other: Tarval) -> Tarval {
        debug_assert_eq!(self.mode, other.mode);
        if self.mode.is_float() {
            Self::from_float(self.mode, self.f64_value() + other.f64_value())
        } else {
            self.wrap(self.bits.wrapping_add(other.bits))
        }
    }

    pub fn sub(self, other: Tarval) -> Tarval {
        debug_assert_eq!(self.mode, other.mode);
        if self.mode.is_float() {
            Self::from_float(self.mode, self.f64_value() - other.f64_value())
        } else {
            self.wrap(self.bits.wrapping_sub(other.bits))
        }
    }

    pub fn mul(self, other: Tarval) -> Tarval {
        debug_assert_eq!(self.mode, other.mode);
        if self.mode.is_float() {
            Self::from_float(self.mode, self.f64_value() * other.f64_value())
        } else {
            self.wrap(self.bits.wrapping_mul(other.bits))
        }
    }

    pub fn and(self, other: Tarval) -> Tarval {
        debug_assert_eq!(self.mode, other.mode);
        self.wrap(self.bits & other.bits)
    }

    pub fn or(self, other: Tarval) -> Tarval {
        debug_assert_eq!(self.mode, other.mode);
        self.wrap(self.bits | other.bits)
    }

    pub fn eor(self, other: Tarval) -> Tarval {
        debug_assert_eq!(self.mode, other.mode);
        self.wrap(self.bits ^ other.bits)
    }

    /// Left shift; an amount at or above the width yields zero.
    pub fn shl(self, amount: Tarval) -> Tarval {
        let width = self.width();
        let n = amount.bits;
        if n >= width as u64 {
            Self::null(self.mode)
        } else {
            self.wrap(self.bits << n)
        }
    }

    /// Logical right shift.
    pub fn shr(self, amount: Tarval) -> Tarval {
        let width = self.width();
        let n = amount.bits;
        if n >= width as u64 {
            Self::null(self.mode)
        } else {
            self.wrap(self.bits >> n)
        }
    }

    /// Arithmetic right shift (the sign bit is replicated).
    pub fn shrs(self, amount: Tarval) -> Tarval {
        let width = self.width();
        let signed = sign_extend(self.mode, self.bits);
        let n = (amount.bits).min(width as u64 - 1);
        self.wrap((signed >> n) as u64)
    }

    /// Rotate left; the amount is taken modulo the width.
    pub fn rotl(self, amount: Tarval) -> Tarval {
        let width = self.width() as u64;
        let n = amount.bits % width;
        if n == 0 {
            return self;
        }
        self.wrap((self.bits << n) | (self.bits >> (width - n)))
    }

    /// Convert to another mode: truncate or extend integers by the source
    /// signedness, floats between the two float widths.
    pub fn convert(self, to: Mode) -> Option<Tarval> {
        if self.mode == to {
            return Some(self);
        }
        match (self.mode.is_float(), to.is_float()) {
            (false, false) => {
                let v = if self.mode.is_signed() {
                    sign_extend(self.mode, self.bits) as u64
                } else {
                    self.bits
                };
                Some(Tarval {
                    mode: to,
                    bits: truncate(to, v),
                })
            }
            (true, true) => Some(Self::from_float(to, self.f64_value())),
            _ => None,
        }
    }

    /// Total order of two values of the same mode, `None` for unordered floats.
    pub fn compare(self, other: Tarval) -> Option<Ordering> {
        debug_assert_eq!(self.mode, other.mode);
        if self.mode.is_float() {
            self.f64_value().partial_cmp(&other.f64_value())
        } else if self.mode.is_signed() {
            Some(sign_extend(self.mode, self.bits).cmp(&sign_extend(self.mode, other.bits)))
        } else {
            Some(self.bits.cmp(&other.bits))
        }
    }

    fn width(self) -> u32 {
        self.mode.bits().expect("data mode")
    }

    fn wrap(self, bits: u64) -> Tarval {
        Tarval {
            mode: self.mode,
            bits: truncate(self.mode, bits),
        }
    }
}

fn truncate(mode: Mode, bits: u64) -> u64 {
    let width = mode.bits().expect("data mode");
    if width >= 64 {
        bits
    } else {
        bits & ((1u64 << width) - 1)
    }
}

fn sign_extend(mode: Mode, bits: u64) -> i64 {
    let width = mode.bits().expect("data mode");
    if width >= 64 {
        bits as i64
    } else {
        let shift = 64 - width;
        ((bits << shift) as i64) >> shift
    }
}

impl fmt::Display for Tarval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Mode::B => write!(f, "{}", self.bits != 0),
            Mode::F32 | Mode::F64 => write!(f, "{}{}", self.f64_value(), self.mode),
            m if m.is_signed() => write!(f, "{}{}", self.as_long(), m),
            m => write!(f, "{}{}", self.bits, m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_arithmetic() {
        let a = Tarval::new(Mode::U8, 200);
        let b = Tarval::new(Mode::U8, 100);
        assert_eq!(a.add(b), Tarval::new(Mode::U8, 44));
        assert_eq!(b.sub(a), Tarval::new(Mode::U8, 156));
        assert_eq!(a.mul(b), Tarval::new(Mode::U8, 32));
    }

    #[test]
    fn test_signed_values() {
        let v = Tarval::new(Mode::I16, -1);
        assert_eq!(v.as_long(), -1);
        assert!(v.is_all_one());
        assert_eq!(v.compare(Tarval::new(Mode::I16, 0)), Some(Ordering::Less));
        // the same bit pattern is large when unsigned
        let u = Tarval::new(Mode::U16, 0xffff);
        assert_eq!(
            u.compare(Tarval::new(Mode::U16, 0)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_neutral_elements() {
        assert!(Tarval::null(Mode::I32).is_null());
        assert!(Tarval::one(Mode::I32).is_one());
        assert!(Tarval::all_one(Mode::U64).is_all_one());
        assert!(Tarval::one(Mode::F64).is_one());
        // -0.0 is not the additive neutral element we test against
        assert!(!Tarval::from_f64(-0.0).is_null());
        assert!(Tarval::from_f64(0.0).is_null());
    }

    #[test]
    fn test_shifts() {
        let v = Tarval::new(Mode::U8, 0b1000_0001);
        let one = Tarval::new(Mode::U8, 1);
        assert_eq!(v.shl(one), Tarval::new(Mode::U8, 0b0000_0010));
        assert_eq!(v.shr(one), Tarval::new(Mode::U8, 0b0100_0000));
        assert_eq!(v.rotl(one), Tarval::new(Mode::U8, 0b0000_0011));
        let s = Tarval::new(Mode::I8, -2);
        assert_eq!(s.shrs(one), Tarval::new(Mode::I8, -1));
        // over-shifting clears logical shifts
        let big = Tarval::new(Mode::U8, 9);
        assert!(v.shl(big).is_null());
    }

    #[test]
    fn test_convert() {
        let v = Tarval::new(Mode::I8, -1);
        assert_eq!(v.convert(Mode::I32), Some(Tarval::new(Mode::I32, -1)));
        let u = Tarval::new(Mode::U8, 0xff);
        assert_eq!(u.convert(Mode::U32), Some(Tarval::new(Mode::U32, 0xff)));
        assert_eq!(Tarval::from_f64(1.5).convert(Mode::I32), None);
    }

    #[test]
    fn test_float_arithmetic() {
        let a = Tarval::from_f64(1.5);
        let b = Tarval::from_f64(2.25);
        assert_eq!(a.add(b), Tarval::from_f64(3.75));
        assert_eq!(a.compare(b), Some(Ordering::Less));
        let nan = Tarval::from_f64(f64::NAN);
        assert_eq!(nan.compare(nan), None);
    }
}
