//! Numbers.
//!
//! Fixnums overflow into bignums, exact division produces normalized rationals and
//! any flonum operand makes the result inexact. Complex numbers are only carried
//! as literals; arithmetic on them is not supported.

use std::{cmp::Ordering, fmt, rc::Rc};

use num::{BigInt, BigRational, FromPrimitive, One, Signed, ToPrimitive, Zero};

use super::error::{RuntimeError, ScmResult};

#[derive(Clone, Debug)]
pub enum Number {
    Fixnum(i64),
    Bignum(Rc<BigInt>),
    Rational(Rc<BigRational>),
    Flonum(f64),
    Complex(Rc<(Number, Number)>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

impl Number {
    /// Demotes a bignum to a fixnum when it fits.
    pub fn from_bigint(n: BigInt) -> Number {
        match n.to_i64() {
            Some(n) => Number::Fixnum(n),
            None => Number::Bignum(Rc::new(n)),
        }
    }

    /// Demotes an integral rational to an integer.
    pub fn from_rational(r: BigRational) -> Number {
        if r.is_integer() {
            Number::from_bigint(r.to_integer())
        } else {
            Number::Rational(Rc::new(r))
        }
    }

    /// Parses a decimal integer literal, producing a bignum if it does not fit.
    pub fn parse_integer(s: &str) -> Option<Number> {
        if let Ok(n) = s.parse::<i64>() {
            return Some(Number::Fixnum(n));
        }
        s.parse::<BigInt>().ok().map(Number::from_bigint)
    }

    pub fn make_rational(numerator: Number, denominator: Number) -> ScmResult<Number> {
        binary(ArithOp::Div, &numerator, &denominator)
    }

    pub fn make_complex(real: Number, imag: Number) -> Number {
        Number::Complex(Rc::new((real, imag)))
    }

    pub fn is_exact(&self) -> bool {
        match self {
            Number::Fixnum(_) | Number::Bignum(_) | Number::Rational(_) => true,
            Number::Flonum(_) => false,
            Number::Complex(c) => c.0.is_exact() && c.1.is_exact(),
        }
    }

    pub fn is_integer(&self) -> bool {
        match self {
            Number::Fixnum(_) | Number::Bignum(_) => true,
            Number::Flonum(f) => f.is_finite() && f.fract() == 0.0,
            Number::Rational(_) | Number::Complex(_) => false,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Fixnum(n) => *n == 0,
            Number::Bignum(n) => n.is_zero(),
            Number::Rational(r) => r.is_zero(),
            Number::Flonum(f) => *f == 0.0,
            Number::Complex(c) => c.0.is_zero() && c.1.is_zero(),
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Number::Fixnum(n) => Some(*n as f64),
            Number::Bignum(n) => n.to_f64(),
            Number::Rational(r) => r.to_f64(),
            Number::Flonum(f) => Some(*f),
            Number::Complex(_) => None,
        }
    }

    fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Number::Fixnum(n) => Some(BigInt::from(*n)),
            Number::Bignum(n) => Some((**n).clone()),
            _ => None,
        }
    }

    fn to_rational(&self) -> Option<BigRational> {
        match self {
            Number::Rational(r) => Some((**r).clone()),
            _ => self.to_bigint().map(BigRational::from_integer),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Number::Fixnum(_) => 0,
            Number::Bignum(_) => 1,
            Number::Rational(_) => 2,
            Number::Flonum(_) => 3,
            Number::Complex(_) => 4,
        }
    }
}

pub fn binary(op: ArithOp, x: &Number, y: &Number) -> ScmResult<Number> {
    if let (Number::Fixnum(a), Number::Fixnum(b)) = (x, y) {
        let result = match op {
            ArithOp::Add => a.checked_add(*b),
            ArithOp::Sub => a.checked_sub(*b),
            ArithOp::Mul => a.checked_mul(*b),
            ArithOp::Div => {
                if *b == 0 {
                    return Err(RuntimeError::new("/: division by zero"));
                }
                match a.checked_rem(*b) {
                    Some(0) => a.checked_div(*b),
                    _ => None,
                }
            }
        };
        if let Some(n) = result {
            return Ok(Number::Fixnum(n));
        }
    }

    match x.rank().max(y.rank()) {
        4 => Err(RuntimeError::new(format!(
            "{}: complex arithmetic is not supported",
            op.name()
        ))),
        3 => {
            let (a, b) = (x.to_f64().unwrap_or(f64::NAN), y.to_f64().unwrap_or(f64::NAN));
            Ok(Number::Flonum(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            }))
        }
        rank if rank <= 1 && op != ArithOp::Div => {
            let (a, b) = (x.to_bigint(), y.to_bigint());
            let (Some(a), Some(b)) = (a, b) else {
                unreachable!("integers always convert to bigints")
            };
            Ok(Number::from_bigint(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                _ => a * b,
            }))
        }
        _ => {
            let (Some(a), Some(b)) = (x.to_rational(), y.to_rational()) else {
                unreachable!("exact numbers always convert to rationals")
            };
            if op == ArithOp::Div && b.is_zero() {
                return Err(RuntimeError::new("/: division by zero"));
            }
            Ok(Number::from_rational(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            }))
        }
    }
}

/// Numeric comparison. Returns `None` when either side is complex or NaN.
pub fn compare(x: &Number, y: &Number) -> Option<Ordering> {
    match (x, y) {
        (Number::Fixnum(a), Number::Fixnum(b)) => Some(a.cmp(b)),
        (Number::Complex(_), _) | (_, Number::Complex(_)) => None,
        (Number::Flonum(_), _) | (_, Number::Flonum(_)) => x.to_f64()?.partial_cmp(&y.to_f64()?),
        _ => Some(x.to_rational()?.cmp(&y.to_rational()?)),
    }
}

pub fn quotient(x: &Number, y: &Number, remainder: bool) -> ScmResult<Number> {
    let name = if remainder { "remainder" } else { "quotient" };
    if y.is_zero() {
        return Err(RuntimeError::new(format!("{}: undefined for 0", name)));
    }
    match (x, y) {
        (Number::Fixnum(a), Number::Fixnum(b)) if !(*a == i64::MIN && *b == -1) => {
            Ok(Number::Fixnum(if remainder { a % b } else { a / b }))
        }
        (Number::Flonum(_), _) | (_, Number::Flonum(_)) if x.is_integer() && y.is_integer() => {
            let (a, b) = (x.to_f64().unwrap_or(0.0), y.to_f64().unwrap_or(1.0));
            Ok(Number::Flonum(if remainder { a % b } else { (a / b).trunc() }))
        }
        _ => match (x.to_bigint(), y.to_bigint()) {
            (Some(a), Some(b)) => Ok(Number::from_bigint(if remainder { a % b } else { a / b })),
            _ => Err(RuntimeError::new(format!("{}: expected integer arguments", name))),
        },
    }
}

pub fn abs(x: &Number) -> ScmResult<Number> {
    Ok(match x {
        Number::Fixnum(n) => match n.checked_abs() {
            Some(n) => Number::Fixnum(n),
            None => Number::from_bigint(BigInt::from(*n).abs()),
        },
        Number::Bignum(n) => Number::from_bigint(n.abs()),
        Number::Rational(r) => Number::Rational(Rc::new(r.abs())),
        Number::Flonum(f) => Number::Flonum(f.abs()),
        Number::Complex(_) => return Err(RuntimeError::new("abs: expected real number")),
    })
}

pub fn from_f64_exact(f: f64) -> Option<Number> {
    BigRational::from_f64(f).map(Number::from_rational)
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Complex(a), Number::Complex(b)) => a.0 == b.0 && a.1 == b.1,
            _ => self.is_exact() == other.is_exact() && compare(self, other) == Some(Ordering::Equal),
        }
    }
}

fn fmt_flonum(f: f64, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    if f.is_nan() {
        write!(out, "+nan.0")
    } else if f.is_infinite() {
        write!(out, "{}inf.0", if f > 0.0 { "+" } else { "-" })
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        write!(out, "{:.1}", f)
    } else {
        write!(out, "{}", f)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Fixnum(n) => write!(f, "{}", n),
            Number::Bignum(n) => write!(f, "{}", n),
            Number::Rational(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Number::Flonum(x) => fmt_flonum(*x, f),
            Number::Complex(c) => {
                write!(f, "{}", c.0)?;
                let negative = match &c.1 {
                    Number::Fixnum(n) => *n < 0,
                    Number::Bignum(n) => n.is_negative(),
                    Number::Rational(r) => r.is_negative(),
                    Number::Flonum(x) => x.is_sign_negative() || x.is_nan() || x.is_infinite(),
                    Number::Complex(_) => false,
                };
                if !negative {
                    write!(f, "+")?;
                }
                write!(f, "{}i", c.1)
            }
        }
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number::Fixnum(n)
    }
}

impl From<f64> for Number {
    fn from(f: f64) -> Self {
        Number::Flonum(f)
    }
}

pub fn one() -> Number {
    Number::from_bigint(BigInt::one())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixnum_overflow_promotes_to_bignum() {
        let max = Number::Fixnum(i64::MAX);
        let sum = binary(ArithOp::Add, &max, &one()).unwrap();
        assert!(matches!(sum, Number::Bignum(_)));
        let back = binary(ArithOp::Sub, &sum, &one()).unwrap();
        assert!(matches!(back, Number::Fixnum(n) if n == i64::MAX));
    }

    #[test]
    fn exact_division_normalizes() {
        let r = binary(ArithOp::Div, &Number::Fixnum(6), &Number::Fixnum(4)).unwrap();
        assert_eq!(r.to_string(), "3/2");
        let n = binary(ArithOp::Mul, &r, &Number::Fixnum(2)).unwrap();
        assert!(matches!(n, Number::Fixnum(3)));
        assert!(binary(ArithOp::Div, &Number::Fixnum(1), &Number::Fixnum(0)).is_err());
    }

    #[test]
    fn flonum_contaminates() {
        let r = binary(ArithOp::Add, &Number::Fixnum(1), &Number::Flonum(0.5)).unwrap();
        assert_eq!(r.to_string(), "1.5");
        assert_eq!(Number::Flonum(2.0).to_string(), "2.0");
        assert_eq!(Number::Flonum(f64::NEG_INFINITY).to_string(), "-inf.0");
    }

    #[test]
    fn big_literals_parse_losslessly() {
        let n = Number::parse_integer("123456789012345678901234567890").unwrap();
        assert_eq!(n.to_string(), "123456789012345678901234567890");
        assert!(matches!(Number::parse_integer("42"), Some(Number::Fixnum(42))));
    }

    #[test]
    fn comparisons_cross_representations() {
        let half = Number::make_rational(Number::Fixnum(1), Number::Fixnum(2)).unwrap();
        assert_eq!(compare(&half, &Number::Flonum(0.5)), Some(Ordering::Equal));
        assert_eq!(compare(&half, &Number::Fixnum(1)), Some(Ordering::Less));
        assert_ne!(Number::Flonum(1.0), Number::Fixnum(1));
    }
}
