//! Arbitrary-precision number representation.
//!
//! Numbers carry an `i64`/`f64` fast path and fall back to the lexed decimal
//! text for anything else. All comparisons go through a normalized decimal
//! form so `1`, `1.0` and a text-backed `1` are one equality class.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

/// Numeric value of the policy value domain.
#[derive(Debug, Clone)]
pub enum Number {
    /// Signed 64-bit integer fast path.
    Int(i64),
    /// Binary float fast path.
    Float(f64),
    /// Decimal text as lexed by the compiler, kept verbatim so bytecode
    /// number references round-trip exactly.
    Big(Arc<str>),
}

impl Number {
    /// Exact integer value, if this number is one and fits `i64`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            Self::Big(_) => self.decimal().and_then(|d| d.as_i64()),
        }
    }

    /// Closest `f64` rendition of this number.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Big(s) => s.parse().unwrap_or(f64::NAN),
        }
    }

    /// True when the number is a whole value.
    pub fn is_integer(&self) -> bool {
        match self {
            Self::Int(_) => true,
            Self::Float(f) => f.fract() == 0.0,
            Self::Big(_) => self.decimal().map(|d| d.is_integer()).unwrap_or(false),
        }
    }

    /// Exact big-integer value, if the number is whole.
    pub fn as_big_int(&self) -> Option<BigInt> {
        self.decimal().and_then(|d| d.as_big_int())
    }

    pub(crate) fn decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(i) => Some(Decimal::from_i64(*i)),
            Self::Float(f) => Decimal::from_f64(*f),
            Self::Big(s) => Decimal::parse(s),
        }
    }
}

impl From<i64> for Number {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Number {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) if a == b => true,
            _ => self.cmp(other) == Ordering::Equal,
        }
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Self::Int(a), Self::Int(b)) = (self, other) {
            return a.cmp(b);
        }
        match (self.decimal(), other.decimal()) {
            (Some(a), Some(b)) => a.cmp(&b),
            // Non-finite floats order by their bit pattern, after all
            // finite values. They never equal a finite number.
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (None, None) => self.as_f64().to_bits().cmp(&other.as_f64().to_bits()),
        }
    }
}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.decimal() {
            Some(d) => d.hash(state),
            None => self.as_f64().to_bits().hash(state),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Big(s) => write!(f, "{s}"),
        }
    }
}

/// Normalized decimal: `mant * 10^exp` with the mantissa stripped of
/// trailing zeros, so each numeric value has exactly one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Decimal {
    mant: BigInt,
    exp: i64,
}

impl Decimal {
    fn normalize(mut mant: BigInt, mut exp: i64) -> Self {
        if mant.is_zero() {
            return Self {
                mant,
                exp: 0,
            };
        }
        let ten = BigInt::from(10);
        while (&mant % &ten).is_zero() {
            mant /= &ten;
            exp = exp.saturating_add(1);
        }
        Self {
            mant,
            exp,
        }
    }

    fn from_i64(i: i64) -> Self {
        Self::normalize(BigInt::from(i), 0)
    }

    fn from_f64(f: f64) -> Option<Self> {
        if !f.is_finite() {
            return None;
        }
        // The shortest round-trip rendition is the decimal the producer
        // would have lexed for this float.
        Self::parse(&format!("{f}"))
    }

    /// Parse a JSON-style decimal literal, optionally signed, with an
    /// optional fraction and exponent.
    pub(crate) fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (neg, rest) = match *s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (num, exp_part) = match rest.find(['e', 'E']) {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        let (int_part, frac_part) = match num.find('.') {
            Some(i) => (&num[..i], &num[i + 1..]),
            None => (num, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let digits = format!("{int_part}{frac_part}");
        let mut mant: BigInt = digits.parse().ok()?;
        if neg {
            mant = -mant;
        }
        let mut exp = -(frac_part.len() as i64);
        if let Some(e) = exp_part {
            let e: i64 = e.parse().ok()?;
            exp = exp.checked_add(e)?;
        }
        Some(Self::normalize(mant, exp))
    }

    fn is_integer(&self) -> bool {
        self.exp >= 0 || self.mant.is_zero()
    }

    fn as_big_int(&self) -> Option<BigInt> {
        if !self.is_integer() {
            return None;
        }
        if self.exp > 4096 {
            // An integer this wide cannot participate in any meaningful
            // range or index operation.
            return None;
        }
        Some(&self.mant * BigInt::from(10).pow(self.exp as u32))
    }

    fn as_i64(&self) -> Option<i64> {
        self.as_big_int()?.to_i64()
    }

    /// Position of the most significant digit relative to the decimal
    /// point. Zero mantissas never reach this.
    fn magnitude(&self) -> i64 {
        let digits = self.mant.abs().to_string().len() as i64;
        digits.saturating_add(self.exp)
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (sa, sb) = (self.mant.sign(), other.mant.sign());
        if sa != sb {
            return match (sa, sb) {
                (Sign::Minus, _) => Ordering::Less,
                (_, Sign::Minus) => Ordering::Greater,
                (Sign::NoSign, Sign::Plus) => Ordering::Less,
                (Sign::Plus, Sign::NoSign) => Ordering::Greater,
                _ => Ordering::Equal,
            };
        }
        if sa == Sign::NoSign {
            return Ordering::Equal;
        }
        let (ma, mb) = (self.magnitude(), other.magnitude());
        if ma != mb {
            let by_magnitude = ma.cmp(&mb);
            return if sa == Sign::Minus {
                by_magnitude.reverse()
            } else {
                by_magnitude
            };
        }
        // Same sign and magnitude: align exponents and compare mantissas.
        // The exponent gap is bounded by the digit-count difference here.
        let diff = self.exp - other.exp;
        if diff >= 0 {
            let scaled = &self.mant * BigInt::from(10).pow(diff as u32);
            scaled.cmp(&other.mant)
        } else {
            let scaled = &other.mant * BigInt::from(10).pow((-diff) as u32);
            self.mant.cmp(&scaled)
        }
    }
}
