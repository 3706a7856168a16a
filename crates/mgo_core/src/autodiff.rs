use crate::traits::Scalar;
use num_complex::Complex64;
use num_traits::{One, Zero};
use std::cell::RefCell;
use std::ops::{Add, Div, Mul, Neg, Sub};

thread_local! {
    static DUAL_SCRATCH: RefCell<Vec<HyperDual>> = RefCell::new(Vec::with_capacity(64));
}

/// Complex hyper-dual number for forward-mode second derivatives.
/// re: value
/// e1, e2: infinitesimal parts (ε₁² = ε₂² = 0)
/// e12: mixed part, carries ∂²f/∂a∂b when ε₁ seeds a and ε₂ seeds b
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HyperDual {
    pub re: Complex64,
    pub e1: Complex64,
    pub e2: Complex64,
    pub e12: Complex64,
}

impl HyperDual {
    pub fn new(re: Complex64, e1: Complex64, e2: Complex64, e12: Complex64) -> Self {
        Self { re, e1, e2, e12 }
    }

    pub fn constant(re: Complex64) -> Self {
        Self::new(re, Complex64::zero(), Complex64::zero(), Complex64::zero())
    }

    /// Seeds a coordinate with ε₁ and/or ε₂.
    pub fn seeded(re: Complex64, first: bool, second: bool) -> Self {
        let (one, zero) = (Complex64::one(), Complex64::zero());
        Self::new(
            re,
            if first { one } else { zero },
            if second { one } else { zero },
            zero,
        )
    }

    /// Applies f given f(a), f'(a), f''(a).
    fn chain(self, f: Complex64, df: Complex64, d2f: Complex64) -> Self {
        Self::new(
            f,
            df * self.e1,
            df * self.e2,
            df * self.e12 + d2f * self.e1 * self.e2,
        )
    }

    fn recip(self) -> Self {
        let inv = self.re.inv();
        self.chain(inv, -inv * inv, 2.0 * inv * inv * inv)
    }

    pub fn is_finite(&self) -> bool {
        self.re.is_finite() && self.e1.is_finite() && self.e2.is_finite() && self.e12.is_finite()
    }
}

impl Zero for HyperDual {
    fn zero() -> Self {
        Self::constant(Complex64::zero())
    }

    fn is_zero(&self) -> bool {
        self.re.is_zero() && self.e1.is_zero() && self.e2.is_zero() && self.e12.is_zero()
    }
}

impl One for HyperDual {
    fn one() -> Self {
        Self::constant(Complex64::one())
    }
}

impl Add for HyperDual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.re + rhs.re,
            self.e1 + rhs.e1,
            self.e2 + rhs.e2,
            self.e12 + rhs.e12,
        )
    }
}

impl Sub for HyperDual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.re - rhs.re,
            self.e1 - rhs.e1,
            self.e2 - rhs.e2,
            self.e12 - rhs.e12,
        )
    }
}

impl Mul for HyperDual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.re * rhs.re,
            self.re * rhs.e1 + self.e1 * rhs.re,
            self.re * rhs.e2 + self.e2 * rhs.re,
            self.re * rhs.e12 + self.e1 * rhs.e2 + self.e2 * rhs.e1 + self.e12 * rhs.re,
        )
    }
}

impl Div for HyperDual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        self * rhs.recip()
    }
}

impl Neg for HyperDual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.re, -self.e1, -self.e2, -self.e12)
    }
}

impl Scalar for HyperDual {
    fn from_complex(value: Complex64) -> Self {
        Self::constant(value)
    }

    fn value(&self) -> Complex64 {
        self.re
    }

    fn exp(self) -> Self {
        let e = self.re.exp();
        self.chain(e, e, e)
    }

    fn ln(self) -> Self {
        let inv = self.re.inv();
        self.chain(self.re.ln(), inv, -inv * inv)
    }

    fn sqrt(self) -> Self {
        let s = self.re.sqrt();
        let ds = 0.5 / s;
        self.chain(s, ds, -ds / (2.0 * self.re))
    }

    fn sin(self) -> Self {
        let (s, c) = (self.re.sin(), self.re.cos());
        self.chain(s, c, -s)
    }

    fn cos(self) -> Self {
        let (s, c) = (self.re.sin(), self.re.cos());
        self.chain(c, -s, -c)
    }

    fn powi(self, n: i32) -> Self {
        let zero = Complex64::zero();
        let nf = n as f64;
        let df = if n == 0 {
            zero
        } else {
            nf * self.re.powi(n - 1)
        };
        let d2f = if n == 0 || n == 1 {
            zero
        } else {
            nf * (nf - 1.0) * self.re.powi(n - 2)
        };
        self.chain(self.re.powi(n), df, d2f)
    }

    fn with_scratch<R>(f: impl FnOnce(&mut Vec<Self>) -> R) -> R {
        DUAL_SCRATCH.with(|cell| match cell.try_borrow_mut() {
            Ok(mut stack) => f(&mut stack),
            Err(_) => f(&mut Vec::new()),
        })
    }
}
