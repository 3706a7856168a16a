use crate::error::{DomainError, MgoError};
use num_complex::Complex64;
use std::cell::RefCell;
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A trait for types a symbol can be evaluated on.
/// Implemented by `Complex64` for plain values and by `HyperDual` for exact
/// first and second derivatives. Every method must be the holomorphic
/// extension of its real counterpart.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Lifts a constant (zero derivative parts).
    fn from_complex(value: Complex64) -> Self;

    fn from_f64(value: f64) -> Self {
        Self::from_complex(Complex64::new(value, 0.0))
    }

    /// The primal value, used for domain checks.
    fn value(&self) -> Complex64;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn powi(self, n: i32) -> Self;

    /// Runs `f` with a scratch stack for the expression VM. Implementations
    /// hand out a per-thread buffer and fall back to a fresh one when it is
    /// already borrowed.
    fn with_scratch<R>(f: impl FnOnce(&mut Vec<Self>) -> R) -> R {
        f(&mut Vec::new())
    }
}

thread_local! {
    static COMPLEX_SCRATCH: RefCell<Vec<Complex64>> = RefCell::new(Vec::with_capacity(64));
}

impl Scalar for Complex64 {
    fn from_complex(value: Complex64) -> Self {
        value
    }

    fn value(&self) -> Complex64 {
        *self
    }

    fn exp(self) -> Self {
        Complex64::exp(self)
    }

    fn ln(self) -> Self {
        Complex64::ln(self)
    }

    fn sqrt(self) -> Self {
        Complex64::sqrt(self)
    }

    fn sin(self) -> Self {
        Complex64::sin(self)
    }

    fn cos(self) -> Self {
        Complex64::cos(self)
    }

    fn powi(self, n: i32) -> Self {
        Complex64::powi(&self, n)
    }

    fn with_scratch<R>(f: impl FnOnce(&mut Vec<Self>) -> R) -> R {
        COMPLEX_SCRATCH.with(|cell| match cell.try_borrow_mut() {
            Ok(mut stack) => f(&mut stack),
            Err(_) => f(&mut Vec::new()),
        })
    }
}

/// A governing symbol D(x, k), holomorphic in every argument.
///
/// The same formula is run on `Complex64` and on `HyperDual`, so derivatives
/// are exactly consistent with the analytic continuation. Implementations
/// are immutable and may be shared across threads.
pub trait Symbol: Send + Sync {
    /// Number of position (and momentum) components.
    fn dimension(&self) -> usize;

    /// Evaluates D at (position, momentum).
    /// Returns `DomainError` on a branch cut or singularity.
    fn evaluate<T: Scalar>(&self, position: &[T], momentum: &[T]) -> Result<T, DomainError>;
}

/// A complex-time vector field integrated by the adaptive stepper.
pub trait ComplexFlow {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Writes d(state)/dt into `out`.
    fn apply(&self, t: Complex64, state: &[Complex64], out: &mut [Complex64])
        -> Result<(), MgoError>;
}
