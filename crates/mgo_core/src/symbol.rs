//! Symbol evaluation: values, gradients and Hessians at complex phase-space
//! points, all obtained from the symbol's own formula.

use crate::autodiff::HyperDual;
use crate::error::{DomainError, MgoError, MgoResult};
use crate::phase_space::PhaseSpacePoint;
use crate::traits::Symbol;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Value, gradient and Hessian of a symbol at one point.
/// Coordinates are ordered `(x_0 .. x_{N-1}, k_0 .. k_{N-1})`.
#[derive(Debug, Clone)]
pub struct SymbolJet {
    pub value: Complex64,
    pub gradient: DVector<Complex64>,
    pub hessian: DMatrix<Complex64>,
}

impl SymbolJet {
    pub fn dimension(&self) -> usize {
        self.gradient.len() / 2
    }

    /// Phase-space velocity `(∂D/∂k, -∂D/∂x)`.
    pub fn hamiltonian_velocity(&self) -> Vec<Complex64> {
        let n = self.dimension();
        let mut velocity = vec![Complex64::zero(); 2 * n];
        for i in 0..n {
            velocity[i] = self.gradient[n + i];
            velocity[n + i] = -self.gradient[i];
        }
        velocity
    }

    /// `J · Hess(D)` with `J = [[0, I], [-I, 0]]`, the linearisation of the flow.
    pub fn flow_linearization(&self) -> DMatrix<Complex64> {
        let n = self.dimension();
        let mut a = DMatrix::zeros(2 * n, 2 * n);
        for r in 0..n {
            for c in 0..2 * n {
                a[(r, c)] = self.hessian[(n + r, c)];
                a[(n + r, c)] = -self.hessian[(r, c)];
            }
        }
        a
    }
}

pub(crate) fn lift_domain(err: DomainError, point: &PhaseSpacePoint) -> MgoError {
    MgoError::Domain {
        reason: err.reason,
        position: point.position.clone(),
        momentum: point.momentum.clone(),
    }
}

fn check_dimension<S: Symbol>(symbol: &S, point: &PhaseSpacePoint) -> MgoResult<()> {
    if symbol.dimension() != point.dimension() {
        return Err(MgoError::invalid(format!(
            "symbol has dimension {} but point has dimension {}",
            symbol.dimension(),
            point.dimension()
        )));
    }
    Ok(())
}

fn non_finite(point: &PhaseSpacePoint) -> MgoError {
    MgoError::Domain {
        reason: "symbol or its derivatives are not finite".to_string(),
        position: point.position.clone(),
        momentum: point.momentum.clone(),
    }
}

/// Evaluates D at a point.
pub fn evaluate_value<S: Symbol>(symbol: &S, point: &PhaseSpacePoint) -> MgoResult<Complex64> {
    check_dimension(symbol, point)?;
    let value = symbol
        .evaluate(&point.position, &point.momentum)
        .map_err(|e| lift_domain(e, point))?;
    if !value.is_finite() {
        return Err(non_finite(point));
    }
    Ok(value)
}

/// Evaluates D with its exact gradient and Hessian.
///
/// Each upper-triangular Hessian entry costs one hyper-dual evaluation, so a
/// jet over 2N coordinates takes N(2N+1) calls. Diagonal passes also supply
/// the gradient.
pub fn evaluate_jet<S: Symbol>(symbol: &S, point: &PhaseSpacePoint) -> MgoResult<SymbolJet> {
    check_dimension(symbol, point)?;
    let n = point.dimension();
    let m = 2 * n;
    let coords = point.coordinates();

    let mut value = Complex64::zero();
    let mut gradient = DVector::zeros(m);
    let mut hessian = DMatrix::zeros(m, m);
    let mut seeded = vec![HyperDual::zero(); m];

    for i in 0..m {
        for j in i..m {
            for (idx, slot) in seeded.iter_mut().enumerate() {
                *slot = HyperDual::seeded(coords[idx], idx == i, idx == j);
            }
            let out = symbol
                .evaluate(&seeded[..n], &seeded[n..])
                .map_err(|e| lift_domain(e, point))?;
            if !out.is_finite() {
                return Err(non_finite(point));
            }
            if i == j {
                value = out.re;
                gradient[i] = out.e1;
            }
            hessian[(i, j)] = out.e12;
            hessian[(j, i)] = out.e12;
        }
    }

    Ok(SymbolJet {
        value,
        gradient,
        hessian,
    })
}

/// `D = -stiffness·|k|² - field·x₀ + offset`.
///
/// With stiffness 1, field 1 and offset 0 this is the Airy symbol `-k² - x`,
/// whose field launched from the origin is `√(2π)·a₀·Ai(x)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuadraticHamiltonian {
    pub dimension: usize,
    pub stiffness: Complex64,
    pub field: Complex64,
    pub offset: Complex64,
}

impl QuadraticHamiltonian {
    pub fn new(dimension: usize, stiffness: f64, field: f64, offset: f64) -> Self {
        Self {
            dimension,
            stiffness: Complex64::new(stiffness, 0.0),
            field: Complex64::new(field, 0.0),
            offset: Complex64::new(offset, 0.0),
        }
    }

    pub fn airy() -> Self {
        Self::new(1, 1.0, 1.0, 0.0)
    }
}

impl Symbol for QuadraticHamiltonian {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate<T: crate::traits::Scalar>(
        &self,
        position: &[T],
        momentum: &[T],
    ) -> Result<T, DomainError> {
        let mut kinetic = T::from_f64(0.0);
        for &k in momentum {
            kinetic = kinetic + k * k;
        }
        Ok(-T::from_complex(self.stiffness) * kinetic - T::from_complex(self.field) * position[0]
            + T::from_complex(self.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Scalar;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    /// D = x·k² + exp(x) + sin(k), exercises mixed terms.
    struct Mixed;

    impl Symbol for Mixed {
        fn dimension(&self) -> usize {
            1
        }

        fn evaluate<T: Scalar>(&self, position: &[T], momentum: &[T]) -> Result<T, DomainError> {
            let (x, k) = (position[0], momentum[0]);
            Ok(x * k * k + x.exp() + k.sin())
        }
    }

    struct Pole;

    impl Symbol for Pole {
        fn dimension(&self) -> usize {
            1
        }

        fn evaluate<T: Scalar>(&self, _position: &[T], momentum: &[T]) -> Result<T, DomainError> {
            if momentum[0].value().norm() < 0.1 {
                return Err(DomainError::new("too close to pole at k = 0"));
            }
            Ok(T::from_f64(1.0) / momentum[0])
        }
    }

    #[test]
    fn jet_matches_closed_form_at_complex_point() {
        let (x, k) = (c(0.4, -0.3), c(-1.1, 0.6));
        let point = PhaseSpacePoint::new(vec![x], vec![k]).unwrap();
        let jet = evaluate_jet(&Mixed, &point).expect("jet");

        let tol = 1e-12;
        assert!((jet.value - (x * k * k + x.exp() + k.sin())).norm() < tol);
        assert!((jet.gradient[0] - (k * k + x.exp())).norm() < tol);
        assert!((jet.gradient[1] - (2.0 * x * k + k.cos())).norm() < tol);
        assert!((jet.hessian[(0, 0)] - x.exp()).norm() < tol);
        assert!((jet.hessian[(0, 1)] - 2.0 * k).norm() < tol);
        assert!((jet.hessian[(1, 0)] - 2.0 * k).norm() < tol);
        assert!((jet.hessian[(1, 1)] - (2.0 * x - k.sin())).norm() < tol);

        let value = evaluate_value(&Mixed, &point).expect("value");
        assert!((value - jet.value).norm() < tol);
    }

    #[test]
    fn airy_flow_quantities() {
        let point = PhaseSpacePoint::new(vec![c(-1.0, 0.2)], vec![c(0.5, 0.5)]).unwrap();
        let jet = evaluate_jet(&QuadraticHamiltonian::airy(), &point).expect("jet");
        let v = jet.hamiltonian_velocity();
        // ẋ = -2k, k̇ = 1
        assert!((v[0] - c(-1.0, -1.0)).norm() < 1e-14);
        assert!((v[1] - c(1.0, 0.0)).norm() < 1e-14);
        let a = jet.flow_linearization();
        assert!((a[(0, 1)] - c(-2.0, 0.0)).norm() < 1e-14);
        assert!(a[(1, 0)].norm() < 1e-14);
        assert!(a[(0, 0)].norm() < 1e-14);
    }

    #[test]
    fn jet_covers_multi_dimensional_symbol() {
        let symbol = QuadraticHamiltonian::new(2, 0.5, 2.0, 1.0);
        let point = PhaseSpacePoint::new(
            vec![c(1.0, 0.0), c(0.0, 1.0)],
            vec![c(0.3, 0.0), c(-0.2, 0.1)],
        )
        .unwrap();
        let jet = evaluate_jet(&symbol, &point).expect("jet");
        assert_eq!(jet.gradient.len(), 4);
        assert!((jet.gradient[0] - c(-2.0, 0.0)).norm() < 1e-14);
        assert!(jet.gradient[1].norm() < 1e-14);
        assert!((jet.gradient[3] - (-1.0 * c(-0.2, 0.1))).norm() < 1e-14);
        assert!((jet.hessian[(2, 2)] - c(-1.0, 0.0)).norm() < 1e-14);
        assert!(jet.hessian[(2, 3)].norm() < 1e-14);
    }

    #[test]
    fn domain_error_reports_point() {
        let point = PhaseSpacePoint::new(vec![c(2.0, 0.0)], vec![c(0.0, 0.05)]).unwrap();
        match evaluate_jet(&Pole, &point) {
            Err(MgoError::Domain {
                reason, momentum, ..
            }) => {
                assert!(reason.contains("pole"));
                assert_eq!(momentum, vec![c(0.0, 0.05)]);
            }
            other => panic!("expected domain error, got {other:?}"),
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let point = PhaseSpacePoint::real(&[0.0, 0.0], &[0.0, 0.0]).unwrap();
        assert!(matches!(
            evaluate_jet(&QuadraticHamiltonian::airy(), &point),
            Err(MgoError::InvalidConfiguration { .. })
        ));
    }
}
