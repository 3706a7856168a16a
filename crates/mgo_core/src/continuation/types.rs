//! Core types for analytic continuation of rays.

use crate::phase_space::PhaseSpacePoint;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// How a ray sample was reached from the real reference ray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ContinuationState {
    /// Integrated along the real parameter axis only.
    Real,
    /// Integrated from the real reference ray at `base` through every vertex
    /// of `path`, in order. Replaying the path selects the same branch.
    Continued {
        base: f64,
        path: Vec<Complex64>,
        attempt: usize,
    },
}

impl Default for ContinuationState {
    fn default() -> Self {
        ContinuationState::Real
    }
}

impl ContinuationState {
    pub fn is_continued(&self) -> bool {
        matches!(self, ContinuationState::Continued { .. })
    }

    /// Records one more straight segment ending at `vertex`.
    pub fn extended(&self, from: Complex64, vertex: Complex64, attempt: usize) -> Self {
        match self {
            ContinuationState::Real if vertex.im == 0.0 => ContinuationState::Real,
            ContinuationState::Real => ContinuationState::Continued {
                base: from.re,
                path: vec![vertex],
                attempt,
            },
            ContinuationState::Continued {
                base,
                path,
                attempt,
            } => {
                let mut path = path.clone();
                path.push(vertex);
                ContinuationState::Continued {
                    base: *base,
                    path,
                    attempt: *attempt,
                }
            }
        }
    }
}

/// A fold of the real ray family: the family Jacobian changes sign here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caustic {
    pub parameter: f64,
    pub point: PhaseSpacePoint,
    /// ½ d²x₀/dτ² at the fold, the coefficient of the local model
    /// x ≈ x_c + c₂ (τ - τ_c)².
    pub curvature: Complex64,
}

impl Caustic {
    /// Stationary points of the local fold model for target position `target`:
    /// τ_c ± √((target - x_c) / c₂).
    pub fn fold_seeds(&self, target: Complex64) -> Vec<Complex64> {
        let center = Complex64::new(self.parameter, 0.0);
        if self.curvature.norm() == 0.0 {
            return vec![center];
        }
        let offset = ((target - self.point.position[0]) / self.curvature).sqrt();
        if offset.norm() == 0.0 {
            return vec![center];
        }
        vec![center + offset, center - offset]
    }

    /// Whether `target` lies on the dark side of this fold, where its two
    /// rays have merged into a complex pair.
    pub fn shadows(&self, target: f64) -> bool {
        if self.curvature.norm() == 0.0 {
            return false;
        }
        let target = Complex64::new(target, 0.0);
        ((target - self.point.position[0]) / self.curvature).re < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extending_real_state_with_complex_vertex_continues() {
        let real = ContinuationState::Real;
        let still_real = real.extended(Complex64::new(0.5, 0.0), Complex64::new(1.0, 0.0), 0);
        assert_eq!(still_real, ContinuationState::Real);

        let continued = real.extended(Complex64::new(0.5, 0.0), Complex64::new(1.0, 0.2), 2);
        assert_eq!(
            continued,
            ContinuationState::Continued {
                base: 0.5,
                path: vec![Complex64::new(1.0, 0.2)],
                attempt: 2
            }
        );
        let longer = continued.extended(Complex64::new(1.0, 0.2), Complex64::new(1.0, 0.0), 0);
        match longer {
            ContinuationState::Continued { path, attempt, .. } => {
                assert_eq!(path.len(), 2);
                assert_eq!(attempt, 2);
            }
            ContinuationState::Real => panic!("continued state must stay continued"),
        }
    }

    #[test]
    fn fold_seeds_for_airy_fold() {
        let caustic = Caustic {
            parameter: 0.0,
            point: PhaseSpacePoint::real(&[0.0], &[0.0]).unwrap(),
            curvature: Complex64::new(-1.0, 0.0),
        };
        let shadow = caustic.fold_seeds(Complex64::new(4.0, 0.0));
        assert_eq!(shadow.len(), 2);
        assert!((shadow[0] - Complex64::new(0.0, 2.0)).norm() < 1e-14
            || (shadow[0] - Complex64::new(0.0, -2.0)).norm() < 1e-14);
        assert!((shadow[0] + shadow[1]).norm() < 1e-14);

        let lit = caustic.fold_seeds(Complex64::new(-9.0, 0.0));
        assert!(lit.iter().all(|s| s.im.abs() < 1e-14 && (s.re.abs() - 3.0).abs() < 1e-14));

        assert_eq!(caustic.fold_seeds(Complex64::new(0.0, 0.0)).len(), 1);

        assert!(caustic.shadows(4.0));
        assert!(!caustic.shadows(-9.0));
        assert!(!caustic.shadows(0.0));

        // a fold opening the other way
        let minimum = Caustic {
            parameter: 3.0,
            point: PhaseSpacePoint::real(&[-5.0], &[3.0]).unwrap(),
            curvature: Complex64::new(2.0, 0.0),
        };
        assert!(minimum.shadows(-6.0));
        assert!(!minimum.shadows(1.0));
    }

    #[test]
    fn state_serializes_with_kind() {
        let json = serde_json::to_value(ContinuationState::Real).expect("serialize");
        assert_eq!(json["kind"], "Real");
    }
}
