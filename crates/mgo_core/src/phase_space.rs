use crate::error::{MgoError, MgoResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// A point (x, k) of phase space. Storage is always complex; real input
/// simply carries zero imaginary parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpacePoint {
    pub position: Vec<Complex64>,
    pub momentum: Vec<Complex64>,
}

impl PhaseSpacePoint {
    pub fn new(position: Vec<Complex64>, momentum: Vec<Complex64>) -> MgoResult<Self> {
        if position.is_empty() {
            return Err(MgoError::invalid("phase-space point has zero dimension"));
        }
        if position.len() != momentum.len() {
            return Err(MgoError::invalid(format!(
                "position has {} components but momentum has {}",
                position.len(),
                momentum.len()
            )));
        }
        Ok(Self { position, momentum })
    }

    pub fn real(position: &[f64], momentum: &[f64]) -> MgoResult<Self> {
        Self::new(
            position.iter().map(|&v| Complex64::new(v, 0.0)).collect(),
            momentum.iter().map(|&v| Complex64::new(v, 0.0)).collect(),
        )
    }

    pub fn dimension(&self) -> usize {
        self.position.len()
    }

    pub fn is_real(&self, tolerance: f64) -> bool {
        self.position
            .iter()
            .chain(self.momentum.iter())
            .all(|z| z.im.abs() <= tolerance)
    }

    /// Concatenated coordinates `[x_0 .. x_{N-1}, k_0 .. k_{N-1}]`.
    pub fn coordinates(&self) -> Vec<Complex64> {
        let mut coords = Vec::with_capacity(2 * self.dimension());
        coords.extend_from_slice(&self.position);
        coords.extend_from_slice(&self.momentum);
        coords
    }

    pub fn from_coordinates(coords: &[Complex64]) -> Self {
        let n = coords.len() / 2;
        Self {
            position: coords[..n].to_vec(),
            momentum: coords[n..2 * n].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_dimensions() {
        let err = PhaseSpacePoint::real(&[0.0, 1.0], &[0.0]).unwrap_err();
        assert!(err.to_string().contains("2 components"));
        assert!(PhaseSpacePoint::real(&[], &[]).is_err());
    }

    #[test]
    fn coordinates_round_trip() {
        let point = PhaseSpacePoint::new(
            vec![Complex64::new(1.0, 0.5), Complex64::new(-2.0, 0.0)],
            vec![Complex64::new(0.0, 0.0), Complex64::new(3.0, -1.0)],
        )
        .expect("point");
        let coords = point.coordinates();
        assert_eq!(coords.len(), 4);
        assert_eq!(PhaseSpacePoint::from_coordinates(&coords), point);
        assert!(!point.is_real(1e-12));
        assert!(PhaseSpacePoint::real(&[1.0], &[2.0]).unwrap().is_real(0.0));
    }
}
