//! Deformation policies: how a complex parameter path is chosen between a
//! real base point and a complex target.

use crate::error::{MgoError, MgoResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeformationStrategy {
    /// Straight segment from base to target.
    Straight,
    /// Move along the real axis first, then vertically.
    RealFirst,
    /// Leave the real axis vertically first, then move horizontally.
    ImaginaryFirst,
    /// Three-point arc bowing left of the direction of travel by
    /// `bulge` times the chord length.
    Arc { bulge: f64 },
}

impl Default for DeformationStrategy {
    fn default() -> Self {
        DeformationStrategy::Straight
    }
}

impl DeformationStrategy {
    pub fn validate(&self) -> MgoResult<()> {
        if let DeformationStrategy::Arc { bulge } = self {
            if !(bulge.is_finite() && *bulge > 0.0) {
                return Err(MgoError::invalid(format!(
                    "arc bulge must be positive and finite (got {bulge})"
                )));
            }
        }
        Ok(())
    }

    /// Vertices (excluding `from`, ending with `to`) of the base route.
    fn base_route(&self, from: Complex64, to: Complex64) -> Vec<Complex64> {
        match *self {
            DeformationStrategy::Straight => vec![to],
            DeformationStrategy::RealFirst => vec![Complex64::new(to.re, from.im), to],
            DeformationStrategy::ImaginaryFirst => vec![Complex64::new(from.re, to.im), to],
            DeformationStrategy::Arc { bulge } => {
                let chord = to - from;
                let normal = Complex64::new(0.0, 1.0) * chord;
                [0.25, 0.5, 0.75]
                    .iter()
                    .map(|&s| from + chord * s + normal * (bulge * 4.0 * s * (1.0 - s)))
                    .chain(std::iter::once(to))
                    .collect()
            }
        }
    }

    /// Route from `from` to `to` for a given retry attempt.
    ///
    /// Attempt 0 is the base route. Later attempts add a detour vertex at the
    /// midpoint of the longest segment, displaced perpendicular to it by
    /// `radius · growth^(attempt-1)`, alternating sides.
    pub fn route(
        &self,
        from: Complex64,
        to: Complex64,
        attempt: usize,
        radius: f64,
        growth: f64,
    ) -> Vec<Complex64> {
        let mut route = self.base_route(from, to);
        route.dedup();
        route.retain(|&v| v != from);
        if route.is_empty() {
            return route;
        }

        if attempt > 0 {
            let mut previous = from;
            let mut longest = (0usize, 0.0f64, from, from);
            for (idx, &vertex) in route.iter().enumerate() {
                let length = (vertex - previous).norm();
                if length > longest.1 {
                    longest = (idx, length, previous, vertex);
                }
                previous = vertex;
            }
            let (idx, length, a, b) = longest;
            if length > 0.0 {
                let side = if attempt % 2 == 1 { 1.0 } else { -1.0 };
                let offset = radius * growth.powi(attempt as i32 - 1) * side;
                let normal = Complex64::new(0.0, 1.0) * (b - a) / length;
                route.insert(idx, (a + b) * 0.5 + normal * offset);
            }
        }
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn base_routes_end_at_target() {
        let (from, to) = (c(1.0, 0.0), c(0.0, 2.0));
        assert_eq!(DeformationStrategy::Straight.route(from, to, 0, 0.25, 2.0), vec![to]);
        assert_eq!(
            DeformationStrategy::RealFirst.route(from, to, 0, 0.25, 2.0),
            vec![c(0.0, 0.0), to]
        );
        assert_eq!(
            DeformationStrategy::ImaginaryFirst.route(from, to, 0, 0.25, 2.0),
            vec![c(1.0, 2.0), to]
        );
        let arc = DeformationStrategy::Arc { bulge: 0.5 }.route(from, to, 0, 0.25, 2.0);
        assert_eq!(arc.len(), 4);
        assert_eq!(arc.last(), Some(&to));
        // midpoint displaced left of travel by bulge · chord
        let chord = to - from;
        let expected_mid = from + chord * 0.5 + c(0.0, 1.0) * chord * 0.5;
        assert!((arc[1] - expected_mid).norm() < 1e-14);
    }

    #[test]
    fn degenerate_segments_are_dropped() {
        let (from, to) = (c(1.0, 0.0), c(1.0, 3.0));
        assert_eq!(DeformationStrategy::ImaginaryFirst.route(from, to, 0, 0.25, 2.0), vec![to]);
        assert!(DeformationStrategy::Straight.route(from, from, 3, 0.25, 2.0).is_empty());
    }

    #[test]
    fn retries_add_growing_alternating_detours() {
        let (from, to) = (c(0.0, 0.0), c(2.0, 0.0));
        let first = DeformationStrategy::Straight.route(from, to, 1, 0.25, 2.0);
        assert_eq!(first.len(), 2);
        assert!((first[0] - c(1.0, 0.25)).norm() < 1e-14);

        let second = DeformationStrategy::Straight.route(from, to, 2, 0.25, 2.0);
        assert!((second[0] - c(1.0, -0.5)).norm() < 1e-14);

        let third = DeformationStrategy::Straight.route(from, to, 3, 0.25, 2.0);
        assert!((third[0] - c(1.0, 1.0)).norm() < 1e-14);
        assert_eq!(third.last(), Some(&to));
    }

    #[test]
    fn strategy_deserializes_from_tagged_json() {
        let arc: DeformationStrategy =
            serde_json::from_str(r#"{ "type": "Arc", "bulge": 0.3 }"#).expect("parse");
        assert_eq!(arc, DeformationStrategy::Arc { bulge: 0.3 });
        assert!(DeformationStrategy::Arc { bulge: 0.0 }.validate().is_err());
    }
}
