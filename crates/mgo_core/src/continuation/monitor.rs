//! Conditioning of the real ray family and caustic detection.

use super::types::Caustic;
use crate::config::ContinuationSettings;
use crate::error::{MgoError, MgoResult};
use crate::ray::{Ray, RayIntegrator, RaySample};
use crate::traits::Symbol;
use crate::util::{illinois, sign_changes};
use num_complex::Complex64;
use tracing::debug;

/// Watches the family Jacobian det ∂x/∂(τ, ξ) along real rays.
pub struct ConditioningMonitor<'r, 'a, S> {
    integrator: &'r RayIntegrator<'a, S>,
    settings: ContinuationSettings,
}

impl<'r, 'a, S: Symbol> ConditioningMonitor<'r, 'a, S> {
    pub fn new(integrator: &'r RayIntegrator<'a, S>, settings: ContinuationSettings) -> Self {
        Self {
            integrator,
            settings,
        }
    }

    /// True when geometrical optics is unreliable at this sample.
    pub fn is_ill_conditioned(&self, sample: &RaySample) -> bool {
        sample.position_jacobian.norm() < self.settings.conditioning_threshold
    }

    /// Locates every fold along a real reference ray: sign changes (or exact
    /// zeros) of Re det ∂x/∂(τ, ξ), refined by regula falsi.
    pub fn caustics(&self, reference: &Ray) -> MgoResult<Vec<Caustic>> {
        let values: Vec<f64> = reference
            .samples
            .iter()
            .map(|s| s.position_jacobian.re)
            .collect();
        let mut caustics = Vec::new();

        for idx in sign_changes(&values) {
            let left = &reference.samples[idx];
            let sample = if values[idx] == 0.0 || idx + 1 == reference.samples.len() {
                left.clone()
            } else {
                let a = left.parameter.re;
                let b = reference.samples[idx + 1].parameter.re;
                let (root, evaluations) = illinois(
                    |t| {
                        self.integrator
                            .advance(left, Complex64::new(t, 0.0))
                            .map(|s| s.position_jacobian.re)
                    },
                    a,
                    b,
                    self.settings.caustic_tolerance,
                    self.settings.caustic_max_iterations,
                )?;
                debug!(root, evaluations, "refined caustic bracket [{a}, {b}]");
                self.integrator.advance(left, Complex64::new(root, 0.0))?
            };

            let acceleration = self.integrator.acceleration(&sample)?;
            let caustic = Caustic {
                parameter: sample.parameter.re,
                point: sample.point.clone(),
                curvature: 0.5 * acceleration[0],
            };
            debug!(
                parameter = caustic.parameter,
                curvature = %caustic.curvature,
                "caustic on reference ray"
            );
            caustics.push(caustic);
        }

        // Exact zeros are also reported by the neighbouring bracket.
        caustics.dedup_by(|b, a| (a.parameter - b.parameter).abs() <= self.settings.caustic_tolerance);
        Ok(caustics)
    }

    /// Smallest |det ∂x/∂(τ, ξ)| over a set of samples.
    pub fn min_jacobian<'s>(&self, samples: impl IntoIterator<Item = &'s RaySample>) -> Option<f64> {
        samples
            .into_iter()
            .map(|s| s.position_jacobian.norm())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))))
    }
}

pub(crate) fn no_caustic_error(attempts: usize) -> MgoError {
    MgoError::ConditioningFailure {
        attempts,
        reason: "real rays are ill-conditioned but the reference ray has no caustic to continue around"
            .to_string(),
    }
}
