//! Stationary points of the inverse-metaplectic phase.
//!
//! For a target position x_t the phase over the ray family is
//! Φ(τ) = S(τ) + k(τ)·(x_t - x(τ)), so Φ' = k̇·(x_t - x) and saddles are the
//! roots of x(τ) = x_t (points where k̇ = 0 are not stationary for the
//! integrand and are excluded).

use crate::config::SaddleSettings;
use crate::continuation::{ContinuationController, ContinuationState};
use crate::error::{MgoError, MgoResult};
use crate::ray::{Ray, RaySample};
use crate::traits::Symbol;
use crate::util::sign_changes;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Φ and its derivatives along the family for one target position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseFunction {
    pub target: f64,
}

impl PhaseFunction {
    pub fn new(target: f64) -> Self {
        Self { target }
    }

    fn target(&self) -> Complex64 {
        Complex64::new(self.target, 0.0)
    }

    /// x(τ) - x_t, whose roots are the saddles.
    pub fn mismatch(&self, sample: &RaySample) -> Complex64 {
        sample.point.position[0] - self.target()
    }

    pub fn value(&self, sample: &RaySample) -> Complex64 {
        sample.action + sample.point.momentum[0] * (self.target() - sample.point.position[0])
    }

    pub fn derivative(&self, sample: &RaySample) -> Complex64 {
        sample.momentum_rate()[0] * (self.target() - sample.point.position[0])
    }

    /// Φ'' = k̈·(x_t - x) - k̇·ẋ, given the phase-space acceleration.
    pub fn second_derivative(&self, sample: &RaySample, acceleration: &[Complex64]) -> Complex64 {
        let n = sample.dimension();
        acceleration[n] * (self.target() - sample.point.position[0])
            - sample.momentum_rate()[0] * sample.position_rate()[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaddleKind {
    Nondegenerate,
    /// Φ'' vanishes: a higher-order caustic the quadratic model cannot handle.
    Degenerate,
}

/// A stationary point of Φ with the data needed to build its contour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saddle {
    pub parameter: Complex64,
    pub sample: RaySample,
    pub phase: Complex64,
    /// Φ''(τ_s).
    pub curvature: Complex64,
    pub kind: SaddleKind,
    /// Unit direction along which Re(iΦ) decreases fastest, oriented with
    /// positive real part.
    pub descent_direction: Complex64,
    /// Whether the original real integration contour passes through this
    /// saddle after deformation.
    pub relevant: bool,
    pub continuation: ContinuationState,
}

impl Saddle {
    pub fn is_real(&self, tolerance: f64) -> bool {
        self.parameter.im.abs() <= tolerance
    }
}

/// Steepest-descent direction of F = iΦ at a saddle with Φ'' = `curvature`.
pub fn descent_direction(curvature: Complex64) -> Complex64 {
    let f2 = Complex64::new(0.0, 1.0) * curvature;
    let alpha = 0.5 * (PI - f2.arg());
    let mut direction = Complex64::from_polar(1.0, alpha);
    if direction.re < -1e-12 || (direction.re.abs() <= 1e-12 && direction.im < 0.0) {
        direction = -direction;
    }
    direction
}

/// A root of x(τ) = x_t together with the path that reached it.
#[derive(Debug, Clone)]
pub struct SaddleCandidate {
    pub sample: RaySample,
    pub continuation: ContinuationState,
}

pub struct SaddleSolver<'r, 'a, S> {
    controller: ContinuationController<'r, 'a, S>,
    settings: SaddleSettings,
    phase: PhaseFunction,
    span: (f64, f64),
    radius: f64,
}

impl<'r, 'a, S: Symbol> SaddleSolver<'r, 'a, S> {
    /// The search region grows by `search_growth` per retry attempt.
    pub fn new(
        controller: ContinuationController<'r, 'a, S>,
        settings: SaddleSettings,
        phase: PhaseFunction,
        span: (f64, f64),
        attempt: usize,
    ) -> Self {
        let radius = settings.search_radius * settings.search_growth.powi(attempt as i32);
        Self {
            controller,
            settings,
            phase,
            span,
            radius,
        }
    }

    pub fn phase(&self) -> &PhaseFunction {
        &self.phase
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn controller(&self) -> &ContinuationController<'r, 'a, S> {
        &self.controller
    }

    /// |Im τ| <= R and Re τ within the family span widened by R.
    pub fn in_region(&self, tau: Complex64) -> bool {
        tau.im.abs() <= self.radius
            && tau.re >= self.span.0 - self.radius
            && tau.re <= self.span.1 + self.radius
    }

    fn not_found(&self, reason: String) -> MgoError {
        MgoError::SaddleNotFound {
            radius: self.radius,
            reason,
        }
    }

    /// Damped Newton iteration on x(τ) = x_t, extending the continuation
    /// path through every iterate.
    pub fn newton(&self, start: SaddleCandidate, attempt: usize) -> MgoResult<SaddleCandidate> {
        let SaddleCandidate {
            mut sample,
            continuation: mut state,
        } = start;
        let residual_scale = 1.0 + self.phase.target.abs();

        for iteration in 0..self.settings.max_iterations {
            let mismatch = self.phase.mismatch(&sample);
            if mismatch.norm() <= self.settings.tolerance * residual_scale {
                debug!(iteration, tau = %sample.parameter, "newton converged");
                return Ok(SaddleCandidate {
                    sample,
                    continuation: state,
                });
            }
            let slope = sample.position_rate()[0];
            if slope.norm() == 0.0 {
                return Err(self.not_found(format!(
                    "ray map is flat at τ = {} with residual {:e}",
                    sample.parameter,
                    mismatch.norm()
                )));
            }

            let mut delta = -mismatch / slope;
            let length = delta.norm();
            if length > self.settings.max_newton_step {
                delta *= self.settings.max_newton_step / length;
            }
            let next = sample.parameter + delta;
            if !self.in_region(next) {
                return Err(self.not_found(format!("newton iterate τ = {next} left the search region")));
            }
            let (advanced, extended) = self.controller.extend(&sample, &state, next, attempt)?;
            sample = advanced;
            state = extended;

            if delta.norm() <= self.settings.tolerance * (1.0 + next.norm()) {
                return Ok(SaddleCandidate {
                    sample,
                    continuation: state,
                });
            }
        }
        Err(self.not_found(format!(
            "newton did not converge in {} iterations",
            self.settings.max_iterations
        )))
    }

    /// Real stationary points: sign changes of x(τ) - x_t on the reference ray,
    /// each polished by Newton (which stays on the real axis).
    pub fn real_pass(&self, reference: &Ray) -> MgoResult<Vec<SaddleCandidate>> {
        let values: Vec<f64> = reference
            .samples
            .iter()
            .map(|s| self.phase.mismatch(s).re)
            .collect();
        let mut roots = Vec::new();
        for idx in sign_changes(&values) {
            let left = &reference.samples[idx];
            let start = if values[idx] == 0.0 || idx + 1 == values.len() {
                SaddleCandidate {
                    sample: left.clone(),
                    continuation: ContinuationState::Real,
                }
            } else {
                let (g0, g1) = (values[idx], values[idx + 1]);
                let (t0, t1) = (left.parameter.re, reference.samples[idx + 1].parameter.re);
                let seed = t0 + (t1 - t0) * g0 / (g0 - g1);
                let (sample, continuation) =
                    self.controller
                        .continue_to(left, Complex64::new(seed, 0.0), 0)?;
                SaddleCandidate {
                    sample,
                    continuation,
                }
            };
            match self.newton(start, 0) {
                Ok(root) => roots.push(root),
                Err(err) if err.is_retryable() => {
                    warn!(%err, "real stationary point between grid samples {idx} and {} not polished", idx + 1)
                }
                Err(err) => return Err(err),
            }
        }
        Ok(roots)
    }

    fn nearest_base<'s>(&self, reference: &'s Ray, seed: Complex64) -> Option<&'s RaySample> {
        reference.samples.iter().min_by(|a, b| {
            (a.parameter.re - seed.re)
                .abs()
                .total_cmp(&(b.parameter.re - seed.re).abs())
        })
    }

    /// Complex stationary points reached from `seeds` by continuation from the
    /// nearest reference sample. Retryable per-seed failures are returned
    /// alongside the roots; anything else aborts the pass.
    pub fn continued_pass(
        &self,
        reference: &Ray,
        seeds: &[Complex64],
        attempt: usize,
    ) -> MgoResult<(Vec<SaddleCandidate>, Vec<MgoError>)> {
        let mut roots = Vec::new();
        let mut failures = Vec::new();
        for &seed in seeds {
            if !self.in_region(seed) {
                debug!(%seed, radius = self.radius, "seed outside search region");
                continue;
            }
            let Some(base) = self.nearest_base(reference, seed) else {
                continue;
            };
            let outcome = self
                .controller
                .continue_to(base, seed, attempt)
                .and_then(|(sample, continuation)| {
                    self.newton(
                        SaddleCandidate {
                            sample,
                            continuation,
                        },
                        attempt,
                    )
                });
            match outcome {
                Ok(root) => roots.push(root),
                Err(err) if err.is_retryable() => {
                    debug!(%seed, %err, "seed abandoned");
                    failures.push(err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok((roots, failures))
    }

    /// Merges candidates closer than the dedupe tolerance, keeping the first.
    pub fn dedupe(&self, candidates: Vec<SaddleCandidate>) -> Vec<SaddleCandidate> {
        let mut unique: Vec<SaddleCandidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let duplicate = unique.iter().any(|u| {
                (u.sample.parameter - candidate.sample.parameter).norm()
                    <= self.settings.dedupe_tolerance
            });
            if !duplicate {
                unique.push(candidate);
            }
        }
        unique
    }

    /// Computes Φ, Φ'' and the descent direction. Relevance is decided later.
    pub fn classify(&self, candidate: SaddleCandidate) -> MgoResult<Saddle> {
        let acceleration = self
            .controller
            .integrator()
            .acceleration(&candidate.sample)?;
        let curvature = self.phase.second_derivative(&candidate.sample, &acceleration);
        let kind = if curvature.norm() < self.settings.degeneracy_tolerance {
            SaddleKind::Degenerate
        } else {
            SaddleKind::Nondegenerate
        };
        Ok(Saddle {
            parameter: candidate.sample.parameter,
            phase: self.phase.value(&candidate.sample),
            curvature,
            kind,
            descent_direction: descent_direction(curvature),
            relevant: false,
            continuation: candidate.continuation,
            sample: candidate.sample,
        })
    }
}
