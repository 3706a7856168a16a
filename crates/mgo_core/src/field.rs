//! Field reconstruction: saddle search, contour tracing and quadrature for
//! one or many target positions.
//!
//! ψ(x_t) = (a₀/√(2π)) Σ_s ∫_{C_s} (σk̇)^{1/2} e^{iΦ(τ)} dτ, summed over the
//! steepest-descent contours C_s of the saddles the real τ axis deforms onto.

use crate::config::{IntegratorSettings, Problem, RayFamily};
use crate::continuation::monitor::no_caustic_error;
use crate::continuation::{Caustic, ConditioningMonitor, ContinuationController};
use crate::contour::{ContourTracer, SteepestDescentContour};
use crate::error::{MgoError, MgoResult};
use crate::ray::{HamiltonianFlow, Ray, RayIntegrator, RaySample};
use crate::saddle::{PhaseFunction, Saddle, SaddleKind, SaddleSolver};
use crate::solvers::{integrate_segment, Tsit5};
use crate::traits::{ComplexFlow, Symbol};
use crate::util::continuous_sqrt;
use num_complex::Complex64;
use num_traits::Zero;
use rayon::prelude::*;
use serde::Serialize;
use std::cell::Cell;
use std::f64::consts::{FRAC_PI_4, PI};
use tracing::{debug, warn};

const I: Complex64 = Complex64::new(0.0, 1.0);

/// Ray equations plus the running contour integral as one extra component.
///
/// The amplitude branch is anchored at the last accepted step, so trial
/// stages of rejected steps never move it.
struct QuadratureFlow<'r, 'a, S> {
    rays: HamiltonianFlow<'a, S>,
    integrator: &'r RayIntegrator<'a, S>,
    target: Complex64,
    accepted: Cell<Complex64>,
    ray_len: usize,
}

impl<S: Symbol> QuadratureFlow<'_, '_, S> {
    /// (σ det ∂k/∂(τ, ξ))^{1/2} on the branch nearest the accepted amplitude.
    fn amplitude(&self, state: &[Complex64]) -> Complex64 {
        let (_, momentum_det) = self.integrator.family_determinants(&state[..self.ray_len]);
        continuous_sqrt(self.integrator.orientation() * momentum_det, self.accepted.get())
    }

    fn accept(&self, state: &[Complex64]) {
        self.accepted.set(self.amplitude(state));
    }
}

impl<S: Symbol> ComplexFlow for QuadratureFlow<'_, '_, S> {
    fn dimension(&self) -> usize {
        self.ray_len + 1
    }

    fn apply(&self, t: Complex64, state: &[Complex64], out: &mut [Complex64]) -> MgoResult<()> {
        let n = self.ray_len;
        self.rays.apply(t, &state[..n], &mut out[..n])?;
        // Φ = S + k (x_t - x) for N = 1
        let phase = state[2] + state[1] * (self.target - state[0]);
        out[n] = self.amplitude(state) * (I * phase).exp();
        Ok(())
    }
}

/// One saddle's share of the field.
#[derive(Debug, Clone, Serialize)]
pub struct SaddleContribution {
    pub saddle: Saddle,
    pub contour: SteepestDescentContour,
    pub value: Complex64,
    /// Whether `value` is included in the field sum.
    pub retained: bool,
}

/// How a field value was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationTrace {
    pub caustics: Vec<Caustic>,
    pub continuation_used: bool,
    /// Smallest |det ∂x/∂(τ, ξ)| over the real rays reaching the target, if any.
    pub min_real_jacobian: Option<f64>,
    /// Attempts made, including the successful one.
    pub attempts: usize,
    /// Every distinct saddle found, relevant or not.
    pub saddles: Vec<Saddle>,
    /// Seeds abandoned with a retryable error during the last attempt.
    pub abandoned_seeds: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldValue {
    pub target: f64,
    pub value: Complex64,
    pub contributions: Vec<SaddleContribution>,
    pub trace: EvaluationTrace,
}

/// Outcome for one target of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct PointResult {
    pub target: f64,
    pub result: Result<FieldValue, MgoError>,
}

/// Reconstructs the field of one ray family.
///
/// The reference ray and its caustics are computed once; every evaluation
/// after that is independent, so the evaluator can be shared across threads.
pub struct FieldEvaluator<S> {
    problem: Problem<S>,
    family: RayFamily,
    reference: Ray,
    caustics: Vec<Caustic>,
}

impl<S: Symbol> FieldEvaluator<S> {
    pub fn new(problem: Problem<S>, family: RayFamily) -> MgoResult<Self> {
        family.validate()?;
        let dimension = problem.symbol().dimension();
        if dimension != 1 {
            return Err(MgoError::invalid(format!(
                "field reconstruction is implemented for one-dimensional symbols, got dimension {dimension}"
            )));
        }

        let (reference, caustics) = {
            let settings = problem.settings();
            let integrator = RayIntegrator::new(problem.symbol(), &family, settings.integrator)?;
            if integrator.launch().momentum_jacobian.norm() == 0.0 {
                return Err(MgoError::invalid(
                    "momentum rate vanishes at launch, so τ cannot label the family in the momentum representation",
                ));
            }
            let reference = integrator.reference_ray(
                family.parameter_span,
                settings.continuation.reference_resolution,
            )?;
            let caustics =
                ConditioningMonitor::new(&integrator, settings.continuation).caustics(&reference)?;
            (reference, caustics)
        };
        debug!(
            samples = reference.len(),
            caustics = caustics.len(),
            "reference ray ready"
        );

        Ok(Self {
            problem,
            family,
            reference,
            caustics,
        })
    }

    pub fn problem(&self) -> &Problem<S> {
        &self.problem
    }

    pub fn family(&self) -> &RayFamily {
        &self.family
    }

    pub fn reference(&self) -> &Ray {
        &self.reference
    }

    pub fn caustics(&self) -> &[Caustic] {
        &self.caustics
    }

    fn integrator(&self) -> MgoResult<RayIntegrator<'_, S>> {
        RayIntegrator::new(
            self.problem.symbol(),
            &self.family,
            self.problem.settings().integrator,
        )
    }

    pub fn evaluate(&self, target: f64) -> MgoResult<FieldValue> {
        self.evaluate_with_hints(target, &[])
    }

    /// Evaluates at `target`, adding `hints` to the continuation seeds.
    ///
    /// Retryable failures restart the evaluation with a wider detour and
    /// search region, up to `retry.max_retries` extra attempts.
    pub fn evaluate_with_hints(&self, target: f64, hints: &[Complex64]) -> MgoResult<FieldValue> {
        if !target.is_finite() {
            return Err(MgoError::invalid(format!("target {target} is not finite")));
        }
        let integrator = self.integrator()?;
        let max_retries = self.problem.settings().retry.max_retries;
        let mut attempt = 0;
        loop {
            match self.attempt(&integrator, target, hints, attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    warn!(x = target, attempt, %err, "retrying with a wider deformation");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Evaluates every target independently and in parallel.
    pub fn evaluate_batch(&self, targets: &[f64]) -> Vec<PointResult> {
        targets
            .par_iter()
            .map(|&target| PointResult {
                target,
                result: self.evaluate(target),
            })
            .collect()
    }

    /// Evaluates targets in order, seeding each from the saddles of the last
    /// successful point moved to first order in the target shift.
    pub fn evaluate_sweep(&self, targets: &[f64]) -> Vec<PointResult> {
        let mut anchors: Vec<(Complex64, Complex64)> = Vec::new();
        let mut previous: Option<f64> = None;
        let mut results = Vec::with_capacity(targets.len());
        for &target in targets {
            let hints: Vec<Complex64> = match previous {
                Some(last) => anchors
                    .iter()
                    .map(|&(tau, slope)| homotopy_step(tau, slope, target - last))
                    .collect(),
                None => Vec::new(),
            };
            let result = self.evaluate_with_hints(target, &hints);
            if let Ok(value) = &result {
                anchors = value
                    .trace
                    .saddles
                    .iter()
                    .map(|s| (s.parameter, s.sample.position_rate()[0]))
                    .collect();
                previous = Some(target);
            }
            results.push(PointResult { target, result });
        }
        results
    }

    /// Classical stationary-phase sum over real rays,
    /// a₀ (σk̇)^{1/2} e^{iΦ + iπ/4 sgn Φ''} / √|Φ''|.
    ///
    /// Fails when a real ray is missing or ill-conditioned, which is exactly
    /// where geometrical optics breaks down.
    pub fn geometrical_optics(&self, target: f64) -> MgoResult<Complex64> {
        let settings = self.problem.settings();
        let integrator = self.integrator()?;
        let controller = ContinuationController::new(&integrator, settings.continuation);
        let solver = SaddleSolver::new(
            controller,
            settings.saddle,
            PhaseFunction::new(target),
            self.family.parameter_span,
            0,
        );
        let candidates = solver.dedupe(solver.real_pass(&self.reference)?);
        let samples: Vec<RaySample> = candidates.iter().map(|c| c.sample.clone()).collect();
        if solver.controller().requires_continuation(&samples) {
            return Err(MgoError::ConditioningFailure {
                attempts: 0,
                reason: format!("no well-conditioned real ray reaches x = {target}"),
            });
        }

        let mut field = Complex64::zero();
        for candidate in candidates {
            let saddle = solver.classify(candidate)?;
            let curvature = saddle.curvature;
            if saddle.kind == SaddleKind::Degenerate {
                return Err(MgoError::DegenerateSaddle {
                    parameter: saddle.parameter,
                    curvature: curvature.norm(),
                });
            }
            let maslov = FRAC_PI_4 * curvature.re.signum();
            field += self.family.amplitude
                * saddle.sample.amplitude
                * (I * (saddle.phase + maslov)).exp()
                / curvature.norm().sqrt();
        }
        Ok(field)
    }

    fn seeds(&self, target: f64, hints: &[Complex64], attempt: usize) -> Vec<Complex64> {
        let x = Complex64::new(target, 0.0);
        let mut seeds = Vec::new();
        for caustic in &self.caustics {
            let center = Complex64::new(caustic.parameter, 0.0);
            for seed in caustic.fold_seeds(x) {
                seeds.push(seed);
                if attempt > 0 {
                    seeds.push(center + (seed - center) * (1.0 + 0.5 * attempt as f64));
                    seeds.push(seed.conj());
                }
            }
        }
        seeds.extend_from_slice(hints);
        seeds
    }

    fn attempt(
        &self,
        integrator: &RayIntegrator<'_, S>,
        target: f64,
        hints: &[Complex64],
        attempt: usize,
    ) -> MgoResult<FieldValue> {
        let settings = self.problem.settings();
        let controller = ContinuationController::new(integrator, settings.continuation);
        let phase = PhaseFunction::new(target);
        let solver = SaddleSolver::new(
            controller,
            settings.saddle,
            phase,
            self.family.parameter_span,
            attempt,
        );

        let mut candidates = solver.real_pass(&self.reference)?;
        let real: Vec<RaySample> = candidates.iter().map(|c| c.sample.clone()).collect();
        // complex saddles of a shadowing fold coexist with real rays of other branches
        let continuation_used = solver.controller().requires_continuation(&real)
            || self.caustics.iter().any(|c| c.shadows(target));
        let min_real_jacobian = solver.controller().monitor().min_jacobian(&real);
        let mut failures = Vec::new();
        if continuation_used {
            let seeds = self.seeds(target, hints, attempt);
            debug!(x = target, attempt, seeds = seeds.len(), "real rays insufficient, continuing");
            if seeds.is_empty() {
                return Err(no_caustic_error(attempt + 1));
            }
            let (roots, abandoned) = solver.continued_pass(&self.reference, &seeds, attempt)?;
            candidates.extend(roots);
            failures = abandoned;
        }
        let candidates = solver.dedupe(candidates);
        if candidates.is_empty() {
            return Err(failures.pop().unwrap_or_else(|| MgoError::SaddleNotFound {
                radius: solver.radius(),
                reason: format!("no stationary point of the phase for x = {target}"),
            }));
        }

        let parameters = candidates.iter().map(|c| c.sample.parameter).collect();
        let tracer = ContourTracer::new(integrator, settings.contour, phase).with_saddles(parameters);
        let tolerance = settings.saddle.relevance_tolerance;
        let mut saddles = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut saddle = solver.classify(candidate)?;
            if saddle.kind == SaddleKind::Degenerate {
                return Err(MgoError::DegenerateSaddle {
                    parameter: saddle.parameter,
                    curvature: saddle.curvature.norm(),
                });
            }
            saddle.relevant = saddle.is_real(tolerance)
                || (saddle.phase.im >= -tolerance && tracer.ascent_reaches_real_axis(&saddle)?);
            debug!(
                tau = %saddle.parameter,
                curvature = %saddle.curvature,
                relevant = saddle.relevant,
                continued = saddle.continuation.is_continued(),
                "classified saddle"
            );
            saddles.push(saddle);
        }
        if !saddles.iter().any(|s| s.relevant) {
            return Err(MgoError::SaddleNotFound {
                radius: solver.radius(),
                reason: format!(
                    "none of the {} saddle(s) for x = {target} lies on the deformed real contour",
                    saddles.len()
                ),
            });
        }

        let prefactor = self.family.amplitude / (2.0 * PI).sqrt();
        let mut contributions = Vec::new();
        for saddle in saddles.iter().filter(|s| s.relevant) {
            let contour = tracer.trace(saddle)?;
            let forward = self.contour_integral(integrator, saddle, contour.forward_path(), target)?;
            let backward = self.contour_integral(integrator, saddle, &contour.backward_path(), target)?;
            contributions.push(SaddleContribution {
                saddle: saddle.clone(),
                contour,
                value: prefactor * (forward - backward),
                retained: true,
            });
        }

        let largest = contributions
            .iter()
            .map(|c| c.value.norm())
            .fold(0.0, f64::max);
        let mut value = Complex64::zero();
        for contribution in &mut contributions {
            contribution.retained =
                contribution.value.norm() >= settings.quadrature.retention_ratio * largest;
            if contribution.retained {
                value += contribution.value;
            }
        }

        Ok(FieldValue {
            target,
            value,
            contributions,
            trace: EvaluationTrace {
                caustics: self.caustics.clone(),
                continuation_used,
                min_real_jacobian,
                attempts: attempt + 1,
                saddles,
                abandoned_seeds: failures.len(),
            },
        })
    }

    /// ∫ (σk̇)^{1/2} e^{iΦ} dτ from the saddle along `path`.
    fn contour_integral(
        &self,
        integrator: &RayIntegrator<'_, S>,
        saddle: &Saddle,
        path: &[Complex64],
        target: f64,
    ) -> MgoResult<Complex64> {
        let rays = HamiltonianFlow::new(self.problem.symbol());
        let ray_len = rays.dimension();
        let flow = QuadratureFlow {
            rays,
            integrator,
            target: Complex64::new(target, 0.0),
            accepted: Cell::new(saddle.sample.amplitude),
            ray_len,
        };
        let quadrature = &self.problem.settings().quadrature;
        let settings = IntegratorSettings {
            relative_tolerance: quadrature.relative_tolerance,
            absolute_tolerance: quadrature.absolute_tolerance,
            initial_step: quadrature.curvature_scale / saddle.curvature.norm().sqrt(),
            ..*integrator.settings()
        };

        let mut stepper = Tsit5::new(flow.dimension());
        let mut state = saddle.sample.state_vector();
        state.push(Complex64::zero());
        let mut parameter = saddle.parameter;
        let mut hint = None;
        for &vertex in path.iter().skip(1) {
            let step = integrate_segment(
                &flow,
                &mut stepper,
                &mut state,
                parameter,
                vertex,
                &settings,
                hint,
                |_, y, _| {
                    flow.accept(y);
                    Ok(())
                },
            )
            .map_err(|err| match err {
                MgoError::IntegrationFailure { parameter, reason } => MgoError::QuadratureFailure {
                    reason: format!("contour integral stalled at τ = {parameter}: {reason}"),
                },
                other => other,
            })?;
            hint = Some(step);
            parameter = vertex;
        }
        Ok(state[ray_len])
    }
}

/// First-order prediction of a saddle after the target moves by `shift`:
/// dτ/dx_t = 1/ẋ.
fn homotopy_step(tau: Complex64, slope: Complex64, shift: f64) -> Complex64 {
    if slope.norm() == 0.0 {
        tau
    } else {
        tau + shift / slope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MgoSettings;
    use crate::continuation::ContinuationState;
    use crate::equation_engine::ExpressionSymbol;
    use crate::phase_space::PhaseSpacePoint;
    use crate::symbol::QuadraticHamiltonian;

    /// Maclaurin series of Ai.
    fn airy_series(x: f64) -> f64 {
        let (mut f, mut g) = (1.0, x);
        let (mut tf, mut tg) = (1.0, x);
        for k in 0..200 {
            let k = k as f64;
            tf *= x.powi(3) / ((3.0 * k + 2.0) * (3.0 * k + 3.0));
            tg *= x.powi(3) / ((3.0 * k + 3.0) * (3.0 * k + 4.0));
            f += tf;
            g += tg;
        }
        0.355028053887817239 * f - 0.258819403792806798 * g
    }

    /// Ai(x) = (1/π) ∫₀^∞ cos(t³/3 + x t) dt by Simpson's rule on [0, 20]
    /// plus the leading boundary term of the tail.
    fn brute_force_airy(x: f64) -> f64 {
        let t_max = 20.0;
        let n = 80_000;
        let h = t_max / n as f64;
        let phase = |t: f64| t.powi(3) / 3.0 + x * t;
        let mut sum = phase(0.0).cos() + phase(t_max).cos();
        for j in 1..n {
            let weight = if j % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * phase(j as f64 * h).cos();
        }
        let tail = -phase(t_max).sin() / (t_max * t_max + x);
        (sum * h / 3.0 + tail) / PI
    }

    fn exact_field(x: f64) -> Complex64 {
        Complex64::new((2.0 * PI).sqrt() * airy_series(x), 0.0)
    }

    fn airy_family() -> RayFamily {
        RayFamily::new(PhaseSpacePoint::real(&[0.0], &[0.0]).unwrap(), (-6.0, 6.0))
    }

    /// ψ for D = -k² - x + c k⁴: the real-axis integral rotated onto the two
    /// rays from τ = 0 into the valleys of e^{-icτ⁵/5} at arg τ = -π/10 and
    /// 11π/10, each by Simpson's rule on [0, 10].
    fn rotated_contour_field(x: f64, c: f64) -> Complex64 {
        let n = 20_000;
        let h = 10.0 / n as f64;
        let mut total = Complex64::zero();
        for (theta, sign) in [(-0.1 * PI, 1.0), (1.1 * PI, -1.0)] {
            let ray = Complex64::from_polar(1.0, theta);
            let mut sum = Complex64::zero();
            for j in 0..=n {
                let tau = ray * (j as f64 * h);
                let phase = tau.powi(3) / 3.0 - c * tau.powi(5) / 5.0 + x * tau;
                let weight = if j == 0 || j == n {
                    1.0
                } else if j % 2 == 1 {
                    4.0
                } else {
                    2.0
                };
                sum += weight * (I * phase).exp();
            }
            total += sign * ray * sum * h / 3.0;
        }
        total / (2.0 * PI).sqrt()
    }

    fn expression_evaluator(source: &str) -> FieldEvaluator<ExpressionSymbol> {
        let symbol = ExpressionSymbol::one_dimensional(source).expect("compile");
        let problem = Problem::new(symbol, MgoSettings::default()).unwrap();
        FieldEvaluator::new(problem, airy_family()).expect("evaluator")
    }

    fn airy_evaluator() -> FieldEvaluator<QuadraticHamiltonian> {
        let problem = Problem::new(QuadraticHamiltonian::airy(), MgoSettings::default()).unwrap();
        FieldEvaluator::new(problem, airy_family()).expect("evaluator")
    }

    #[test]
    fn airy_field_through_the_fold() {
        let evaluator = airy_evaluator();
        assert_eq!(evaluator.caustics().len(), 1);
        let targets = [-3.0, -1.5, -0.75, -0.2, -0.02, 0.03, 0.4, 1.2, 2.0, 3.0];
        for point in evaluator.evaluate_sweep(&targets) {
            let value = point.result.expect("field value");
            let expected = exact_field(point.target);
            assert!(
                (value.value - expected).norm() < 1e-5,
                "x = {}: got {}, expected {}",
                point.target,
                value.value,
                expected
            );
            assert_eq!(value.trace.continuation_used, point.target > 0.0);
            let relevant: Vec<&Saddle> = value.trace.saddles.iter().filter(|s| s.relevant).collect();
            if point.target < 0.0 {
                assert_eq!(relevant.len(), 2);
            } else {
                // only the saddle in the upper half plane
                assert_eq!(relevant.len(), 1);
                assert!(relevant[0].parameter.im > 0.0);
                assert!(relevant[0].continuation.is_continued());
            }
        }
    }

    #[test]
    fn airy_field_right_next_to_the_fold() {
        let evaluator = airy_evaluator();
        let mut targets = Vec::new();
        for magnitude in [1e-8, 1e-6, 1e-4, 1e-3, 5e-3, 1e-2, 1.2e-2] {
            targets.push(-magnitude);
            targets.push(magnitude);
        }
        for point in evaluator.evaluate_batch(&targets) {
            let value = point
                .result
                .unwrap_or_else(|err| panic!("x = {}: {err}", point.target));
            let expected = exact_field(point.target);
            assert!(
                (value.value - expected).norm() < 1e-6,
                "x = {}: got {}, expected {}",
                point.target,
                value.value,
                expected
            );
            let saddles = if point.target < 0.0 { 2 } else { 1 };
            assert_eq!(value.contributions.len(), saddles, "x = {}", point.target);
            for contribution in &value.contributions {
                assert!(contribution.contour.terminal_decay < 1e-14);
            }
        }
    }

    #[test]
    fn three_fold_family_matches_rotated_contour_quadrature() {
        let evaluator = expression_evaluator("-k^2 - x + 0.05*k^4");
        let folds: Vec<f64> = evaluator.caustics().iter().map(|c| c.parameter).collect();
        assert_eq!(folds.len(), 3);
        assert!((folds[0] + 10f64.sqrt()).abs() < 1e-8);
        assert!(folds[1].abs() < 1e-12);
        assert!((folds[2] - 10f64.sqrt()).abs() < 1e-8);

        let targets = [-8.0, -5.3, -4.0, -0.5, 0.5, 2.0];
        for point in evaluator.evaluate_batch(&targets) {
            let x = point.target;
            let value = point.result.unwrap_or_else(|err| panic!("x = {x}: {err}"));
            let expected = rotated_contour_field(x, 0.05);
            assert!(
                (value.value - expected).norm() < 1e-5,
                "x = {x}: got {}, expected {expected}",
                value.value
            );

            let relevant: Vec<&Saddle> = value.contributions.iter().map(|c| &c.saddle).collect();
            if x < -5.0 {
                // beyond both outer folds: one complex saddle from each
                assert!(value.trace.continuation_used);
                assert_eq!(relevant.len(), 2);
                assert!(relevant.iter().all(|s| s.parameter.im < 0.0));
                assert!(relevant.iter().any(|s| s.parameter.re < 0.0));
                assert!(relevant.iter().any(|s| s.parameter.re > 0.0));
            } else if x < 0.0 {
                assert!(!value.trace.continuation_used);
                assert_eq!(relevant.len(), 4);
                assert!(relevant.iter().all(|s| s.continuation == ContinuationState::Real));
            } else {
                // outer real rays plus the evanescent saddle of the inner fold
                assert!(value.trace.continuation_used);
                assert_eq!(relevant.len(), 3);
                let continued: Vec<&&Saddle> =
                    relevant.iter().filter(|s| s.continuation.is_continued()).collect();
                assert_eq!(continued.len(), 1);
                assert!(continued[0].parameter.im > 0.0);
                assert!(continued[0].parameter.re.abs() < 1e-8);
            }
        }
    }

    #[test]
    fn amplitude_transport_with_varying_momentum_rate() {
        let evaluator = expression_evaluator("-k^2 - x + 0.05*x^2");
        assert_eq!(evaluator.caustics().len(), 1);
        let target = -8.0;
        let mgo = evaluator.evaluate(target).expect("field value");
        let go = evaluator.geometrical_optics(target).expect("real rays");
        assert_eq!(mgo.contributions.len(), 2);
        let scale: f64 = mgo.contributions.iter().map(|c| c.value.norm()).sum();
        assert!(
            (mgo.value - go).norm() < 2e-2 * scale,
            "mgo {} against go {}",
            mgo.value,
            go
        );
        // σk̇ = 1 - 0.1 x on every ray through x = -8
        for contribution in &mgo.contributions {
            let amplitude = contribution.saddle.sample.amplitude;
            assert!((amplitude - Complex64::new(1.8f64.sqrt(), 0.0)).norm() < 1e-6);
        }
    }

    #[test]
    fn quadrature_amplitude_branch_moves_only_on_accepted_steps() {
        let symbol = QuadraticHamiltonian::airy();
        let family = airy_family();
        let integrator = RayIntegrator::new(&symbol, &family, IntegratorSettings::default()).unwrap();
        let rays = HamiltonianFlow::new(&symbol);
        let ray_len = rays.dimension();
        let flow = QuadratureFlow {
            rays,
            integrator: &integrator,
            target: Complex64::zero(),
            accepted: Cell::new(Complex64::new(1.0, 0.0)),
            ray_len,
        };
        // x = k = S = 0 so the integrand is the amplitude itself; the
        // momentum determinant is the last flow entry
        let state_with = |momentum_det: Complex64| {
            let mut state = vec![Complex64::zero(); ray_len + 1];
            state[3] = Complex64::new(1.0, 0.0);
            state[6] = momentum_det;
            state
        };
        let t = Complex64::zero();
        let mut out = vec![Complex64::zero(); ray_len + 1];

        // trial stage of a step that is later rejected
        let trial = state_with(Complex64::from_polar(1.0, 0.9 * PI));
        flow.apply(t, &trial, &mut out).unwrap();
        assert!((out[ray_len] - Complex64::from_polar(1.0, 0.45 * PI)).norm() < 1e-12);
        assert_eq!(flow.accepted.get(), Complex64::new(1.0, 0.0));

        let beyond = state_with(Complex64::from_polar(1.0, 1.1 * PI));
        flow.apply(t, &beyond, &mut out).unwrap();
        assert!((out[ray_len] - Complex64::from_polar(1.0, -0.45 * PI)).norm() < 1e-12);

        // once the trial point is accepted the branch follows it
        flow.accept(&trial);
        flow.apply(t, &beyond, &mut out).unwrap();
        assert!((out[ray_len] - Complex64::from_polar(1.0, 0.55 * PI)).norm() < 1e-12);
    }

    #[test]
    fn interference_of_two_real_saddles_matches_real_axis_quadrature() {
        let evaluator = airy_evaluator();
        let value = evaluator.evaluate(-2.0).expect("field value");
        assert_eq!(value.contributions.len(), 2);
        assert!(value.contributions.iter().all(|c| c.retained));
        let sum: Complex64 = value.contributions.iter().map(|c| c.value).sum();
        assert!((sum - value.value).norm() < 1e-14);
        for contribution in &value.contributions {
            assert_eq!(contribution.saddle.continuation, ContinuationState::Real);
            // each saddle alone is far from the total
            assert!((contribution.value - value.value).norm() > 0.1);
        }

        // |ẋ| = 2|τ| at τ = ±√2
        let min = value.trace.min_real_jacobian.expect("real rays");
        assert!((min - 2.0 * 2f64.sqrt()).abs() < 1e-8);

        let brute = (2.0 * PI).sqrt() * brute_force_airy(-2.0);
        assert!((value.value.re - brute).abs() < 1e-4);
        assert!(value.value.im.abs() < 1e-6);
    }

    #[test]
    fn geometrical_optics_matches_far_from_the_caustic() {
        let evaluator = airy_evaluator();
        let go = evaluator.geometrical_optics(-10.0).expect("real rays");
        let exact = exact_field(-10.0);
        assert!((go - exact).norm() < 1e-2);
        assert!(go.im.abs() < 1e-8);

        let mgo = evaluator.evaluate(-6.0).expect("field value");
        let go = evaluator.geometrical_optics(-6.0).expect("real rays");
        assert!((mgo.value - go).norm() < 2e-2);

        match evaluator.geometrical_optics(1.0) {
            Err(MgoError::ConditioningFailure { .. }) => {}
            other => panic!("expected a conditioning failure, got {other:?}"),
        }
    }

    #[test]
    fn singular_symbol_reports_domain_error() {
        let symbol = ExpressionSymbol::one_dimensional("-k^2 - x + 1e-6/(k - 0.9*i)")
            .unwrap()
            .with_singularity_tolerance(0.2);
        let problem = Problem::new(symbol, MgoSettings::default()).unwrap();
        let evaluator = FieldEvaluator::new(problem, airy_family()).expect("real rays avoid the pole");
        match evaluator.evaluate(1.0) {
            Err(MgoError::Domain { reason, .. }) => assert!(reason.contains("singularity")),
            other => panic!("expected a domain error, got {other:?}"),
        }
    }

    #[test]
    fn batch_isolates_the_degenerate_point() {
        let evaluator = airy_evaluator();
        let results = evaluator.evaluate_batch(&[-1.0, 0.0, 1.0]);
        assert_eq!(
            results.iter().map(|r| r.target).collect::<Vec<_>>(),
            vec![-1.0, 0.0, 1.0]
        );
        match &results[1].result {
            Err(MgoError::DegenerateSaddle { parameter, .. }) => assert!(parameter.norm() < 1e-12),
            other => panic!("expected a degenerate saddle, got {other:?}"),
        }
        for idx in [0, 2] {
            let value = results[idx].result.as_ref().expect("field value");
            assert!((value.value - exact_field(results[idx].target)).norm() < 1e-5);
        }

        let json = serde_json::to_string(&results[1]).unwrap();
        assert!(json.contains("DegenerateSaddle"));
        let json = serde_json::to_string(&results[2]).unwrap();
        assert!(json.contains("continuation_used"));
    }

    #[test]
    fn sweep_agrees_with_batch() {
        let evaluator = airy_evaluator();
        let targets = [-1.0, -0.3, 0.2, 0.9];
        let sweep = evaluator.evaluate_sweep(&targets);
        let batch = evaluator.evaluate_batch(&targets);
        for (s, b) in sweep.iter().zip(batch.iter()) {
            let s = s.result.as_ref().expect("sweep value");
            let b = b.result.as_ref().expect("batch value");
            assert!((s.value - b.value).norm() < 1e-8);
        }
    }

    #[test]
    fn rejects_multidimensional_fields() {
        let problem =
            Problem::new(QuadraticHamiltonian::new(2, 1.0, 1.0, 0.0), MgoSettings::default()).unwrap();
        let zero = Complex64::new(0.0, 0.0);
        let family = RayFamily::new(
            PhaseSpacePoint::real(&[0.0, 0.0], &[0.0, 1.0]).unwrap(),
            (-2.0, 2.0),
        )
        .with_transverse(vec![vec![zero, Complex64::new(1.0, 0.0), zero, zero]]);
        match FieldEvaluator::new(problem, family) {
            Err(MgoError::InvalidConfiguration { reason }) => assert!(reason.contains("dimension 2")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("two-dimensional field must be rejected"),
        }
    }

    #[test]
    fn homotopy_step_follows_the_ray_map() {
        let tau = Complex64::new(0.0, 1.0);
        // ẋ = -2τ on the Airy family
        let next = homotopy_step(tau, -2.0 * tau, 0.21);
        assert!((next - Complex64::new(0.0, 1.105)).norm() < 1e-12);
        assert_eq!(homotopy_step(tau, Complex64::new(0.0, 0.0), 1.0), tau);
    }
}
