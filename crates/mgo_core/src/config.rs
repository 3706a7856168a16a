//! Problem configuration.
//!
//! All tolerances and budgets live here and are passed explicitly into every
//! component. A `Problem` is immutable once validated.

use crate::continuation::DeformationStrategy;
use crate::error::{MgoError, MgoResult};
use crate::phase_space::PhaseSpacePoint;
use crate::traits::Symbol;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Adaptive Tsit5 step control for ray integration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// Accepted plus rejected steps allowed per straight segment.
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-12,
            initial_step: 0.05,
            min_step: 1e-12,
            max_step: 0.25,
            max_steps: 200_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationSettings {
    /// Minimum |det ∂x/∂(τ, ξ)| a real ray may have before continuation is required.
    pub conditioning_threshold: f64,
    /// Number of grid intervals of the real reference ray.
    pub reference_resolution: usize,
    pub caustic_tolerance: f64,
    pub caustic_max_iterations: usize,
    pub strategy: DeformationStrategy,
    /// Perpendicular detour added on retry attempts.
    pub detour_radius: f64,
    pub detour_growth: f64,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            conditioning_threshold: 1e-3,
            reference_resolution: 240,
            caustic_tolerance: 1e-12,
            caustic_max_iterations: 60,
            strategy: DeformationStrategy::Straight,
            detour_radius: 0.25,
            detour_growth: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SaddleSettings {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub max_newton_step: f64,
    /// Half-width of the complex search region around the parameter span.
    pub search_radius: f64,
    pub search_growth: f64,
    pub dedupe_tolerance: f64,
    pub degeneracy_tolerance: f64,
    pub relevance_tolerance: f64,
}

impl Default for SaddleSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 60,
            max_newton_step: 1.0,
            search_radius: 4.0,
            search_growth: 2.0,
            dedupe_tolerance: 1e-6,
            degeneracy_tolerance: 1e-10,
            relevance_tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourSettings {
    /// Target decrease of Re(iΦ) per contour step.
    pub level_drop: f64,
    /// Stop once |integrand| falls below this fraction of its saddle value.
    pub decay_tolerance: f64,
    pub max_arc_length: f64,
    pub max_steps: usize,
    /// Steps are halved on rejection down to this size before the walk fails.
    pub min_step: f64,
    pub max_step: f64,
    /// Steps stay below this fraction of |F'/F''|, and the first step below
    /// this fraction of half the distance to the nearest other saddle.
    pub local_scale: f64,
    /// Newton corrections smaller than this (in τ) end the correction.
    pub corrector_tolerance: f64,
    pub corrector_iterations: usize,
    /// Ascent paths are abandoned once Re(iΦ) has grown by this much.
    pub ascent_cutoff: f64,
}

impl Default for ContourSettings {
    fn default() -> Self {
        Self {
            level_drop: 0.25,
            decay_tolerance: 1e-14,
            max_arc_length: 40.0,
            max_steps: 4000,
            min_step: 1e-12,
            max_step: 0.5,
            local_scale: 0.5,
            corrector_tolerance: 1e-10,
            corrector_iterations: 4,
            ascent_cutoff: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadratureSettings {
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// First step is `curvature_scale / sqrt|Φ''|`.
    pub curvature_scale: f64,
    /// Saddles contributing less than this fraction of the largest are dropped.
    pub retention_ratio: f64,
}

impl Default for QuadratureSettings {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-13,
            curvature_scale: 0.5,
            retention_ratio: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MgoSettings {
    pub integrator: IntegratorSettings,
    pub continuation: ContinuationSettings,
    pub saddle: SaddleSettings,
    pub contour: ContourSettings,
    pub quadrature: QuadratureSettings,
    pub retry: RetrySettings,
}

fn require_positive(name: &str, value: f64) -> MgoResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(MgoError::invalid(format!(
            "{name} must be positive and finite (got {value})"
        )));
    }
    Ok(())
}

fn require_nonzero(name: &str, value: usize) -> MgoResult<()> {
    if value == 0 {
        return Err(MgoError::invalid(format!("{name} must be greater than zero")));
    }
    Ok(())
}

impl MgoSettings {
    pub fn validate(&self) -> MgoResult<()> {
        let i = &self.integrator;
        require_positive("integrator.relative_tolerance", i.relative_tolerance)?;
        require_positive("integrator.absolute_tolerance", i.absolute_tolerance)?;
        require_positive("integrator.initial_step", i.initial_step)?;
        require_positive("integrator.min_step", i.min_step)?;
        require_positive("integrator.max_step", i.max_step)?;
        require_nonzero("integrator.max_steps", i.max_steps)?;
        if i.min_step > i.max_step {
            return Err(MgoError::invalid(
                "integrator.min_step exceeds integrator.max_step",
            ));
        }

        let c = &self.continuation;
        require_positive("continuation.conditioning_threshold", c.conditioning_threshold)?;
        require_positive("continuation.caustic_tolerance", c.caustic_tolerance)?;
        require_positive("continuation.detour_radius", c.detour_radius)?;
        require_nonzero("continuation.caustic_max_iterations", c.caustic_max_iterations)?;
        if c.reference_resolution < 2 {
            return Err(MgoError::invalid(
                "continuation.reference_resolution must be at least 2",
            ));
        }
        if !(c.detour_growth >= 1.0) {
            return Err(MgoError::invalid("continuation.detour_growth must be >= 1"));
        }
        c.strategy.validate()?;

        let s = &self.saddle;
        require_positive("saddle.tolerance", s.tolerance)?;
        require_positive("saddle.max_newton_step", s.max_newton_step)?;
        require_positive("saddle.search_radius", s.search_radius)?;
        require_positive("saddle.dedupe_tolerance", s.dedupe_tolerance)?;
        require_positive("saddle.degeneracy_tolerance", s.degeneracy_tolerance)?;
        require_positive("saddle.relevance_tolerance", s.relevance_tolerance)?;
        require_nonzero("saddle.max_iterations", s.max_iterations)?;
        if !(s.search_growth >= 1.0) {
            return Err(MgoError::invalid("saddle.search_growth must be >= 1"));
        }

        let k = &self.contour;
        require_positive("contour.level_drop", k.level_drop)?;
        require_positive("contour.decay_tolerance", k.decay_tolerance)?;
        require_positive("contour.max_arc_length", k.max_arc_length)?;
        require_positive("contour.min_step", k.min_step)?;
        require_positive("contour.max_step", k.max_step)?;
        require_positive("contour.corrector_tolerance", k.corrector_tolerance)?;
        require_positive("contour.ascent_cutoff", k.ascent_cutoff)?;
        require_nonzero("contour.max_steps", k.max_steps)?;
        if k.min_step > k.max_step {
            return Err(MgoError::invalid("contour.min_step exceeds contour.max_step"));
        }
        if !(k.local_scale > 0.0 && k.local_scale <= 1.0) {
            return Err(MgoError::invalid("contour.local_scale must lie in (0, 1]"));
        }
        if k.decay_tolerance >= 1.0 {
            return Err(MgoError::invalid("contour.decay_tolerance must be below 1"));
        }

        let q = &self.quadrature;
        require_positive("quadrature.relative_tolerance", q.relative_tolerance)?;
        require_positive("quadrature.absolute_tolerance", q.absolute_tolerance)?;
        require_positive("quadrature.curvature_scale", q.curvature_scale)?;
        if !(0.0..1.0).contains(&q.retention_ratio) {
            return Err(MgoError::invalid(
                "quadrature.retention_ratio must lie in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// The family of rays whose superposition forms the field.
///
/// Rays are labelled by the trajectory parameter τ measured from `launch`;
/// the real family spans `parameter_span`. For N > 1 the transverse launch
/// tangents complete the family Jacobian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RayFamily {
    pub launch: PhaseSpacePoint,
    pub parameter_span: (f64, f64),
    /// Incident amplitude a₀.
    #[serde(default = "unit_amplitude")]
    pub amplitude: Complex64,
    #[serde(default)]
    pub transverse: Vec<Vec<Complex64>>,
}

fn unit_amplitude() -> Complex64 {
    Complex64::new(1.0, 0.0)
}

impl RayFamily {
    pub fn new(launch: PhaseSpacePoint, parameter_span: (f64, f64)) -> Self {
        Self {
            launch,
            parameter_span,
            amplitude: unit_amplitude(),
            transverse: Vec::new(),
        }
    }

    pub fn with_amplitude(mut self, amplitude: Complex64) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_transverse(mut self, transverse: Vec<Vec<Complex64>>) -> Self {
        self.transverse = transverse;
        self
    }

    pub fn validate(&self) -> MgoResult<()> {
        let n = self.launch.dimension();
        let (lo, hi) = self.parameter_span;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(MgoError::invalid(format!(
                "parameter span ({lo}, {hi}) must be finite and increasing"
            )));
        }
        if lo > 0.0 || hi < 0.0 {
            return Err(MgoError::invalid(
                "parameter span must contain the launch parameter 0",
            ));
        }
        if self.transverse.len() + 1 != n {
            return Err(MgoError::invalid(format!(
                "a {n}-dimensional family needs {} transverse tangent(s), got {}",
                n - 1,
                self.transverse.len()
            )));
        }
        if let Some(bad) = self.transverse.iter().find(|t| t.len() != 2 * n) {
            return Err(MgoError::invalid(format!(
                "transverse tangent has {} components, expected {}",
                bad.len(),
                2 * n
            )));
        }
        if !self.amplitude.is_finite() {
            return Err(MgoError::invalid("incident amplitude must be finite"));
        }
        Ok(())
    }
}

/// An immutable symbol bound to validated settings.
#[derive(Debug, Clone)]
pub struct Problem<S> {
    symbol: S,
    settings: MgoSettings,
}

impl<S: Symbol> Problem<S> {
    pub fn new(symbol: S, settings: MgoSettings) -> MgoResult<Self> {
        settings.validate()?;
        if symbol.dimension() == 0 {
            return Err(MgoError::invalid("symbol has zero dimension"));
        }
        Ok(Self { symbol, settings })
    }

    pub fn symbol(&self) -> &S {
        &self.symbol
    }

    pub fn settings(&self) -> &MgoSettings {
        &self.settings
    }
}
