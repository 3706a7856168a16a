//! Steepest-descent contours through saddles of F = iΦ.
//!
//! Each contour is a polyline in the complex τ plane along which Im F stays
//! at its saddle value and Re F falls off on both sides. Steps follow
//! -conj(F')/|F'| and every step is pulled back to the level set with a
//! Newton correction on Im F.

use crate::config::ContourSettings;
use crate::error::{MgoError, MgoResult};
use crate::ray::{RayIntegrator, RaySample};
use crate::saddle::{PhaseFunction, Saddle};
use crate::traits::Symbol;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const I: Complex64 = Complex64::new(0.0, 1.0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteepestDescentContour {
    pub saddle_parameter: Complex64,
    /// Im F at the saddle, constant along the contour.
    pub level: f64,
    /// Ordered from the backward end through the saddle to the forward end.
    pub points: Vec<Complex64>,
    pub saddle_index: usize,
    pub arc_length: f64,
    /// Largest relative integrand size left at either end.
    pub terminal_decay: f64,
}

impl SteepestDescentContour {
    /// Saddle first, then outward along the descent direction.
    pub fn forward_path(&self) -> &[Complex64] {
        &self.points[self.saddle_index..]
    }

    /// Saddle first, then outward against the descent direction.
    pub fn backward_path(&self) -> Vec<Complex64> {
        self.points[..=self.saddle_index].iter().rev().copied().collect()
    }
}

#[derive(Clone, Copy)]
enum Walk {
    Descent,
    Ascent,
}

struct HalfPath {
    points: Vec<Complex64>,
    arc_length: f64,
    decay: f64,
    crossed_real_axis: bool,
}

pub struct ContourTracer<'r, 'a, S> {
    integrator: &'r RayIntegrator<'a, S>,
    settings: ContourSettings,
    phase: PhaseFunction,
    /// Every known saddle of the phase, used to size the first step.
    saddles: Vec<Complex64>,
}

impl<'r, 'a, S: Symbol> ContourTracer<'r, 'a, S> {
    pub fn new(
        integrator: &'r RayIntegrator<'a, S>,
        settings: ContourSettings,
        phase: PhaseFunction,
    ) -> Self {
        Self {
            integrator,
            settings,
            phase,
            saddles: Vec::new(),
        }
    }

    pub fn with_saddles(mut self, saddles: Vec<Complex64>) -> Self {
        self.saddles = saddles;
        self
    }

    fn exponent(&self, sample: &RaySample) -> Complex64 {
        I * self.phase.value(sample)
    }

    fn slope(&self, sample: &RaySample) -> Complex64 {
        I * self.phase.derivative(sample)
    }

    fn failure(reason: String) -> MgoError {
        MgoError::QuadratureFailure { reason }
    }

    /// Distance from `tau` to the nearest other known saddle.
    fn separation(&self, tau: Complex64) -> Option<f64> {
        self.saddles
            .iter()
            .map(|&other| (other - tau).norm())
            .filter(|&d| d > 0.0)
            .min_by(f64::total_cmp)
    }

    /// Pulls `sample` back onto Im F = `level`, or `None` if Newton has not
    /// settled after `corrector_iterations` corrections.
    fn correct(&self, mut sample: RaySample, level: f64) -> MgoResult<Option<RaySample>> {
        for iteration in 0..=self.settings.corrector_iterations {
            let error = self.exponent(&sample).im - level;
            if error == 0.0 {
                return Ok(Some(sample));
            }
            let slope = self.slope(&sample);
            if slope.norm() == 0.0 {
                return Ok(None);
            }
            let delta = -I * error / slope;
            if delta.norm() <= self.settings.corrector_tolerance {
                return Ok(Some(sample));
            }
            if iteration == self.settings.corrector_iterations {
                break;
            }
            sample = self.integrator.advance(&sample, sample.parameter + delta)?;
        }
        Ok(None)
    }

    /// Largest step the local geometry allows at `sample`: the level drop
    /// target and a fraction of |F'/F''|, the distance to the stationary point
    /// of the local quadratic model.
    fn step_bound(&self, sample: &RaySample, slope: Complex64) -> MgoResult<f64> {
        let mut h = (self.settings.level_drop / slope.norm()).min(self.settings.max_step);
        let acceleration = self.integrator.acceleration(sample)?;
        let curvature = self.phase.second_derivative(sample, &acceleration).norm();
        if curvature > 0.0 {
            h = h.min(self.settings.local_scale * slope.norm() / curvature);
        }
        Ok(h)
    }

    /// One accepted step of at most `h` along `heading`.
    ///
    /// Trial steps are halved until the corrector settles close to the
    /// predicted point and Re F has moved in the walk's direction.
    fn step(
        &self,
        sample: &RaySample,
        heading: Complex64,
        mut h: f64,
        level: f64,
        mode: Walk,
    ) -> MgoResult<(RaySample, Complex64)> {
        let current = self.exponent(sample).re;
        while h >= self.settings.min_step {
            let predicted = sample.parameter + heading * h;
            let trial = self.integrator.advance(sample, predicted)?;
            if let Some(next) = self.correct(trial, level)? {
                let f = self.exponent(&next);
                let local = (next.parameter - predicted).norm() <= 0.5 * h;
                let monotone = match mode {
                    Walk::Descent => f.re < current,
                    Walk::Ascent => f.re > current,
                };
                if local && monotone {
                    return Ok((next, f));
                }
            }
            h *= 0.5;
        }
        Err(Self::failure(format!(
            "step from τ = {} fell below {:e} without staying on the level set",
            sample.parameter, self.settings.min_step
        )))
    }

    fn walk(&self, saddle: &Saddle, direction: Complex64, mode: Walk) -> MgoResult<HalfPath> {
        let f_saddle = self.exponent(&saddle.sample);
        let amplitude_saddle = saddle.sample.amplitude.norm().max(f64::MIN_POSITIVE);
        let sign = match mode {
            Walk::Descent => -1.0,
            Walk::Ascent => 1.0,
        };
        let crosses =
            |tau: Complex64| saddle.parameter.im != 0.0 && tau.im * saddle.parameter.im <= 0.0;

        // quadratic model, kept well inside the gap to any neighbouring saddle
        let mut h = (2.0 * self.settings.level_drop / saddle.curvature.norm())
            .sqrt()
            .min(self.settings.max_step);
        if let Some(separation) = self.separation(saddle.parameter) {
            h = h.min(0.5 * self.settings.local_scale * separation);
        }
        let mut heading = direction;
        let mut sample = saddle.sample.clone();
        let mut points = vec![saddle.parameter];
        let mut arc_length = 0.0;

        for step in 0..self.settings.max_steps {
            let (next, f) = self.step(&sample, heading, h, f_saddle.im, mode)?;
            arc_length += (next.parameter - sample.parameter).norm();
            sample = next;
            points.push(sample.parameter);

            let rise = f.re - f_saddle.re;
            match mode {
                Walk::Descent => {
                    let decay = sample.amplitude.norm() / amplitude_saddle * rise.exp();
                    if decay < self.settings.decay_tolerance {
                        trace!(step, arc_length, "descent path decayed");
                        return Ok(HalfPath {
                            points,
                            arc_length,
                            decay,
                            crossed_real_axis: false,
                        });
                    }
                }
                Walk::Ascent => {
                    if crosses(sample.parameter) {
                        return Ok(HalfPath {
                            points,
                            arc_length,
                            decay: rise.exp(),
                            crossed_real_axis: true,
                        });
                    }
                    if rise > self.settings.ascent_cutoff {
                        break;
                    }
                }
            }
            if arc_length > self.settings.max_arc_length {
                return match mode {
                    Walk::Descent => Err(Self::failure(format!(
                        "descent path from τ = {} exceeded arc length {}",
                        saddle.parameter, self.settings.max_arc_length
                    ))),
                    Walk::Ascent => break,
                };
            }

            let slope = self.slope(&sample);
            if slope.norm() == 0.0 {
                return Err(Self::failure(format!(
                    "path from τ = {} ran into another stationary point at τ = {}",
                    saddle.parameter, sample.parameter
                )));
            }
            heading = sign * slope.conj() / slope.norm();
            h = self.step_bound(&sample, slope)?;
        }

        match mode {
            Walk::Descent => Err(Self::failure(format!(
                "descent path from τ = {} did not decay within {} steps",
                saddle.parameter, self.settings.max_steps
            ))),
            Walk::Ascent => Ok(HalfPath {
                points,
                arc_length,
                decay: f64::INFINITY,
                crossed_real_axis: false,
            }),
        }
    }

    /// Traces both descent halves through `saddle`.
    pub fn trace(&self, saddle: &Saddle) -> MgoResult<SteepestDescentContour> {
        let forward = self.walk(saddle, saddle.descent_direction, Walk::Descent)?;
        let backward = self.walk(saddle, -saddle.descent_direction, Walk::Descent)?;

        let saddle_index = backward.points.len() - 1;
        let mut points: Vec<Complex64> = backward.points.into_iter().rev().collect();
        points.extend_from_slice(&forward.points[1..]);
        debug!(
            saddle = %saddle.parameter,
            points = points.len(),
            arc = forward.arc_length + backward.arc_length,
            "traced steepest-descent contour"
        );
        Ok(SteepestDescentContour {
            saddle_parameter: saddle.parameter,
            level: self.exponent(&saddle.sample).im,
            points,
            saddle_index,
            arc_length: forward.arc_length + backward.arc_length,
            terminal_decay: forward.decay.max(backward.decay),
        })
    }

    /// Whether a steepest-ascent path from `saddle` reaches the real τ axis,
    /// i.e. whether the real integration contour can be deformed through it.
    pub fn ascent_reaches_real_axis(&self, saddle: &Saddle) -> MgoResult<bool> {
        if saddle.parameter.im == 0.0 {
            return Ok(true);
        }
        for direction in [I * saddle.descent_direction, -I * saddle.descent_direction] {
            match self.walk(saddle, direction, Walk::Ascent) {
                Ok(path) if path.crossed_real_axis => return Ok(true),
                Ok(_) => {}
                Err(MgoError::QuadratureFailure { reason }) => {
                    debug!(saddle = %saddle.parameter, %reason, "ascent path abandoned")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }
}
