use crate::config::IntegratorSettings;
use crate::error::{MgoError, MgoResult};
use crate::traits::ComplexFlow;
use num_complex::Complex64;
use num_traits::Zero;

// Tsit5 tableau.
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.898;
const A42: f64 = -6.359447987781783;
const A43: f64 = 4.361447987781783;
const A51: f64 = 5.325864858437957;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.495539342889693;
const A54: f64 = -0.09249506636030195;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.02826857949054663;

// 5th order weights (also the last stage row, FSAL).
const B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436099,
    2.324710524099774,
];

// Difference between the 5th and embedded 4th order weights.
const BTILDE: [f64; 7] = [
    -0.00178001105222577714,
    -0.0008164344596567469,
    0.007880878010261995,
    -0.1447110071732629,
    0.5823571654525552,
    -0.45808210592918697,
    0.015151515151515152,
];

/// Tsitouras 5/4 solver with embedded error estimate, stepping in a complex
/// time direction.
pub struct Tsit5 {
    k: [Vec<Complex64>; 7],
    tmp: Vec<Complex64>,
    candidate: Vec<Complex64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        let z = Complex64::zero();
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
            candidate: vec![z; dim],
        }
    }

    pub fn dimension(&self) -> usize {
        self.tmp.len()
    }

    fn stage(&mut self, state: &[Complex64], dt: Complex64, weights: &[f64]) {
        for i in 0..state.len() {
            let mut acc = Complex64::zero();
            for (m, w) in weights.iter().enumerate() {
                acc += *w * self.k[m][i];
            }
            self.tmp[i] = state[i] + dt * acc;
        }
    }

    /// Attempts one step of complex size `dt` from `(t, state)`.
    ///
    /// On return `candidate()` holds the 5th order solution and `velocity()`
    /// the vector field evaluated there. The returned value is the RMS error
    /// norm scaled by the tolerances; the step is acceptable when it is <= 1.
    pub fn try_step<F: ComplexFlow + ?Sized>(
        &mut self,
        system: &F,
        t: Complex64,
        state: &[Complex64],
        dt: Complex64,
        settings: &IntegratorSettings,
    ) -> MgoResult<f64> {
        let n = state.len();

        system.apply(t, state, &mut self.k[0])?;

        self.stage(state, dt, &[A21]);
        system.apply(t + C2 * dt, &self.tmp, &mut self.k[1])?;

        self.stage(state, dt, &[A31, A32]);
        system.apply(t + C3 * dt, &self.tmp, &mut self.k[2])?;

        self.stage(state, dt, &[A41, A42, A43]);
        system.apply(t + C4 * dt, &self.tmp, &mut self.k[3])?;

        self.stage(state, dt, &[A51, A52, A53, A54]);
        system.apply(t + C5 * dt, &self.tmp, &mut self.k[4])?;

        self.stage(state, dt, &[A61, A62, A63, A64, A65]);
        system.apply(t + dt, &self.tmp, &mut self.k[5])?;

        self.stage(state, dt, &B);
        self.candidate.copy_from_slice(&self.tmp);
        system.apply(t + dt, &self.candidate, &mut self.k[6])?;

        let mut sum = 0.0;
        for i in 0..n {
            let mut err = Complex64::zero();
            for (m, w) in BTILDE.iter().enumerate() {
                err += *w * self.k[m][i];
            }
            let scale = settings.absolute_tolerance
                + settings.relative_tolerance * state[i].norm().max(self.candidate[i].norm());
            sum += ((dt * err).norm() / scale).powi(2);
        }
        Ok((sum / n.max(1) as f64).sqrt())
    }

    pub fn candidate(&self) -> &[Complex64] {
        &self.candidate
    }

    pub fn velocity(&self) -> &[Complex64] {
        &self.k[6]
    }
}

fn step_factor(err: f64) -> f64 {
    if err == 0.0 {
        5.0
    } else {
        (0.9 * err.powf(-0.2)).clamp(0.2, 5.0)
    }
}

/// Integrates `state` along the straight segment `from -> to` in the complex
/// parameter plane, landing exactly on `to`.
///
/// `on_accept(t, state, velocity)` is called after every accepted step. The
/// return value is the last step length attempted, a hint for the next
/// segment.
pub fn integrate_segment<F, C>(
    system: &F,
    stepper: &mut Tsit5,
    state: &mut [Complex64],
    from: Complex64,
    to: Complex64,
    settings: &IntegratorSettings,
    step_hint: Option<f64>,
    mut on_accept: C,
) -> MgoResult<f64>
where
    F: ComplexFlow + ?Sized,
    C: FnMut(Complex64, &[Complex64], &[Complex64]) -> MgoResult<()>,
{
    let length = (to - from).norm();
    let mut h = step_hint
        .unwrap_or(settings.initial_step)
        .min(settings.max_step);
    if length == 0.0 {
        return Ok(h);
    }
    let direction = (to - from) / length;
    let mut s = 0.0;
    let mut attempts = 0usize;

    while s < length {
        attempts += 1;
        if attempts > settings.max_steps {
            return Err(MgoError::IntegrationFailure {
                parameter: from + direction * s,
                reason: format!("step budget of {} exhausted", settings.max_steps),
            });
        }

        if h < settings.min_step {
            return Err(MgoError::IntegrationFailure {
                parameter: from + direction * s,
                reason: format!(
                    "step size {h:e} fell below minimum {:e}",
                    settings.min_step
                ),
            });
        }
        let last = s + h >= length;
        let h_step = if last { length - s } else { h };
        let t = from + direction * s;
        let err = stepper.try_step(system, t, state, direction * h_step, settings)?;

        if err.is_finite() && err <= 1.0 {
            s = if last { length } else { s + h_step };
            state.copy_from_slice(stepper.candidate());
            let t_new = if last { to } else { from + direction * s };
            on_accept(t_new, state, stepper.velocity())?;
            let grown = (h_step * step_factor(err)).min(settings.max_step);
            // a trimmed final step must not shrink the hint
            h = if last { grown.max(h) } else { grown };
        } else {
            let factor = if err.is_finite() {
                step_factor(err).min(0.9)
            } else {
                0.2
            };
            h = h_step * factor;
        }
    }
    Ok(h.min(settings.max_step))
}
