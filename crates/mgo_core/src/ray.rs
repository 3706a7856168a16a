//! Ray integration along arbitrary polylines in the complex parameter plane.
//!
//! The state integrated for an N-dimensional symbol is
//! `[x (N), k (N), S, M (2N x 2N, row-major)]` with
//! ẋ = ∂D/∂k, k̇ = -∂D/∂x, Ṡ = k·ẋ and Ṁ = J·Hess(D)·M, M(0) = I.

use crate::config::{IntegratorSettings, RayFamily};
use crate::continuation::ContinuationState;
use crate::error::{MgoError, MgoResult};
use crate::phase_space::PhaseSpacePoint;
use crate::solvers::{integrate_segment, Tsit5};
use crate::symbol::evaluate_jet;
use crate::traits::{ComplexFlow, Symbol};
use crate::util::continuous_sqrt;
use nalgebra::DMatrix;
use num_complex::Complex64;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

fn state_len(n: usize) -> usize {
    2 * n + 1 + 4 * n * n
}

/// One point of a ray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaySample {
    pub parameter: Complex64,
    pub point: PhaseSpacePoint,
    pub action: Complex64,
    /// ∂(x, k)(τ)/∂(x, k)(0), row-major.
    pub flow_jacobian: Vec<Complex64>,
    /// Phase-space velocity `(ẋ, k̇)`.
    pub velocity: Vec<Complex64>,
    /// det ∂x/∂(τ, ξ) over the family; ẋ when N = 1.
    pub position_jacobian: Complex64,
    /// det ∂k/∂(τ, ξ) over the family; k̇ when N = 1.
    pub momentum_jacobian: Complex64,
    /// Branch-continued `(σ · momentum_jacobian)^{1/2}`.
    pub amplitude: Complex64,
}

impl RaySample {
    pub fn dimension(&self) -> usize {
        self.point.dimension()
    }

    pub fn state_vector(&self) -> Vec<Complex64> {
        let mut state = self.point.coordinates();
        state.push(self.action);
        state.extend_from_slice(&self.flow_jacobian);
        state
    }

    pub fn position_rate(&self) -> &[Complex64] {
        &self.velocity[..self.dimension()]
    }

    pub fn momentum_rate(&self) -> &[Complex64] {
        &self.velocity[self.dimension()..]
    }
}

/// An ordered sequence of samples with the continuation path that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ray {
    pub samples: Vec<RaySample>,
    pub continuation: ContinuationState,
}

impl Ray {
    pub fn first(&self) -> Option<&RaySample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&RaySample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Canonical equations plus action and tangent flow.
pub struct HamiltonianFlow<'a, S> {
    symbol: &'a S,
    dimension: usize,
}

impl<'a, S: Symbol> HamiltonianFlow<'a, S> {
    pub fn new(symbol: &'a S) -> Self {
        Self {
            symbol,
            dimension: symbol.dimension(),
        }
    }
}

impl<S: Symbol> ComplexFlow for HamiltonianFlow<'_, S> {
    fn dimension(&self) -> usize {
        state_len(self.dimension)
    }

    fn apply(&self, _t: Complex64, state: &[Complex64], out: &mut [Complex64]) -> MgoResult<()> {
        let n = self.dimension;
        let m = 2 * n;
        let point = PhaseSpacePoint::from_coordinates(&state[..m]);
        let jet = evaluate_jet(self.symbol, &point)?;

        let velocity = jet.hamiltonian_velocity();
        out[..m].copy_from_slice(&velocity);
        out[m] = (0..n).map(|i| state[n + i] * velocity[i]).sum();

        let a = jet.flow_linearization();
        let phi = &state[m + 1..];
        let dphi = &mut out[m + 1..];
        for i in 0..m {
            for j in 0..m {
                let mut sum = Complex64::zero();
                for k in 0..m {
                    sum += a[(i, k)] * phi[k * m + j];
                }
                dphi[i * m + j] = sum;
            }
        }
        Ok(())
    }
}

/// Integrates rays of one family of a symbol.
pub struct RayIntegrator<'a, S> {
    symbol: &'a S,
    settings: IntegratorSettings,
    /// Columns `[v₀, t₁ .. t_{N-1}]`: launch velocity and transverse tangents.
    family_tangents: DMatrix<Complex64>,
    orientation: f64,
    launch: RaySample,
}

impl<'a, S: Symbol> RayIntegrator<'a, S> {
    pub fn new(symbol: &'a S, family: &RayFamily, settings: IntegratorSettings) -> MgoResult<Self> {
        family.validate()?;
        let n = symbol.dimension();
        if family.launch.dimension() != n {
            return Err(MgoError::invalid(format!(
                "launch point has dimension {} but symbol has dimension {n}",
                family.launch.dimension()
            )));
        }

        let jet = evaluate_jet(symbol, &family.launch)?;
        let v0 = jet.hamiltonian_velocity();
        if v0.iter().all(|v| v.norm() == 0.0) {
            return Err(MgoError::invalid(
                "launch point is a stationary point of the Hamiltonian flow",
            ));
        }

        let m = 2 * n;
        let mut family_tangents = DMatrix::zeros(m, n);
        for r in 0..m {
            family_tangents[(r, 0)] = v0[r];
            for (c, tangent) in family.transverse.iter().enumerate() {
                family_tangents[(r, c + 1)] = tangent[r];
            }
        }

        let mut state = family.launch.coordinates();
        state.push(Complex64::zero());
        for i in 0..m {
            for j in 0..m {
                state.push(if i == j { Complex64::one() } else { Complex64::zero() });
            }
        }

        let mut integrator = Self {
            symbol,
            settings,
            family_tangents,
            orientation: 1.0,
            launch: RaySample {
                parameter: Complex64::new(0.0, 0.0),
                point: family.launch.clone(),
                action: Complex64::new(0.0, 0.0),
                flow_jacobian: Vec::new(),
                velocity: Vec::new(),
                position_jacobian: Complex64::new(0.0, 0.0),
                momentum_jacobian: Complex64::new(0.0, 0.0),
                amplitude: Complex64::new(0.0, 0.0),
            },
        };
        let (_, momentum_det) = integrator.family_determinants(&state);
        if momentum_det.re < 0.0 {
            integrator.orientation = -1.0;
        }
        let amplitude = (integrator.orientation * momentum_det).sqrt();
        integrator.launch = integrator.sample_from_state(Complex64::zero(), &state, &v0, amplitude);
        Ok(integrator)
    }

    pub fn symbol(&self) -> &S {
        self.symbol
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn dimension(&self) -> usize {
        self.launch.dimension()
    }

    /// σ, the sign fixing the amplitude branch at launch.
    pub fn orientation(&self) -> f64 {
        self.orientation
    }

    /// The sample at τ = 0.
    pub fn launch(&self) -> &RaySample {
        &self.launch
    }

    pub(crate) fn family_determinants(&self, state: &[Complex64]) -> (Complex64, Complex64) {
        let n = self.family_tangents.ncols();
        let m = 2 * n;
        let phi = DMatrix::from_row_slice(m, m, &state[m + 1..]);
        let columns = phi * &self.family_tangents;
        let position = columns.rows(0, n).into_owned().determinant();
        let momentum = columns.rows(n, n).into_owned().determinant();
        (position, momentum)
    }

    fn sample_from_state(
        &self,
        parameter: Complex64,
        state: &[Complex64],
        velocity: &[Complex64],
        amplitude: Complex64,
    ) -> RaySample {
        let n = self.family_tangents.ncols();
        let m = 2 * n;
        let (position_jacobian, momentum_jacobian) = self.family_determinants(state);
        RaySample {
            parameter,
            point: PhaseSpacePoint::from_coordinates(&state[..m]),
            action: state[m],
            flow_jacobian: state[m + 1..].to_vec(),
            velocity: velocity[..m].to_vec(),
            position_jacobian,
            momentum_jacobian,
            amplitude,
        }
    }

    fn run(
        &self,
        start: &RaySample,
        path: &[Complex64],
        mut record: Option<&mut Vec<RaySample>>,
    ) -> MgoResult<RaySample> {
        let flow = HamiltonianFlow::new(self.symbol);
        let mut stepper = Tsit5::new(flow.dimension());
        let mut state = start.state_vector();
        let mut parameter = start.parameter;
        let mut amplitude = start.amplitude;
        let mut velocity = start.velocity.clone();
        let mut hint = None;

        for &vertex in path {
            if vertex == parameter {
                continue;
            }
            let last_step = integrate_segment(
                &flow,
                &mut stepper,
                &mut state,
                parameter,
                vertex,
                &self.settings,
                hint,
                |t, y, v| {
                    let (_, momentum_det) = self.family_determinants(y);
                    amplitude = continuous_sqrt(self.orientation * momentum_det, amplitude);
                    velocity.clear();
                    velocity.extend_from_slice(&v[..v.len().min(2 * self.dimension())]);
                    if let Some(samples) = record.as_deref_mut() {
                        samples.push(self.sample_from_state(t, y, v, amplitude));
                    }
                    Ok(())
                },
            )?;
            hint = Some(last_step);
            parameter = vertex;
        }

        Ok(self.sample_from_state(parameter, &state, &velocity, amplitude))
    }

    /// Integrates from `sample` straight to `to`.
    pub fn advance(&self, sample: &RaySample, to: Complex64) -> MgoResult<RaySample> {
        self.run(sample, &[to], None)
    }

    /// Integrates from `sample` through every vertex of `path` in turn.
    pub fn follow(&self, sample: &RaySample, path: &[Complex64]) -> MgoResult<RaySample> {
        self.run(sample, path, None)
    }

    /// Like `follow`, but keeps every accepted step.
    pub fn trace(
        &self,
        sample: &RaySample,
        path: &[Complex64],
        continuation: ContinuationState,
    ) -> MgoResult<Ray> {
        let mut samples = vec![sample.clone()];
        self.run(sample, path, Some(&mut samples))?;
        Ok(Ray {
            samples,
            continuation,
        })
    }

    /// d/dτ of the phase-space velocity, `J·Hess(D)·v`.
    pub fn acceleration(&self, sample: &RaySample) -> MgoResult<Vec<Complex64>> {
        let jet = evaluate_jet(self.symbol, &sample.point)?;
        let a = jet.flow_linearization();
        let m = sample.velocity.len();
        Ok((0..m)
            .map(|i| (0..m).map(|j| a[(i, j)] * sample.velocity[j]).sum())
            .collect())
    }

    /// Real ray on a uniform grid of `resolution` intervals over `span`,
    /// integrated outward from the launch point in both directions.
    pub fn reference_ray(&self, span: (f64, f64), resolution: usize) -> MgoResult<Ray> {
        let (lo, hi) = span;
        if !(lo <= 0.0 && hi >= 0.0 && lo < hi) || resolution < 2 {
            return Err(MgoError::invalid(format!(
                "reference span ({lo}, {hi}) with {resolution} intervals cannot contain the launch point"
            )));
        }
        let grid: Vec<f64> = (0..=resolution)
            .map(|j| lo + (hi - lo) * j as f64 / resolution as f64)
            .collect();
        let split = grid.partition_point(|&t| t < 0.0);

        let mut forward = Vec::with_capacity(grid.len() - split);
        let mut current = self.launch.clone();
        for &t in &grid[split..] {
            current = self.advance(&current, Complex64::new(t, 0.0))?;
            forward.push(current.clone());
        }

        let mut backward = Vec::with_capacity(split);
        current = self.launch.clone();
        for &t in grid[..split].iter().rev() {
            current = self.advance(&current, Complex64::new(t, 0.0))?;
            backward.push(current.clone());
        }
        backward.reverse();
        backward.extend(forward);

        Ok(Ray {
            samples: backward,
            continuation: ContinuationState::Real,
        })
    }
}
