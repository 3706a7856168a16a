//! Analytic continuation of rays into complex parameter space.
//!
//! Continuing a ray is re-integrating the same holomorphic vector field along
//! a deformed path in the complex τ plane. The controller chooses that path
//! with a `DeformationStrategy`, records it in a `ContinuationState`, and
//! turns integration breakdown along a deformed path into a retryable
//! `ConditioningFailure`.

pub mod monitor;
pub mod policy;
pub mod types;

pub use monitor::ConditioningMonitor;
pub use policy::DeformationStrategy;
pub use types::{Caustic, ContinuationState};

use crate::config::ContinuationSettings;
use crate::error::{MgoError, MgoResult};
use crate::ray::{RayIntegrator, RaySample};
use crate::traits::Symbol;
use num_complex::Complex64;
use tracing::{debug, trace};

pub struct ContinuationController<'r, 'a, S> {
    integrator: &'r RayIntegrator<'a, S>,
    settings: ContinuationSettings,
}

impl<'r, 'a, S: Symbol> ContinuationController<'r, 'a, S> {
    pub fn new(integrator: &'r RayIntegrator<'a, S>, settings: ContinuationSettings) -> Self {
        Self {
            integrator,
            settings,
        }
    }

    pub fn integrator(&self) -> &'r RayIntegrator<'a, S> {
        self.integrator
    }

    pub fn settings(&self) -> &ContinuationSettings {
        &self.settings
    }

    pub fn monitor(&self) -> ConditioningMonitor<'r, 'a, S> {
        ConditioningMonitor::new(self.integrator, self.settings)
    }

    /// The real pass suffices only if it found at least one ray and none of
    /// them is ill-conditioned.
    pub fn requires_continuation(&self, real_rays: &[RaySample]) -> bool {
        let monitor = self.monitor();
        real_rays.is_empty() || real_rays.iter().any(|s| monitor.is_ill_conditioned(s))
    }

    fn lift_failure(&self, err: MgoError, attempt: usize) -> MgoError {
        match err {
            MgoError::IntegrationFailure { parameter, reason } => MgoError::ConditioningFailure {
                attempts: attempt + 1,
                reason: format!("deformed path broke down near τ = {parameter}: {reason}"),
            },
            other => other,
        }
    }

    /// Continues `base` (a real reference sample) to the complex parameter
    /// `target` along the route for this attempt.
    pub fn continue_to(
        &self,
        base: &RaySample,
        target: Complex64,
        attempt: usize,
    ) -> MgoResult<(RaySample, ContinuationState)> {
        let route = self.settings.strategy.route(
            base.parameter,
            target,
            attempt,
            self.settings.detour_radius,
            self.settings.detour_growth,
        );
        trace!(?route, attempt, "continuing from τ = {}", base.parameter);
        let sample = self
            .integrator
            .follow(base, &route)
            .map_err(|e| self.lift_failure(e, attempt))?;

        let state = if route.iter().all(|v| v.im == 0.0) && base.parameter.im == 0.0 {
            ContinuationState::Real
        } else {
            ContinuationState::Continued {
                base: base.parameter.re,
                path: route,
                attempt,
            }
        };
        Ok((sample, state))
    }

    /// Extends an already continued sample by one straight segment.
    pub fn extend(
        &self,
        sample: &RaySample,
        state: &ContinuationState,
        to: Complex64,
        attempt: usize,
    ) -> MgoResult<(RaySample, ContinuationState)> {
        let next = self
            .integrator
            .advance(sample, to)
            .map_err(|e| self.lift_failure(e, attempt))?;
        Ok((next, state.extended(sample.parameter, to, attempt)))
    }

    /// Replays a recorded continuation from the reference sample at its base.
    pub fn replay(&self, base: &RaySample, state: &ContinuationState) -> MgoResult<RaySample> {
        match state {
            ContinuationState::Real => Ok(base.clone()),
            ContinuationState::Continued { path, attempt, .. } => {
                debug!(vertices = path.len(), "replaying continuation path");
                self.integrator
                    .follow(base, path)
                    .map_err(|e| self.lift_failure(e, *attempt))
            }
        }
    }
}
