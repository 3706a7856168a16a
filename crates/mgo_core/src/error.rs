//! Error taxonomy for field evaluation.
//!
//! Every failure is reported per evaluation point. Only conditioning and
//! saddle-search failures are eligible for retry; the rest are terminal.

use num_complex::Complex64;
use serde::Serialize;
use thiserror::Error;

/// Raised by a symbol when asked to evaluate outside its holomorphic region.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{reason}")]
pub struct DomainError {
    pub reason: String,
}

impl DomainError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum MgoError {
    #[error("symbol is not holomorphic at x = {position:?}, k = {momentum:?}: {reason}")]
    Domain {
        reason: String,
        position: Vec<Complex64>,
        momentum: Vec<Complex64>,
    },
    #[error("ray integration failed at parameter {parameter}: {reason}")]
    IntegrationFailure { parameter: Complex64, reason: String },
    #[error("analytic continuation failed after {attempts} attempt(s): {reason}")]
    ConditioningFailure { attempts: usize, reason: String },
    #[error("no saddle point found within search radius {radius}: {reason}")]
    SaddleNotFound { radius: f64, reason: String },
    #[error("degenerate saddle at parameter {parameter} (|phase''| = {curvature:e})")]
    DegenerateSaddle { parameter: Complex64, curvature: f64 },
    #[error("contour quadrature failed: {reason}")]
    QuadratureFailure { reason: String },
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl MgoError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        MgoError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Whether a fresh attempt with a wider deformation or search region may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MgoError::ConditioningFailure { .. } | MgoError::SaddleNotFound { .. }
        )
    }
}

pub type MgoResult<T> = Result<T, MgoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conditioning_and_search_failures_retry() {
        let retryable = [
            MgoError::ConditioningFailure {
                attempts: 1,
                reason: "route".into(),
            },
            MgoError::SaddleNotFound {
                radius: 4.0,
                reason: "none".into(),
            },
        ];
        for err in &retryable {
            assert!(err.is_retryable(), "{err} should be retryable");
        }

        let terminal = [
            MgoError::Domain {
                reason: "pole".into(),
                position: vec![Complex64::new(1.0, 0.0)],
                momentum: vec![Complex64::new(0.0, 0.9)],
            },
            MgoError::IntegrationFailure {
                parameter: Complex64::new(0.5, 0.0),
                reason: "budget".into(),
            },
            MgoError::DegenerateSaddle {
                parameter: Complex64::new(0.0, 0.0),
                curvature: 0.0,
            },
            MgoError::QuadratureFailure {
                reason: "arc".into(),
            },
            MgoError::invalid("dimension"),
        ];
        for err in &terminal {
            assert!(!err.is_retryable(), "{err} should be terminal");
        }
    }

    #[test]
    fn errors_serialize_with_kind_tag() {
        let err = MgoError::SaddleNotFound {
            radius: 2.0,
            reason: "no candidates".into(),
        };
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["kind"], "SaddleNotFound");
        assert_eq!(json["radius"], 2.0);
    }
}
