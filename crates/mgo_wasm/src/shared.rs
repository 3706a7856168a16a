//! Conversions shared by the WASM wrappers.

use anyhow::{bail, Context};
use mgo_core::equation_engine::ExpressionSymbol;
use mgo_core::phase_space::PhaseSpacePoint;
use mgo_core::symbol::evaluate_jet;
use mgo_core::MgoSettings;
use num_complex::Complex64;
use serde::Serialize;

/// Value, gradient `(∂x, ∂k)` and row-major Hessian of a symbol at one point.
#[derive(Debug, Serialize)]
pub(crate) struct JetPayload {
    pub value: Complex64,
    pub gradient: Vec<Complex64>,
    pub hessian: Vec<Complex64>,
}

pub(crate) fn build_symbol(
    expression: &str,
    param_names: &[String],
    param_values: &[f64],
) -> anyhow::Result<ExpressionSymbol> {
    if param_names.len() != param_values.len() {
        bail!(
            "Got {} parameter names but {} parameter values.",
            param_names.len(),
            param_values.len()
        );
    }
    let values: Vec<Complex64> = param_values
        .iter()
        .map(|&v| Complex64::new(v, 0.0))
        .collect();
    ExpressionSymbol::compile(
        expression,
        &["x".to_string()],
        &["k".to_string()],
        param_names,
        &values,
    )
    .with_context(|| format!("Failed to compile symbol `{expression}`"))
}

pub(crate) fn jet_payload(symbol: &ExpressionSymbol, x: f64, k: f64) -> anyhow::Result<JetPayload> {
    let point = PhaseSpacePoint::real(&[x], &[k])?;
    let jet = evaluate_jet(symbol, &point)?;
    let m = jet.gradient.len();
    let mut hessian = Vec::with_capacity(m * m);
    for i in 0..m {
        for j in 0..m {
            hessian.push(jet.hessian[(i, j)]);
        }
    }
    Ok(JetPayload {
        value: jet.value,
        gradient: jet.gradient.iter().copied().collect(),
        hessian,
    })
}

/// Interleaves `[re, im]` per value, with NaN for missing ones.
pub(crate) fn interleave(values: &[Option<Complex64>]) -> Vec<f64> {
    values
        .iter()
        .flat_map(|v| match v {
            Some(z) => [z.re, z.im],
            None => [f64::NAN, f64::NAN],
        })
        .collect()
}

pub(crate) fn validated_settings(settings: MgoSettings) -> anyhow::Result<MgoSettings> {
    settings
        .validate()
        .context("Rejected evaluator settings")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_symbol_with_parameters() {
        let symbol = build_symbol("-k^2 - g*x", &["g".to_string()], &[2.0]).expect("symbol");
        let jet = jet_payload(&symbol, 0.5, 1.5).expect("jet");
        assert!((jet.value - Complex64::new(-2.25 - 1.0, 0.0)).norm() < 1e-12);
        assert!((jet.gradient[0] - Complex64::new(-2.0, 0.0)).norm() < 1e-12);
        assert!((jet.gradient[1] - Complex64::new(-3.0, 0.0)).norm() < 1e-12);
        // ∂²D/∂k² sits at row 1, column 1
        assert!((jet.hessian[3] - Complex64::new(-2.0, 0.0)).norm() < 1e-12);
        assert!(jet.hessian[0].norm() < 1e-12);
    }

    #[test]
    fn rejects_mismatched_parameters() {
        let err = build_symbol("-k^2 - x", &["g".to_string()], &[]).expect_err("mismatch");
        assert!(err.to_string().contains("parameter names"));
    }

    #[test]
    fn compile_errors_carry_the_expression() {
        let err = build_symbol("-k^2 - y", &[], &[]).expect_err("unknown variable");
        assert!(format!("{err:#}").contains("-k^2 - y"));
    }

    #[test]
    fn interleaves_with_nan_gaps() {
        let flat = interleave(&[Some(Complex64::new(1.0, -2.0)), None]);
        assert_eq!(&flat[..2], &[1.0, -2.0]);
        assert!(flat[2].is_nan() && flat[3].is_nan());
    }

    #[test]
    fn settings_are_validated() {
        let mut settings = MgoSettings::default();
        settings.integrator.min_step = -1.0;
        let err = validated_settings(settings).expect_err("negative step");
        assert!(format!("{err:#}").contains("min_step"));
    }
}
