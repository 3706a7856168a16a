//! `WasmFieldEvaluator`: field evaluation over a compiled expression symbol.

use crate::shared::{build_symbol, interleave, jet_payload, validated_settings};
use js_sys::Float64Array;
use mgo_core::equation_engine::ExpressionSymbol;
use mgo_core::{FieldEvaluator, MgoSettings, PhaseSpacePoint, Problem, RayFamily};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn serialization_error(err: serde_wasm_bindgen::Error) -> JsValue {
    JsValue::from_str(&format!("Serialization error: {}", err))
}

#[wasm_bindgen]
pub struct WasmFieldEvaluator {
    evaluator: FieldEvaluator<ExpressionSymbol>,
}

#[wasm_bindgen]
impl WasmFieldEvaluator {
    /// `settings_val` may be `undefined` for the defaults, or a partial
    /// settings object whose missing fields keep their default values.
    #[wasm_bindgen(constructor)]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        expression: &str,
        param_names: Vec<String>,
        param_values: Vec<f64>,
        launch_x: f64,
        launch_k: f64,
        span_start: f64,
        span_end: f64,
        settings_val: JsValue,
    ) -> Result<WasmFieldEvaluator, JsValue> {
        console_error_panic_hook::set_once();

        let symbol = build_symbol(expression, &param_names, &param_values)
            .map_err(|e| JsValue::from_str(&format!("{e:#}")))?;
        let settings: MgoSettings = if settings_val.is_undefined() || settings_val.is_null() {
            MgoSettings::default()
        } else {
            from_value(settings_val)
                .map_err(|e| JsValue::from_str(&format!("Invalid settings: {}", e)))?
        };
        let settings = validated_settings(settings).map_err(|e| JsValue::from_str(&format!("{e:#}")))?;

        let launch = PhaseSpacePoint::real(&[launch_x], &[launch_k]).map_err(js_error)?;
        let family = RayFamily::new(launch, (span_start, span_end));
        let problem = Problem::new(symbol, settings).map_err(js_error)?;
        let evaluator = FieldEvaluator::new(problem, family).map_err(js_error)?;
        Ok(WasmFieldEvaluator { evaluator })
    }

    /// Homotopy sweep over `targets`, in order. Returns one
    /// `{ target, result }` record per target.
    pub fn evaluate(&self, targets: Vec<f64>) -> Result<JsValue, JsValue> {
        let results = self.evaluator.evaluate_sweep(&targets);
        to_value(&results).map_err(serialization_error)
    }

    /// Independent evaluation of every target.
    pub fn evaluate_batch(&self, targets: Vec<f64>) -> Result<JsValue, JsValue> {
        let results = self.evaluator.evaluate_batch(&targets);
        to_value(&results).map_err(serialization_error)
    }

    /// Field values only, as `[re₀, im₀, re₁, im₁, ...]` with NaN where a
    /// point failed.
    pub fn field_values(&self, targets: Vec<f64>) -> Float64Array {
        let values: Vec<_> = self
            .evaluator
            .evaluate_sweep(&targets)
            .into_iter()
            .map(|point| point.result.ok().map(|v| v.value))
            .collect();
        Float64Array::from(interleave(&values).as_slice())
    }

    pub fn geometrical_optics(&self, target: f64) -> Result<JsValue, JsValue> {
        let value = self.evaluator.geometrical_optics(target).map_err(js_error)?;
        to_value(&value).map_err(serialization_error)
    }

    pub fn symbol_jet(&self, x: f64, k: f64) -> Result<JsValue, JsValue> {
        let jet = jet_payload(self.evaluator.problem().symbol(), x, k)
            .map_err(|e| JsValue::from_str(&format!("{e:#}")))?;
        to_value(&jet).map_err(serialization_error)
    }

    pub fn caustics(&self) -> Result<JsValue, JsValue> {
        to_value(&self.evaluator.caustics().to_vec()).map_err(serialization_error)
    }
}

#[cfg(test)]
mod tests {
    use super::WasmFieldEvaluator;
    use mgo_core::MgoSettings;
    use serde_wasm_bindgen::to_value;
    use wasm_bindgen::JsValue;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn error_message(result: Result<WasmFieldEvaluator, JsValue>) -> String {
        result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default()
    }

    #[wasm_bindgen_test]
    fn rejects_unknown_variables() {
        let result = WasmFieldEvaluator::new(
            "-k^2 - y",
            vec![],
            vec![],
            0.0,
            0.0,
            -6.0,
            6.0,
            JsValue::UNDEFINED,
        );
        assert!(error_message(result).contains("-k^2 - y"));
    }

    #[wasm_bindgen_test]
    fn rejects_span_without_launch() {
        let result = WasmFieldEvaluator::new(
            "-k^2 - x",
            vec![],
            vec![],
            0.0,
            0.0,
            1.0,
            6.0,
            JsValue::UNDEFINED,
        );
        assert!(error_message(result).contains("launch parameter"));
    }

    #[wasm_bindgen_test]
    fn airy_values_are_finite_through_the_fold() {
        let mut settings = MgoSettings::default();
        settings.retry.max_retries = 1;
        let evaluator = WasmFieldEvaluator::new(
            "-k^2 - x",
            vec![],
            vec![],
            0.0,
            0.0,
            -6.0,
            6.0,
            to_value(&settings).expect("settings"),
        )
        .expect("evaluator");
        let values = evaluator.field_values(vec![-1.0, -0.1, 0.1, 1.0]).to_vec();
        assert_eq!(values.len(), 8);
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
