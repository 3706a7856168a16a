//! WASM bindings for the MGO field engine.
//!
//! A `WasmFieldEvaluator` wraps a `FieldEvaluator` over a compiled expression
//! symbol; results cross the boundary through `serde-wasm-bindgen`.

mod evaluator;
mod shared;

pub use evaluator::WasmFieldEvaluator;
