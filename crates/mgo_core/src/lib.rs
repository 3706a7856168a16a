pub mod autodiff;
pub mod config;
pub mod continuation;
pub mod contour;
pub mod equation_engine;
pub mod error;
pub mod field;
pub mod phase_space;
pub mod ray;
pub mod saddle;
pub mod solvers;
pub mod symbol;
/// The `mgo_core` crate evaluates wavefields by metaplectic geometrical optics,
/// analytically continuing ray data into complex phase space where the real
/// ray family folds.
///
/// Key components:
/// - **Traits**: `Scalar` (complex and hyper-dual arithmetic), `Symbol` (holomorphic dispersion functions), `ComplexFlow` (complex-time ODEs).
/// - **Symbols**: closed-form `QuadraticHamiltonian` and the bytecode-compiled `ExpressionSymbol`, with exact jets from `HyperDual`.
/// - **Rays**: Tsit5 integration of the Hamiltonian flow along polylines in the complex parameter plane.
/// - **Continuation**: caustic detection, deformation policies and the controller that continues rays off the real axis.
/// - **Saddles and contours**: complex stationary points of the inverse-metaplectic phase and their steepest-descent paths.
/// - **Field**: contour quadrature, per-saddle diagnostics and parallel batch evaluation.
pub mod traits;
pub mod util;

pub use config::{MgoSettings, Problem, RayFamily};
pub use error::{MgoError, MgoResult};
pub use field::{FieldEvaluator, FieldValue, PointResult};
pub use phase_space::PhaseSpacePoint;
