//! Branch tracking and sign-change helpers shared by the ray, caustic and
//! saddle stages.

use num_complex::Complex64;

/// Square root of `z` on the branch nearest to `previous`.
///
/// Applied sample by sample, this continues √ analytically along a path that
/// avoids the origin, instead of jumping at the principal branch cut.
pub fn continuous_sqrt(z: Complex64, previous: Complex64) -> Complex64 {
    let root = z.sqrt();
    if (root - previous).norm() <= (root + previous).norm() {
        root
    } else {
        -root
    }
}

/// Indices `i` where `values[i]` and `values[i + 1]` have opposite signs, or
/// where `values[i]` is exactly zero.
pub fn sign_changes(values: &[f64]) -> Vec<usize> {
    let mut indices = Vec::new();
    for i in 0..values.len().saturating_sub(1) {
        let (a, b) = (values[i], values[i + 1]);
        if a == 0.0 || (a < 0.0 && b > 0.0) || (a > 0.0 && b < 0.0) {
            indices.push(i);
        }
    }
    if values.last() == Some(&0.0) && values.len() > 1 {
        indices.push(values.len() - 1);
    }
    indices
}

/// Illinois-modified regula falsi on a bracket `[a, b]` with `f(a)·f(b) <= 0`.
///
/// Returns the root estimate and the number of function evaluations used.
pub fn illinois<E>(
    mut f: impl FnMut(f64) -> Result<f64, E>,
    mut a: f64,
    mut b: f64,
    tolerance: f64,
    max_iterations: usize,
) -> Result<(f64, usize), E> {
    let mut fa = f(a)?;
    let mut fb = f(b)?;
    let mut evaluations = 2;
    if fa == 0.0 {
        return Ok((a, evaluations));
    }
    if fb == 0.0 {
        return Ok((b, evaluations));
    }
    let mut side = 0i8;
    let mut c = a;
    for _ in 0..max_iterations {
        c = (a * fb - b * fa) / (fb - fa);
        let fc = f(c)?;
        evaluations += 1;
        if fc == 0.0 || (b - a).abs() < tolerance {
            break;
        }
        if fc * fb > 0.0 {
            b = c;
            fb = fc;
            if side == -1 {
                fa *= 0.5;
            }
            side = -1;
        } else {
            a = c;
            fa = fc;
            if side == 1 {
                fb *= 0.5;
            }
            side = 1;
        }
        if fc.abs() < tolerance {
            break;
        }
    }
    Ok((c, evaluations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn continuous_sqrt_follows_branch_around_origin() {
        // Walk z = e^{iθ} once around the origin; √z must end at -1.
        let steps = 64;
        let mut root = Complex64::new(1.0, 0.0);
        for j in 1..=steps {
            let theta = 2.0 * PI * j as f64 / steps as f64;
            root = continuous_sqrt(Complex64::from_polar(1.0, theta), root);
        }
        assert!((root - Complex64::new(-1.0, 0.0)).norm() < 1e-12);

        // Crossing the negative real axis stays continuous.
        let above = continuous_sqrt(Complex64::new(-4.0, 1e-3), Complex64::new(0.0, 2.0));
        let below = continuous_sqrt(Complex64::new(-4.0, -1e-3), above);
        assert!((below - above).norm() < 1e-2);
    }

    #[test]
    fn sign_changes_include_exact_zeros() {
        assert_eq!(sign_changes(&[1.0, 2.0, -1.0, -0.5, 0.0, 3.0]), vec![1, 4]);
        assert_eq!(sign_changes(&[1.0, 0.0]), vec![1]);
        assert!(sign_changes(&[1.0]).is_empty());
    }

    #[test]
    fn illinois_finds_cubic_root() {
        let (root, evaluations) =
            illinois(|t| Ok::<_, ()>(t * t * t - 2.0), 0.0, 2.0, 1e-13, 100).expect("root");
        assert!((root - 2f64.cbrt()).abs() < 1e-10);
        assert!(evaluations < 60);
    }
}
