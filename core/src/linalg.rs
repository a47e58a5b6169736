//! Linear algebra helpers for robust innovation-covariance solves.
//!
//! Public API:
//!     pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn chol_solve_spd(a, b, opt) -> Option<DMatrix<f64>>
//!     pub fn robust_spd_solve(a, b) -> Option<DMatrix<f64>>
//!
//! Strategy for solving `A X = B` with an SPD-ish `A`:
//! 1) Symmetrize A ← 0.5 (A + Aᵀ)
//! 2) Cholesky
//! 3) Jittered Cholesky (geometric ramp)
//! 4) Explicit inverse as a last resort
//!
//! The mode-switched observation matrices in this crate routinely leave all-zero rows in
//! `H`, so the innovation covariance `S = H P Hᵀ + R` leans entirely on `R` along those
//! rows and can be poorly conditioned under aggressive tunings. A failed solve is reported
//! as `None` rather than a panic: the filter treats that step's update as recoverable and
//! keeps the predicted state.

use nalgebra::DMatrix;
use nalgebra::linalg::Cholesky;

/// Symmetrize a matrix: A ← 0.5 (A + Aᵀ)
///
/// Reduces the round-off asymmetry that accumulates in covariance propagation.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Jitter schedule for the Cholesky retry ramp.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    pub initial_jitter: f64,
    pub max_jitter: f64,
    pub max_tries: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            initial_jitter: 1e-12,
            max_jitter: 1e-6,
            max_tries: 6,
        }
    }
}

/// Solve A X = B for SPD-ish A via Cholesky, with jitter retries.
/// Returns None if all attempts fail.
pub fn chol_solve_spd(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    opt: SolveOptions,
) -> Option<DMatrix<f64>> {
    assert!(a.is_square(), "chol_solve_spd: A must be square");
    assert_eq!(a.nrows(), b.nrows(), "chol_solve_spd: A and B incompatible");

    // Symmetrize first (SPD drift is common).
    let a_sym = symmetrize(a);

    // Try plain Cholesky
    if let Some(ch) = Cholesky::new(a_sym.clone()) {
        return Some(ch.solve(b));
    }

    // Jitter ramp
    let n = a_sym.nrows();
    let mut jitter = opt.initial_jitter;
    for _ in 0..opt.max_tries {
        let mut a_j = a_sym.clone();
        for i in 0..n {
            a_j[(i, i)] += jitter;
        }
        if let Some(ch) = Cholesky::new(a_j) {
            return Some(ch.solve(b));
        }
        jitter *= 10.0;
        if jitter > opt.max_jitter {
            break;
        }
    }
    None
}

/// Robust SPD solve with sane defaults:
/// - Cholesky + jitter (preferred)
/// - Last resort: explicit inverse
/// - None when nothing works (non-finite or irreparably singular input)
pub fn robust_spd_solve(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if a.iter().any(|v| !v.is_finite()) || b.iter().any(|v| !v.is_finite()) {
        return None;
    }
    if let Some(x) = chol_solve_spd(a, b, SolveOptions::default()) {
        Some(x)
    } else {
        symmetrize(a).try_inverse().map(|inv| &inv * b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &DMatrix<f64>, b: &DMatrix<f64>, tol: f64) -> bool {
        if a.shape() != b.shape() {
            return false;
        }
        let mut max_abs = 0.0f64;
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                max_abs = max_abs.max((a[(i, j)] - b[(i, j)]).abs());
            }
        }
        max_abs <= tol
    }

    #[test]
    fn t_symmetrize() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 3.0]);
        let s = symmetrize(&m);
        let s_expected = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 3.0]);
        assert!(approx_eq(&s, &s_expected, 1e-15));
    }

    #[test]
    fn t_chol_solve_spd_basic() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let b = DMatrix::from_row_slice(2, 1, &[6.0, 5.0]);

        let x = chol_solve_spd(&a, &b, SolveOptions::default()).expect("should solve");
        let result = &a * &x;
        assert!(approx_eq(&result, &b, 1e-10));
    }

    #[test]
    fn t_chol_solve_spd_with_jitter() {
        // Barely PD matrix: plain Cholesky may wobble, jitter must save it
        let mut a = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        a[(1, 1)] -= 0.25;
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);

        let x = chol_solve_spd(&a, &b, SolveOptions::default()).expect("should solve with jitter");
        let result = &a * &x;
        assert!(approx_eq(&result, &b, 1e-8));
    }

    #[test]
    fn t_robust_spd_solve_innovation_shape() {
        // An innovation covariance with zero H-rows: the R block keeps it solvable
        let mut s = DMatrix::<f64>::zeros(4, 4);
        s[(0, 0)] = 4.0;
        s[(1, 1)] = 4.0;
        s[(2, 2)] = 1e8;
        s[(3, 3)] = 1e8;
        let b = DMatrix::<f64>::identity(4, 4);

        let x = robust_spd_solve(&s, &b).expect("diagonal S must solve");
        let result = &s * &x;
        assert!(approx_eq(&result, &b, 1e-6));
    }

    #[test]
    fn t_robust_spd_solve_non_finite_is_none() {
        let mut a = DMatrix::<f64>::identity(3, 3);
        a[(1, 1)] = f64::NAN;
        let b = DMatrix::<f64>::identity(3, 3);
        assert!(robust_spd_solve(&a, &b).is_none());
    }

    #[test]
    #[should_panic(expected = "chol_solve_spd: A must be square")]
    fn t_chol_solve_spd_non_square_panics() {
        let a = DMatrix::<f64>::zeros(3, 2);
        let b = DMatrix::<f64>::zeros(3, 1);
        let _ = chol_solve_spd(&a, &b, SolveOptions::default());
    }

    #[test]
    #[should_panic(expected = "chol_solve_spd: A and B incompatible")]
    fn t_chol_solve_spd_incompatible_panics() {
        let a = DMatrix::<f64>::identity(2, 2);
        let b = DMatrix::<f64>::zeros(3, 1);
        let _ = chol_solve_spd(&a, &b, SolveOptions::default());
    }
}
