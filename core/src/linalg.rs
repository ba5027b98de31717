//! Linear algebra helpers for grid alignment and noise sampling.
//!
//! Public API:
//!     pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn aligned_symmetric_eigen(m: &DMatrix<f64>) -> AlignedEigen
//!     pub fn matrix_square_root(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn sample_gaussian(covariance: &DMatrix<f64>, rng: &mut R) -> DVector<f64>
//!
//! The eigen-decomposition used for grid construction orders its eigenpairs so that grid
//! axis `i` follows state axis `i` as closely as possible. `nalgebra` returns eigenpairs in
//! no particular order, which would otherwise make the lattice layout depend on the solver.

use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Removes the round-off asymmetry that accumulates in `F P Fᵀ + Q` style products.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Eigen-decomposition of a symmetric matrix with axis-aligned ordering.
#[derive(Clone, Debug)]
pub struct AlignedEigen {
    /// Eigenvalue of grid axis `i`. May be slightly negative from round-off.
    pub eigenvalues: DVector<f64>,
    /// Orthonormal eigenvectors, column `i` paired with `eigenvalues[i]`.
    pub eigenvectors: DMatrix<f64>,
}

/// Symmetric eigen-decomposition with eigenvectors assigned to state axes.
///
/// Eigenpairs are matched to state axes greedily by the largest absolute eigenvector
/// component: the largest `|V[(axis, k)]|` over all unmatched pairs is assigned first. Each
/// eigenvector is then flipped so that its component on its own axis is non-negative. For a
/// diagonal matrix the result is the identity basis with the diagonal as eigenvalues.
///
/// # Arguments
/// * `m` - square matrix; symmetrized before decomposition
pub fn aligned_symmetric_eigen(m: &DMatrix<f64>) -> AlignedEigen {
    let n = m.nrows();
    let se = SymmetricEigen::new(symmetrize(m));
    let mut candidates: Vec<(usize, usize, f64)> = Vec::with_capacity(n * n);
    for axis in 0..n {
        for k in 0..n {
            candidates.push((axis, k, se.eigenvectors[(axis, k)].abs()));
        }
    }
    // Ties broken by index so the assignment is deterministic.
    candidates.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then(a.0.cmp(&b.0))
            .then(a.1.cmp(&b.1))
    });
    let mut assignment: Vec<Option<usize>> = vec![None; n];
    let mut used = vec![false; n];
    for (axis, k, _) in candidates {
        if assignment[axis].is_none() && !used[k] {
            assignment[axis] = Some(k);
            used[k] = true;
        }
    }
    let mut eigenvalues = DVector::<f64>::zeros(n);
    let mut eigenvectors = DMatrix::<f64>::zeros(n, n);
    for (axis, k) in assignment.iter().enumerate() {
        // Every axis receives a distinct eigenvector: the matching is a full permutation.
        let k = k.unwrap_or(axis);
        let sign = if se.eigenvectors[(axis, k)] < 0.0 { -1.0 } else { 1.0 };
        eigenvalues[axis] = se.eigenvalues[k];
        eigenvectors.set_column(axis, &(se.eigenvectors.column(k) * sign));
    }
    AlignedEigen {
        eigenvalues,
        eigenvectors,
    }
}

/// Compute a symmetric square root `S` such that `matrix ≈ S * Sᵀ`.
///
/// Attempts Cholesky first (lower triangular result). Positive semi-definite inputs, such
/// as process noise with a noiseless component, fall back to `U * sqrt(max(Λ, 0)) * Uᵀ`.
pub fn matrix_square_root(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    assert!(
        matrix.is_square(),
        "matrix_square_root: matrix must be square"
    );
    let p = symmetrize(matrix);
    if let Some(ch) = Cholesky::new(p.clone()) {
        return ch.l();
    }
    let se = SymmetricEigen::new(p);
    let sqrt_vals = se.eigenvalues.map(|l| l.max(0.0).sqrt());
    &se.eigenvectors * DMatrix::from_diagonal(&sqrt_vals) * se.eigenvectors.transpose()
}

/// Draw one sample from `N(0, covariance)`.
pub fn sample_gaussian<R: Rng + ?Sized>(covariance: &DMatrix<f64>, rng: &mut R) -> DVector<f64> {
    let sqrt = matrix_square_root(covariance);
    let z = DVector::<f64>::from_fn(covariance.nrows(), |_, _| StandardNormal.sample(&mut *rng));
    sqrt * z
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn approx_eq(a: &DMatrix<f64>, b: &DMatrix<f64>, tol: f64) -> bool {
        if a.shape() != b.shape() {
            return false;
        }
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }

    #[test]
    fn t_symmetrize() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 3.0]);
        let s = symmetrize(&m);
        let s_expected = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 3.0]);
        assert!(approx_eq(&s, &s_expected, 1e-15));
    }

    #[test]
    fn aligned_eigen_of_diagonal_keeps_axis_order() {
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![90.0, 5.0, 160.0, 5.1]));
        let eig = aligned_symmetric_eigen(&m);
        assert_approx_eq!(eig.eigenvalues[0], 90.0, 1e-9);
        assert_approx_eq!(eig.eigenvalues[1], 5.0, 1e-9);
        assert_approx_eq!(eig.eigenvalues[2], 160.0, 1e-9);
        assert_approx_eq!(eig.eigenvalues[3], 5.1, 1e-9);
        assert!(approx_eq(&eig.eigenvectors, &DMatrix::identity(4, 4), 1e-9));
    }

    #[test]
    fn aligned_eigen_reconstructs_correlated_matrix() {
        let m = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 2.0, 0.3, 0.5, 0.3, 9.0]);
        let eig = aligned_symmetric_eigen(&m);
        let v = &eig.eigenvectors;
        let back = v * DMatrix::from_diagonal(&eig.eigenvalues) * v.transpose();
        assert!(approx_eq(&back, &m, 1e-9));
        assert!(approx_eq(&(v.transpose() * v), &DMatrix::identity(3, 3), 1e-9));
        for axis in 0..3 {
            assert!(v[(axis, axis)] >= 0.0);
        }
        // The largest variance sits on state axis 2.
        assert!(eig.eigenvalues[2] > eig.eigenvalues[0]);
        assert!(eig.eigenvalues[2] > eig.eigenvalues[1]);
    }

    #[test]
    fn square_root_of_spd_matrix() {
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.5, 0.0, 1.0, -1.0, 0.0, 0.0, 0.2]);
        let p = &a * a.transpose();
        let s = matrix_square_root(&p);
        assert!(approx_eq(&(&s * s.transpose()), &p, 1e-12));
    }

    #[test]
    fn square_root_of_semi_definite_matrix() {
        let p = DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 0.0]));
        let s = matrix_square_root(&p);
        assert!(approx_eq(&(&s * s.transpose()), &p, 1e-12));
    }

    #[test]
    #[should_panic(expected = "matrix_square_root: matrix must be square")]
    fn square_root_rejects_non_square() {
        let _ = matrix_square_root(&DMatrix::<f64>::zeros(3, 2));
    }

    #[test]
    fn gaussian_samples_match_covariance() {
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.6, 0.6, 1.0]);
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let mut mean = DVector::<f64>::zeros(2);
        let mut second = DMatrix::<f64>::zeros(2, 2);
        for _ in 0..n {
            let x = sample_gaussian(&cov, &mut rng);
            second += &x * x.transpose();
            mean += x;
        }
        mean /= n as f64;
        second /= n as f64;
        assert_approx_eq!(mean[0], 0.0, 0.1);
        assert_approx_eq!(mean[1], 0.0, 0.1);
        assert!(approx_eq(&second, &cov, 0.15));
    }
}
