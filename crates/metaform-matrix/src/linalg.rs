//! Linear Algebra - Determinant, Minor and Inverse
//!
//! Square-matrix routines over single slices. The determinant uses LU
//! decomposition with partial pivoting and the inverse uses Gauss-Jordan
//! elimination; both report singular input instead of dividing by zero.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_core::{Error, Result};

use crate::matrix::Matrix;

/// Pivots below this fraction of `n * max|a_ij|` are treated as zero.
const SINGULAR_EPS: f64 = 1e-12;

impl Matrix {
    /// The submatrix left after removing `row` and `col` from a batch-size-1 matrix.
    pub fn minor(&self, row: usize, col: usize) -> Result<Matrix> {
        let (b, r, c) = self.shape();
        if b != 1 {
            return Err(Error::shape(format!("minor requires batch size 1, got {b}")));
        }
        if row >= r || col >= c {
            return Err(Error::invalid_argument(format!(
                "minor index ({row}, {col}) out of range for {r}x{c} matrix"
            )));
        }
        if r < 2 || c < 2 {
            return Err(Error::shape(format!("minor of a {r}x{c} matrix is empty")));
        }

        let data = self
            .data()
            .chunks(c)
            .enumerate()
            .filter(|(i, _)| *i != row)
            .flat_map(|(_, line)| {
                line.iter()
                    .enumerate()
                    .filter(|(j, _)| *j != col)
                    .map(|(_, v)| *v)
            })
            .collect();
        Ok(Matrix::from_parts(data, 1, r - 1, c - 1))
    }

    /// Determinant of a square batch-size-1 matrix.
    pub fn determinant(&self) -> Result<f64> {
        let (b, r, c) = self.shape();
        if b != 1 {
            return Err(Error::shape(format!(
                "determinant requires batch size 1, got {b} (use determinants)"
            )));
        }
        if r != c {
            return Err(Error::shape(format!("determinant requires a square matrix, got {r}x{c}")));
        }
        Ok(lu_determinant(self.data(), r))
    }

    /// Determinant of every slice of a square batched matrix.
    pub fn determinants(&self) -> Result<Vec<f64>> {
        let (b, r, c) = self.shape();
        if r != c {
            return Err(Error::shape(format!("determinant requires square slices, got {r}x{c}")));
        }
        Ok((0..b)
            .map(|i| lu_determinant(self.broadcast_slice(i), r))
            .collect())
    }

    /// Inverse of a square batch-size-1 matrix.
    ///
    /// Fails with `SingularMatrix` when the matrix has no inverse.
    pub fn inverse(&self) -> Result<Matrix> {
        let (b, n, c) = self.shape();
        if b != 1 {
            return Err(Error::shape(format!("inverse requires batch size 1, got {b}")));
        }
        if n != c {
            return Err(Error::shape(format!("inverse requires a square matrix, got {n}x{c}")));
        }

        let mut a = self.data().to_vec();
        let mut inv = Matrix::identity(n).into_data();
        let tol = singular_tolerance(&a, n);

        for col in 0..n {
            let pivot_row = pivot_index(&a, n, col);
            if a[pivot_row * n + col].abs() <= tol {
                return Err(Error::SingularMatrix {
                    determinant: lu_determinant(self.data(), n),
                });
            }
            if pivot_row != col {
                swap_rows(&mut a, n, pivot_row, col);
                swap_rows(&mut inv, n, pivot_row, col);
            }

            let pivot = a[col * n + col];
            for j in 0..n {
                a[col * n + j] /= pivot;
                inv[col * n + j] /= pivot;
            }

            for i in 0..n {
                if i == col {
                    continue;
                }
                let factor = a[i * n + col];
                if factor == 0.0 {
                    continue;
                }
                for j in 0..n {
                    a[i * n + j] -= factor * a[col * n + j];
                    inv[i * n + j] -= factor * inv[col * n + j];
                }
            }
        }

        Ok(Matrix::from_parts(inv, 1, n, n))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn lu_determinant(slice: &[f64], n: usize) -> f64 {
    let mut a = slice.to_vec();
    let mut det = 1.0;
    let tol = singular_tolerance(&a, n);

    for col in 0..n {
        let pivot_row = pivot_index(&a, n, col);
        let pivot = a[pivot_row * n + col];
        if pivot.abs() <= tol {
            return 0.0;
        }
        if pivot_row != col {
            swap_rows(&mut a, n, pivot_row, col);
            det = -det;
        }
        det *= pivot;

        for i in col + 1..n {
            let factor = a[i * n + col] / pivot;
            for j in col..n {
                a[i * n + j] -= factor * a[col * n + j];
            }
        }
    }
    det
}

/// Pivot magnitude at or below which a slice is singular.
fn singular_tolerance(a: &[f64], n: usize) -> f64 {
    let max_abs = a.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    SINGULAR_EPS * max_abs * n as f64
}

/// Row at or below `col` with the largest magnitude in column `col`.
fn pivot_index(a: &[f64], n: usize, col: usize) -> usize {
    (col..n)
        .max_by(|&x, &y| a[x * n + col].abs().total_cmp(&a[y * n + col].abs()))
        .unwrap_or(col)
}

fn swap_rows(a: &mut [f64], n: usize, i: usize, j: usize) {
    for k in 0..n {
        a.swap(i * n + k, j * n + k);
    }
}

// =============================================================================
// Tests
// =============================================================================
