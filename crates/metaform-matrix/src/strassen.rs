//! Strassen - Divide-and-Conquer Matrix Multiplication
//!
//! Multiplies square operands by splitting each into quadrants and combining
//! seven recursive products instead of eight. Below the leaf size, or when a
//! side is odd, the recursion falls back to the direct product.
//!
//! This is an optimization path only: the result agrees with `Matrix::matmul`
//! up to floating-point reassociation.
//!
//! # Example
//! ```rust
//! use metaform_matrix::{Matrix, StrassenConfig};
//!
//! let a = Matrix::random_uniform(128, 128, -1.0, 1.0);
//! let b = Matrix::random_uniform(128, 128, -1.0, 1.0);
//!
//! let fast = a.matmul_strassen(&b, &StrassenConfig::new(32).unwrap()).unwrap();
//! let direct = a.matmul(&b).unwrap();
//! assert!(fast.approx_eq(&direct, 1e-9));
//! ```
//!
//! @version 0.1.0
//! @author Metaform Development Team

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use metaform_core::{Error, Result};

use crate::matrix::{broadcast_batch, matmul_slice, Matrix};

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for the Strassen path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrassenConfig {
    /// Side length at or below which the direct product is used.
    pub leaf_size: usize,
}

impl StrassenConfig {
    /// Default leaf size.
    pub const DEFAULT_LEAF_SIZE: usize = 64;

    /// Creates a config with the given leaf size (must be non-zero).
    pub fn new(leaf_size: usize) -> Result<Self> {
        if leaf_size == 0 {
            return Err(Error::invalid_argument("Strassen leaf size must be at least 1"));
        }
        Ok(Self { leaf_size })
    }
}

impl Default for StrassenConfig {
    fn default() -> Self {
        Self {
            leaf_size: Self::DEFAULT_LEAF_SIZE,
        }
    }
}

// =============================================================================
// Matrix Entry Points
// =============================================================================

impl Matrix {
    /// Multiplies two square matrices of equal side using Strassen's algorithm.
    ///
    /// Fails with `Shape` if either operand is non-square, the sides differ,
    /// or the batch sizes are incompatible (batch size 1 broadcasts).
    pub fn matmul_strassen(&self, other: &Matrix, config: &StrassenConfig) -> Result<Matrix> {
        let n = self.rows();
        if self.cols() != n || other.rows() != n || other.cols() != n {
            return Err(Error::shape(format!(
                "strassen requires equal square operands, got {:?} and {:?}",
                self.shape(),
                other.shape()
            )));
        }
        let batch = broadcast_batch(self.batch_size(), other.batch_size())
            .ok_or_else(|| Error::shape_mismatch("strassen", self.shape(), other.shape()))?;
        let leaf = config.leaf_size.max(1);

        let slices: Vec<Vec<f64>> = (0..batch)
            .into_par_iter()
            .map(|b| strassen_square(self.broadcast_slice(b), other.broadcast_slice(b), n, leaf))
            .collect();

        Ok(Matrix::from_parts(slices.concat(), batch, n, n))
    }

    /// Multiplies with Strassen when both operands are square, equal-sided,
    /// a power of two and at least the leaf size; otherwise uses `matmul`.
    pub fn matmul_auto(&self, other: &Matrix, config: &StrassenConfig) -> Result<Matrix> {
        let n = self.rows();
        let eligible = self.cols() == n
            && other.rows() == n
            && other.cols() == n
            && n.is_power_of_two()
            && n >= config.leaf_size;
        if eligible {
            self.matmul_strassen(other, config)
        } else {
            self.matmul(other)
        }
    }
}

// =============================================================================
// Recursive Kernel
// =============================================================================

/// Multiplies two row-major `n x n` buffers.
fn strassen_square(a: &[f64], b: &[f64], n: usize, leaf: usize) -> Vec<f64> {
    if n <= leaf || n % 2 != 0 {
        let mut c = vec![0.0; n * n];
        matmul_slice(a, b, &mut c, n, n, n);
        return c;
    }

    let h = n / 2;
    let [a11, a12, a21, a22] = split_quadrants(a, n);
    let [b11, b12, b21, b22] = split_quadrants(b, n);

    let m1 = strassen_square(&add(&a11, &a22), &add(&b11, &b22), h, leaf);
    let m2 = strassen_square(&add(&a21, &a22), &b11, h, leaf);
    let m3 = strassen_square(&a11, &sub(&b12, &b22), h, leaf);
    let m4 = strassen_square(&a22, &sub(&b21, &b11), h, leaf);
    let m5 = strassen_square(&add(&a11, &a12), &b22, h, leaf);
    let m6 = strassen_square(&sub(&a21, &a11), &add(&b11, &b12), h, leaf);
    let m7 = strassen_square(&sub(&a12, &a22), &add(&b21, &b22), h, leaf);

    let c11 = add(&sub(&add(&m1, &m4), &m5), &m7);
    let c12 = add(&m3, &m5);
    let c21 = add(&m2, &m4);
    let c22 = add(&add(&sub(&m1, &m2), &m3), &m6);

    join_quadrants(&c11, &c12, &c21, &c22, h)
}

fn split_quadrants(m: &[f64], n: usize) -> [Vec<f64>; 4] {
    let h = n / 2;
    let mut quads = [
        Vec::with_capacity(h * h),
        Vec::with_capacity(h * h),
        Vec::with_capacity(h * h),
        Vec::with_capacity(h * h),
    ];
    for row in 0..n {
        let line = &m[row * n..(row + 1) * n];
        let top = usize::from(row >= h) * 2;
        quads[top].extend_from_slice(&line[..h]);
        quads[top + 1].extend_from_slice(&line[h..]);
    }
    quads
}

fn join_quadrants(c11: &[f64], c12: &[f64], c21: &[f64], c22: &[f64], h: usize) -> Vec<f64> {
    let n = h * 2;
    let mut out = Vec::with_capacity(n * n);
    for row in 0..h {
        out.extend_from_slice(&c11[row * h..(row + 1) * h]);
        out.extend_from_slice(&c12[row * h..(row + 1) * h]);
    }
    for row in 0..h {
        out.extend_from_slice(&c21[row * h..(row + 1) * h]);
        out.extend_from_slice(&c22[row * h..(row + 1) * h]);
    }
    out
}

fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn sub(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_square(rng: &mut StdRng, batch: usize, n: usize) -> Matrix {
        Matrix::random_uniform_with(rng, batch, n, n, -1.0, 1.0)
    }

    #[test]
    fn test_matches_direct_from_leaf_to_four_times_leaf() {
        let mut rng = StdRng::seed_from_u64(42);
        let config = StrassenConfig::new(16).unwrap();
        for n in [16, 32, 64] {
            let a = random_square(&mut rng, 1, n);
            let b = random_square(&mut rng, 1, n);
            let fast = a.matmul_strassen(&b, &config).unwrap();
            let direct = a.matmul(&b).unwrap();
            assert!(fast.approx_eq(&direct, 1e-9), "mismatch at n = {n}");
        }
    }

    #[test]
    fn test_matches_direct_with_default_leaf() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = StrassenConfig::default();
        for n in [64, 128, 256] {
            let a = random_square(&mut rng, 1, n);
            let b = random_square(&mut rng, 1, n);
            let fast = a.matmul_strassen(&b, &config).unwrap();
            let direct = a.matmul(&b).unwrap();
            assert!(fast.approx_eq(&direct, 1e-8), "mismatch at n = {n}");
        }
    }

    #[test]
    fn test_batched_and_broadcast() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = StrassenConfig::new(4).unwrap();
        let a = random_square(&mut rng, 3, 16);
        let w = random_square(&mut rng, 1, 16);

        let fast = a.matmul_strassen(&w, &config).unwrap();
        let direct = a.matmul(&w).unwrap();
        assert_eq!(fast.shape(), (3, 16, 16));
        assert!(fast.approx_eq(&direct, 1e-10));
    }

    #[test]
    fn test_odd_side_falls_back() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = StrassenConfig::new(2).unwrap();
        // 12 -> 6 -> 3 (odd above leaf): direct product at the 3x3 level
        let a = random_square(&mut rng, 1, 12);
        let b = random_square(&mut rng, 1, 12);
        let fast = a.matmul_strassen(&b, &config).unwrap();
        assert!(fast.approx_eq(&a.matmul(&b).unwrap(), 1e-10));

        let a = random_square(&mut rng, 1, 7);
        let b = random_square(&mut rng, 1, 7);
        let fast = a.matmul_strassen(&b, &config).unwrap();
        assert!(fast.approx_eq(&a.matmul(&b).unwrap(), 1e-12));
    }

    #[test]
    fn test_rejects_non_square_or_mismatched() {
        let config = StrassenConfig::default();
        let rect = Matrix::zeros(4, 8);
        let sq4 = Matrix::zeros(4, 4);
        let sq8 = Matrix::zeros(8, 8);

        assert!(rect.matmul_strassen(&sq8, &config).unwrap_err().is_shape());
        assert!(sq4.matmul_strassen(&sq8, &config).unwrap_err().is_shape());
        assert!(Matrix::zeros_batched(2, 4, 4)
            .matmul_strassen(&Matrix::zeros_batched(3, 4, 4), &config)
            .unwrap_err()
            .is_shape());
    }

    #[test]
    fn test_matmul_auto_falls_back_for_rectangular() {
        let config = StrassenConfig::new(2).unwrap();
        let a = Matrix::ones(2, 3);
        let b = Matrix::ones(3, 4);
        let c = a.matmul_auto(&b, &config).unwrap();
        assert_eq!(c.shape(), (1, 2, 4));
        assert!(c.data().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_zero_leaf_rejected() {
        assert!(matches!(
            StrassenConfig::new(0),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
