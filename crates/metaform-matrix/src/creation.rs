//! Matrix Creation Functions
//!
//! Factory constructors for common initializations. The unbatched factories
//! produce batch-size-1 matrices; `*_batched` variants repeat the slice.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use rand::Rng;

use crate::matrix::Matrix;

impl Matrix {
    // =========================================================================
    // Constant Initialization
    // =========================================================================

    /// A `rows x cols` matrix of zeros (batch size 1).
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Self::zeros_batched(1, rows, cols)
    }

    /// A `rows x cols` matrix of ones (batch size 1).
    pub fn ones(rows: usize, cols: usize) -> Matrix {
        Self::filled(1, rows, cols, 1.0)
    }

    /// A `batch_size x rows x cols` matrix of zeros.
    pub fn zeros_batched(batch_size: usize, rows: usize, cols: usize) -> Matrix {
        Self::filled(batch_size, rows, cols, 0.0)
    }

    /// A matrix with every value set to `value`.
    pub fn filled(batch_size: usize, rows: usize, cols: usize, value: f64) -> Matrix {
        let data = vec![value; batch_size * rows * cols];
        Self::from_parts(data, batch_size, rows, cols)
    }

    /// Zeros with the same shape as `other`.
    pub fn zeros_like(other: &Matrix) -> Matrix {
        let (b, r, c) = other.shape();
        Self::filled(b, r, c, 0.0)
    }

    /// Ones with the same shape as `other`.
    pub fn ones_like(other: &Matrix) -> Matrix {
        let (b, r, c) = other.shape();
        Self::filled(b, r, c, 1.0)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// The `n x n` identity (batch size 1).
    pub fn identity(n: usize) -> Matrix {
        Self::identity_batched(1, n)
    }

    /// `batch_size` copies of the `n x n` identity.
    pub fn identity_batched(batch_size: usize, n: usize) -> Matrix {
        let mut data = vec![0.0; batch_size * n * n];
        for b in 0..batch_size {
            for i in 0..n {
                data[b * n * n + i * n + i] = 1.0;
            }
        }
        Self::from_parts(data, batch_size, n, n)
    }

    // =========================================================================
    // Random Initialization
    // =========================================================================

    /// Uniform random values in `[low, high)` using the thread-local RNG.
    pub fn random_uniform(rows: usize, cols: usize, low: f64, high: f64) -> Matrix {
        Self::random_uniform_with(&mut rand::thread_rng(), 1, rows, cols, low, high)
    }

    /// Uniform random values in `[low, high)` drawn from `rng`.
    ///
    /// When `low >= high` every value is `low`.
    pub fn random_uniform_with<R: Rng + ?Sized>(
        rng: &mut R,
        batch_size: usize,
        rows: usize,
        cols: usize,
        low: f64,
        high: f64,
    ) -> Matrix {
        let n = batch_size * rows * cols;
        let data = if low < high {
            (0..n).map(|_| rng.gen_range(low..high)).collect()
        } else {
            vec![low; n]
        };
        Self::from_parts(data, batch_size, rows, cols)
    }

    /// Uniform random integers in `[low, high]`, stored as `f64`.
    pub fn random_int(rows: usize, cols: usize, low: i64, high: i64) -> Matrix {
        let mut rng = rand::thread_rng();
        let (lo, hi) = if low <= high { (low, high) } else { (high, low) };
        let data = (0..rows * cols)
            .map(|_| rng.gen_range(lo..=hi) as f64)
            .collect();
        Self::from_parts(data, 1, rows, cols)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zeros_and_ones() {
        let z = Matrix::zeros(2, 3);
        assert_eq!(z.shape(), (1, 2, 3));
        assert!(z.data().iter().all(|&v| v == 0.0));

        let o = Matrix::ones_like(&Matrix::zeros_batched(2, 1, 2));
        assert_eq!(o.shape(), (2, 1, 2));
        assert_eq!(o.sum(), 4.0);
    }

    #[test]
    fn test_identity() {
        let i = Matrix::identity(3);
        assert_eq!(i.shape(), (1, 3, 3));
        assert_eq!(i.sum(), 3.0);
        assert_eq!(i.get(0, 1, 1), Some(1.0));
        assert_eq!(i.get(0, 0, 1), Some(0.0));

        let ib = Matrix::identity_batched(2, 2);
        assert_eq!(ib.slice_data(1).unwrap(), &[1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_random_uniform_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let r = Matrix::random_uniform_with(&mut rng, 2, 8, 8, -0.5, 0.5);
        assert_eq!(r.shape(), (2, 8, 8));
        assert!(r.data().iter().all(|&v| (-0.5..0.5).contains(&v)));

        let degenerate = Matrix::random_uniform_with(&mut rng, 1, 2, 2, 3.0, 3.0);
        assert_eq!(degenerate.data(), &[3.0; 4]);
    }

    #[test]
    fn test_random_int_bounds() {
        let r = Matrix::random_int(4, 4, 0, 10);
        assert!(r
            .data()
            .iter()
            .all(|&v| v.fract() == 0.0 && (0.0..=10.0).contains(&v)));
    }
}
