//! Matrix - Batched Numeric Container
//!
//! Defines the `Matrix` type: `batch_size` independent `rows x cols` slices
//! stored contiguously in row-major order. Every slice has the same shape, and
//! a two-dimensional input is wrapped as a single-slice batch.
//!
//! Operations never mutate their operands. Each returns a new `Matrix` or a
//! `Shape` error when the operands are incompatible.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use metaform_core::{Error, Result};

// =============================================================================
// Matrix Struct
// =============================================================================

/// A batch of equally shaped `f64` matrices.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix", into = "RawMatrix")]
pub struct Matrix {
    batch_size: usize,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

/// Unvalidated wire form of a `Matrix`.
///
/// Deserialization goes through this type so a payload whose buffer length
/// disagrees with its dimensions is rejected instead of producing a broken
/// matrix.
#[derive(Serialize, Deserialize)]
struct RawMatrix {
    batch_size: usize,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl TryFrom<RawMatrix> for Matrix {
    type Error = Error;

    fn try_from(raw: RawMatrix) -> Result<Self> {
        Matrix::from_flat(raw.data, raw.batch_size, raw.rows, raw.cols)
    }
}

impl From<Matrix> for RawMatrix {
    fn from(m: Matrix) -> Self {
        RawMatrix {
            batch_size: m.batch_size,
            rows: m.rows,
            cols: m.cols,
            data: m.data,
        }
    }
}

impl Matrix {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Creates a matrix from a flat row-major buffer.
    ///
    /// Fails with `Shape` if `data.len() != batch_size * rows * cols`.
    pub fn from_flat(data: Vec<f64>, batch_size: usize, rows: usize, cols: usize) -> Result<Self> {
        let expected = batch_size
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(cols))
            .ok_or_else(|| Error::shape("matrix dimensions overflow"))?;
        if data.len() != expected {
            return Err(Error::shape(format!(
                "buffer of {} values cannot form a {batch_size}x{rows}x{cols} matrix",
                data.len()
            )));
        }
        Ok(Self {
            batch_size,
            rows,
            cols,
            data,
        })
    }

    /// Creates a batch-size-1 matrix from rows.
    ///
    /// Fails with `Shape` if there are no rows or the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_batches(vec![rows])
    }

    /// Creates a batched matrix from `[batch][row][col]` values.
    ///
    /// Fails with `Shape` if any slice or row differs in length from the first.
    pub fn from_batches(batches: Vec<Vec<Vec<f64>>>) -> Result<Self> {
        let batch_size = batches.len();
        let first = batches
            .first()
            .ok_or_else(|| Error::shape("matrix needs at least one batch slice"))?;
        let rows = first.len();
        let cols = first
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::shape("matrix needs at least one row"))?;

        let mut data = Vec::with_capacity(batch_size * rows * cols);
        for (b, slice) in batches.into_iter().enumerate() {
            if slice.len() != rows {
                return Err(Error::shape(format!(
                    "ragged batch: slice {b} has {} rows, expected {rows}",
                    slice.len()
                )));
            }
            for (r, row) in slice.into_iter().enumerate() {
                if row.len() != cols {
                    return Err(Error::shape(format!(
                        "ragged batch: slice {b} row {r} has {} columns, expected {cols}",
                        row.len()
                    )));
                }
                data.extend(row);
            }
        }

        Ok(Self {
            batch_size,
            rows,
            cols,
            data,
        })
    }

    /// Assembles a matrix whose buffer length the caller has already ensured.
    pub(crate) fn from_parts(data: Vec<f64>, batch_size: usize, rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), batch_size * rows * cols);
        Self {
            batch_size,
            rows,
            cols,
            data,
        }
    }

    /// Builds a matrix of the same shape around a new buffer.
    pub(crate) fn with_data(&self, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self {
            batch_size: self.batch_size,
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of slices in the batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rows per slice.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Columns per slice.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `(batch_size, rows, cols)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch_size, self.rows, self.cols)
    }

    /// Total number of values across all slices.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the matrix holds no values.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the value buffer in bytes.
    pub fn nbytes(&self) -> usize {
        std::mem::size_of_val(self.data.as_slice())
    }

    /// Returns true if both matrices have identical `(batch, rows, cols)`.
    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.shape() == other.shape()
    }

    /// Flat row-major view of all values.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Consumes the matrix and returns its buffer.
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Flat view of one batch slice.
    pub fn slice_data(&self, batch: usize) -> Option<&[f64]> {
        let stride = self.rows * self.cols;
        (batch < self.batch_size).then(|| &self.data[batch * stride..(batch + 1) * stride])
    }

    /// Returns the value at `(batch, row, col)`.
    pub fn get(&self, batch: usize, row: usize, col: usize) -> Option<f64> {
        if batch >= self.batch_size || row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.data[(batch * self.rows + row) * self.cols + col])
    }

    /// Converts back to nested `[batch][row][col]` vectors.
    pub fn to_nested(&self) -> Vec<Vec<Vec<f64>>> {
        (0..self.batch_size)
            .map(|b| {
                (0..self.rows)
                    .map(|r| {
                        let start = (b * self.rows + r) * self.cols;
                        self.data[start..start + self.cols].to_vec()
                    })
                    .collect()
            })
            .collect()
    }

    // =========================================================================
    // Element-wise Operations
    // =========================================================================

    fn check_same_shape(&self, other: &Matrix, op: &str) -> Result<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(Error::shape_mismatch(op, self.shape(), other.shape()))
        }
    }

    fn zip_with(&self, other: &Matrix, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Matrix> {
        self.check_same_shape(other, op)?;
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(self.with_data(data))
    }

    /// Element-wise sum.
    pub fn add(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Element-wise difference.
    pub fn subtract(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, "subtract", |a, b| a - b)
    }

    /// Element-wise (Hadamard) product.
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, "hadamard", |a, b| a * b)
    }

    /// Element-wise quotient.
    pub fn divide(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, "divide", |a, b| a / b)
    }

    /// Applies `f` to every value.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Matrix {
        self.with_data(self.data.iter().map(|&v| f(v)).collect())
    }

    /// Multiplies every value by `factor`.
    pub fn scale(&self, factor: f64) -> Matrix {
        self.map(|v| v * factor)
    }

    /// Divides every value by `divisor`.
    pub fn div_scalar(&self, divisor: f64) -> Matrix {
        self.map(|v| v / divisor)
    }

    /// Adds `value` to every element.
    pub fn add_scalar(&self, value: f64) -> Matrix {
        self.map(|v| v + value)
    }

    /// Negates every value.
    pub fn neg(&self) -> Matrix {
        self.map(|v| -v)
    }

    /// Raises every value to an integer power.
    pub fn powi(&self, exp: i32) -> Matrix {
        self.map(|v| v.powi(exp))
    }

    /// Square root of every value.
    pub fn sqrt(&self) -> Matrix {
        self.map(f64::sqrt)
    }

    /// Clamps every value to `[min, max]`.
    pub fn clamp(&self, min: f64, max: f64) -> Matrix {
        self.map(|v| v.max(min).min(max))
    }

    /// Returns true if no value is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Returns true if shapes match and every pair of values differs by at most `tol`.
    pub fn approx_eq(&self, other: &Matrix, tol: f64) -> bool {
        self.same_shape(other)
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tol)
    }

    // =========================================================================
    // Linear Algebra
    // =========================================================================

    /// Batched matrix product.
    ///
    /// Requires `self.cols == other.rows`. Batch sizes must be equal, except
    /// that a batch-size-1 operand is broadcast across the other's batch.
    pub fn matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(Error::shape_mismatch("matmul", self.shape(), other.shape()));
        }
        let batch = broadcast_batch(self.batch_size, other.batch_size)
            .ok_or_else(|| Error::shape_mismatch("matmul", self.shape(), other.shape()))?;

        let (m, k, n) = (self.rows, self.cols, other.cols);
        let mut out = vec![0.0; batch * m * n];
        if m * n > 0 {
            out.par_chunks_mut(m * n).enumerate().for_each(|(b, c)| {
                let a = self.broadcast_slice(b);
                let rhs = other.broadcast_slice(b);
                matmul_slice(a, rhs, c, m, k, n);
            });
        }

        Ok(Matrix::from_parts(out, batch, m, n))
    }

    /// Slice `b`, or slice 0 when this matrix is being broadcast.
    pub(crate) fn broadcast_slice(&self, b: usize) -> &[f64] {
        let stride = self.rows * self.cols;
        let idx = if self.batch_size == 1 { 0 } else { b };
        &self.data[idx * stride..(idx + 1) * stride]
    }

    /// Swaps rows and columns in every slice.
    pub fn transpose(&self) -> Matrix {
        let (r, c) = (self.rows, self.cols);
        let mut out = vec![0.0; self.data.len()];
        for b in 0..self.batch_size {
            let src = &self.data[b * r * c..(b + 1) * r * c];
            let dst = &mut out[b * r * c..(b + 1) * r * c];
            for i in 0..r {
                for j in 0..c {
                    dst[j * r + i] = src[i * c + j];
                }
            }
        }
        Matrix {
            batch_size: self.batch_size,
            rows: c,
            cols: r,
            data: out,
        }
    }

    // =========================================================================
    // Reductions
    // =========================================================================

    /// Sum of every value.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Arithmetic mean of every value (NaN for an empty matrix).
    pub fn mean(&self) -> f64 {
        self.sum() / self.data.len() as f64
    }

    /// Population variance of every value.
    pub fn variance(&self) -> f64 {
        let mean = self.mean();
        self.data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.data.len() as f64
    }

    /// Population standard deviation of every value.
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Largest absolute value (0 for an empty matrix).
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// Sums the batch dimension away, returning a batch-size-1 matrix.
    pub fn sum_batches(&self) -> Matrix {
        let stride = self.rows * self.cols;
        let mut out = vec![0.0; stride];
        for chunk in self.data.chunks(stride.max(1)) {
            for (o, v) in out.iter_mut().zip(chunk) {
                *o += v;
            }
        }
        Matrix {
            batch_size: 1,
            rows: self.rows,
            cols: self.cols,
            data: out,
        }
    }
}

// =============================================================================
// Kernels
// =============================================================================

/// Resolves the result batch size of a binary batched operation.
pub(crate) fn broadcast_batch(lhs: usize, rhs: usize) -> Option<usize> {
    match (lhs, rhs) {
        (a, b) if a == b => Some(a),
        (1, b) => Some(b),
        (a, 1) => Some(a),
        _ => None,
    }
}

/// Direct `m x k` by `k x n` product into `c`, which must be zeroed.
pub(crate) fn matmul_slice(a: &[f64], b: &[f64], c: &mut [f64], m: usize, k: usize, n: usize) {
    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            let b_row = &b[p * n..(p + 1) * n];
            for (cv, &bv) in c_row.iter_mut().zip(b_row) {
                *cv += a_ip * bv;
            }
        }
    }
}

// =============================================================================
// Formatting
// =============================================================================

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("shape", &self.shape())
            .field("data", &self.data)
            .finish()
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (b, slice) in self.to_nested().iter().enumerate() {
            if b > 0 {
                writeln!(f)?;
            }
            for (r, row) in slice.iter().enumerate() {
                if r > 0 {
                    writeln!(f)?;
                }
                let line: Vec<String> = row.iter().map(ToString::to_string).collect();
                write!(f, "{}", line.join(" "))?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn m(rows: Vec<Vec<f64>>) -> Matrix {
        Matrix::from_rows(rows).unwrap()
    }

    #[test]
    fn test_from_rows_wraps_as_single_batch() {
        let a = m(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(a.shape(), (1, 2, 3));
        assert_eq!(a.get(0, 1, 2), Some(6.0));
        assert_eq!(a.get(1, 0, 0), None);
    }

    #[test]
    fn test_ragged_input_is_shape_error() {
        let err = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(err.is_shape());

        let err = Matrix::from_batches(vec![
            vec![vec![1.0, 2.0]],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        ])
        .unwrap_err();
        assert!(err.is_shape());

        assert!(Matrix::from_rows(vec![]).unwrap_err().is_shape());
        assert!(Matrix::from_flat(vec![1.0; 5], 1, 2, 3).unwrap_err().is_shape());
    }

    #[test]
    fn test_add_subtract() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = m(vec![vec![5.0, 6.0], vec![7.0, 8.0]]);
        assert_eq!(a.add(&b).unwrap().data(), &[6.0, 8.0, 10.0, 12.0]);
        assert_eq!(b.subtract(&a).unwrap().data(), &[4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_add_rejects_mismatched_batch() {
        let a = Matrix::zeros(2, 2);
        let b = Matrix::zeros_batched(2, 2, 2);
        assert!(a.add(&b).unwrap_err().is_shape());
        assert!(a.subtract(&Matrix::zeros(2, 3)).unwrap_err().is_shape());
    }

    #[test]
    fn test_matmul() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = m(vec![vec![5.0, 6.0], vec![7.0, 8.0]]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_inner_dimension_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(a.matmul(&b).unwrap_err().is_shape());
    }

    #[test]
    fn test_matmul_broadcasts_batch_size_one() {
        let a = Matrix::from_batches(vec![
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![vec![2.0, 0.0], vec![0.0, 2.0]],
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
        ])
        .unwrap();
        let w = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let left = a.matmul(&w).unwrap();
        assert_eq!(left.shape(), (3, 2, 2));
        assert_eq!(left.slice_data(0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(left.slice_data(1).unwrap(), &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!(left.slice_data(2).unwrap(), &[3.0, 4.0, 1.0, 2.0]);

        let right = w.matmul(&a).unwrap();
        assert_eq!(right.shape(), (3, 2, 2));
        assert_eq!(right.slice_data(1).unwrap(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_matmul_keeps_non_finite_through_zero_entries() {
        let a = m(vec![vec![0.0, 1.0]]);
        let nan = m(vec![vec![f64::NAN], vec![2.0]]);
        assert!(a.matmul(&nan).unwrap().data()[0].is_nan());

        let inf = m(vec![vec![f64::INFINITY], vec![2.0]]);
        let c = a.matmul(&inf).unwrap();
        assert!(!c.is_finite());
    }

    #[test]
    fn test_matmul_rejects_unequal_batches() {
        let a = Matrix::zeros_batched(2, 2, 2);
        let b = Matrix::zeros_batched(3, 2, 2);
        assert!(a.matmul(&b).unwrap_err().is_shape());
    }

    #[test]
    fn test_transpose_involution() {
        let a = Matrix::from_batches(vec![
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            vec![vec![7.0, 8.0, 9.0], vec![10.0, 11.0, 12.0]],
        ])
        .unwrap();
        let t = a.transpose();
        assert_eq!(t.shape(), (2, 3, 2));
        assert_eq!(t.get(1, 2, 0), Some(9.0));
        assert_eq!(t.transpose(), a);
    }

    #[test]
    fn test_addition_is_associative() {
        let a = Matrix::random_uniform(4, 5, -1.0, 1.0);
        let b = Matrix::random_uniform(4, 5, -1.0, 1.0);
        let c = Matrix::random_uniform(4, 5, -1.0, 1.0);
        let lhs = a.add(&b).unwrap().add(&c).unwrap();
        let rhs = a.add(&b.add(&c).unwrap()).unwrap();
        assert!(lhs.approx_eq(&rhs, 1e-12));
    }

    #[test]
    fn test_matmul_distributes_over_addition() {
        let a = Matrix::random_uniform(3, 4, -1.0, 1.0);
        let b = Matrix::random_uniform(4, 2, -1.0, 1.0);
        let c = Matrix::random_uniform(4, 2, -1.0, 1.0);
        let lhs = a.matmul(&b.add(&c).unwrap()).unwrap();
        let rhs = a.matmul(&b).unwrap().add(&a.matmul(&c).unwrap()).unwrap();
        assert!(lhs.approx_eq(&rhs, 1e-12));
    }

    #[test]
    fn test_statistics() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(a.sum(), 10.0);
        assert_eq!(a.mean(), 2.5);
        assert!((a.variance() - 1.25).abs() < 1e-12);
        assert!((a.stddev() - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sum_batches() {
        let a = Matrix::from_batches(vec![vec![vec![1.0, 2.0]], vec![vec![3.0, 4.0]]]).unwrap();
        let s = a.sum_batches();
        assert_eq!(s.shape(), (1, 1, 2));
        assert_eq!(s.data(), &[4.0, 6.0]);
    }

    #[test]
    fn test_clamp_and_finite() {
        let a = m(vec![vec![-5.0, 0.5, 5.0]]);
        assert_eq!(a.clamp(-1.0, 1.0).data(), &[-1.0, 0.5, 1.0]);
        assert!(a.is_finite());
        assert!(!a.scale(f64::INFINITY).is_finite());
    }

    #[test]
    fn test_serde_rejects_inconsistent_buffer() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let bytes = bincode::serialize(&a).unwrap();
        let back: Matrix = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, a);

        let bad = RawMatrix {
            batch_size: 1,
            rows: 3,
            cols: 3,
            data: vec![0.0; 4],
        };
        let bytes = bincode::serialize(&bad).unwrap();
        assert!(bincode::deserialize::<Matrix>(&bytes).is_err());
    }

    #[test]
    fn test_display() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(a.to_string(), "1 2\n3 4");
    }
}
