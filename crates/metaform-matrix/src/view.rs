//! View - Reshape, Slice, Concatenate and Batch Access
//!
//! Structural operations that rearrange values without arithmetic. Each
//! returns a new matrix; nothing aliases the source buffer.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::ops::Range;

use serde::{Deserialize, Serialize};

use metaform_core::{Error, Result};

use crate::matrix::Matrix;

/// Direction for `concatenate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Stack along rows (column counts must match).
    Vertical,
    /// Join along columns (row counts must match).
    Horizontal,
}

impl Matrix {
    /// Reinterprets every slice as `rows x cols`, keeping row-major order.
    pub fn reshape(&self, rows: usize, cols: usize) -> Result<Matrix> {
        if rows * cols != self.rows() * self.cols() {
            return Err(Error::shape(format!(
                "cannot reshape {}x{} slices into {rows}x{cols}",
                self.rows(),
                self.cols()
            )));
        }
        Ok(Matrix::from_parts(
            self.data().to_vec(),
            self.batch_size(),
            rows,
            cols,
        ))
    }

    /// Copies the sub-block `rows x cols` out of every slice.
    pub fn slice(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Matrix> {
        if rows.start > rows.end || rows.end > self.rows() || cols.start > cols.end || cols.end > self.cols() {
            return Err(Error::invalid_argument(format!(
                "slice [{rows:?}, {cols:?}] out of range for {}x{} matrix",
                self.rows(),
                self.cols()
            )));
        }
        let width = self.cols();
        let mut data = Vec::with_capacity(self.batch_size() * rows.len() * cols.len());
        for b in 0..self.batch_size() {
            let slice = self.broadcast_slice(b);
            for r in rows.clone() {
                data.extend_from_slice(&slice[r * width + cols.start..r * width + cols.end]);
            }
        }
        Ok(Matrix::from_parts(
            data,
            self.batch_size(),
            rows.len(),
            cols.len(),
        ))
    }

    /// Joins two matrices of equal batch size along `axis`.
    pub fn concatenate(&self, other: &Matrix, axis: Axis) -> Result<Matrix> {
        if self.batch_size() != other.batch_size() {
            return Err(Error::shape_mismatch("concatenate", self.shape(), other.shape()));
        }
        let batch = self.batch_size();
        match axis {
            Axis::Vertical => {
                if self.cols() != other.cols() {
                    return Err(Error::shape_mismatch("concatenate", self.shape(), other.shape()));
                }
                let mut data = Vec::with_capacity(self.len() + other.len());
                for b in 0..batch {
                    data.extend_from_slice(self.broadcast_slice(b));
                    data.extend_from_slice(other.broadcast_slice(b));
                }
                Ok(Matrix::from_parts(
                    data,
                    batch,
                    self.rows() + other.rows(),
                    self.cols(),
                ))
            }
            Axis::Horizontal => {
                if self.rows() != other.rows() {
                    return Err(Error::shape_mismatch("concatenate", self.shape(), other.shape()));
                }
                let (lc, rc) = (self.cols(), other.cols());
                let mut data = Vec::with_capacity(self.len() + other.len());
                for b in 0..batch {
                    let (lhs, rhs) = (self.broadcast_slice(b), other.broadcast_slice(b));
                    for r in 0..self.rows() {
                        data.extend_from_slice(&lhs[r * lc..(r + 1) * lc]);
                        data.extend_from_slice(&rhs[r * rc..(r + 1) * rc]);
                    }
                }
                Ok(Matrix::from_parts(data, batch, self.rows(), lc + rc))
            }
        }
    }

    /// Copies slice `index` out as a batch-size-1 matrix.
    pub fn batch(&self, index: usize) -> Result<Matrix> {
        let data = self.slice_data(index).ok_or_else(|| {
            Error::invalid_argument(format!(
                "batch index {index} out of range for batch size {}",
                self.batch_size()
            ))
        })?;
        Ok(Matrix::from_parts(data.to_vec(), 1, self.rows(), self.cols()))
    }

    /// Splits into one batch-size-1 matrix per slice.
    pub fn split_batches(&self) -> Vec<Matrix> {
        (0..self.batch_size())
            .map(|b| Matrix::from_parts(self.broadcast_slice(b).to_vec(), 1, self.rows(), self.cols()))
            .collect()
    }

    /// Stacks matrices of equal `rows x cols` along the batch dimension.
    pub fn stack(parts: &[Matrix]) -> Result<Matrix> {
        let first = parts
            .first()
            .ok_or_else(|| Error::shape("cannot stack an empty list of matrices"))?;
        let (rows, cols) = (first.rows(), first.cols());
        let mut batch = 0;
        let mut data = Vec::with_capacity(parts.iter().map(Matrix::len).sum());
        for part in parts {
            if part.rows() != rows || part.cols() != cols {
                return Err(Error::shape_mismatch("stack", first.shape(), part.shape()));
            }
            batch += part.batch_size();
            data.extend_from_slice(part.data());
        }
        Ok(Matrix::from_parts(data, batch, rows, cols))
    }
}
