//! Metaform Matrix - Batched Matrix for Training Without a Tensor Library
//!
//! This crate provides the `Matrix` type everything else is built on: a
//! three-dimensional `[batch][row][col]` container of `f64` values whose
//! operations are pure and always allocate a fresh result.
//!
//! # Key Features
//! - Element-wise arithmetic with strict shape checking
//! - Batched matrix product with explicit batch-size-1 broadcasting
//! - Strassen divide-and-conquer multiply for large square operands
//! - Determinant and inverse, reshape/slice/concatenate, statistics
//! - Fixed-precision rounding utility
//!
//! # Example
//! ```rust
//! use metaform_matrix::Matrix;
//!
//! let a = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
//! let b = Matrix::identity(2);
//!
//! let c = a.matmul(&b).unwrap();
//! assert_eq!(c, a);
//!
//! let t = a.transpose();
//! assert_eq!(t.get(0, 0, 1), Some(3.0));
//! ```
//!
//! @version 0.1.0
//! @author Metaform Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Numeric-code allowances
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::similar_names)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::float_cmp)]
#![allow(clippy::doc_markdown)]

// =============================================================================
// Modules
// =============================================================================

pub mod creation;
pub mod linalg;
pub mod matrix;
pub mod precision;
pub mod strassen;
pub mod view;

// =============================================================================
// Re-exports
// =============================================================================

pub use matrix::Matrix;
pub use metaform_core::{Error, Result};
pub use precision::FixedPrecision;
pub use strassen::StrassenConfig;
pub use view::Axis;
