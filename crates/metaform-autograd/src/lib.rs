//! Metaform Autograd - Reverse-Mode Differentiation over Batched Matrices
//!
//! Provides an arena-backed computational graph whose `Tensor` handles wrap
//! `Matrix` values. Operations record their operands; `backward` walks the
//! recorded nodes in reverse creation order and accumulates gradients.
//!
//! # Key Features
//!
//! - **Explicit Node Arena** - Operations are tagged nodes indexed by id
//! - **Additive Accumulation** - Tensors used twice receive the sum of both contributions
//! - **Batch Broadcasting** - Gradients of broadcast operands are summed over the batch
//! - **Gradient Checkpointing** - Recompute segments during backward instead of storing them
//! - **Per-Step Teardown** - Release every node created after a mark
//! - **Memory Accounting** - Optional `MemoryTracker` sees every stored value and gradient
//!
//! # Basic Example
//!
//! ```rust
//! use metaform_autograd::Graph;
//! use metaform_matrix::Matrix;
//!
//! let graph = Graph::new();
//! let x = graph.tensor(Matrix::from_rows(vec![vec![1.0, 2.0]]).unwrap(), true);
//! let w = graph.tensor(Matrix::from_rows(vec![vec![3.0], vec![4.0]]).unwrap(), true);
//!
//! let loss = x.matmul(&w).unwrap().sum().unwrap();
//! loss.backward().unwrap();
//!
//! assert_eq!(w.grad().unwrap().unwrap().data(), &[1.0, 2.0]);
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
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::similar_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::float_cmp)]
#![allow(clippy::needless_pass_by_value)]

// =============================================================================
// Modules
// =============================================================================

pub mod backward;
pub mod checkpoint;
pub mod graph;
pub mod layer;
pub mod tensor;

// =============================================================================
// Re-exports
// =============================================================================

pub use backward::{gradcheck, numerical_gradient};
pub use checkpoint::{checkpoint, checkpoint_sequential, CheckpointFn, CheckpointRecord};
pub use graph::{Graph, GraphMark};
pub use layer::Layer;
pub use metaform_core::{Error, Result};
pub use tensor::Tensor;
