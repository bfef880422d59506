//! # Metaform - Training Substrate Without a Tensor Library
//!
//! Metaform bundles the pieces needed to train a Transformer-style model from
//! first principles:
//!
//! - **Matrix**: batched `[batch][row][col]` values with broadcasting matmul,
//!   Strassen multiply, determinant/inverse, reshape/slice/concatenate
//! - **Autograd**: arena graph, reverse-mode backward, gradient checkpointing
//! - **Optim**: SGD, momentum, AdamW and a dynamic loss scaler for mixed precision
//! - **Distributed**: socket coordinator that fans a batch out to devices and
//!   averages their gradients in device order
//!
//! # Quick Start
//!
//! ```rust
//! use metaform::prelude::*;
//!
//! let graph = Graph::new();
//! let w = graph.tensor(Matrix::from_rows(vec![vec![1.0], vec![1.0]]).unwrap(), true);
//! let x = graph.constant(Matrix::from_rows(vec![vec![2.0, 3.0]]).unwrap());
//!
//! let mut optimizer = Sgd::new(vec![w.clone()], 0.1);
//! let mark = graph.mark();
//! let loss = x.matmul(&w).unwrap().sum().unwrap();
//! loss.backward().unwrap();
//! optimizer.step().unwrap();
//! graph.release(mark).unwrap();
//!
//! assert!(w.value().unwrap().approx_eq(
//!     &Matrix::from_rows(vec![vec![0.8], vec![0.7]]).unwrap(),
//!     1e-12,
//! ));
//! ```
//!
//! @version 0.1.0
//! @author Metaform Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

// =============================================================================
// Crate Re-exports
// =============================================================================

pub use metaform_autograd as autograd;
pub use metaform_core as core;
pub use metaform_distributed as distributed;
pub use metaform_matrix as matrix;
pub use metaform_optim as optim;

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for training code.
///
/// ```rust
/// use metaform::prelude::*;
/// ```
pub mod prelude {
    pub use metaform_core::{Error, MemoryTracker, Result};

    pub use metaform_matrix::{Axis, FixedPrecision, Matrix, StrassenConfig};

    pub use metaform_autograd::{
        checkpoint, checkpoint_sequential, gradcheck, numerical_gradient, CheckpointRecord,
        Graph, GraphMark, Layer, Tensor,
    };

    pub use metaform_optim::{
        AdamW, LossScaler, LossScalerConfig, Momentum, Optimizer, Sgd,
    };

    pub use metaform_distributed::{
        DistributedTrainer, Rendezvous, StepReport, TrainerConfig, Worker, WorkerReport,
    };
}

// =============================================================================
// Version Information
// =============================================================================

/// Returns the version of the Metaform crates.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
