//! Metaform Optim - Optimizers and Mixed-Precision Loss Scaling
//!
//! Provides the optimizers that consume autograd gradients and the loss
//! scaler used to keep gradients representable in half precision.
//!
//! # Optimizers
//!
//! - **Sgd** - Plain stochastic gradient descent
//! - **Momentum** - Gradient descent with a velocity term
//! - **AdamW** - Adam with decoupled weight decay
//!
//! # Mixed Precision Support
//!
//! - **LossScaler** - Dynamic loss scaling with overflow backoff
//!
//! # Basic Example
//!
//! ```rust
//! use metaform_autograd::Graph;
//! use metaform_matrix::Matrix;
//! use metaform_optim::{Optimizer, Sgd};
//!
//! let graph = Graph::new();
//! let w = graph.tensor(Matrix::ones(1, 2), true);
//! let mut optimizer = Sgd::new(vec![w.clone()], 0.5);
//!
//! optimizer.zero_grad().unwrap();
//! w.sum().unwrap().backward().unwrap();
//! optimizer.step().unwrap();
//!
//! assert_eq!(w.value().unwrap().data(), &[0.5, 0.5]);
//! ```
//!
//! @version 0.1.0
//! @author Metaform Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]
#![allow(clippy::doc_markdown)]

// =============================================================================
// Modules
// =============================================================================

pub mod adam;
pub mod loss_scaler;
pub mod momentum;
pub mod optimizer;
pub mod sgd;

// =============================================================================
// Re-exports
// =============================================================================

pub use adam::AdamW;
pub use loss_scaler::{
    clip_gradients, has_overflow, scale_gradients, to_half_precision, unscale_gradients,
    LossScaler, LossScalerConfig,
};
pub use momentum::Momentum;
pub use optimizer::{Optimizer, ParamState};
pub use sgd::Sgd;
