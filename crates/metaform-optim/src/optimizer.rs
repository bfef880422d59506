//! Optimizer Trait - Core Optimizer Interface
//!
//! Defines the trait that all optimizers implement and the per-parameter
//! state buffers they keep between steps.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_autograd::Tensor;
use metaform_core::Result;
use metaform_matrix::Matrix;

// =============================================================================
// Optimizer Trait
// =============================================================================

/// Trait for all optimizers.
///
/// An optimizer owns handles to the parameters it updates. `step` reads each
/// parameter's gradient and writes the new value in place; parameters with no
/// gradient are left untouched.
pub trait Optimizer: Send {
    /// Performs a single optimization step.
    fn step(&mut self) -> Result<()>;

    /// Resets every parameter gradient to a zero matrix of matching shape.
    fn zero_grad(&mut self) -> Result<()> {
        self.parameters().iter().try_for_each(Tensor::zero_grad)
    }

    /// Returns the current learning rate.
    fn lr(&self) -> f64;

    /// Sets the learning rate.
    fn set_lr(&mut self, lr: f64);

    /// Returns the parameters being optimized.
    fn parameters(&self) -> &[Tensor];

    /// Returns the number of parameter tensors.
    fn num_parameters(&self) -> usize {
        self.parameters().len()
    }
}

// =============================================================================
// Parameter State
// =============================================================================

/// State associated with a parameter during optimization.
#[derive(Debug, Clone, Default)]
pub struct ParamState {
    /// Velocity, used by momentum.
    pub momentum_buffer: Option<Matrix>,
    /// First moment estimate, used by AdamW.
    pub exp_avg: Option<Matrix>,
    /// Second moment estimate, used by AdamW.
    pub exp_avg_sq: Option<Matrix>,
    /// Number of updates applied, for bias correction.
    pub step: u32,
}

impl ParamState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reads the gradient of a parameter that should be updated.
///
/// Returns `None` for parameters that are frozen or have no gradient yet.
pub(crate) fn trainable_grad(param: &Tensor) -> Result<Option<Matrix>> {
    if !param.requires_grad()? {
        return Ok(None);
    }
    param.grad()
}
