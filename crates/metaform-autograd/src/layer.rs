//! Layer Trait - Trainable Component Interface
//!
//! Concrete layers live outside this crate. They expose a forward pass over
//! plain matrices and hand their trainable tensors to an optimizer.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_core::Result;
use metaform_matrix::Matrix;

use crate::tensor::Tensor;

// =============================================================================
// Layer Trait
// =============================================================================

/// A model component with an optional set of trainable parameters.
pub trait Layer: Send + Sync {
    /// Applies the layer to `input`.
    fn forward(&self, input: &Matrix) -> Result<Matrix>;

    /// Trainable tensors, in a stable order.
    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }

    /// Number of trainable scalar values.
    fn num_parameters(&self) -> Result<usize> {
        let mut total = 0;
        for param in self.parameters() {
            if param.requires_grad()? {
                let (b, r, c) = param.shape()?;
                total += b * r * c;
            }
        }
        Ok(total)
    }

    /// Resets every parameter gradient to zeros.
    fn zero_grad(&self) -> Result<()> {
        self.parameters().iter().try_for_each(Tensor::zero_grad)
    }
}
