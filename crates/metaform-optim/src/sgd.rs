//! SGD Optimizer - Stochastic Gradient Descent
//!
//! The plain update `param -= lr * grad`, with optional L2 weight decay
//! added to the gradient before the step.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_autograd::Tensor;
use metaform_core::Result;

use crate::optimizer::{trainable_grad, Optimizer};

// =============================================================================
// SGD
// =============================================================================

/// Stochastic gradient descent.
pub struct Sgd {
    params: Vec<Tensor>,
    lr: f64,
    weight_decay: f64,
}

impl Sgd {
    /// Creates an SGD optimizer.
    pub fn new(params: Vec<Tensor>, lr: f64) -> Self {
        Self {
            params,
            lr,
            weight_decay: 0.0,
        }
    }

    /// Builder method to set L2 weight decay.
    #[must_use]
    pub fn weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self) -> Result<()> {
        for param in &self.params {
            let Some(mut grad) = trainable_grad(param)? else {
                continue;
            };
            let value = param.value()?;
            if self.weight_decay != 0.0 {
                grad = grad.add(&value.scale(self.weight_decay))?;
            }
            param.set_value(value.subtract(&grad.scale(self.lr))?)?;
        }
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn parameters(&self) -> &[Tensor] {
        &self.params
    }
}

// =============================================================================
// Tests
// =============================================================================
