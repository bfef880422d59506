//! Momentum Optimizer - Gradient Descent with Velocity
//!
//! Keeps a velocity per parameter: `v = momentum * v + lr * grad`, then
//! `param -= v`.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_autograd::Tensor;
use metaform_core::Result;
use metaform_matrix::Matrix;

use crate::optimizer::{trainable_grad, Optimizer, ParamState};

/// Gradient descent with classical momentum.
pub struct Momentum {
    params: Vec<Tensor>,
    lr: f64,
    momentum: f64,
    state: Vec<ParamState>,
}

impl Momentum {
    /// Creates a momentum optimizer with coefficient 0.9.
    pub fn new(params: Vec<Tensor>, lr: f64) -> Self {
        Self::with_momentum(params, lr, 0.9)
    }

    /// Creates a momentum optimizer with the given coefficient.
    pub fn with_momentum(params: Vec<Tensor>, lr: f64, momentum: f64) -> Self {
        let state = vec![ParamState::new(); params.len()];
        Self {
            params,
            lr,
            momentum,
            state,
        }
    }

    /// Momentum coefficient.
    pub fn momentum(&self) -> f64 {
        self.momentum
    }
}

impl Optimizer for Momentum {
    fn step(&mut self) -> Result<()> {
        for (param, state) in self.params.iter().zip(&mut self.state) {
            let Some(grad) = trainable_grad(param)? else {
                continue;
            };
            let velocity = match &state.momentum_buffer {
                Some(v) => v.scale(self.momentum).add(&grad.scale(self.lr))?,
                None => grad.scale(self.lr),
            };
            let value: Matrix = param.value()?.subtract(&velocity)?;
            param.set_value(value)?;
            state.momentum_buffer = Some(velocity);
            state.step += 1;
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
