//! AdamW Optimizer - Adam with Decoupled Weight Decay
//!
//! Keeps exponential moving averages of the gradient and its square per
//! parameter. Weight decay shrinks the parameter directly rather than being
//! folded into the gradient.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_autograd::Tensor;
use metaform_core::Result;
use metaform_matrix::Matrix;

use crate::optimizer::{trainable_grad, Optimizer, ParamState};

// =============================================================================
// AdamW
// =============================================================================

/// Adam with decoupled weight decay.
pub struct AdamW {
    params: Vec<Tensor>,
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    state: Vec<ParamState>,
}

impl AdamW {
    /// Creates AdamW with betas (0.9, 0.999), eps 1e-8 and weight decay 0.01.
    pub fn new(params: Vec<Tensor>, lr: f64) -> Self {
        Self::with_betas(params, lr, (0.9, 0.999))
    }

    /// Creates AdamW with the given betas.
    pub fn with_betas(params: Vec<Tensor>, lr: f64, betas: (f64, f64)) -> Self {
        let state = vec![ParamState::new(); params.len()];
        Self {
            params,
            lr,
            beta1: betas.0,
            beta2: betas.1,
            eps: 1e-8,
            weight_decay: 0.01,
            state,
        }
    }

    /// Builder method to set betas.
    #[must_use]
    pub fn betas(mut self, betas: (f64, f64)) -> Self {
        self.beta1 = betas.0;
        self.beta2 = betas.1;
        self
    }

    /// Builder method to set epsilon.
    #[must_use]
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Builder method to set weight decay.
    #[must_use]
    pub fn weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Default for AdamW {
    fn default() -> Self {
        Self::new(Vec::new(), 1e-3)
    }
}

impl Optimizer for AdamW {
    fn step(&mut self) -> Result<()> {
        for (param, state) in self.params.iter().zip(&mut self.state) {
            let Some(grad) = trainable_grad(param)? else {
                continue;
            };
            state.step += 1;

            let exp_avg = match &state.exp_avg {
                Some(m) => m.scale(self.beta1).add(&grad.scale(1.0 - self.beta1))?,
                None => grad.scale(1.0 - self.beta1),
            };
            let grad_sq = grad.hadamard(&grad)?;
            let exp_avg_sq = match &state.exp_avg_sq {
                Some(v) => v.scale(self.beta2).add(&grad_sq.scale(1.0 - self.beta2))?,
                None => grad_sq.scale(1.0 - self.beta2),
            };

            let bias_correction1 = 1.0 - self.beta1.powi(state.step as i32);
            let bias_correction2 = 1.0 - self.beta2.powi(state.step as i32);
            let eps = self.eps;

            let m_hat = exp_avg.div_scalar(bias_correction1);
            let denom = exp_avg_sq
                .div_scalar(bias_correction2)
                .map(|v| v.sqrt() + eps);
            let update: Matrix = m_hat.divide(&denom)?.scale(self.lr);

            let mut value = param.value()?;
            if self.weight_decay != 0.0 {
                value = value.scale(1.0 - self.lr * self.weight_decay);
            }
            param.set_value(value.subtract(&update)?)?;

            state.exp_avg = Some(exp_avg);
            state.exp_avg_sq = Some(exp_avg_sq);
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

#[cfg(test)]
mod tests {
    use super::*;
    use metaform_autograd::Graph;

    #[test]
    fn test_first_step_moves_by_lr() {
        // with bias correction the first update is lr * g / |g|
        let graph = Graph::new();
        let p = graph.tensor(Matrix::from_rows(vec![vec![1.0, -1.0]]).unwrap(), true);
        p.set_grad(Matrix::from_rows(vec![vec![0.3, -2.0]]).unwrap()).unwrap();

        let mut opt = AdamW::new(vec![p.clone()], 0.1).weight_decay(0.0);
        opt.step().unwrap();
        let expected = Matrix::from_rows(vec![vec![0.9, -0.9]]).unwrap();
        assert!(p.value().unwrap().approx_eq(&expected, 1e-6));
    }

    #[test]
    fn test_decoupled_weight_decay() {
        let graph = Graph::new();
        let p = graph.tensor(Matrix::filled(1, 1, 1, 2.0), true);
        p.set_grad(Matrix::zeros(1, 1)).unwrap();

        let mut opt = AdamW::new(vec![p.clone()], 0.1).weight_decay(0.5);
        opt.step().unwrap();
        // zero gradient: only the decay term applies, 2 * (1 - 0.05)
        assert!((p.value().unwrap().data()[0] - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_defaults() {
        let opt = AdamW::default();
        assert_eq!(opt.lr(), 1e-3);
        assert_eq!(opt.beta1, 0.9);
        assert_eq!(opt.beta2, 0.999);
        assert_eq!(opt.eps, 1e-8);
        assert_eq!(opt.weight_decay, 0.01);
    }
}
