//! Loss Scaler for Mixed Precision Training
//!
//! Multiplies the loss (and therefore every gradient) by a large factor so
//! small gradients stay representable in half precision, then divides the
//! factor back out before the optimizer consumes them.
//!
//! With dynamic scaling enabled the factor adapts: an overflow divides it by
//! the adjustment factor (never below the minimum), an overflow-free step
//! multiplies it. An overflow is a reported condition, not an error.
//!
//! # Example
//! ```rust
//! use metaform_optim::{LossScaler, LossScalerConfig};
//!
//! let mut scaler = LossScaler::new(LossScalerConfig::default()).unwrap();
//! assert_eq!(scaler.loss_scale(), 32768.0);
//!
//! scaler.update_loss_scale(false);
//! assert_eq!(scaler.loss_scale(), 65536.0);
//!
//! scaler.update_loss_scale(true);
//! assert_eq!(scaler.loss_scale(), 32768.0);
//! ```
//!
//! @version 0.1.0
//! @author Metaform Development Team

use half::f16;
use serde::{Deserialize, Serialize};

use metaform_autograd::Tensor;
use metaform_core::{Error, Result};
use metaform_matrix::Matrix;

use crate::optimizer::Optimizer;

// =============================================================================
// Configuration
// =============================================================================

/// Loss scaling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossScalerConfig {
    /// Starting scale for dynamic scaling.
    pub initial_scale: f64,
    /// The scale never drops below this.
    pub min_scale: f64,
    /// Multiplier applied on growth and divisor applied on overflow.
    pub adjustment_factor: f64,
    /// Whether the scale adapts to overflows.
    pub dynamic: bool,
    /// Scale used when `dynamic` is false.
    pub static_scale: f64,
}

impl Default for LossScalerConfig {
    fn default() -> Self {
        Self {
            initial_scale: 32768.0,
            min_scale: 1.0,
            adjustment_factor: 2.0,
            dynamic: true,
            static_scale: 65536.0,
        }
    }
}

impl LossScalerConfig {
    /// Builder method to set the initial scale.
    #[must_use]
    pub fn initial_scale(mut self, scale: f64) -> Self {
        self.initial_scale = scale;
        self
    }

    /// Builder method to set the minimum scale.
    #[must_use]
    pub fn min_scale(mut self, scale: f64) -> Self {
        self.min_scale = scale;
        self
    }

    /// Builder method to set the adjustment factor.
    #[must_use]
    pub fn adjustment_factor(mut self, factor: f64) -> Self {
        self.adjustment_factor = factor;
        self
    }

    /// Builder method to switch to a fixed scale.
    #[must_use]
    pub fn static_scale(mut self, scale: f64) -> Self {
        self.dynamic = false;
        self.static_scale = scale;
        self
    }
}

// =============================================================================
// LossScaler
// =============================================================================

/// Dynamic loss scaler.
#[derive(Debug, Clone)]
pub struct LossScaler {
    config: LossScalerConfig,
    loss_scale: f64,
    overflow_steps: usize,
    clean_steps: usize,
}

impl LossScaler {
    /// Creates a scaler, validating the configuration.
    pub fn new(config: LossScalerConfig) -> Result<Self> {
        if !(config.min_scale > 0.0 && config.min_scale.is_finite()) {
            return Err(Error::invalid_argument("min_scale must be positive and finite"));
        }
        if !(config.adjustment_factor > 1.0 && config.adjustment_factor.is_finite()) {
            return Err(Error::invalid_argument("adjustment_factor must be greater than 1"));
        }
        if !(config.static_scale > 0.0 && config.static_scale.is_finite()) {
            return Err(Error::invalid_argument("static_scale must be positive and finite"));
        }
        if !config.initial_scale.is_finite() || config.initial_scale < config.min_scale {
            return Err(Error::invalid_argument(format!(
                "initial_scale {} is below min_scale {}",
                config.initial_scale, config.min_scale
            )));
        }
        Ok(Self {
            config,
            loss_scale: config.initial_scale,
            overflow_steps: 0,
            clean_steps: 0,
        })
    }

    /// The configuration the scaler was built with.
    pub fn config(&self) -> &LossScalerConfig {
        &self.config
    }

    /// The factor currently applied.
    pub fn loss_scale(&self) -> f64 {
        if self.config.dynamic {
            self.loss_scale
        } else {
            self.config.static_scale
        }
    }

    /// Number of updates that reported an overflow.
    pub fn overflow_steps(&self) -> usize {
        self.overflow_steps
    }

    /// Number of updates that reported no overflow.
    pub fn clean_steps(&self) -> usize {
        self.clean_steps
    }

    /// Scales every gradient by the current factor.
    pub fn scale(&self, grads: &[Matrix]) -> Vec<Matrix> {
        scale_gradients(grads, self.loss_scale())
    }

    /// Divides the current factor back out of every gradient.
    pub fn unscale(&self, grads: &[Matrix]) -> Vec<Matrix> {
        unscale_gradients(grads, self.loss_scale())
    }

    /// Scales a loss tensor so backward produces scaled gradients.
    pub fn scale_loss(&self, loss: &Tensor) -> Result<Tensor> {
        loss.scale(self.loss_scale())
    }

    /// Clamps every gradient element to `[-clip_value, clip_value]`.
    pub fn clip(&self, grads: &[Matrix], clip_value: f64) -> Vec<Matrix> {
        clip_gradients(grads, clip_value)
    }

    /// Unscales and reports whether any value overflowed.
    pub fn unscale_and_check(&self, grads: &[Matrix]) -> (Vec<Matrix>, bool) {
        let overflow = has_overflow(grads);
        (self.unscale(grads), overflow)
    }

    /// Adapts the scale after a step. Returns the new scale.
    pub fn update_loss_scale(&mut self, overflow: bool) -> f64 {
        if overflow {
            self.overflow_steps += 1;
        } else {
            self.clean_steps += 1;
        }
        if !self.config.dynamic {
            return self.loss_scale();
        }

        if overflow {
            let previous = self.loss_scale;
            self.loss_scale = (self.loss_scale / self.config.adjustment_factor).max(self.config.min_scale);
            tracing::warn!(
                previous,
                scale = self.loss_scale,
                "gradient overflow detected, reducing loss scale"
            );
        } else {
            self.loss_scale *= self.config.adjustment_factor;
            tracing::debug!(scale = self.loss_scale, "growing loss scale");
        }
        self.loss_scale
    }

    /// Unscales the optimizer's parameter gradients and steps if none overflowed.
    ///
    /// On overflow the gradients are zeroed and the step is skipped. The scale
    /// is updated either way. Returns whether the step was taken.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<bool> {
        let params = optimizer.parameters().to_vec();
        let mut grads = Vec::with_capacity(params.len());
        for param in &params {
            grads.push(param.grad()?);
        }
        let present: Vec<Matrix> = grads.iter().flatten().cloned().collect();
        let overflow = has_overflow(&present);

        if overflow {
            optimizer.zero_grad()?;
        } else {
            let scale = self.loss_scale();
            for (param, grad) in params.iter().zip(grads) {
                if let Some(grad) = grad {
                    param.set_grad(grad.div_scalar(scale))?;
                }
            }
            optimizer.step()?;
        }

        self.update_loss_scale(overflow);
        Ok(!overflow)
    }
}

// =============================================================================
// Gradient Utilities
// =============================================================================

/// Multiplies every value of every gradient by `factor`.
pub fn scale_gradients(grads: &[Matrix], factor: f64) -> Vec<Matrix> {
    grads.iter().map(|g| g.scale(factor)).collect()
}

/// Divides every value of every gradient by `factor`.
pub fn unscale_gradients(grads: &[Matrix], factor: f64) -> Vec<Matrix> {
    grads.iter().map(|g| g.div_scalar(factor)).collect()
}

/// Clamps every value of every gradient to `[-clip_value, clip_value]`.
pub fn clip_gradients(grads: &[Matrix], clip_value: f64) -> Vec<Matrix> {
    let bound = clip_value.abs();
    grads.iter().map(|g| g.clamp(-bound, bound)).collect()
}

/// Returns true if any gradient holds a non-finite value.
pub fn has_overflow(grads: &[Matrix]) -> bool {
    grads.iter().any(|g| !g.is_finite())
}

/// Rounds every value through IEEE half precision.
///
/// Values beyond the f16 range become infinite, which `has_overflow` reports.
pub fn to_half_precision(matrix: &Matrix) -> Matrix {
    matrix.map(|v| f16::from_f64(v).to_f64())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sgd::Sgd;
    use metaform_autograd::Graph;

    #[test]
    fn test_growth_then_backoff() {
        let mut scaler = LossScaler::new(LossScalerConfig::default()).unwrap();
        assert_eq!(scaler.loss_scale(), 2f64.powi(15));
        for _ in 0..3 {
            scaler.update_loss_scale(false);
        }
        assert_eq!(scaler.loss_scale(), 2f64.powi(18));
        scaler.update_loss_scale(true);
        assert_eq!(scaler.loss_scale(), 2f64.powi(17));
        assert_eq!(scaler.clean_steps(), 3);
        assert_eq!(scaler.overflow_steps(), 1);
    }

    #[test]
    fn test_never_below_min_scale() {
        let config = LossScalerConfig::default().initial_scale(4.0).min_scale(1.0);
        let mut scaler = LossScaler::new(config).unwrap();
        for _ in 0..5 {
            scaler.update_loss_scale(true);
            assert!(scaler.loss_scale() >= 1.0);
        }
        assert_eq!(scaler.loss_scale(), 1.0);
    }

    #[test]
    fn test_static_scale_never_moves() {
        let mut scaler = LossScaler::new(LossScalerConfig::default().static_scale(1024.0)).unwrap();
        scaler.update_loss_scale(true);
        scaler.update_loss_scale(false);
        assert_eq!(scaler.loss_scale(), 1024.0);
    }

    #[test]
    fn test_invalid_config() {
        assert!(LossScaler::new(LossScalerConfig::default().min_scale(0.0)).is_err());
        assert!(LossScaler::new(LossScalerConfig::default().adjustment_factor(1.0)).is_err());
        assert!(LossScaler::new(LossScalerConfig::default().initial_scale(0.5)).is_err());
    }

    #[test]
    fn test_scale_unscale_and_clip() {
        let scaler = LossScaler::new(LossScalerConfig::default().initial_scale(8.0)).unwrap();
        let grads = vec![Matrix::from_rows(vec![vec![0.5, -0.25]]).unwrap()];
        let scaled = scaler.scale(&grads);
        assert_eq!(scaled[0].data(), &[4.0, -2.0]);
        assert_eq!(scaler.unscale(&scaled), grads);

        let clipped = scaler.clip(&scaled, 3.0);
        assert_eq!(clipped[0].data(), &[3.0, -2.0]);
    }

    #[test]
    fn test_half_precision_overflow_detected() {
        let scaler = LossScaler::new(LossScalerConfig::default()).unwrap();
        let grads = vec![Matrix::from_rows(vec![vec![3.0, -2.5]]).unwrap()];
        let half: Vec<Matrix> = scaler.scale(&grads).iter().map(to_half_precision).collect();
        let (_, overflow) = scaler.unscale_and_check(&half);
        assert!(overflow);

        let small = vec![Matrix::from_rows(vec![vec![1e-3]]).unwrap()];
        let half: Vec<Matrix> = scaler.scale(&small).iter().map(to_half_precision).collect();
        let (unscaled, overflow) = scaler.unscale_and_check(&half);
        assert!(!overflow);
        assert!((unscaled[0].data()[0] - 1e-3).abs() < 1e-6);
    }

    #[test]
    fn test_step_skips_on_overflow() {
        let graph = Graph::new();
        let p = graph.tensor(Matrix::ones(1, 2), true);
        let mut opt = Sgd::new(vec![p.clone()], 1.0);
        let mut scaler = LossScaler::new(LossScalerConfig::default().initial_scale(4.0)).unwrap();

        p.set_grad(Matrix::from_rows(vec![vec![f64::INFINITY, 0.0]]).unwrap()).unwrap();
        assert!(!scaler.step(&mut opt).unwrap());
        assert_eq!(p.value().unwrap(), Matrix::ones(1, 2));
        assert_eq!(scaler.loss_scale(), 2.0);

        let loss = scaler.scale_loss(&p.sum().unwrap()).unwrap();
        opt.zero_grad().unwrap();
        loss.backward().unwrap();
        assert_eq!(p.grad().unwrap().unwrap().data(), &[2.0, 2.0]);
        assert!(scaler.step(&mut opt).unwrap());
        assert_eq!(p.value().unwrap(), Matrix::zeros(1, 2));
        assert_eq!(scaler.loss_scale(), 4.0);
    }
}
