//! Fixed Precision - Decimal Rounding Arithmetic
//!
//! @version 0.1.0
//! @author Metaform Development Team

use serde::{Deserialize, Serialize};

use metaform_core::{Error, Result};

use crate::matrix::Matrix;

/// Arithmetic that rounds every result to a fixed number of decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPrecision {
    decimals: u32,
}

impl FixedPrecision {
    /// Creates a rounding context with `decimals` places.
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    /// Number of decimal places kept.
    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Rounds half away from zero to the configured places.
    pub fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.decimals as i32);
        (value * factor).round() / factor
    }

    /// Rounded sum.
    pub fn add(&self, a: f64, b: f64) -> f64 {
        self.round(a + b)
    }

    /// Rounded difference.
    pub fn sub(&self, a: f64, b: f64) -> f64 {
        self.round(a - b)
    }

    /// Rounded product.
    pub fn mul(&self, a: f64, b: f64) -> f64 {
        self.round(a * b)
    }

    /// Rounded quotient. Dividing by zero is an `InvalidArgument` error.
    pub fn div(&self, a: f64, b: f64) -> Result<f64> {
        if b == 0.0 {
            return Err(Error::invalid_argument("division by zero"));
        }
        Ok(self.round(a / b))
    }

    /// Rounds every value of `matrix`.
    pub fn apply(&self, matrix: &Matrix) -> Matrix {
        matrix.map(|v| self.round(v))
    }
}

impl Default for FixedPrecision {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Matrix {
    /// Rounds every value to `decimals` places.
    pub fn round_to(&self, decimals: u32) -> Matrix {
        FixedPrecision::new(decimals).apply(self)
    }
}
