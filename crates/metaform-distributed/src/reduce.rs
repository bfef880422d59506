//! Reduce - Combining Per-Device Gradients
//!
//! Reductions always combine devices in index order, so the result depends
//! only on which device reported what, never on arrival order.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_core::{Error, Result};
use metaform_matrix::Matrix;

// =============================================================================
// Reduce Operations
// =============================================================================

/// Reduction operation for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Element-wise sum.
    Sum,
    /// Element-wise sum divided by the number of devices.
    Average,
}

impl ReduceOp {
    /// Reduces one gradient list per device into a single list.
    ///
    /// Every device must report the same number of gradients with matching
    /// shapes; anything else is a `Shape` error.
    pub fn reduce(&self, per_device: &[Vec<Matrix>]) -> Result<Vec<Matrix>> {
        let (first, rest) = per_device
            .split_first()
            .ok_or_else(|| Error::invalid_argument("no device gradients to reduce"))?;

        let mut totals = first.clone();
        for (offset, grads) in rest.iter().enumerate() {
            if grads.len() != totals.len() {
                return Err(Error::shape(format!(
                    "device {} reported {} gradients, device 0 reported {}",
                    offset + 1,
                    grads.len(),
                    totals.len()
                )));
            }
            for (total, grad) in totals.iter_mut().zip(grads) {
                *total = total.add(grad)?;
            }
        }

        if *self == ReduceOp::Average {
            let count = per_device.len() as f64;
            totals = totals.iter().map(|t| t.div_scalar(count)).collect();
        }
        Ok(totals)
    }
}

/// Element-wise mean of the per-device gradient lists.
pub fn average_gradients(per_device: &[Vec<Matrix>]) -> Result<Vec<Matrix>> {
    ReduceOp::Average.reduce(per_device)
}
