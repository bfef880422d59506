//! Tensor - Differentiable Matrix Handle
//!
//! A `Tensor` names one node of a `Graph`. Operations on tensors append a
//! node recording the operation and its operands; gradients flow back along
//! those records when `backward` is called on a downstream tensor.
//!
//! A result only records its operation when at least one operand requires a
//! gradient. Otherwise it is stored as a plain leaf and backward never
//! visits it.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::fmt;

use metaform_core::{Error, Result};
use metaform_matrix::Matrix;

use crate::graph::{Graph, NodeId, Op};

// =============================================================================
// Tensor Struct
// =============================================================================

/// Handle to a value tracked by a computational graph.
#[derive(Clone)]
pub struct Tensor {
    graph: Graph,
    id: NodeId,
    serial: u64,
}

impl Tensor {
    pub(crate) fn from_parts(graph: Graph, id: NodeId, serial: u64) -> Self {
        Self { graph, id, serial }
    }

    /// The graph this tensor lives in.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Copy of the current value.
    pub fn value(&self) -> Result<Matrix> {
        Ok(self.graph.read().node(self.id, self.serial)?.value.clone())
    }

    /// Copy of the accumulated gradient, if any.
    pub fn grad(&self) -> Result<Option<Matrix>> {
        Ok(self.graph.read().node(self.id, self.serial)?.grad.clone())
    }

    /// `(batch_size, rows, cols)` of the value.
    pub fn shape(&self) -> Result<(usize, usize, usize)> {
        Ok(self.graph.read().node(self.id, self.serial)?.value.shape())
    }

    /// Whether gradients are accumulated into this tensor.
    pub fn requires_grad(&self) -> Result<bool> {
        Ok(self.graph.read().node(self.id, self.serial)?.requires_grad)
    }

    /// Returns true if the tensor was not produced by a recorded operation.
    pub fn is_leaf(&self) -> Result<bool> {
        Ok(matches!(
            self.graph.read().node(self.id, self.serial)?.op,
            Op::Leaf
        ))
    }

    /// Replaces the gradient. The shape must match the value.
    pub fn set_grad(&self, grad: Matrix) -> Result<()> {
        self.check_shape("set_grad", &grad)?;
        self.graph.write().replace_grad(self.id, self.serial, Some(grad))
    }

    /// Resets the gradient to zeros of the value's shape.
    pub fn zero_grad(&self) -> Result<()> {
        let zeros = Matrix::zeros_like(&self.value()?);
        self.graph.write().replace_grad(self.id, self.serial, Some(zeros))
    }

    /// Removes the gradient entirely.
    pub fn clear_grad(&self) -> Result<()> {
        self.graph.write().replace_grad(self.id, self.serial, None)
    }

    /// Replaces the value in place. The shape must not change.
    pub fn set_value(&self, value: Matrix) -> Result<()> {
        self.check_shape("set_value", &value)?;
        self.graph.write().replace_value(self.id, self.serial, value)
    }

    /// Copies the value into a new leaf that does not require a gradient.
    pub fn detach(&self) -> Result<Tensor> {
        Ok(self.graph.constant(self.value()?))
    }

    pub(crate) fn accumulate_grad(&self, grad: &Matrix) -> Result<()> {
        let mut tape = self.graph.write();
        tape.node(self.id, self.serial)?;
        tape.accumulate_grad(self.id, grad)
    }

    fn check_shape(&self, op: &str, other: &Matrix) -> Result<()> {
        let shape = self.shape()?;
        if shape != other.shape() {
            return Err(Error::shape_mismatch(op, shape, other.shape()));
        }
        Ok(())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Element-wise sum.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, "add", Matrix::add, Op::Add)
    }

    /// Element-wise difference.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, "sub", Matrix::subtract, Op::Sub)
    }

    /// Element-wise product.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, "mul", Matrix::hadamard, Op::Mul)
    }

    /// Batched matrix product (batch size 1 broadcasts).
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, "matmul", Matrix::matmul, Op::MatMul)
    }

    /// Swaps rows and columns in every slice.
    pub fn transpose(&self) -> Result<Tensor> {
        self.unary(|m| Ok(m.transpose()), Op::Transpose)
    }

    /// Multiplies every value by `factor`.
    pub fn scale(&self, factor: f64) -> Result<Tensor> {
        self.unary(|m| Ok(m.scale(factor)), |id| Op::Scale(id, factor))
    }

    /// Negates every value.
    pub fn neg(&self) -> Result<Tensor> {
        self.unary(|m| Ok(m.neg()), Op::Neg)
    }

    /// Sum of every value, as a `1x1` tensor.
    pub fn sum(&self) -> Result<Tensor> {
        self.unary(|m| Ok(Matrix::filled(1, 1, 1, m.sum())), Op::Sum)
    }

    /// Mean of every value, as a `1x1` tensor.
    pub fn mean(&self) -> Result<Tensor> {
        self.unary(
            |m| {
                if m.is_empty() {
                    return Err(Error::shape("mean of an empty tensor"));
                }
                Ok(Matrix::filled(1, 1, 1, m.mean()))
            },
            Op::Mean,
        )
    }

    fn unary(
        &self,
        compute: impl FnOnce(&Matrix) -> Result<Matrix>,
        record: impl FnOnce(NodeId) -> Op,
    ) -> Result<Tensor> {
        let (value, requires_grad) = {
            let tape = self.graph.read();
            let node = tape.node(self.id, self.serial)?;
            (compute(&node.value)?, node.requires_grad)
        };
        let op = if requires_grad { record(self.id) } else { Op::Leaf };
        Ok(self.graph.push(value, requires_grad, op))
    }

    fn binary(
        &self,
        other: &Tensor,
        name: &str,
        compute: impl FnOnce(&Matrix, &Matrix) -> Result<Matrix>,
        record: impl FnOnce(NodeId, NodeId) -> Op,
    ) -> Result<Tensor> {
        if !self.graph.same_graph(&other.graph) {
            return Err(Error::state(format!(
                "{name}: operands belong to different graphs"
            )));
        }
        let (value, requires_grad) = {
            let tape = self.graph.read();
            let lhs = tape.node(self.id, self.serial)?;
            let rhs = tape.node(other.id, other.serial)?;
            (
                compute(&lhs.value, &rhs.value)?,
                lhs.requires_grad || rhs.requires_grad,
            )
        };
        let op = if requires_grad {
            record(self.id, other.id)
        } else {
            Op::Leaf
        };
        Ok(self.graph.push(value, requires_grad, op))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tape = self.graph.read();
        match tape.node(self.id, self.serial) {
            Ok(node) => f
                .debug_struct("Tensor")
                .field("id", &self.id)
                .field("shape", &node.value.shape())
                .field("requires_grad", &node.requires_grad)
                .field("op", &node.op)
                .finish(),
            Err(_) => f
                .debug_struct("Tensor")
                .field("id", &self.id)
                .field("released", &true)
                .finish(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
