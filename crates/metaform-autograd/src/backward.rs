//! Backward Pass - Gradient Computation
//!
//! Implements reverse-mode differentiation over the node arena. The walk
//! visits nodes in descending id order starting at the root, so every node
//! is processed only after all of its consumers have contributed to it.
//! Contributions are summed; stored gradients are only ever added to.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use metaform_core::{Error, Result};
use metaform_matrix::Matrix;

use crate::checkpoint::{recompute_gradients, CheckpointFn};
use crate::graph::{Graph, NodeId, Op, Tape};
use crate::tensor::Tensor;

// =============================================================================
// Entry Points
// =============================================================================

impl Tensor {
    /// Back-propagates from this tensor.
    ///
    /// If the gradient is unset it is seeded with ones of the value's shape;
    /// an existing gradient is used as the seed as-is.
    pub fn backward(&self) -> Result<()> {
        let seed = {
            let mut tape = self.graph().write();
            let node = tape.node(self.id(), self.serial())?;
            if !node.requires_grad {
                return Err(not_differentiable(self.id()));
            }
            let (seed, fresh) = match &node.grad {
                Some(existing) => (existing.clone(), false),
                None => (Matrix::ones_like(&node.value), true),
            };
            if fresh {
                tape.accumulate_grad(self.id(), &seed)?;
            }
            seed
        };
        run_backward(self.graph(), self.id(), seed)
    }

    /// Back-propagates an explicit upstream gradient, which is also added to
    /// this tensor's own gradient.
    pub fn backward_with(&self, grad: &Matrix) -> Result<()> {
        {
            let mut tape = self.graph().write();
            let node = tape.node(self.id(), self.serial())?;
            if !node.requires_grad {
                return Err(not_differentiable(self.id()));
            }
            if node.value.shape() != grad.shape() {
                return Err(Error::shape_mismatch(
                    "backward",
                    node.value.shape(),
                    grad.shape(),
                ));
            }
            tape.accumulate_grad(self.id(), grad)?;
        }
        run_backward(self.graph(), self.id(), grad.clone())
    }
}

fn not_differentiable(id: NodeId) -> Error {
    Error::state(format!(
        "backward called on tensor #{id}, which does not require grad"
    ))
}

// =============================================================================
// Graph Walk
// =============================================================================

/// What a node hands back to its operands during backward.
enum Step {
    Local(Vec<(NodeId, Matrix)>),
    Recompute {
        func: Arc<CheckpointFn>,
        inputs: Vec<(NodeId, Matrix, bool)>,
    },
}

fn run_backward(graph: &Graph, root: NodeId, seed: Matrix) -> Result<()> {
    let mut pending: HashMap<NodeId, Matrix> = HashMap::new();
    pending.insert(root, seed);
    let mut visited = 0usize;

    for id in (0..=root).rev() {
        let Some(grad) = pending.remove(&id) else {
            continue;
        };
        visited += 1;
        if id != root {
            graph.write().accumulate_grad(id, &grad)?;
        }

        let step = local_gradients(&graph.read(), id, &grad)?;
        let contributions = match step {
            Step::Local(contributions) => contributions,
            Step::Recompute { func, inputs } => {
                let ids: Vec<NodeId> = inputs.iter().map(|(id, ..)| *id).collect();
                let values: Vec<(Matrix, bool)> =
                    inputs.into_iter().map(|(_, v, rg)| (v, rg)).collect();
                let grads = recompute_gradients(&*func, &values, graph.tracker(), &grad)?;
                ids.into_iter()
                    .zip(grads)
                    .filter_map(|(id, g)| g.map(|g| (id, g)))
                    .collect()
            }
        };

        let tape = graph.read();
        for (input, contribution) in contributions {
            if !tape.nodes[input].requires_grad {
                continue;
            }
            match pending.entry(input) {
                Entry::Occupied(mut slot) => {
                    let sum = slot.get().add(&contribution)?;
                    slot.insert(sum);
                }
                Entry::Vacant(slot) => {
                    slot.insert(contribution);
                }
            }
        }
    }

    tracing::trace!(root, visited, "backward pass complete");
    Ok(())
}

/// Gradients of node `id` with respect to each of its operands.
fn local_gradients(tape: &Tape, id: NodeId, grad: &Matrix) -> Result<Step> {
    let value = |n: NodeId| &tape.nodes[n].value;
    let step = match &tape.nodes[id].op {
        Op::Leaf => Step::Local(Vec::new()),
        Op::Add(a, b) => Step::Local(vec![(*a, grad.clone()), (*b, grad.clone())]),
        Op::Sub(a, b) => Step::Local(vec![(*a, grad.clone()), (*b, grad.neg())]),
        Op::Mul(a, b) => Step::Local(vec![
            (*a, grad.hadamard(value(*b))?),
            (*b, grad.hadamard(value(*a))?),
        ]),
        Op::MatMul(a, b) => {
            let (av, bv) = (value(*a), value(*b));
            let ga = grad.matmul(&bv.transpose())?;
            let gb = av.transpose().matmul(grad)?;
            Step::Local(vec![
                (*a, unbroadcast(ga, av.batch_size())),
                (*b, unbroadcast(gb, bv.batch_size())),
            ])
        }
        Op::Transpose(a) => Step::Local(vec![(*a, grad.transpose())]),
        Op::Scale(a, factor) => Step::Local(vec![(*a, grad.scale(*factor))]),
        Op::Neg(a) => Step::Local(vec![(*a, grad.neg())]),
        Op::Sum(a) => {
            let (b, r, c) = value(*a).shape();
            Step::Local(vec![(*a, Matrix::filled(b, r, c, grad.sum()))])
        }
        Op::Mean(a) => {
            let input = value(*a);
            let (b, r, c) = input.shape();
            let share = grad.sum() / input.len() as f64;
            Step::Local(vec![(*a, Matrix::filled(b, r, c, share))])
        }
        Op::Checkpoint { func, inputs } => Step::Recompute {
            func: Arc::clone(func),
            inputs: inputs
                .iter()
                .map(|&n| (n, tape.nodes[n].value.clone(), tape.nodes[n].requires_grad))
                .collect(),
        },
    };
    Ok(step)
}

/// Sums a gradient over the batch when its operand was broadcast.
fn unbroadcast(grad: Matrix, operand_batch: usize) -> Matrix {
    if operand_batch == 1 && grad.batch_size() > 1 {
        grad.sum_batches()
    } else {
        grad
    }
}

// =============================================================================
// Gradient Checking
// =============================================================================

/// Numerically estimates the gradient of a scalar-valued `func` at `input`
/// using central differences.
///
/// Each evaluation runs on a fresh graph; `func` must return a `1x1` tensor.
pub fn numerical_gradient<F>(func: F, input: &Matrix, eps: f64) -> Result<Matrix>
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    let evaluate = |data: Vec<f64>| -> Result<f64> {
        let (b, r, c) = input.shape();
        let graph = Graph::new();
        let x = graph.constant(Matrix::from_flat(data, b, r, c)?);
        let out = func(&x)?.value()?;
        if out.len() != 1 {
            return Err(Error::shape(format!(
                "numerical_gradient needs a scalar output, got {:?}",
                out.shape()
            )));
        }
        Ok(out.sum())
    };

    let base = input.data();
    let mut grad = Vec::with_capacity(base.len());
    for i in 0..base.len() {
        let mut plus = base.to_vec();
        plus[i] += eps;
        let mut minus = base.to_vec();
        minus[i] -= eps;
        grad.push((evaluate(plus)? - evaluate(minus)?) / (2.0 * eps));
    }
    let (b, r, c) = input.shape();
    Matrix::from_flat(grad, b, r, c)
}

/// Checks whether analytical and numerical gradients agree within
/// `atol + rtol * |numerical|` element-wise.
pub fn gradcheck(analytical: &Matrix, numerical: &Matrix, rtol: f64, atol: f64) -> bool {
    analytical.same_shape(numerical)
        && analytical
            .data()
            .iter()
            .zip(numerical.data())
            .all(|(a, n)| (a - n).abs() <= atol + rtol * n.abs())
}

// =============================================================================
// Tests
// =============================================================================
