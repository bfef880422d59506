//! Gradient Checkpointing - Memory-Efficient Training
//!
//! A checkpointed segment runs its function once during forward on a scratch
//! graph that is thrown away as soon as the output value is known, so none of
//! the segment's intermediate activations are kept. During backward the
//! function is run again from the saved inputs on a fresh scratch graph and
//! differentiated through that recomputation.
//!
//! # Example
//! ```rust
//! use metaform_autograd::{checkpoint, Graph, Tensor};
//! use metaform_matrix::Matrix;
//!
//! let graph = Graph::new();
//! let x = graph.tensor(Matrix::ones(2, 2), true);
//! let w = graph.tensor(Matrix::identity(2), true);
//!
//! let out = checkpoint(|xs: &[Tensor]| xs[0].matmul(&xs[1])?.sum(), &[x.clone(), w]).unwrap();
//! out.backward().unwrap();
//! assert!(x.grad().unwrap().is_some());
//! ```
//!
//! # Memory vs Compute Tradeoff
//!
//! Without checkpointing every intermediate of the segment stays in the
//! graph until it is released. With checkpointing only the segment's inputs
//! and output are stored, at the cost of one extra forward pass per segment.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::sync::Arc;

use metaform_core::{Error, MemoryTracker, Result};
use metaform_matrix::Matrix;

use crate::graph::{Graph, Op};
use crate::tensor::Tensor;

/// A function that can be checkpointed.
///
/// It receives leaf tensors standing in for the segment inputs and must build
/// its output from them (and from constants created on their graph).
pub type CheckpointFn = dyn Fn(&[Tensor]) -> Result<Tensor> + Send + Sync;

// =============================================================================
// Checkpoint Function
// =============================================================================

/// Runs `func` on `inputs` without keeping its intermediate activations.
///
/// The returned tensor behaves like the output of any other operation: when
/// backward reaches it, `func` is recomputed and gradients flow into every
/// input that requires them.
///
/// `func` must be deterministic for the recomputed gradients to be correct.
pub fn checkpoint<F>(func: F, inputs: &[Tensor]) -> Result<Tensor>
where
    F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync + 'static,
{
    let graph = common_graph(inputs)?;
    let snapshot = snapshot_inputs(inputs)?;
    let func: Arc<CheckpointFn> = Arc::new(func);

    let value = run_forward(&*func, &snapshot, graph.tracker())?;
    let requires_grad = snapshot.iter().any(|(_, rg)| *rg);
    let op = if requires_grad {
        Op::Checkpoint {
            func,
            inputs: inputs.iter().map(Tensor::id).collect(),
        }
    } else {
        Op::Leaf
    };
    Ok(graph.push(value, requires_grad, op))
}

/// Checkpoints `num_layers` sequential layers split into `segments` segments.
///
/// `layer_fn(i, x)` applies layer `i`. Each segment is one checkpoint, so only
/// the activations at segment boundaries are kept.
///
/// # Example
/// ```rust
/// use metaform_autograd::{checkpoint_sequential, Graph};
/// use metaform_matrix::Matrix;
///
/// let graph = Graph::new();
/// let x = graph.tensor(Matrix::ones(1, 3), true);
///
/// // Twelve doubling layers in four segments
/// let y = checkpoint_sequential(12, 4, &x, |_, h| h.scale(2.0)).unwrap();
/// assert_eq!(y.value().unwrap().data(), &[4096.0, 4096.0, 4096.0]);
/// ```
pub fn checkpoint_sequential<F>(
    num_layers: usize,
    segments: usize,
    input: &Tensor,
    layer_fn: F,
) -> Result<Tensor>
where
    F: Fn(usize, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
{
    if segments == 0 {
        return Err(Error::invalid_argument(
            "checkpoint_sequential needs at least one segment",
        ));
    }
    if num_layers == 0 {
        return Ok(input.clone());
    }

    let per_segment = num_layers.div_ceil(segments.min(num_layers));
    let layer_fn = Arc::new(layer_fn);
    let mut hidden = input.clone();

    for start in (0..num_layers).step_by(per_segment) {
        let end = (start + per_segment).min(num_layers);
        let layer_fn = Arc::clone(&layer_fn);
        hidden = checkpoint(
            move |xs: &[Tensor]| {
                let mut h = xs
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::state("checkpoint segment received no input"))?;
                for layer in start..end {
                    h = layer_fn(layer, &h)?;
                }
                Ok(h)
            },
            std::slice::from_ref(&hidden),
        )?;
    }
    Ok(hidden)
}

// =============================================================================
// Checkpoint Record
// =============================================================================

/// An explicit forward/backward pair for one checkpointed call.
///
/// `forward` produces the output and keeps nothing but the inputs;
/// `backward` recomputes the function, differentiates it, adds the input
/// gradients into the input tensors and returns them.
pub struct CheckpointRecord {
    func: Arc<CheckpointFn>,
    inputs: Vec<Tensor>,
    output_shape: Option<(usize, usize, usize)>,
}

impl CheckpointRecord {
    /// Captures `func` and its inputs.
    pub fn new<F>(func: F, inputs: &[Tensor]) -> Result<Self>
    where
        F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync + 'static,
    {
        common_graph(inputs)?;
        Ok(Self {
            func: Arc::new(func),
            inputs: inputs.to_vec(),
            output_shape: None,
        })
    }

    /// Runs the function, discarding every intermediate activation.
    pub fn forward(&mut self) -> Result<Matrix> {
        let snapshot = snapshot_inputs(&self.inputs)?;
        let value = run_forward(&*self.func, &snapshot, self.tracker())?;
        self.output_shape = Some(value.shape());
        Ok(value)
    }

    /// Returns true once `forward` has run.
    pub fn is_forwarded(&self) -> bool {
        self.output_shape.is_some()
    }

    /// Recomputes the function and back-propagates `grad_output` through it.
    ///
    /// Returns one entry per input: the gradient for inputs that require one,
    /// `None` otherwise. Fails with `State` if `forward` has not run.
    pub fn backward(self, grad_output: &Matrix) -> Result<Vec<Option<Matrix>>> {
        let shape = self
            .output_shape
            .ok_or_else(|| Error::state("checkpoint backward invoked before forward"))?;
        if shape != grad_output.shape() {
            return Err(Error::shape_mismatch(
                "checkpoint backward",
                shape,
                grad_output.shape(),
            ));
        }

        let snapshot = snapshot_inputs(&self.inputs)?;
        let grads = recompute_gradients(&*self.func, &snapshot, self.tracker(), grad_output)?;
        for (input, grad) in self.inputs.iter().zip(&grads) {
            if let Some(grad) = grad {
                input.accumulate_grad(grad)?;
            }
        }
        Ok(grads)
    }

    fn tracker(&self) -> Option<Arc<MemoryTracker>> {
        self.inputs.first().and_then(|t| t.graph().tracker())
    }
}

// =============================================================================
// Recomputation
// =============================================================================

fn common_graph(inputs: &[Tensor]) -> Result<Graph> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::invalid_argument("checkpoint needs at least one input"))?;
    if inputs.iter().any(|t| !t.graph().same_graph(first.graph())) {
        return Err(Error::state("checkpoint inputs belong to different graphs"));
    }
    Ok(first.graph().clone())
}

fn snapshot_inputs(inputs: &[Tensor]) -> Result<Vec<(Matrix, bool)>> {
    inputs
        .iter()
        .map(|t| Ok((t.value()?, t.requires_grad()?)))
        .collect()
}

/// Builds scratch leaves for `inputs` and applies `func` to them.
fn run_scratch(
    func: &CheckpointFn,
    inputs: &[(Matrix, bool)],
    tracker: Option<Arc<MemoryTracker>>,
    track_grad: bool,
) -> Result<(Graph, Vec<Tensor>, Tensor)> {
    let scratch = Graph::build(tracker);
    let leaves: Vec<Tensor> = inputs
        .iter()
        .map(|(value, rg)| scratch.tensor(value.clone(), track_grad && *rg))
        .collect();
    let output = func(&leaves)?;
    if !output.graph().same_graph(&scratch) {
        return Err(Error::state(
            "checkpointed function returned a tensor not built from its inputs",
        ));
    }
    Ok((scratch, leaves, output))
}

fn run_forward(
    func: &CheckpointFn,
    inputs: &[(Matrix, bool)],
    tracker: Option<Arc<MemoryTracker>>,
) -> Result<Matrix> {
    let (_scratch, _leaves, output) = run_scratch(func, inputs, tracker, false)?;
    output.value()
}

/// Recomputes `func` and differentiates it against `grad_output`.
pub(crate) fn recompute_gradients(
    func: &CheckpointFn,
    inputs: &[(Matrix, bool)],
    tracker: Option<Arc<MemoryTracker>>,
    grad_output: &Matrix,
) -> Result<Vec<Option<Matrix>>> {
    let (_scratch, leaves, output) = run_scratch(func, inputs, tracker, true)?;
    if output.requires_grad()? {
        output.backward_with(grad_output)?;
    }
    tracing::trace!(inputs = inputs.len(), "recomputed checkpoint segment");

    leaves
        .iter()
        .zip(inputs)
        .map(|(leaf, (_, rg))| if *rg { leaf.grad() } else { Ok(None) })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
