//! Computational Graph - Node Arena
//!
//! The graph is an append-only arena of nodes. Every node stores its value,
//! its accumulated gradient and a tagged operation naming the operand nodes
//! it was computed from. Nodes are only ever created after their operands,
//! so descending node ids are a valid reverse topological order.
//!
//! A `Graph` is a cheap, cloneable handle to the arena; `Tensor` handles
//! point into it by id. Nodes created after a `GraphMark` can be released
//! in one go, which is how per-step activations are torn down while the
//! parameters created before the mark survive.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use metaform_core::{Error, MemoryTracker, Result};
use metaform_matrix::Matrix;

use crate::checkpoint::CheckpointFn;
use crate::tensor::Tensor;

/// Index of a node within its graph.
pub(crate) type NodeId = usize;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Operations
// =============================================================================

/// The operation that produced a node, with its operand ids.
#[derive(Clone)]
pub(crate) enum Op {
    /// Created directly, or computed from inputs that need no gradient.
    Leaf,
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    MatMul(NodeId, NodeId),
    Transpose(NodeId),
    Scale(NodeId, f64),
    Neg(NodeId),
    Sum(NodeId),
    Mean(NodeId),
    /// A checkpointed segment: recomputed from `inputs` during backward.
    Checkpoint {
        func: Arc<CheckpointFn>,
        inputs: Vec<NodeId>,
    },
}

impl Op {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Op::Leaf => "Leaf",
            Op::Add(..) => "Add",
            Op::Sub(..) => "Sub",
            Op::Mul(..) => "Mul",
            Op::MatMul(..) => "MatMul",
            Op::Transpose(_) => "Transpose",
            Op::Scale(..) => "Scale",
            Op::Neg(_) => "Neg",
            Op::Sum(_) => "Sum",
            Op::Mean(_) => "Mean",
            Op::Checkpoint { .. } => "Checkpoint",
        }
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Tape
// =============================================================================

pub(crate) struct Node {
    pub(crate) value: Matrix,
    pub(crate) grad: Option<Matrix>,
    pub(crate) requires_grad: bool,
    pub(crate) op: Op,
    serial: u64,
}

impl Node {
    fn nbytes(&self) -> usize {
        self.value.nbytes() + self.grad.as_ref().map_or(0, Matrix::nbytes)
    }
}

/// Arena storage behind a `Graph`.
pub(crate) struct Tape {
    pub(crate) nodes: Vec<Node>,
    next_serial: u64,
    tracker: Option<Arc<MemoryTracker>>,
}

impl Tape {
    /// Resolves a handle, rejecting ids whose node has been released.
    pub(crate) fn node(&self, id: NodeId, serial: u64) -> Result<&Node> {
        self.nodes
            .get(id)
            .filter(|n| n.serial == serial)
            .ok_or_else(|| stale_handle(id))
    }

    fn node_mut(&mut self, id: NodeId, serial: u64) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .filter(|n| n.serial == serial)
            .ok_or_else(|| stale_handle(id))
    }

    fn alloc(&self, bytes: usize) {
        if let Some(tracker) = &self.tracker {
            tracker.record_alloc(bytes);
        }
    }

    fn free(&self, bytes: usize) {
        if let Some(tracker) = &self.tracker {
            tracker.record_free(bytes);
        }
    }

    /// Adds `grad` into the stored gradient of `id`.
    pub(crate) fn accumulate_grad(&mut self, id: NodeId, grad: &Matrix) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| stale_handle(id))?;
        if let Some(existing) = node.grad.as_mut() {
            *existing = existing.add(grad)?;
            return Ok(());
        }
        node.grad = Some(grad.clone());
        self.alloc(grad.nbytes());
        Ok(())
    }

    pub(crate) fn replace_grad(&mut self, id: NodeId, serial: u64, grad: Option<Matrix>) -> Result<()> {
        let new_bytes = grad.as_ref().map_or(0, Matrix::nbytes);
        let node = self.node_mut(id, serial)?;
        let old_bytes = node.grad.as_ref().map_or(0, Matrix::nbytes);
        node.grad = grad;
        self.free(old_bytes);
        self.alloc(new_bytes);
        Ok(())
    }

    pub(crate) fn replace_value(&mut self, id: NodeId, serial: u64, value: Matrix) -> Result<()> {
        let new_bytes = value.nbytes();
        let node = self.node_mut(id, serial)?;
        let old_bytes = node.value.nbytes();
        node.value = value;
        self.free(old_bytes);
        self.alloc(new_bytes);
        Ok(())
    }
}

impl Drop for Tape {
    fn drop(&mut self) {
        let bytes: usize = self.nodes.iter().map(Node::nbytes).sum();
        self.free(bytes);
    }
}

fn stale_handle(id: NodeId) -> Error {
    Error::state(format!("tensor #{id} refers to a node that has been released"))
}

// =============================================================================
// Graph
// =============================================================================

/// Position in a graph that later nodes can be released back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphMark {
    graph_id: u64,
    len: usize,
}

impl GraphMark {
    /// Number of nodes that existed when the mark was taken.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mark was taken on an empty graph.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Shared handle to a computational graph.
#[derive(Clone)]
pub struct Graph {
    id: u64,
    tape: Arc<RwLock<Tape>>,
}

impl Graph {
    /// Creates an empty graph without memory accounting.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty graph that reports stored values and gradients to `tracker`.
    pub fn with_tracker(tracker: Arc<MemoryTracker>) -> Self {
        Self::build(Some(tracker))
    }

    pub(crate) fn build(tracker: Option<Arc<MemoryTracker>>) -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            tape: Arc::new(RwLock::new(Tape {
                nodes: Vec::new(),
                next_serial: 0,
                tracker,
            })),
        }
    }

    /// The memory tracker this graph reports to, if any.
    pub fn tracker(&self) -> Option<Arc<MemoryTracker>> {
        self.tape.read().tracker.clone()
    }

    /// Creates a leaf tensor.
    pub fn tensor(&self, value: Matrix, requires_grad: bool) -> Tensor {
        self.push(value, requires_grad, Op::Leaf)
    }

    /// Creates a leaf tensor that never receives a gradient.
    pub fn constant(&self, value: Matrix) -> Tensor {
        self.tensor(value, false)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.tape.read().nodes.len()
    }

    /// Returns true if the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if both handles refer to the same arena.
    pub fn same_graph(&self, other: &Graph) -> bool {
        self.id == other.id
    }

    /// Records the current end of the arena.
    pub fn mark(&self) -> GraphMark {
        GraphMark {
            graph_id: self.id,
            len: self.len(),
        }
    }

    /// Drops every node created after `mark`, returning how many were dropped.
    ///
    /// Tensors pointing at dropped nodes become stale and report `State`
    /// errors from then on.
    pub fn release(&self, mark: GraphMark) -> Result<usize> {
        if mark.graph_id != self.id {
            return Err(Error::state("graph mark belongs to a different graph"));
        }
        let mut tape = self.tape.write();
        if mark.len >= tape.nodes.len() {
            return Ok(0);
        }
        let removed: Vec<Node> = tape.nodes.drain(mark.len..).collect();
        let bytes: usize = removed.iter().map(Node::nbytes).sum();
        tape.free(bytes);
        tracing::debug!(released = removed.len(), remaining = mark.len, "released graph nodes");
        Ok(removed.len())
    }

    pub(crate) fn push(&self, value: Matrix, requires_grad: bool, op: Op) -> Tensor {
        let mut tape = self.tape.write();
        let id = tape.nodes.len();
        let serial = tape.next_serial;
        tape.next_serial += 1;
        tape.alloc(value.nbytes());
        tape.nodes.push(Node {
            value,
            grad: None,
            requires_grad,
            op,
            serial,
        });
        Tensor::from_parts(self.clone(), id, serial)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Tape> {
        self.tape.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Tape> {
        self.tape.write()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_release() {
        let graph = Graph::new();
        let w = graph.tensor(Matrix::ones(2, 2), true);
        let mark = graph.mark();

        let h = w.scale(2.0).unwrap();
        let _ = h.sum().unwrap();
        assert_eq!(graph.len(), 3);

        assert_eq!(graph.release(mark).unwrap(), 2);
        assert_eq!(graph.len(), 1);
        assert!(w.value().is_ok());
        assert!(h.value().unwrap_err().is_state());

        // a new node at the same index does not revive the stale handle
        let _ = graph.constant(Matrix::zeros(1, 1));
        assert!(h.value().unwrap_err().is_state());
    }

    #[test]
    fn test_release_rejects_foreign_mark() {
        let a = Graph::new();
        let b = Graph::new();
        assert!(b.release(a.mark()).unwrap_err().is_state());
    }

    #[test]
    fn test_tracker_follows_values_and_release() {
        let tracker = Arc::new(MemoryTracker::new());
        let graph = Graph::with_tracker(Arc::clone(&tracker));
        let x = graph.tensor(Matrix::ones(4, 4), true);
        assert_eq!(tracker.bytes_in_use(), 128);

        let mark = graph.mark();
        let y = x.scale(3.0).unwrap();
        assert_eq!(tracker.bytes_in_use(), 256);
        y.sum().unwrap().backward().unwrap();
        assert!(tracker.bytes_in_use() > 256);

        graph.release(mark).unwrap();
        // x's value plus its gradient
        assert_eq!(tracker.bytes_in_use(), 256);

        drop(x);
        drop(y);
        drop(graph);
        assert_eq!(tracker.bytes_in_use(), 0);
    }
}
