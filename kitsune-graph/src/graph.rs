//! The lazy computation graph.
//!
//! Nodes are keyed by UUID and remember their insertion order, which keeps topological ties
//! stable. Leaves arrive materialized; operation nodes stay empty until [`Graph::execute`]
//! materializes them in dependency order, caching each output on its node. Node lifetime is
//! governed exclusively by reference counts: external tensor handles and downstream nodes each
//! hold one reference, and a node reaching zero releases its storages and recursively unhooks
//! its inputs.

use std::collections::{BTreeMap, HashMap, HashSet};

use kitsune_layout::Layout;
use kitsune_storage::{Storage, StorageRegistry};
use tracing::{error, trace};
use uuid::Uuid;

use crate::node::Node;
use crate::ops::{self, OpKind};
use crate::{Error, Result};

mod dot;

/// Maximum number of inputs an operation node can take.
pub const MAX_INPUTS: usize = 2;

/// A node-addressed DAG of tensor operations.
#[derive(Default)]
pub struct Graph {
    nodes: HashMap<Uuid, Node>,
    serial: u64,
}

// NOTE: Construction interface.

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a leaf node over a materialized storage.
    ///
    /// # Parameters
    /// - `storage`: the leaf's storage; its layout and backend become the node's.
    /// - `requires_grad`: taken from the context's gradient mode at creation time.
    ///
    /// # Returns
    /// The id of the new node, with a reference count of 1 for the originating handle.
    pub fn add_leaf(&mut self, storage: Storage, requires_grad: bool) -> Uuid {
        let id = Uuid::new_v4();
        let node = Node {
            id,
            kind: OpKind::Leaf,
            layout: storage.layout(),
            backend: storage.backend(),
            inputs: Vec::new(),
            storage: Some(storage),
            grad: None,
            ctx: None,
            ref_count: 1,
            requires_grad,
            serial: self.next_serial(),
        };
        self.nodes.insert(id, node);
        trace!("added leaf node {id}");
        id
    }

    /// Adds a lazy operation node.
    ///
    /// All inputs must exist and share a single backend. Each input's reference count grows by
    /// one per slot it occupies, and the new node requires gradients iff any input does.
    ///
    /// # Returns
    /// The id of the new node, with a reference count of 1 for the originating handle.
    pub fn add_op(&mut self, kind: OpKind, layout: Layout, inputs: &[Uuid]) -> Result<Uuid> {
        if inputs.len() > MAX_INPUTS {
            return Err(Error::TooManyInputs(inputs.len()));
        }
        if inputs.len() != kind.arity() {
            return Err(Error::Arity {
                expected: kind.arity(),
                got: inputs.len(),
            });
        }
        let mut backend = None;
        let mut requires_grad = false;
        for input in inputs {
            let node = self.node(*input)?;
            match backend {
                None => backend = Some(node.backend),
                Some(backend) if backend.name() != node.backend.name() => {
                    return Err(Error::BackendMismatch(backend.name(), node.backend.name()))
                }
                Some(_) => {}
            }
            requires_grad |= node.requires_grad;
        }
        let backend = backend.ok_or(Error::Arity {
            expected: kind.arity(),
            got: 0,
        })?;
        for input in inputs {
            self.ref_inc(*input)?;
        }
        let id = Uuid::new_v4();
        let node = Node {
            id,
            kind,
            layout,
            backend,
            inputs: inputs.to_vec(),
            storage: None,
            grad: None,
            ctx: None,
            ref_count: 1,
            requires_grad,
            serial: self.next_serial(),
        };
        trace!("added op node {id} ({})", node.kind);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Looks up a node.
    pub fn node(&self, id: Uuid) -> Result<&Node> {
        self.nodes.get(&id).ok_or(Error::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: Uuid) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))
    }

    /// Returns the input ids of a node in slot order.
    pub fn inputs(&self, id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.node(id)?.inputs.clone())
    }

    /// Returns the number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn next_serial(&mut self) -> u64 {
        let serial = self.serial;
        self.serial += 1;
        serial
    }
}

// NOTE: Execution interface.

impl Graph {
    /// Returns the dependency closure of `target` in dependency order: every node appears after
    /// all of its inputs, with ties broken by insertion order.
    pub fn topological_sort(&self, target: Uuid) -> Result<Vec<Uuid>> {
        // Collect the closure by walking input edges backwards.
        let mut pending = vec![target];
        let mut closure = HashSet::new();
        while let Some(id) = pending.pop() {
            if !closure.insert(id) {
                continue;
            }
            pending.extend(self.node(id)?.inputs.iter().copied());
        }
        // Kahn emit over the closure, counting duplicate slots as separate edges.
        let mut indegree: HashMap<Uuid, usize> = HashMap::new();
        let mut consumers: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for &id in &closure {
            let node = self.node(id)?;
            indegree.entry(id).or_insert(0);
            for &input in &node.inputs {
                *indegree.entry(id).or_insert(0) += 1;
                consumers.entry(input).or_default().push(id);
            }
        }
        let mut ready = BTreeMap::new();
        for &id in &closure {
            if indegree.get(&id).copied().unwrap_or(0) == 0 {
                ready.insert(self.node(id)?.serial, id);
            }
        }
        let mut order = Vec::with_capacity(closure.len());
        while let Some((_, id)) = ready.pop_first() {
            order.push(id);
            for consumer in consumers.get(&id).cloned().unwrap_or_default() {
                let count = indegree
                    .get_mut(&consumer)
                    .ok_or(Error::NodeNotFound(consumer))?;
                *count -= 1;
                if *count == 0 {
                    ready.insert(self.node(consumer)?.serial, consumer);
                }
            }
        }
        if order.len() != closure.len() {
            return Err(Error::Cycle);
        }
        Ok(order)
    }

    /// Materializes `target` and every ancestor that is not yet materialized.
    ///
    /// Nodes are visited in dependency order; each unmaterialized operation node gathers its
    /// input storages, dispatches to its forward descriptor, verifies the output backend
    /// against the node's backend tag, and caches the result. A cached output is never
    /// overwritten.
    pub fn execute(&mut self, target: Uuid, registry: &mut StorageRegistry) -> Result<()> {
        let order = self.topological_sort(target)?;
        trace!("executing {} nodes towards {target}", order.len());
        for id in order {
            let node = self.node(id)?;
            if node.is_leaf() || node.storage.is_some() {
                continue;
            }
            let kind = node.kind.clone();
            let inputs = node.inputs.clone();
            let backend_name = node.backend.name();
            let input_storages = inputs
                .iter()
                .map(|&input| {
                    self.node(input)?
                        .storage
                        .clone()
                        .ok_or(Error::ForwardNotExecuted)
                })
                .collect::<Result<Vec<_>>>()?;
            let (output, ctx) = ops::forward(&kind, &input_storages, registry)?;
            if output.backend().name() != backend_name {
                return Err(Error::BackendMismatch(output.backend().name(), backend_name));
            }
            let node = self.node_mut(id)?;
            node.storage = Some(output);
            node.ctx = ctx;
        }
        Ok(())
    }
}

// NOTE: Lifetime interface.

impl Graph {
    /// Increments a node's reference count.
    pub fn ref_inc(&mut self, id: Uuid) -> Result<()> {
        self.node_mut(id)?.ref_count += 1;
        Ok(())
    }

    /// Decrements a node's reference count. At zero the node is freed: its storage, gradient
    /// and context are released and every input loses one reference in turn.
    pub fn ref_dec(&mut self, id: Uuid, registry: &mut StorageRegistry) -> Result<()> {
        let node = self.node_mut(id)?;
        debug_assert!(node.ref_count > 0, "ref_dec on node {id} with zero references");
        node.ref_count = node.ref_count.saturating_sub(1);
        if node.ref_count > 0 {
            return Ok(());
        }
        let Some(node) = self.nodes.remove(&id) else {
            return Err(Error::NodeNotFound(id));
        };
        trace!("freeing node {id} ({})", node.kind);
        if let Some(storage) = node.storage {
            storage.free(registry)?;
        }
        if let Some(grad) = node.grad {
            grad.free(registry)?;
        }
        if let Some(ctx) = node.ctx {
            ctx.free(registry)?;
        }
        for input in node.inputs {
            self.ref_dec(input, registry)?;
        }
        Ok(())
    }
}

// NOTE: Gradient bookkeeping interface.

impl Graph {
    /// Zeroes one node's gradient accumulator; a node without one is left alone.
    pub fn zero_grad(&mut self, id: Uuid) -> Result<()> {
        if let Some(grad) = &self.node(id)?.grad {
            grad.fill(0.0)?;
        }
        Ok(())
    }

    /// Zeroes every gradient accumulator in the graph.
    pub fn zero_grad_all(&mut self) -> Result<()> {
        for node in self.nodes.values() {
            if let Some(grad) = &node.grad {
                grad.fill(0.0)?;
            }
        }
        Ok(())
    }
}

// NOTE: Teardown interface.

impl Graph {
    /// Releases every remaining node, storages included. Failures are logged and skipped so
    /// that teardown always completes.
    pub fn clear(&mut self, registry: &mut StorageRegistry) {
        if !self.nodes.is_empty() {
            error!("graph teardown with {} live nodes", self.nodes.len());
        }
        for (id, node) in self.nodes.drain() {
            if let Some(storage) = node.storage {
                if let Err(error) = storage.free(registry) {
                    error!("failed to free storage of node {id} during teardown: {error}");
                }
            }
            if let Some(grad) = node.grad {
                if let Err(error) = grad.free(registry) {
                    error!("failed to free gradient of node {id} during teardown: {error}");
                }
            }
            if let Some(ctx) = node.ctx {
                if let Err(error) = ctx.free(registry) {
                    error!("failed to free context of node {id} during teardown: {error}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use kitsune_backend_cpu::CPU;
    use pretty_assertions::assert_eq;

    use super::*;

    fn leaf(graph: &mut Graph, storages: &mut StorageRegistry, value: f32) -> Uuid {
        let storage = Storage::with_backend(&[2, 2], &CPU, storages).unwrap();
        storage.fill(value).unwrap();
        graph.add_leaf(storage, true)
    }

    fn layout() -> Layout {
        Layout::new(&[2, 2]).unwrap()
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let mut graph = Graph::new();
        let mut storages = StorageRegistry::new();
        let a = leaf(&mut graph, &mut storages, 1.0);
        let b = leaf(&mut graph, &mut storages, 2.0);
        let c = graph
            .add_op(OpKind::Axpy { alpha: 1.0 }, layout(), &[a, b])
            .unwrap();
        let d = graph
            .add_op(OpKind::Axpy { alpha: 1.0 }, layout(), &[c, a])
            .unwrap();
        let order = graph.topological_sort(d).unwrap();
        assert_eq!(order, vec![a, b, c, d]);
        graph.clear(&mut storages);
        storages.clear();
    }

    #[test]
    fn execute_caches_the_output() {
        let mut graph = Graph::new();
        let mut storages = StorageRegistry::new();
        let a = leaf(&mut graph, &mut storages, 2.0);
        let b = leaf(&mut graph, &mut storages, 3.0);
        let c = graph
            .add_op(OpKind::Axpy { alpha: 1.0 }, layout(), &[a, b])
            .unwrap();
        graph.execute(c, &mut storages).unwrap();
        let first = graph.node(c).unwrap().storage().unwrap().id();
        graph.execute(c, &mut storages).unwrap();
        let second = graph.node(c).unwrap().storage().unwrap().id();
        assert_eq!(first, second);
        graph.clear(&mut storages);
        storages.clear();
    }

    #[test]
    fn op_arity_is_validated() {
        let mut graph = Graph::new();
        let mut storages = StorageRegistry::new();
        let a = leaf(&mut graph, &mut storages, 1.0);
        assert!(matches!(
            graph.add_op(OpKind::Axpy { alpha: 1.0 }, layout(), &[a]),
            Err(Error::Arity { expected: 2, got: 1 })
        ));
        assert!(matches!(
            graph.add_op(OpKind::Gemm, layout(), &[a, a, a]),
            Err(Error::TooManyInputs(3))
        ));
        graph.clear(&mut storages);
        storages.clear();
    }

    #[test]
    fn unknown_inputs_are_rejected() {
        let mut graph = Graph::new();
        let stranger = Uuid::new_v4();
        assert!(matches!(
            graph.add_op(OpKind::Transpose { perm: vec![1, 0] }, layout(), &[stranger]),
            Err(Error::NodeNotFound(id)) if id == stranger
        ));
    }

    #[test]
    fn ref_counts_cascade_on_free() {
        let mut graph = Graph::new();
        let mut storages = StorageRegistry::new();
        let a = leaf(&mut graph, &mut storages, 1.0);
        let b = leaf(&mut graph, &mut storages, 2.0);
        let c = graph
            .add_op(OpKind::Axpy { alpha: 1.0 }, layout(), &[a, b])
            .unwrap();
        let d = graph
            .add_op(OpKind::Axpy { alpha: -1.0 }, layout(), &[b, a])
            .unwrap();
        let e = graph
            .add_op(OpKind::Axpy { alpha: 1.0 }, layout(), &[c, d])
            .unwrap();
        assert_eq!(graph.node(a).unwrap().ref_count(), 3);
        assert_eq!(graph.node(b).unwrap().ref_count(), 3);
        assert_eq!(graph.node_count(), 5);

        graph.ref_dec(e, &mut storages).unwrap();
        graph.ref_dec(c, &mut storages).unwrap();
        graph.ref_dec(d, &mut storages).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.node(a).unwrap().ref_count(), 1);
        assert_eq!(graph.node(b).unwrap().ref_count(), 1);

        graph.ref_dec(a, &mut storages).unwrap();
        graph.ref_dec(b, &mut storages).unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(storages.is_empty());
    }

    #[test]
    fn dot_dump_lists_nodes_and_edges() {
        let mut graph = Graph::new();
        let mut storages = StorageRegistry::new();
        let a = leaf(&mut graph, &mut storages, 1.0);
        let b = leaf(&mut graph, &mut storages, 2.0);
        graph
            .add_op(OpKind::Axpy { alpha: 1.0 }, layout(), &[a, b])
            .unwrap();
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph kitsune {"));
        assert_eq!(dot.matches("shape=box").count(), 2);
        assert_eq!(dot.matches("->").count(), 2);
        assert!(dot.contains("[label=\"0\"]"));
        assert!(dot.contains("[label=\"1\"]"));
        graph.clear(&mut storages);
        storages.clear();
    }
}
