//! Reverse-mode gradient accumulation.
//!
//! The backward pass walks the forward topological order in reverse. The target's gradient is
//! seeded with ones; every operation node then hands its accumulated output gradient to its
//! backward descriptor, which adds each input's contribution into that input's accumulator.
//! Because the walk is reverse-topological, a node is only processed after every one of its
//! consumers has contributed, so the additions commute into the correct total. A descriptor
//! failure aborts the pass and leaves the gradients accumulated so far in place.

use kitsune_storage::{Storage, StorageRegistry};
use tracing::trace;
use uuid::Uuid;

use crate::graph::Graph;
use crate::ops;
use crate::{Error, Result};

impl Graph {
    /// Runs reverse-mode differentiation from `target`.
    ///
    /// # Returns
    /// `ForwardNotExecuted` unless the target has been materialized by [`Graph::execute`].
    pub fn backward(&mut self, target: Uuid, registry: &mut StorageRegistry) -> Result<()> {
        if self.node(target)?.storage.is_none() {
            return Err(Error::ForwardNotExecuted);
        }
        let order = self.topological_sort(target)?;
        trace!("backward over {} nodes from {target}", order.len());

        // Seed the derivative of the target with respect to itself.
        self.ensure_grad(target, registry)?;
        if let Some(grad) = &self.node(target)?.grad {
            grad.fill(1.0)?;
        }

        for &id in order.iter().rev() {
            let node = self.node(id)?;
            if node.is_leaf() || !node.requires_grad {
                continue;
            }
            let kind = node.kind.clone();
            let inputs = node.inputs.clone();
            let ctx = node.ctx.clone();

            // Give every gradient-requiring input an accumulator before dispatching.
            for &input in &inputs {
                if self.node(input)?.requires_grad {
                    self.ensure_grad(input, registry)?;
                }
            }

            let node = self.node(id)?;
            let output = node.storage.clone().ok_or(Error::ForwardNotExecuted)?;
            let grad_output = match &node.grad {
                Some(grad) => grad.clone(),
                // No consumer contributed anything; nothing to propagate.
                None => continue,
            };
            let mut input_storages = Vec::with_capacity(inputs.len());
            let mut grads = Vec::with_capacity(inputs.len());
            let mut requires = Vec::with_capacity(inputs.len());
            for &input in &inputs {
                let input_node = self.node(input)?;
                input_storages.push(
                    input_node
                        .storage
                        .clone()
                        .ok_or(Error::ForwardNotExecuted)?,
                );
                grads.push(input_node.grad.clone());
                requires.push(input_node.requires_grad);
            }
            ops::backward(
                &kind,
                &input_storages,
                &output,
                &grad_output,
                ctx.as_ref(),
                &grads,
                &requires,
                registry,
            )?;
        }
        Ok(())
    }

    /// Allocates a zero-filled gradient accumulator shaped like the node's layout, if the node
    /// does not have one yet.
    fn ensure_grad(&mut self, id: Uuid, registry: &mut StorageRegistry) -> Result<()> {
        let node = self.node(id)?;
        if node.grad.is_some() {
            return Ok(());
        }
        let shape = *node.layout.shape();
        let backend = node.backend;
        let grad = Storage::with_backend(&shape[..], backend, registry)?;
        grad.fill(0.0)?;
        self.node_mut(id)?.grad = Some(grad);
        Ok(())
    }
}
