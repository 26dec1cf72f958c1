//! Graph node representation.

use kitsune_backend::Backend;
use kitsune_layout::Layout;
use kitsune_storage::Storage;
use uuid::Uuid;

use crate::ops::{OpContext, OpKind};

/// One node of the computation graph: a materialized leaf or a lazy operation.
///
/// The node owns its cached output storage, its gradient accumulator, and an optional
/// per-operation context populated by the forward pass for reuse by backward. The reference
/// count is the sole lifetime authority: it counts external tensor handles plus downstream
/// nodes holding this node as an input.
pub struct Node {
    pub(crate) id: Uuid,
    pub(crate) kind: OpKind,
    pub(crate) layout: Layout,
    pub(crate) backend: &'static dyn Backend,
    pub(crate) inputs: Vec<Uuid>,
    pub(crate) storage: Option<Storage>,
    pub(crate) grad: Option<Storage>,
    pub(crate) ctx: Option<OpContext>,
    pub(crate) ref_count: usize,
    pub(crate) requires_grad: bool,
    pub(crate) serial: u64,
}

impl Node {
    /// Returns the node identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the operation kind.
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Returns the output layout.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Returns the backend tag propagated from the node's inputs.
    pub fn backend(&self) -> &'static dyn Backend {
        self.backend
    }

    /// Returns the input node ids in slot order.
    pub fn inputs(&self) -> &[Uuid] {
        &self.inputs
    }

    /// Returns the cached output storage, if the node has been materialized.
    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    /// Returns the gradient accumulator, if any gradient has arrived.
    pub fn grad(&self) -> Option<&Storage> {
        self.grad.as_ref()
    }

    /// Returns the current reference count.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Returns whether gradients flow through this node.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// True for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, OpKind::Leaf)
    }
}
