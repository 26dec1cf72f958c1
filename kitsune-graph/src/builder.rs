//! Builder for leaf tensors.
//!
//! A builder captures the shape and target backend, and its terminal methods decide the initial
//! contents: untouched, constant-filled, random, or loaded from a slice.

use std::rc::Rc;

use kitsune_storage::Storage;

use crate::kitsune::Kitsune;
use crate::tensor::Tensor;
use crate::{Error, Result};

/// A builder for leaf tensors with a given shape.
pub struct Builder {
    kitsune: Rc<Kitsune>,
    shape: Vec<usize>,
    backend: String,
}

impl Builder {
    pub(crate) fn new(kitsune: &Rc<Kitsune>, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            kitsune: Rc::clone(kitsune),
            shape: shape.into(),
            backend: "cpu".to_string(),
        }
    }

    /// Selects the backend to allocate on. Defaults to `"cpu"`.
    pub fn on(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Creates the leaf with an untouched (zero-initialized) storage.
    pub fn build(self) -> Result<Tensor> {
        let kitsune = Rc::clone(&self.kitsune);
        let requires_grad = kitsune.is_grad_enabled();
        let (node, layout) = kitsune.scope(|graph, storages| {
            let storage = Storage::init(&self.shape, &self.backend, kitsune.backends(), storages)?;
            let layout = storage.layout();
            Ok::<_, Error>((graph.add_leaf(storage, requires_grad), layout))
        })?;
        Ok(Tensor::new(&kitsune, node, layout))
    }

    /// Creates the leaf and fills it with a constant.
    pub fn fill(self, value: f32) -> Result<Tensor> {
        let tensor = self.build()?;
        tensor.fill(value)?;
        Ok(tensor)
    }

    /// Creates the leaf and fills it with uniform random values.
    pub fn rand(self) -> Result<Tensor> {
        let tensor = self.build()?;
        tensor.fill_rand()?;
        Ok(tensor)
    }

    /// Creates the leaf and loads the given values in row-major order.
    ///
    /// # Returns
    /// `DataLength` if the slice does not hold exactly one value per element.
    pub fn init(self, data: &[f32]) -> Result<Tensor> {
        let expected: usize = self.shape.iter().product();
        if data.len() != expected {
            return Err(Error::DataLength {
                expected,
                got: data.len(),
            });
        }
        let tensor = self.build()?;
        tensor.load(data)?;
        Ok(tensor)
    }
}
