//! Name-keyed index of backend descriptors.
//!
//! The registry is an explicit value owned by the library context, never process-wide state.
//! Backends register once, before the first storage is created; lookups hand out the `'static`
//! descriptor reference that storages and graph nodes carry from then on. Dropping the registry
//! forgets the entries without touching the descriptors themselves.

use std::collections::HashMap;

use crate::{Backend, Error, Result};

/// A name-keyed map of backend descriptors.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<&'static str, &'static dyn Backend>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend descriptor under its own name.
    ///
    /// # Returns
    /// `AlreadyRegistered` if a backend with the same name is present.
    pub fn register(&mut self, backend: &'static dyn Backend) -> Result<()> {
        let name = backend.name();
        if self.backends.contains_key(name) {
            return Err(Error::AlreadyRegistered(name));
        }
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Looks up a backend descriptor by name.
    pub fn get(&self, name: &str) -> Result<&'static dyn Backend> {
        self.backends
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Returns the number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns true if no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use kitsune_layout::Layout;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{Error, RawStorage};

    struct Null;

    impl Backend for Null {
        fn name(&self) -> &'static str {
            "null"
        }
        fn storage_init(&self, _layout: Layout) -> Result<Rc<dyn RawStorage>> {
            Err(Error::NotImplemented(self.name()))
        }
        fn shallow_copy(&self, _src: &dyn RawStorage) -> Result<Rc<dyn RawStorage>> {
            Err(Error::NotImplemented(self.name()))
        }
        fn contiguous_copy(&self, _src: &dyn RawStorage, _dst: &dyn RawStorage) -> Result<()> {
            Err(Error::NotImplemented(self.name()))
        }
        fn storage_free(&self, _handle: &dyn RawStorage) -> Result<()> {
            Err(Error::NotImplemented(self.name()))
        }
        fn fill(&self, _handle: &dyn RawStorage, _value: f32) -> Result<()> {
            Err(Error::NotImplemented(self.name()))
        }
        fn fill_rand(&self, _handle: &dyn RawStorage) -> Result<()> {
            Err(Error::NotImplemented(self.name()))
        }
        fn axpy(
            &self,
            _alpha: f32,
            _x: &dyn RawStorage,
            _y: &dyn RawStorage,
            _r: &dyn RawStorage,
        ) -> Result<()> {
            Err(Error::NotImplemented(self.name()))
        }
        fn gemm(
            &self,
            _alpha: f32,
            _a: &dyn RawStorage,
            _b: &dyn RawStorage,
            _beta: f32,
            _c: &dyn RawStorage,
        ) -> Result<()> {
            Err(Error::NotImplemented(self.name()))
        }
        fn get(&self, _handle: &dyn RawStorage, _indices: &[usize]) -> Result<f32> {
            Err(Error::NotImplemented(self.name()))
        }
        fn set(&self, _handle: &dyn RawStorage, _indices: &[usize], _value: f32) -> Result<()> {
            Err(Error::NotImplemented(self.name()))
        }
    }

    static NULL: Null = Null;

    #[test]
    fn register_and_get() {
        let mut registry = BackendRegistry::new();
        registry.register(&NULL).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("null").unwrap().name(), "null");
    }

    #[test]
    fn register_twice_fails() {
        let mut registry = BackendRegistry::new();
        registry.register(&NULL).unwrap();
        assert!(matches!(
            registry.register(&NULL),
            Err(Error::AlreadyRegistered("null"))
        ));
    }

    #[test]
    fn get_unknown_fails() {
        let registry = BackendRegistry::new();
        assert!(matches!(registry.get("cuda"), Err(Error::NotFound(name)) if name == "cuda"));
    }
}
