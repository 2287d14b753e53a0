//! Name-indexed instance constructors.
//!
//! A [`Registry`] maps variant names to factories. Lookup happens at
//! call time; a missing name is a [`VecError::NotFound`], never a null
//! instance.

use indexmap::IndexMap;

use herd_core::{Instance, VecError};

/// Constructor for one variant. The returned instance is initialised
/// by the driver via [`Instance::init`] before first use.
pub type InstanceFactory = Box<dyn Fn() -> Box<dyn Instance> + Send + Sync>;

/// Ordered map from variant name to constructor.
#[derive(Default)]
pub struct Registry {
    factories: IndexMap<String, InstanceFactory>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Instance> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Instance> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Construct a fresh, uninitialised instance of `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Instance>, VecError> {
        let factory = self.factories.get(name).ok_or_else(|| VecError::NotFound {
            variant: name.to_string(),
        })?;
        Ok(factory())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn variants(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Number of registered variants.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no variant is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("variants", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
