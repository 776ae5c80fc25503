//! Filter modules and predicate compilation.

use crate::error::{FilterError, PublicationError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type PredicateFn = dyn Fn(&Value) -> std::result::Result<bool, FilterError> + Send + Sync;

/// A compiled filter: decides whether a record belongs to a publication.
///
/// Cloning shares the same underlying closure.
#[derive(Clone)]
pub struct Predicate {
    inner: Arc<PredicateFn>,
}

impl Predicate {
    /// Wrap a fallible predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<bool, FilterError> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Wrap a predicate that cannot fail.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::new(move |record| Ok(f(record)))
    }

    /// Predicate matching every record.
    pub fn always() -> Self {
        Self::from_fn(|_| true)
    }

    /// Evaluate, surfacing any failure.
    pub fn evaluate(&self, record: &Value) -> std::result::Result<bool, FilterError> {
        (self.inner)(record)
    }

    /// Evaluate, treating failure as no match.
    pub fn matches(&self, record: &Value) -> bool {
        self.evaluate(record).unwrap_or(false)
    }

    /// True if both handles share the same compiled closure.
    pub fn ptr_eq(&self, other: &Predicate) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

type FactoryFn = dyn Fn(&[Value]) -> std::result::Result<Predicate, FilterError> + Send + Sync;

/// Named predicate factory: `(params...) -> predicate`.
#[derive(Clone)]
pub struct FilterFactory {
    inner: Arc<FactoryFn>,
}

impl FilterFactory {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Predicate, FilterError> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn build(&self, params: &[Value]) -> std::result::Result<Predicate, FilterError> {
        (self.inner)(params)
    }
}

impl fmt::Debug for FilterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilterFactory(..)")
    }
}

/// Read-only mapping from filter name to factory.
///
/// Built once at startup with [`FilterModuleBuilder`] and shared behind an
/// `Arc`; there is no way to mutate a module after `build()`.
#[derive(Clone, Debug, Default)]
pub struct FilterModule {
    factories: HashMap<String, FilterFactory>,
}

impl FilterModule {
    pub fn builder() -> FilterModuleBuilder {
        FilterModuleBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&FilterFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Filter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Compile `name` with `params`. See [`compile`].
    pub fn compile(&self, name: &str, params: &[Value]) -> Result<Predicate> {
        compile(self, name, params)
    }
}

/// Assembles a [`FilterModule`].
#[derive(Default)]
pub struct FilterModuleBuilder {
    factories: HashMap<String, FilterFactory>,
}

impl FilterModuleBuilder {
    /// Register a factory. A later registration under the same name wins.
    pub fn filter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Predicate, FilterError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), FilterFactory::new(f));
        self
    }

    /// Copy every filter from an existing module.
    pub fn extend(mut self, module: &FilterModule) -> Self {
        for (name, factory) in &module.factories {
            self.factories.insert(name.clone(), factory.clone());
        }
        self
    }

    pub fn build(self) -> FilterModule {
        FilterModule {
            factories: self.factories,
        }
    }
}

/// Resolve `name` in `module` and call its factory with `params`.
///
/// Fails with [`PublicationError::UnknownFilter`] for a missing name; factory
/// errors come back as [`PublicationError::Filter`] unchanged.
pub fn compile(module: &FilterModule, name: &str, params: &[Value]) -> Result<Predicate> {
    let factory = module
        .get(name)
        .ok_or_else(|| PublicationError::UnknownFilter(name.to_string()))?;
    Ok(factory.build(params)?)
}
