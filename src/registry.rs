//! Process-wide name registries.
//!
//! Drivers register devices, access methods, scan lists and generic
//! variables by name; device support looks them up when a record binds to
//! its link. All four live in a [`Registries`] service object. The process
//! normally shares the one returned by [`Registries::global`], while tests
//! construct their own with [`Registries::new`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    bus::{BusAccess, BusDevice},
    genvar::GenVarRegistry,
    scan::ScanList,
    utils::must_lock,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("An entry named '{0}' is already registered")]
pub struct AlreadyRegistered(pub String);

/// A write-once-per-key map from names to shared entries
#[derive(Debug)]
pub struct Registry<T: ?Sized> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Fails if the name is taken; the existing entry is kept.
    pub fn add(&self, name: &str, entry: Arc<T>) -> Result<Arc<T>, AlreadyRegistered> {
        let mut entries = must_lock(&self.entries);
        if entries.contains_key(name) {
            warn!("Refusing to register duplicate entry '{name}'");
            return Err(AlreadyRegistered(name.to_string()));
        }
        entries.insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    pub fn find(&self, name: &str) -> Option<Arc<T>> {
        must_lock(&self.entries).get(name).cloned()
    }

    /// Return the entry for `name`, creating it if it does not exist
    ///
    /// Lookup and insertion happen under one lock, so concurrent callers
    /// always agree on a single entry.
    pub fn find_or_insert_with<F>(&self, name: &str, create: F) -> Arc<T>
    where
        F: FnOnce() -> Arc<T>,
    {
        must_lock(&self.entries)
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating registry entry '{name}'");
                create()
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        must_lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        must_lock(&self.entries).clear();
    }
}

/// The set of registries device support resolves links against
#[derive(Debug, Default)]
pub struct Registries {
    pub devices: Registry<BusDevice>,
    pub access_methods: Registry<dyn BusAccess>,
    pub scan_lists: Registry<ScanList>,
    pub genvars: GenVarRegistry,
}

static GLOBAL: OnceLock<Arc<Registries>> = OnceLock::new();

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registries shared by the whole process
    pub fn global() -> Arc<Registries> {
        GLOBAL.get_or_init(|| Arc::new(Registries::new())).clone()
    }

    /// Create and register a new, empty scan list
    pub fn add_scan_list(&self, name: &str) -> Result<Arc<ScanList>, AlreadyRegistered> {
        self.scan_lists.add(name, Arc::new(ScanList::new()))
    }

    /// Forget every registration and return the generic-variable registry to
    /// its unconfigured state
    ///
    /// Bindings that were already resolved keep their entries alive.
    pub fn reset(&self) {
        self.devices.clear();
        self.access_methods.clear();
        self.scan_lists.clear();
        self.genvars.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let registry: Registry<u32> = Registry::new();
        let first = registry.add("a", Arc::new(1)).unwrap();
        assert_eq!(
            registry.add("a", Arc::new(2)),
            Err(AlreadyRegistered("a".to_string()))
        );
        assert!(Arc::ptr_eq(&first, &registry.find("a").unwrap()));
        assert_eq!(registry.len(), 1);
        assert!(registry.find("b").is_none());
    }

    #[test]
    fn insert_if_absent_returns_existing() {
        let registry: Registry<u32> = Registry::new();
        let a = registry.find_or_insert_with("x", || Arc::new(1));
        let b = registry.find_or_insert_with("x", || Arc::new(2));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, 1);
    }

    #[test]
    fn reset_clears_everything() {
        let registries = Registries::new();
        registries.add_scan_list("list").unwrap();
        assert!(registries.add_scan_list("list").is_err());
        registries.reset();
        assert!(registries.scan_lists.is_empty());
        assert!(registries.add_scan_list("list").is_ok());
    }
}
