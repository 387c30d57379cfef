use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::{Arc, Mutex},
};

use tracing::{debug, warn};

use crate::{
    genvar::{GenVar, GenVarError},
    utils::{get_default_ld_table_size, must_lock},
};

/// Valid exponents for the registry's bucket count
pub const LD_TABLE_SIZE_RANGE: RangeInclusive<u32> = 8..=16;

/// A named array of generic variables, registered by a driver
#[derive(Debug)]
pub struct GenVarGroup {
    name: String,
    variables: Vec<Arc<GenVar>>,
}

impl GenVarGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// The variable a record with card number `index` binds to
    pub fn bind(&self, index: usize) -> Option<Arc<GenVar>> {
        self.variables.get(index).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GenVar>> {
        self.variables.iter()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    ld_table_size: Option<u32>,
    table: Option<HashMap<String, Arc<GenVarGroup>>>,
}

impl RegistryState {
    fn ld_table_size(&self) -> u32 {
        self.ld_table_size.unwrap_or_else(get_default_ld_table_size)
    }

    /// The table, created on first use with the size fixed from then on
    fn table(&mut self) -> &mut HashMap<String, Arc<GenVarGroup>> {
        if self.table.is_none() {
            self.ld_table_size = Some(self.ld_table_size());
        }
        let buckets = 1usize << self.ld_table_size();
        self.table.get_or_insert_with(|| {
            debug!("Creating generic variable registry with {buckets} buckets");
            HashMap::with_capacity(buckets)
        })
    }
}

/// Names to registered [`GenVarGroup`]s
///
/// The table is created on first registration or lookup, sized by a bucket
/// count that can be configured until then.
#[derive(Debug, Default)]
pub struct GenVarRegistry {
    state: Mutex<RegistryState>,
}

impl GenVarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bucket count to `2^ld_table_size`
    ///
    /// Ignored if the exponent is out of range or the table already exists.
    /// Returns the bucket count in effect afterwards.
    pub fn configure(&self, ld_table_size: u32) -> usize {
        let mut state = must_lock(&self.state);
        if !LD_TABLE_SIZE_RANGE.contains(&ld_table_size) {
            warn!(
                "Generic variable table size exponent {ld_table_size} out of range {}..={}",
                LD_TABLE_SIZE_RANGE.start(),
                LD_TABLE_SIZE_RANGE.end()
            );
        } else if state.table.is_some() {
            warn!("Generic variable table already in use; its size can no longer change");
        } else {
            state.ld_table_size = Some(ld_table_size);
        }
        1 << state.ld_table_size()
    }

    /// The bucket count the table has, or will be created with
    pub fn table_size(&self) -> usize {
        1 << must_lock(&self.state).ld_table_size()
    }

    /// Register an array of variables under a name
    pub fn register(
        &self,
        name: &str,
        variables: Vec<GenVar>,
    ) -> Result<Arc<GenVarGroup>, GenVarError> {
        let mut state = must_lock(&self.state);
        let table = state.table();
        if table.contains_key(name) {
            warn!("Generic variable '{name}' is already registered");
            return Err(GenVarError::AlreadyRegistered(name.to_string()));
        }
        debug!("Registering {} generic variables as '{name}'", variables.len());
        let group = Arc::new(GenVarGroup {
            name: name.to_string(),
            variables: variables.into_iter().map(Arc::new).collect(),
        });
        table.insert(name.to_string(), group.clone());
        Ok(group)
    }

    pub fn find(&self, name: &str) -> Option<Arc<GenVarGroup>> {
        must_lock(&self.state).table().get(name).cloned()
    }

    /// Drop every registration and any configured size
    pub fn reset(&self) {
        *must_lock(&self.state) = RegistryState::default();
    }
}
