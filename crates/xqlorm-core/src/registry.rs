//! Entity registry
//!
//! Resolves entity names to their metadata, tables back to entity names, and
//! Rust types to the entity they declare. Models are created once and shared
//! for the lifetime of the registry.

use crate::error::{Error, Result};
use crate::metadata::EntityModel;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct RegistryInner {
    /// Models by entity name
    models: HashMap<String, Arc<EntityModel>>,

    /// Entity names by table name
    tables: HashMap<String, String>,

    /// Entity names by declaring Rust type
    types: HashMap<TypeId, String>,
}

/// Registry of entity models
#[derive(Debug, Default)]
pub struct EntityRegistry {
    inner: RwLock<RegistryInner>,
}

impl EntityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a model
    pub fn with(self, model: EntityModel) -> Self {
        self.register(model);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a model, replacing any earlier model of the same name
    pub fn register(&self, model: EntityModel) -> Arc<EntityModel> {
        let mut model = model;
        model.reindex();
        let model = Arc::new(model);

        let mut inner = self.write();
        inner.tables.insert(model.table.clone(), model.name.clone());
        inner.models.insert(model.name.clone(), model.clone());
        debug!("Registered entity {} (table {})", model.name, model.table);
        model
    }

    /// Model declared by the Rust type `T`, described on first use
    pub fn model_of<T: 'static>(&self, describe: impl FnOnce() -> EntityModel) -> Arc<EntityModel> {
        let type_id = TypeId::of::<T>();
        {
            let inner = self.read();
            if let Some(model) = inner
                .types
                .get(&type_id)
                .and_then(|name| inner.models.get(name))
            {
                return model.clone();
            }
        }

        let model = self.register(describe());
        self.write().types.insert(type_id, model.name.clone());
        model
    }

    /// Look up a model by entity name
    pub fn entity(&self, name: &str) -> Result<Arc<EntityModel>> {
        self.read()
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Entity name stored in a table
    pub fn entity_for_table(&self, table: &str) -> Option<String> {
        self.read().tables.get(table).cloned()
    }

    /// Entity name declared by the Rust type `T`, if it has been described
    pub fn entity_name_of<T: 'static>(&self) -> Option<String> {
        self.read().types.get(&TypeId::of::<T>()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().models.contains_key(name)
    }

    /// Registered entity names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().models.keys().cloned().collect();
        names.sort();
        names
    }
}
