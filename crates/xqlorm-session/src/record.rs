//! Entity instances
//!
//! A [`Record`] is the dynamic form of an entity instance: its model, one
//! value per declared property, the loaded or deferred relations, and the
//! identity derived from the primary key. Declared entity structs wrap a
//! record and expose named accessors through [`Entity`]/[`EntityType`].

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use xqlorm_core::{EntityModel, Error, Result, Value, WatchId, primary_key_text};
use xqlorm_query::DeferredQuery;

/// Lifecycle state of an entity instance within a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityState {
    /// Constructed, never watched
    Transient,
    /// Watched, snapshot held by the entity manager
    Managed,
    /// No longer watched, after `stop_watch` or `delete`
    Detached,
}

/// Content of a relation slot
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Sub-query not yet executed
    Deferred(DeferredQuery),
    /// Loaded many-to-one target
    One(Option<Box<Record>>),
    /// Loaded collection
    Many(Vec<Record>),
}

impl Related {
    pub fn is_loaded(&self) -> bool {
        !matches!(self, Related::Deferred(_))
    }
}

/// Dynamic entity instance
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    model: Arc<EntityModel>,
    values: Vec<Value>,
    relations: HashMap<String, Related>,
    state: EntityState,

    /// Primary-key text, kept in sync with the key values
    key: Option<String>,
    watch_id: Option<WatchId>,

    /// Identity the entity manager watches this instance under
    managed_id: Option<WatchId>,
}

impl Record {
    /// Transient record with every property null
    pub fn new(model: Arc<EntityModel>) -> Self {
        let values = vec![Value::Null; model.properties().len()];
        Self {
            model,
            values,
            relations: HashMap::new(),
            state: EntityState::Transient,
            key: None,
            watch_id: None,
            managed_id: None,
        }
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    pub fn entity_name(&self) -> &str {
        &self.model.name
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    /// Value of a declared property
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.model.position(name).map(|i| &self.values[i])
    }

    /// Value of a declared property, null when unknown
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }

    /// Assign a property value
    pub fn set<V: Into<Value>>(&mut self, name: &str, value: V) -> Result<()> {
        let index = self
            .model
            .position(name)
            .ok_or_else(|| Error::unknown_property(&self.model.name, name))?;
        self.set_at(index, value.into());
        Ok(())
    }

    /// Builder: assign a property value
    pub fn with<V: Into<Value>>(mut self, name: &str, value: V) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub(crate) fn set_at(&mut self, index: usize, value: Value) {
        let is_key = self.model.properties()[index].primary_key;
        self.values[index] = value;
        if is_key {
            self.refresh_identity();
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn refresh_identity(&mut self) {
        self.key = primary_key_text(
            self.model
                .primary_key_properties()
                .filter_map(|p| self.model.position(&p.name))
                .map(|i| &self.values[i]),
        );
        self.watch_id = self
            .key
            .as_deref()
            .map(|key| WatchId::new(&self.model.name, key));
    }

    /// Concatenated primary-key values, `None` while any of them is null
    pub fn primary_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Primary-key values in key order
    pub fn primary_key_values(&self) -> Vec<Value> {
        self.model
            .primary_keys()
            .iter()
            .map(|name| self.value(name))
            .collect()
    }

    /// Identity derived from the entity name and current primary key
    pub fn watch_id(&self) -> Option<WatchId> {
        self.watch_id
    }

    pub(crate) fn managed_id(&self) -> Option<WatchId> {
        self.managed_id
    }

    pub(crate) fn set_managed_id(&mut self, id: Option<WatchId>) {
        self.managed_id = id;
    }

    // ========== Relations ==========

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn set_relation(&mut self, name: &str, related: Related) {
        self.relations.insert(name.to_string(), related);
    }

    pub(crate) fn clear_relations(&mut self) {
        self.relations.clear();
    }

    pub(crate) fn take_relations(&mut self) -> HashMap<String, Related> {
        std::mem::take(&mut self.relations)
    }

    pub(crate) fn set_relations(&mut self, relations: HashMap<String, Related>) {
        self.relations = relations;
    }

    /// Loaded many-to-one target
    pub fn related_one(&self, name: &str) -> Option<&Record> {
        match self.relations.get(name) {
            Some(Related::One(Some(record))) => Some(record),
            _ => None,
        }
    }

    /// Loaded collection, empty when not loaded
    pub fn related_many(&self, name: &str) -> &[Record] {
        match self.relations.get(name) {
            Some(Related::Many(records)) => records,
            _ => &[],
        }
    }

    /// Readable, non-relation property values by name
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.model
            .properties()
            .iter()
            .zip(&self.values)
            .filter(|(p, _)| p.is_readable() && !p.is_relation())
            .map(|(p, v)| (p.name.clone(), v.clone()))
            .collect()
    }
}

/// Anything backed by a [`Record`]
pub trait Entity {
    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    /// Called before the entity manager deletes this entity
    fn before_delete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after the entity manager deleted this entity
    fn after_delete(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A declared entity type with a static model
pub trait EntityType: Entity + Sized + 'static {
    /// Describe the entity model; called once per registry
    fn describe() -> EntityModel;

    /// Wrap a record loaded for this entity
    fn from_record(record: Record) -> Result<Self>;
}

impl Entity for Record {
    fn record(&self) -> &Record {
        self
    }

    fn record_mut(&mut self) -> &mut Record {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xqlorm_core::PropertyModel;

    fn model() -> Arc<EntityModel> {
        let mut model = EntityModel::new("Membership", "memberships")
            .property(PropertyModel::integer("userId").primary_key())
            .property(PropertyModel::integer("groupId").primary_key())
            .property(PropertyModel::string("role", 16))
            .property(PropertyModel::string("secret", 16).access(xqlorm_core::Access::INSERT));
        model.reindex();
        Arc::new(model)
    }

    #[test]
    fn test_new_record_is_transient() {
        let record = Record::new(model());
        assert_eq!(record.state(), EntityState::Transient);
        assert_eq!(record.values().len(), 4);
        assert!(record.primary_key().is_none());
        assert!(record.watch_id().is_none());
    }

    #[test]
    fn test_composite_key_known_once_complete() {
        let mut record = Record::new(model());
        record.set("userId", 1i64).unwrap();
        assert!(record.primary_key().is_none());

        record.set("groupId", 2i64).unwrap();
        assert_eq!(record.primary_key(), Some("1|2"));
        assert_eq!(record.watch_id(), Some(WatchId::new("Membership", "1|2")));

        record.set("userId", Value::Null).unwrap();
        assert!(record.watch_id().is_none());
    }

    #[test]
    fn test_unknown_property() {
        let mut record = Record::new(model());
        assert!(matches!(
            record.set("nickname", "x"),
            Err(Error::UnknownProperty { .. })
        ));
        assert!(record.get("nickname").is_none());
        assert_eq!(record.value("nickname"), Value::Null);
    }

    #[test]
    fn test_to_map_skips_unreadable() {
        let record = Record::new(model())
            .with("role", "owner")
            .unwrap()
            .with("secret", "s3cret")
            .unwrap();
        let map = record.to_map();
        assert_eq!(map.get("role"), Some(&Value::from("owner")));
        assert!(!map.contains_key("secret"));
    }

    #[test]
    fn test_relation_slots() {
        let mut record = Record::new(model());
        assert!(record.related_one("group").is_none());
        assert!(record.related_many("members").is_empty());

        let target = Record::new(model());
        record.set_relation("group", Related::One(Some(Box::new(target))));
        assert!(record.related_one("group").is_some());
        assert!(record.relation("group").unwrap().is_loaded());
    }
}
