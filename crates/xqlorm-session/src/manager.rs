//! Entity manager
//!
//! The unit of work: materializes query results into records, watches them
//! for changes, and writes inserts, updates and deletes through the database
//! collaborator. One manager serves one logical unit of work.

use crate::config::ManagerConfig;
use crate::record::{Entity, EntityState, EntityType, Record, Related};
use crate::snapshot::Snapshot;
use chrono::Local;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use xqlorm_core::{
    BackendError, DataType, DefaultRule, EntityModel, EntityRegistry, Error, JsonSerializer,
    Parameters, PropertyModel, RelationKind, Result, Row, Value, ValueSerializer, WatchId,
};
use xqlorm_query::{
    DeferredQuery, EntityStatements, Expr, KEY_PARAMETER_PREFIX, Query, QueryModel,
    RelationResolver, ResolveStrategy, SqlGenerator, Statement, StatementCache,
};
use xqlorm_storage::{Database, Transaction};

/// Alias of the owner entity when a relation query is built on demand
const OWNER_ALIAS: &str = "owner";

/// Result columns of one alias: (row position, property position)
struct AliasColumns {
    model: Arc<EntityModel>,
    columns: Vec<(usize, usize)>,
}

fn backend(operation: &'static str) -> impl FnOnce(BackendError) -> Error {
    move |source| {
        warn!("Database {} failed: {}", operation, source);
        Error::backend(operation, source)
    }
}

/// Unit of work over one database collaborator
pub struct EntityManager<D: Database> {
    db: D,
    registry: Arc<EntityRegistry>,
    statements: Arc<StatementCache>,
    watched: HashMap<WatchId, Snapshot>,
    serializer: Box<dyn ValueSerializer>,
    config: ManagerConfig,
    transaction: Option<Transaction>,
}

impl<D: Database> EntityManager<D> {
    pub fn new(db: D, registry: Arc<EntityRegistry>) -> Self {
        Self {
            db,
            registry,
            statements: Arc::new(StatementCache::new()),
            watched: HashMap::new(),
            serializer: Box::new(JsonSerializer),
            config: ManagerConfig::default(),
            transaction: None,
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: store Array/Object values through `serializer`
    pub fn with_serializer(mut self, serializer: Box<dyn ValueSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Builder: share generated write statements with other managers
    pub fn with_statement_cache(mut self, statements: Arc<StatementCache>) -> Self {
        self.statements = statements;
        self
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut D {
        &mut self.db
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Model of a declared entity type, registered on first use
    pub fn model_of<E: EntityType>(&self) -> Arc<EntityModel> {
        self.registry.model_of::<E>(E::describe)
    }

    /// New transient instance of a declared entity type
    pub fn create<E: EntityType>(&self) -> Result<E> {
        E::from_record(Record::new(self.model_of::<E>()))
    }

    /// New transient record of a registered entity
    pub fn create_record(&self, entity: &str) -> Result<Record> {
        Ok(Record::new(self.registry.entity(entity)?))
    }

    // ========== Queries ==========

    /// Run a query and wrap each result as `E`
    pub fn select<E: EntityType>(&mut self, query: Query) -> Result<Vec<E>> {
        self.model_of::<E>();
        self.select_records(query)?
            .into_iter()
            .map(E::from_record)
            .collect()
    }

    /// First result of a query, if any
    pub fn select_first<E: EntityType>(&mut self, query: Query) -> Result<Option<E>> {
        Ok(self.select::<E>(query.limit(1))?.into_iter().next())
    }

    /// Run a query and return records of the first selected alias
    pub fn select_records(&mut self, query: Query) -> Result<Vec<Record>> {
        let watch = self.config.watch_loaded;
        self.load(query, watch)
    }

    /// Number of rows a query matches, ignoring order and pagination
    pub fn count(&mut self, query: Query) -> Result<u64> {
        let model = query.into_model();
        let statement = SqlGenerator::new(&self.registry, self.db.dialect()).count(&model)?;
        let parameters = self.bind_query(&model, &statement)?;
        self.log_statement(&statement.sql);

        let row = self
            .db
            .select_first(&statement.sql, &parameters)
            .map_err(backend("count"))?;
        let count = row
            .and_then(|r| r.into_iter().next())
            .unwrap_or(Value::Integer(0))
            .coerce(&DataType::Integer)?
            .as_integer()
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Find a declared entity by its primary-key values, in key order
    pub fn find<E: EntityType>(&mut self, key: &[Value]) -> Result<Option<E>> {
        let model = self.model_of::<E>();
        self.find_record(&model.name, key)?
            .map(E::from_record)
            .transpose()
    }

    /// Find a record by its primary-key values, in key order
    pub fn find_record(&mut self, entity: &str, key: &[Value]) -> Result<Option<Record>> {
        let watch = self.config.watch_loaded;
        self.find_with(entity, key, watch)
    }

    fn find_with(&mut self, entity: &str, key: &[Value], watch: bool) -> Result<Option<Record>> {
        let model = self.registry.entity(entity)?;
        if model.primary_keys().is_empty() {
            return Err(Error::PrimaryKeyNull(model.name.clone()));
        }
        if key.len() != model.primary_keys().len() {
            return Err(Error::TypeMismatch {
                expected: format!("{} key values", model.primary_keys().len()),
                found: key.len().to_string(),
            });
        }

        let mut query = Query::new().from(&model.name);
        let mut condition: Option<Expr> = None;
        for (name, value) in model.primary_keys().iter().zip(key) {
            let term = Expr::prop(&model.name, name).eq(Expr::param(name));
            condition = Some(match condition {
                Some(expr) => expr.and(term),
                None => term,
            });
            query = query.set_parameter(name, value.clone());
        }
        if let Some(condition) = condition {
            query = query.where_expr(condition);
        }

        Ok(self.load(query, watch)?.into_iter().next())
    }

    fn load(&mut self, query: Query, watch: bool) -> Result<Vec<Record>> {
        let mut model = query.into_model();
        RelationResolver::new(&self.registry).resolve(&mut model)?;
        let statement = SqlGenerator::new(&self.registry, self.db.dialect()).select(&model)?;
        let parameters = self.bind_query(&model, &statement)?;
        self.log_statement(&statement.sql);

        let rows = self
            .db
            .select(&statement.sql, &parameters)
            .map_err(backend("select"))?;

        let layout = self.layout(&model, &statement)?;
        let primary = model
            .selected_aliases()
            .first()
            .map(|alias| alias.to_string())
            .ok_or_else(|| Error::syntax("query selects nothing", 0))?;

        let mut records = Vec::with_capacity(rows.len());
        let Some(primary_columns) = layout.get(&primary) else {
            return Ok(records);
        };

        for row in &rows {
            let mut record = self.materialize(primary_columns, row)?;
            for resolve in model.resolves().iter().filter(|r| r.alias == primary) {
                if let Some(target_alias) = &resolve.target_alias {
                    let target = match layout.get(target_alias) {
                        Some(columns) => {
                            let mut target = self.materialize(columns, row)?;
                            if target.primary_key().is_some() {
                                if watch {
                                    self.watch_record(&mut target)?;
                                }
                                Some(Box::new(target))
                            } else {
                                None
                            }
                        }
                        None => None,
                    };
                    record.set_relation(&resolve.property, Related::One(target));
                } else if let Some(deferred) = resolve.deferred.as_ref().filter(|_| self.config.attach_lazy) {
                    record.set_relation(&resolve.property, Related::Deferred(deferred.clone()));
                }
            }
            if watch && record.primary_key().is_some() {
                self.watch_record(&mut record)?;
            }
            records.push(record);
        }

        debug!("Loaded {} {} record(s)", records.len(), primary);
        Ok(records)
    }

    /// Group result columns by alias
    fn layout(
        &self,
        model: &QueryModel,
        statement: &Statement,
    ) -> Result<HashMap<String, AliasColumns>> {
        let mut layout: HashMap<String, AliasColumns> = HashMap::new();
        for (position, column) in statement.columns.iter().enumerate() {
            let group = match layout.entry(column.alias.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let entity = model
                        .entity_for_alias(&column.alias)
                        .ok_or_else(|| Error::UnknownAlias(column.alias.clone()))?;
                    entry.insert(AliasColumns {
                        model: self.registry.entity(entity)?,
                        columns: Vec::new(),
                    })
                }
            };
            let index = group
                .model
                .position(&column.property)
                .ok_or_else(|| Error::unknown_property(&group.model.name, &column.property))?;
            group.columns.push((position, index));
        }
        Ok(layout)
    }

    fn materialize(&self, group: &AliasColumns, row: &Row) -> Result<Record> {
        let mut record = Record::new(group.model.clone());
        for &(position, index) in &group.columns {
            let raw = row.get(position).cloned().ok_or_else(|| Error::TypeMismatch {
                expected: format!("row with at least {} columns", position + 1),
                found: format!("row with {} columns", row.len()),
            })?;
            let value = self.read_value(&group.model.properties()[index], raw)?;
            record.set_at(index, value);
        }
        Ok(record)
    }

    fn read_value(&self, property: &PropertyModel, raw: Value) -> Result<Value> {
        let raw = match raw {
            Value::String(text) if property.data_type.is_structured() => {
                Value::Json(self.serializer.from_storage(&text)?)
            }
            other => other,
        };
        raw.coerce(&property.data_type)
    }

    // ========== Parameter Binding ==========

    fn bind_query(&self, model: &QueryModel, statement: &Statement) -> Result<Parameters> {
        let mut parameters = Parameters::new();
        for (name, data_type) in &statement.parameters {
            let value = model
                .parameter(name)
                .and_then(|p| p.value.clone())
                .ok_or_else(|| Error::MissingParameter(name.clone()))?;
            parameters.insert(name.clone(), self.bind(value, data_type.as_ref())?);
        }
        Ok(parameters)
    }

    /// Parameters of a write statement; key parameters come from `keys` when given
    fn bind_record(
        &self,
        record: &Record,
        statement: &Statement,
        keys: Option<&Snapshot>,
    ) -> Result<Parameters> {
        let mut parameters = Parameters::new();
        for (name, data_type) in &statement.parameters {
            let key = name
                .strip_prefix(KEY_PARAMETER_PREFIX)
                .filter(|key| record.model().get(key).is_some_and(|p| p.primary_key));
            let value = match (key, keys) {
                (Some(key), Some(snapshot)) => snapshot.original(record, key),
                (Some(key), None) => record.value(key),
                (None, _) => record.value(name),
            };
            parameters.insert(name.clone(), self.bind(value, data_type.as_ref())?);
        }
        Ok(parameters)
    }

    fn bind(&self, value: Value, data_type: Option<&DataType>) -> Result<Value> {
        let value = match data_type {
            Some(data_type) if !data_type.is_relation() => value.coerce(data_type)?,
            _ => value,
        };
        let value = match value {
            Value::Json(json) => Value::String(self.serializer.to_storage(&json)?),
            other => other,
        };
        Ok(self.db.dialect().bind_value(&value))
    }

    // ========== Persistence ==========

    /// Insert a new entity or update a watched, modified one
    pub fn persist<E: Entity + ?Sized>(&mut self, entity: &mut E) -> Result<()> {
        let record = entity.record_mut();
        validate_enums(record)?;
        match self.watched_id(record) {
            Some(id) => self.update(record, id),
            None => self.insert(record),
        }
    }

    /// Persist each entity in order; not atomic without a transaction
    pub fn persist_list<E: Entity>(&mut self, entities: &mut [E]) -> Result<()> {
        for entity in entities.iter_mut() {
            self.persist(entity)?;
        }
        Ok(())
    }

    fn insert(&mut self, record: &mut Record) -> Result<()> {
        let model = record.model().clone();
        apply_defaults(record);

        let auto_increment = model.auto_increment_property().cloned();
        if auto_increment.is_none() && record.primary_key().is_none() {
            return Err(Error::PrimaryKeyNull(model.name.clone()));
        }

        let statements = self.write_statements(&model);
        let parameters = self.bind_record(record, &statements.insert, None)?;
        self.execute("insert", &statements.insert.sql, &parameters)?;

        if let Some(property) = auto_increment {
            let id = self
                .db
                .last_insert_id()
                .map_err(backend("last_insert_id"))?
                .coerce(&property.data_type)?;
            record.set(&property.name, id)?;
        }

        debug!(
            "Inserted {} {}",
            model.name,
            record.primary_key().unwrap_or("?")
        );
        self.watch_record(record)
    }

    fn update(&mut self, record: &mut Record, id: WatchId) -> Result<()> {
        let model = record.model().clone();
        if model.updatable_properties().next().is_none() {
            debug!("{} has no updatable properties", model.name);
            return Ok(());
        }
        if record.primary_key().is_none() {
            return Err(Error::PrimaryKeyNull(model.name.clone()));
        }

        let statements = self.write_statements(&model);
        let parameters = {
            let snapshot = self
                .watched
                .get(&id)
                .ok_or_else(|| Error::NotWatched(model.name.clone()))?;
            if !snapshot.is_modified(record) {
                trace!("{} {} unchanged", model.name, snapshot.key());
                return Ok(());
            }
            self.bind_record(record, &statements.update, Some(snapshot))?
        };
        self.execute("update", &statements.update.sql, &parameters)?;

        self.watched.remove(&id);
        debug!(
            "Updated {} {}",
            model.name,
            record.primary_key().unwrap_or("?")
        );
        self.watch_record(record)
    }

    /// Delete a watched entity; lifecycle hooks run either way
    pub fn delete<E: Entity + ?Sized>(&mut self, entity: &mut E) -> Result<()> {
        entity.before_delete()?;

        let record = entity.record_mut();
        if let Some(id) = self.watched_id(record) {
            let model = record.model().clone();
            let statements = self.write_statements(&model);
            let parameters = {
                let snapshot = self
                    .watched
                    .get(&id)
                    .ok_or_else(|| Error::NotWatched(model.name.clone()))?;
                self.bind_record(record, &statements.delete, Some(snapshot))?
            };
            self.execute("delete", &statements.delete.sql, &parameters)?;

            self.watched.remove(&id);
            record.set_managed_id(None);
            record.set_state(EntityState::Detached);
            debug!("Deleted {} {}", model.name, record.primary_key().unwrap_or("?"));
        } else {
            trace!("{} not watched, nothing to delete", record.entity_name());
        }

        entity.after_delete()
    }

    /// Delete each entity in order; not atomic without a transaction
    pub fn delete_list<E: Entity>(&mut self, entities: &mut [E]) -> Result<()> {
        for entity in entities.iter_mut() {
            self.delete(entity)?;
        }
        Ok(())
    }

    /// Re-read an entity from storage by its primary key
    pub fn reload<E: Entity + ?Sized>(&mut self, entity: &mut E) -> Result<()> {
        let record = entity.record_mut();
        let name = record.entity_name().to_string();
        let key = record
            .primary_key()
            .map(str::to_string)
            .ok_or_else(|| Error::PrimaryKeyNull(name.clone()))?;

        let mut fresh = self
            .find_with(&name, &record.primary_key_values(), false)?
            .ok_or_else(|| Error::ReloadNotFound {
                entity: name.clone(),
                key: key.clone(),
            })?;

        self.detach(record);
        let model = record.model().clone();
        for (index, property) in model.properties().iter().enumerate() {
            if property.is_readable() && !property.is_relation() {
                record.set_at(index, fresh.values()[index].clone());
            }
        }
        record.clear_relations();
        record.set_relations(fresh.take_relations());

        debug!("Reloaded {} {}", name, key);
        self.watch_record(record)
    }

    // ========== Watching ==========

    /// Start dirty-checking an entity; keeps an existing snapshot
    pub fn watch<E: Entity + ?Sized>(&mut self, entity: &mut E) -> Result<()> {
        self.watch_record(entity.record_mut())
    }

    fn watch_record(&mut self, record: &mut Record) -> Result<()> {
        // A live snapshot keeps the original key until the next write
        if self.watched_id(record).is_some() {
            record.set_state(EntityState::Managed);
            return Ok(());
        }
        let (Some(key), Some(id)) = (record.primary_key(), record.watch_id()) else {
            return Err(Error::PrimaryKeyNull(record.entity_name().to_string()));
        };
        if let Entry::Vacant(entry) = self.watched.entry(id) {
            trace!("Watching {} {}", record.entity_name(), key);
            entry.insert(Snapshot::capture(record, key));
        }
        record.set_managed_id(Some(id));
        record.set_state(EntityState::Managed);
        Ok(())
    }

    /// Stop dirty-checking an entity; true if it was watched
    pub fn stop_watch<E: Entity + ?Sized>(&mut self, entity: &mut E) -> bool {
        self.detach(entity.record_mut())
    }

    fn detach(&mut self, record: &mut Record) -> bool {
        let removed = record
            .managed_id()
            .and_then(|id| self.watched.remove(&id))
            .is_some();
        record.set_managed_id(None);
        if record.state() == EntityState::Managed {
            record.set_state(EntityState::Detached);
        }
        removed
    }

    pub fn is_watched<E: Entity + ?Sized>(&self, entity: &E) -> bool {
        self.watched_id(entity.record()).is_some()
    }

    /// True when a tracked property differs from the snapshot, or the entity is not watched
    pub fn is_modified<E: Entity + ?Sized>(&self, entity: &E) -> bool {
        let record = entity.record();
        self.watched_id(record)
            .and_then(|id| self.watched.get(&id))
            .is_none_or(|snapshot| snapshot.is_modified(record))
    }

    /// Discard in-memory edits of a Managed entity
    ///
    /// Needs the live snapshot, so it fails with `NotWatched` once the
    /// entity was detached by `stop_watch` or `delete`.
    pub fn restore<E: Entity + ?Sized>(&self, entity: &mut E) -> Result<()> {
        let record = entity.record_mut();
        let snapshot = self
            .watched_id(record)
            .and_then(|id| self.watched.get(&id))
            .ok_or_else(|| Error::NotWatched(record.entity_name().to_string()))?;
        snapshot.restore_into(record);
        Ok(())
    }

    /// Number of watched entities
    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    fn watched_id(&self, record: &Record) -> Option<WatchId> {
        record
            .managed_id()
            .filter(|id| self.watched.contains_key(id))
    }

    // ========== Relations ==========

    /// Execute the deferred query of a relation; loaded relations are left alone
    pub fn load_relation<E: Entity + ?Sized>(&mut self, entity: &mut E, property: &str) -> Result<()> {
        let record = entity.record_mut();
        let deferred = match record.relation(property) {
            Some(Related::Deferred(deferred)) => deferred.clone(),
            Some(_) => return Ok(()),
            None => self.deferred_for(record.model(), property)?,
        };

        let mut query: Query = deferred.query.clone().into();
        for binding in &deferred.bindings {
            let value = record.value(&binding.property);
            if value.is_null() {
                trace!("{}.{} has a null link", record.entity_name(), property);
                record.set_relation(property, empty_relation(deferred.kind));
                return Ok(());
            }
            query = query.set_parameter(&binding.parameter, value);
        }

        let records = self.select_records(query)?;
        debug!(
            "Loaded {} {} for {}.{}",
            records.len(),
            deferred.target,
            record.entity_name(),
            property
        );
        let related = match deferred.kind {
            RelationKind::ManyToOne => Related::One(records.into_iter().next().map(Box::new)),
            RelationKind::OneToMany | RelationKind::ManyToMany => Related::Many(records),
        };
        record.set_relation(property, related);
        Ok(())
    }

    fn deferred_for(&self, model: &EntityModel, property: &str) -> Result<DeferredQuery> {
        let mut query = Query::new()
            .from_as(&model.name, OWNER_ALIAS)
            .resolve(OWNER_ALIAS, property, ResolveStrategy::Lazy)
            .into_model();
        RelationResolver::new(&self.registry).resolve(&mut query)?;
        query
            .resolves()
            .first()
            .and_then(|resolve| resolve.deferred.clone())
            .ok_or_else(|| Error::unknown_property(&model.name, property))
    }

    // ========== Transactions ==========

    pub fn start_transaction(&mut self) -> Result<()> {
        if let Some(transaction) = self.transaction.as_ref().filter(|t| t.is_active()) {
            return Err(Error::Transaction(format!(
                "transaction {} is already active",
                transaction.id()
            )));
        }
        self.db
            .start_transaction()
            .map_err(backend("start_transaction"))?;

        let transaction = Transaction::begin();
        info!("Started transaction {}", transaction.id());
        self.transaction = Some(transaction);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let mut transaction = self.take_active()?;
        if let Err(source) = self.db.commit() {
            self.transaction = Some(transaction);
            return Err(backend("commit")(source));
        }
        transaction.commit()?;
        info!("Committed transaction {}", transaction.id());
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        let mut transaction = self.take_active()?;
        if let Err(source) = self.db.rollback() {
            self.transaction = Some(transaction);
            return Err(backend("rollback")(source));
        }
        transaction.rollback()?;
        info!("Rolled back transaction {}", transaction.id());
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.as_ref().is_some_and(Transaction::is_active)
    }

    /// Run `f` inside a transaction, committing on success and rolling back on error
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.start_transaction()?;
        let result = f(self).and_then(|value| self.commit().map(|()| value));
        if result.is_err() && self.in_transaction() {
            if let Err(rollback) = self.rollback() {
                warn!("Rollback after failed transaction also failed: {}", rollback);
            }
        }
        result
    }

    fn take_active(&mut self) -> Result<Transaction> {
        self.transaction
            .take()
            .filter(Transaction::is_active)
            .ok_or_else(|| Error::Transaction("no active transaction".to_string()))
    }

    // ========== Helpers ==========

    fn write_statements(&self, model: &EntityModel) -> Arc<EntityStatements> {
        let generator = SqlGenerator::new(&self.registry, self.db.dialect());
        self.statements.statements(&generator, model)
    }

    fn execute(&mut self, operation: &'static str, sql: &str, parameters: &Parameters) -> Result<u64> {
        self.log_statement(sql);
        self.db.execute(sql, parameters).map_err(backend(operation))
    }

    fn log_statement(&self, sql: &str) {
        if self.config.log_sql {
            info!("SQL: {}", sql);
        } else {
            debug!("SQL: {}", sql);
        }
    }
}

fn validate_enums(record: &Record) -> Result<()> {
    let model = record.model();
    for (property, value) in model.properties().iter().zip(record.values()) {
        if property.data_type != DataType::Enum || value.is_null() || property.enum_values.is_empty() {
            continue;
        }
        let text = value.to_string();
        if !property.enum_values.iter().any(|allowed| *allowed == text) {
            return Err(Error::InvalidEnumValue {
                entity: model.name.clone(),
                property: property.name.clone(),
                value: text,
            });
        }
    }
    Ok(())
}

/// Fill null insertable properties from their default rules
fn apply_defaults(record: &mut Record) {
    let now = Local::now().naive_local();
    let model = record.model().clone();
    for (index, property) in model.properties().iter().enumerate() {
        if !property.is_insertable() || !record.values()[index].is_null() {
            continue;
        }
        let value = match &property.default {
            DefaultRule::None => continue,
            DefaultRule::Value(value) => value.clone(),
            DefaultRule::Now => Value::DateTime(now),
            DefaultRule::Today => Value::Date(now.date()),
            DefaultRule::NewUuid => Value::Uuid(Uuid::new_v4()),
        };
        record.set_at(index, value);
    }
}

fn empty_relation(kind: RelationKind) -> Related {
    match kind {
        RelationKind::ManyToOne => Related::One(None),
        RelationKind::OneToMany | RelationKind::ManyToMany => Related::Many(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xqlorm_storage::ScriptedDatabase;

    fn manager() -> EntityManager<ScriptedDatabase> {
        let registry = EntityRegistry::new().with(
            EntityModel::new("Tag", "tags")
                .property(PropertyModel::uuid("id").primary_key().default_rule(DefaultRule::NewUuid))
                .property(PropertyModel::string("label", 32))
                .property(PropertyModel::enumeration("color", ["red", "green"]))
                .property(PropertyModel::object("meta")),
        );
        EntityManager::new(ScriptedDatabase::new(), Arc::new(registry))
    }

    #[test]
    fn test_insert_applies_uuid_default() {
        let mut em = manager();
        let mut tag = em.create_record("Tag").unwrap();
        tag.set("label", "urgent").unwrap();

        em.persist(&mut tag).unwrap();
        assert!(tag.value("id").as_uuid().is_some());
        assert_eq!(tag.state(), EntityState::Managed);

        let insert = &em.database().executed()[0];
        assert_eq!(
            insert.sql,
            "insert into tags (id, label, color, meta) values (:id, :label, :color, :meta)"
        );
        assert!(matches!(insert.parameters.get("id"), Some(Value::Uuid(_))));
    }

    #[test]
    fn test_object_values_stored_as_text() {
        let mut em = manager();
        let mut tag = em.create_record("Tag").unwrap();
        tag.set("meta", Value::Json(serde_json::json!({"pinned": true})))
            .unwrap();

        em.persist(&mut tag).unwrap();
        let insert = &em.database().executed()[0];
        assert_eq!(
            insert.parameters.get("meta"),
            Some(&Value::from(r#"{"pinned":true}"#))
        );
    }

    #[test]
    fn test_invalid_enum_rejected_before_sql() {
        let mut em = manager();
        let mut tag = em.create_record("Tag").unwrap();
        tag.set("color", "blue").unwrap();

        let err = em.persist(&mut tag).unwrap_err();
        assert!(matches!(err, Error::InvalidEnumValue { ref value, .. } if value == "blue"));
        assert!(em.database().statements().is_empty());
    }

    #[test]
    fn test_watch_requires_key() {
        let mut em = manager();
        let mut tag = em.create_record("Tag").unwrap();
        assert!(matches!(em.watch(&mut tag), Err(Error::PrimaryKeyNull(_))));
        assert!(em.is_modified(&tag));
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let mut em = manager();
        em.start_transaction().unwrap();
        assert!(matches!(em.start_transaction(), Err(Error::Transaction(_))));
        em.commit().unwrap();
        assert!(matches!(em.commit(), Err(Error::Transaction(_))));
    }
}
