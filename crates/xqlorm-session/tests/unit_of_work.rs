//! Entity manager behaviour against the scripted database

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use xqlorm_core::{EntityModel, EntityRegistry, Error, PropertyModel, Result, Row, Value};
use xqlorm_query::{Query, ResolveStrategy};
use xqlorm_session::{Entity, EntityManager, EntityState, EntityType, ManagerConfig, Record};
use xqlorm_storage::{Database, ScriptedDatabase, TransactionState};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ========== Fixtures ==========

#[derive(Debug)]
struct User {
    record: Record,
    hooks: Vec<&'static str>,
}

impl User {
    fn id(&self) -> Option<i64> {
        self.record.value("id").as_integer()
    }

    fn name(&self) -> String {
        self.record.value("name").as_str().unwrap_or_default().to_string()
    }

    fn set_name(&mut self, name: &str) -> Result<()> {
        self.record.set("name", name)
    }
}

impl Entity for User {
    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn before_delete(&mut self) -> Result<()> {
        self.hooks.push("before");
        Ok(())
    }

    fn after_delete(&mut self) -> Result<()> {
        self.hooks.push("after");
        Ok(())
    }
}

impl EntityType for User {
    fn describe() -> EntityModel {
        EntityModel::new("User", "users")
            .property(PropertyModel::integer("id").primary_key().auto_increment())
            .property(PropertyModel::string("name", 64))
            .property(PropertyModel::enumeration("role", ["admin", "member"]).default_value("member"))
            .property(PropertyModel::boolean("active"))
            .property(PropertyModel::integer("groupId").field("group_id"))
            .property(PropertyModel::many_to_one("group", "Group", &[("groupId", "id")]))
            .property(PropertyModel::integer("score").calculated())
            .property(
                PropertyModel::datetime("created")
                    .insert_only()
                    .default_rule(xqlorm_core::DefaultRule::Now),
            )
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            record,
            hooks: Vec::new(),
        })
    }
}

fn registry() -> EntityRegistry {
    EntityRegistry::new()
        .with(
            EntityModel::new("Group", "groups")
                .property(PropertyModel::integer("id").primary_key())
                .property(PropertyModel::string("title", 64))
                .property(PropertyModel::one_to_many("members", "User", &[("id", "groupId")]))
                .property(PropertyModel::many_to_many(
                    "tags",
                    "Tag",
                    "GroupTag",
                    &[("id", "groupId")],
                    &[("tagId", "id")],
                )),
        )
        .with(
            EntityModel::new("Tag", "tags")
                .property(PropertyModel::integer("id").primary_key())
                .property(PropertyModel::string("label", 32)),
        )
        .with(
            EntityModel::new("GroupTag", "group_tags")
                .property(PropertyModel::integer("groupId").primary_key().field("group_id"))
                .property(PropertyModel::integer("tagId").primary_key().field("tag_id")),
        )
}

fn manager() -> EntityManager<ScriptedDatabase> {
    init_tracing();
    let em = EntityManager::new(ScriptedDatabase::new(), Arc::new(registry()));
    em.model_of::<User>();
    em
}

fn user_row(id: i64, name: &str, group: Option<i64>) -> Row {
    vec![
        Value::Integer(id),
        Value::from(name),
        Value::from("admin"),
        Value::Integer(1),
        group.map(Value::Integer).unwrap_or(Value::Null),
        Value::from("2024-03-01 10:00:00"),
    ]
}

fn load_user(em: &mut EntityManager<ScriptedDatabase>, id: i64, group: Option<i64>) -> User {
    em.database_mut().push_rows(vec![user_row(id, "Ada", group)]);
    let user = em
        .find::<User>(&[Value::Integer(id)])
        .unwrap()
        .expect("scripted user row");
    em.database_mut().clear_log();
    user
}

fn load_group(em: &mut EntityManager<ScriptedDatabase>, id: i64, title: &str) -> Record {
    em.database_mut()
        .push_rows(vec![vec![Value::Integer(id), Value::from(title)]]);
    let group = em
        .find_record("Group", &[Value::Integer(id)])
        .unwrap()
        .expect("scripted group row");
    em.database_mut().clear_log();
    group
}

// ========== Persist ==========

#[test]
fn test_insert_populates_auto_increment_key() {
    let mut em = manager();
    em.database_mut().push_generated_id(42i64);

    let mut user: User = em.create().unwrap();
    user.set_name("Ada").unwrap();
    em.persist(&mut user).unwrap();

    let db = em.database();
    let executed = db.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        executed[0].sql,
        "insert into users (name, role, active, group_id, created) \
         values (:name, :role, :active, :groupId, :created)"
    );
    assert_eq!(executed[0].parameters.get("role"), Some(&Value::from("member")));
    assert!(matches!(
        executed[0].parameters.get("created"),
        Some(Value::String(_))
    ));
    assert_eq!(db.last_insert_id_calls(), 1);

    assert_eq!(user.id(), Some(42));
    assert_eq!(user.record().state(), EntityState::Managed);
    assert!(em.is_watched(&user));
    assert!(!em.is_modified(&user));
}

#[test]
fn test_insert_without_key_fails_before_sql() {
    let mut em = manager();
    let mut group = em.create_record("Group").unwrap();
    group.set("title", "Ops").unwrap();

    let err = em.persist(&mut group).unwrap_err();
    assert!(matches!(err, Error::PrimaryKeyNull(ref entity) if entity == "Group"));
    assert!(em.database().statements().is_empty());
}

#[test]
fn test_unmodified_entity_is_not_updated() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, Some(10));

    assert_eq!(user.record().state(), EntityState::Managed);
    assert_eq!(user.record().value("active"), Value::Bool(true));
    assert!(!em.is_modified(&user));

    em.persist(&mut user).unwrap();
    assert!(em.database().executed().is_empty());
}

#[test]
fn test_calculated_property_does_not_dirty() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    user.record_mut().set("score", 99i64).unwrap();
    assert!(!em.is_modified(&user));

    user.set_name("Grace").unwrap();
    assert!(em.is_modified(&user));
}

#[test]
fn test_modified_entity_is_updated() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, Some(10));

    user.set_name("Grace").unwrap();
    em.persist(&mut user).unwrap();

    let executed = em.database().executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        executed[0].sql,
        "update users set name = :name, role = :role, active = :active, group_id = :groupId \
         where id = :pk_id"
    );
    assert_eq!(executed[0].parameters.get("name"), Some(&Value::from("Grace")));
    assert_eq!(executed[0].parameters.get("active"), Some(&Value::Integer(1)));
    assert_eq!(executed[0].parameters.get("pk_id"), Some(&Value::Integer(1)));
    assert!(!em.is_modified(&user));
}

#[test]
fn test_key_change_updates_by_original_key() {
    let mut em = manager();
    let mut group = load_group(&mut em, 5, "Ops");

    group.set("id", 6i64).unwrap();
    em.persist(&mut group).unwrap();

    let executed = em.database().executed();
    assert_eq!(
        executed[0].sql,
        "update groups set id = :id, title = :title where id = :pk_id"
    );
    assert_eq!(executed[0].parameters.get("id"), Some(&Value::Integer(6)));
    assert_eq!(executed[0].parameters.get("pk_id"), Some(&Value::Integer(5)));
    assert!(em.is_watched(&group));
    assert_eq!(em.watched_count(), 1);
}

#[test]
fn test_invalid_enum_value_rejected() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    user.record_mut().set("role", "owner").unwrap();
    let err = em.persist(&mut user).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidEnumValue { ref property, ref value, .. } if property == "role" && value == "owner"
    ));
    assert!(err.is_unit_of_work());
    assert!(em.database().executed().is_empty());
}

#[test]
fn test_persist_list_writes_in_order() {
    let mut em = manager();
    em.database_mut().push_generated_id(1i64).push_generated_id(2i64);

    let mut users: Vec<User> = (0..2).map(|_| em.create().unwrap()).collect();
    em.persist_list(&mut users).unwrap();

    assert_eq!(users[0].id(), Some(1));
    assert_eq!(users[1].id(), Some(2));
    assert_eq!(em.database().executed().len(), 2);
}

// ========== Delete ==========

#[test]
fn test_delete_watched_entity() {
    let mut em = manager();
    let mut user = load_user(&mut em, 3, None);

    em.delete(&mut user).unwrap();

    let executed = em.database().executed();
    assert_eq!(executed[0].sql, "delete from users where id = :pk_id");
    assert_eq!(executed[0].parameters.get("pk_id"), Some(&Value::Integer(3)));
    assert_eq!(user.record().state(), EntityState::Detached);
    assert_eq!(user.hooks, vec!["before", "after"]);
    assert!(!em.is_watched(&user));
}

#[test]
fn test_delete_transient_runs_hooks_only() {
    let mut em = manager();
    let mut user: User = em.create().unwrap();

    em.delete(&mut user).unwrap();
    assert!(em.database().statements().is_empty());
    assert_eq!(user.hooks, vec!["before", "after"]);
    assert_eq!(user.record().state(), EntityState::Transient);
}

// ========== Watch, Reload, Restore ==========

#[test]
fn test_watch_is_idempotent() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    user.set_name("Grace").unwrap();
    em.watch(&mut user).unwrap();
    em.watch(&mut user).unwrap();

    assert_eq!(em.watched_count(), 1);
    assert!(em.is_modified(&user));
}

#[test]
fn test_rewatch_keeps_pending_key_change() {
    let mut em = manager();
    let mut group = load_group(&mut em, 5, "Ops");

    group.set("id", 6i64).unwrap();
    em.watch(&mut group).unwrap();
    assert!(em.is_modified(&group));
    assert_eq!(em.watched_count(), 1);

    em.persist(&mut group).unwrap();
    let executed = em.database().executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].parameters.get("id"), Some(&Value::Integer(6)));
    assert_eq!(executed[0].parameters.get("pk_id"), Some(&Value::Integer(5)));
    assert_eq!(em.watched_count(), 1);
}

#[test]
fn test_stop_watch_detaches() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    assert!(em.stop_watch(&mut user));
    assert!(!em.stop_watch(&mut user));
    assert_eq!(user.record().state(), EntityState::Detached);
    assert!(em.is_modified(&user));
}

#[test]
fn test_reload_replaces_values() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);
    user.set_name("Local edit").unwrap();

    em.database_mut().push_rows(vec![user_row(1, "Stored", Some(10))]);
    em.reload(&mut user).unwrap();

    assert_eq!(user.name(), "Stored");
    assert_eq!(user.record().value("groupId"), Value::Integer(10));
    assert_eq!(user.record().state(), EntityState::Managed);
    assert!(!em.is_modified(&user));
    assert_eq!(em.watched_count(), 1);
}

#[test]
fn test_reload_missing_row() {
    let mut em = manager();
    let mut user = load_user(&mut em, 7, None);

    let err = em.reload(&mut user).unwrap_err();
    assert!(matches!(err, Error::ReloadNotFound { ref key, .. } if key == "7"));
    assert!(em.is_watched(&user));

    let mut fresh: User = em.create().unwrap();
    assert!(matches!(em.reload(&mut fresh), Err(Error::PrimaryKeyNull(_))));
}

#[test]
fn test_restore_discards_edits() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    user.set_name("Grace").unwrap();
    em.restore(&mut user).unwrap();
    assert_eq!(user.name(), "Ada");
    assert!(!em.is_modified(&user));

    let mut transient: User = em.create().unwrap();
    assert!(matches!(em.restore(&mut transient), Err(Error::NotWatched(_))));
}

#[test]
fn test_restore_after_stop_watch_fails() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    user.set_name("Grace").unwrap();
    em.stop_watch(&mut user);
    assert!(matches!(em.restore(&mut user), Err(Error::NotWatched(_))));
    assert_eq!(user.name(), "Grace");
}

// ========== Queries ==========

#[test]
fn test_select_binds_parameters() {
    let mut em = manager();
    em.database_mut()
        .push_rows(vec![user_row(1, "Ada", None), user_row(2, "Ada", None)]);

    let query = Query::parse("select u from User u where u.name == :name order by u.id")
        .unwrap()
        .set_parameter("name", "Ada");
    let users: Vec<User> = em.select(query).unwrap();

    assert_eq!(users.len(), 2);
    assert_eq!(users[1].id(), Some(2));
    let select = &em.database().selects()[0];
    assert_eq!(
        select.sql,
        "select u.id, u.name, u.role, u.active, u.group_id, u.created from users u \
         where (u.name = :name) order by u.id"
    );
    assert_eq!(select.parameters.get("name"), Some(&Value::from("Ada")));
    assert_eq!(em.watched_count(), 2);
}

#[test]
fn test_missing_parameter() {
    let mut em = manager();
    let query = Query::parse("from User u where u.name == :name").unwrap();

    let err = em.select_records(query).unwrap_err();
    assert!(matches!(err, Error::MissingParameter(ref name) if name == "name"));
    assert!(em.database().statements().is_empty());
}

#[test]
fn test_count_ignores_pagination() {
    let mut em = manager();
    em.database_mut().push_rows(vec![vec![Value::Integer(3)]]);

    let query = Query::parse("from User u where u.active == true order by u.name")
        .unwrap()
        .limit(10);
    assert_eq!(em.count(query).unwrap(), 3);
    assert_eq!(
        em.database().selects()[0].sql,
        "select count(*) from users u where (u.active = 1)"
    );
}

#[test]
fn test_find_and_select_first_without_rows() {
    let mut em = manager();
    assert!(em.find::<User>(&[Value::Integer(9)]).unwrap().is_none());
    assert!(
        em.select_first::<User>(Query::new().from("User"))
            .unwrap()
            .is_none()
    );
    assert!(em.database().selects()[1].sql.ends_with(" limit 1"));
}

#[test]
fn test_short_row_is_rejected() {
    let mut em = manager();
    let mut row = user_row(1, "Ada", None);
    row.truncate(2);
    em.database_mut().push_rows(vec![row]);

    let err = em.select::<User>(Query::new().from("User")).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { ref found, .. } if found == "row with 2 columns"));
    assert!(err.is_unit_of_work());
    assert_eq!(em.watched_count(), 0);
}

#[test]
fn test_loaded_rows_unwatched_when_disabled() {
    init_tracing();
    let mut em = EntityManager::new(ScriptedDatabase::new(), Arc::new(registry()))
        .with_config(ManagerConfig::default().watch_loaded(false));
    em.database_mut().push_rows(vec![user_row(1, "Ada", None)]);

    let users: Vec<User> = em.select(Query::new().from("User")).unwrap();
    assert_eq!(users[0].record().state(), EntityState::Transient);
    assert_eq!(em.watched_count(), 0);
}

// ========== Relations ==========

#[test]
fn test_eager_relation_from_joined_columns() {
    let mut em = manager();
    let mut with_group = user_row(1, "Ada", Some(10));
    with_group.extend([Value::Integer(10), Value::from("Ops")]);
    let mut without_group = user_row(2, "Grace", None);
    without_group.extend([Value::Null, Value::Null]);
    em.database_mut().push_rows(vec![with_group, without_group]);

    let query = Query::new()
        .from_as("User", "u")
        .resolve("u", "group", ResolveStrategy::Eager);
    let users: Vec<User> = em.select(query).unwrap();

    assert_eq!(
        em.database().selects()[0].sql,
        "select u.id, u.name, u.role, u.active, u.group_id, u.created, u_group.id, u_group.title \
         from users u left join groups u_group on u.group_id = u_group.id"
    );
    let group = users[0].record().related_one("group").unwrap();
    assert_eq!(group.value("title"), Value::from("Ops"));
    assert_eq!(group.state(), EntityState::Managed);
    assert!(users[1].record().related_one("group").is_none());
    assert!(users[1].record().relation("group").unwrap().is_loaded());
}

#[test]
fn test_lazy_many_to_one_loaded_on_demand() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, Some(10));
    assert!(user.record().relation("group").is_none());

    em.database_mut()
        .push_rows(vec![vec![Value::Integer(10), Value::from("Ops")]]);
    em.load_relation(&mut user, "group").unwrap();

    let select = &em.database().selects()[0];
    assert_eq!(select.sql, "select t.id, t.title from groups t where (t.id = :id)");
    assert_eq!(select.parameters.get("id"), Some(&Value::Integer(10)));
    assert_eq!(
        user.record().related_one("group").unwrap().value("title"),
        Value::from("Ops")
    );

    em.load_relation(&mut user, "group").unwrap();
    assert_eq!(em.database().selects().len(), 1);
}

#[test]
fn test_null_link_skips_query() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    em.load_relation(&mut user, "group").unwrap();
    assert!(em.database().statements().is_empty());
    assert!(user.record().related_one("group").is_none());
    assert!(user.record().relation("group").unwrap().is_loaded());
}

#[test]
fn test_attached_one_to_many_runs_on_load() {
    let mut em = manager();
    em.database_mut()
        .push_rows(vec![vec![Value::Integer(5), Value::from("Ops")]]);
    let query = Query::new()
        .from_as("Group", "g")
        .resolve("g", "members", ResolveStrategy::Lazy);
    let mut group = em.select_records(query).unwrap().remove(0);

    assert!(!group.relation("members").unwrap().is_loaded());
    assert_eq!(em.database().selects().len(), 1);

    em.database_mut()
        .push_rows(vec![user_row(1, "Ada", Some(5)), user_row(2, "Grace", Some(5))]);
    em.load_relation(&mut group, "members").unwrap();

    let select = &em.database().selects()[1];
    assert!(select.sql.ends_with("from users t where (t.group_id = :groupId)"));
    assert_eq!(select.parameters.get("groupId"), Some(&Value::Integer(5)));
    assert_eq!(group.related_many("members").len(), 2);
}

#[test]
fn test_many_to_many_through_link_entity() {
    let mut em = manager();
    let mut group = load_group(&mut em, 5, "Ops");

    em.database_mut().push_rows(vec![
        vec![Value::Integer(1), Value::from("urgent")],
        vec![Value::Integer(2), Value::from("later")],
    ]);
    em.load_relation(&mut group, "tags").unwrap();

    let select = &em.database().selects()[0];
    assert_eq!(
        select.sql,
        "select t.id, t.label from tags t inner join group_tags v on v.tag_id = t.id \
         where (v.group_id = :groupId)"
    );
    assert_eq!(select.parameters.get("groupId"), Some(&Value::Integer(5)));
    let labels: Vec<Value> = group
        .related_many("tags")
        .iter()
        .map(|tag| tag.value("label"))
        .collect();
    assert_eq!(labels, vec![Value::from("urgent"), Value::from("later")]);
}

// ========== Transactions ==========

#[test]
fn test_transaction_commits_on_success() {
    let mut em = manager();
    em.database_mut().push_generated_id(1i64);

    let id = em
        .transaction(|em| {
            let mut user: User = em.create()?;
            em.persist(&mut user)?;
            Ok(user.id())
        })
        .unwrap();

    assert_eq!(id, Some(1));
    assert!(!em.in_transaction());
    assert_eq!(
        em.database().transactions(),
        &[TransactionState::Active, TransactionState::Committed]
    );
}

#[test]
fn test_transaction_rolls_back_on_error() {
    let mut em = manager();
    let mut user = load_user(&mut em, 1, None);

    let result = em.transaction(|em| {
        user.record_mut().set("role", "owner")?;
        em.persist(&mut user)
    });

    assert!(matches!(result, Err(Error::InvalidEnumValue { .. })));
    assert!(!em.in_transaction());
    assert_eq!(
        em.database().transactions(),
        &[TransactionState::Active, TransactionState::RolledBack]
    );
}

#[test]
fn test_backend_failure_is_wrapped() {
    let mut em = manager();
    let mut group = em.create_record("Group").unwrap();
    group.set("id", 1i64).unwrap();

    em.database_mut().fail_next();
    let err = em.persist(&mut group).unwrap_err();

    assert!(err.is_backend());
    assert!(matches!(err, Error::Backend { operation: "insert", .. }));
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "Injected execute failure");
    assert_eq!(group.state(), EntityState::Transient);
}

#[test]
fn test_rollback_without_transaction() {
    let mut em = manager();
    assert!(matches!(em.rollback(), Err(Error::Transaction(_))));

    em.start_transaction().unwrap();
    assert!(em.in_transaction());
    em.rollback().unwrap();
    assert!(!em.database().in_transaction());
}

#[test]
fn test_boxed_database_manager() {
    init_tracing();
    let db: Box<dyn Database> = Box::new(ScriptedDatabase::new());
    let mut em = EntityManager::new(db, Arc::new(registry()));

    assert_eq!(em.count(Query::new().from("Tag")).unwrap(), 0);
}
