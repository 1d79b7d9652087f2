//! Entity metadata: the static description of each persisted type
//!
//! An [`EntityModel`] names the table, lists the properties in declaration
//! order and records which of them form the primary key. Each
//! [`PropertyModel`] carries its data type, storage field, access rights and
//! default-value rule; relation properties additionally carry a
//! [`RelationModel`].

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Data type tag of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Uuid,
    String,
    Text,
    Integer,
    Numeric,
    Date,
    DateTime,
    Bool,
    /// Enumerated string, also used for status fields
    Enum,
    Array,
    Object,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Uuid => "uuid",
            DataType::String => "string",
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::Numeric => "numeric",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
            DataType::Bool => "bool",
            DataType::Enum => "enum",
            DataType::Array => "array",
            DataType::Object => "object",
            DataType::ManyToOne => "many-to-one",
            DataType::OneToMany => "one-to-many",
            DataType::ManyToMany => "many-to-many",
        }
    }

    /// Returns true for ManyToOne, OneToMany and ManyToMany
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            DataType::ManyToOne | DataType::OneToMany | DataType::ManyToMany
        )
    }

    /// Returns true for types stored through the value serializer
    pub fn is_structured(&self) -> bool {
        matches!(self, DataType::Array | DataType::Object)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Access rights bitmask of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Access(u8);

impl Access {
    pub const NONE: Access = Access(0);
    pub const READ: Access = Access(1);
    pub const INSERT: Access = Access(1 << 1);
    pub const UPDATE: Access = Access(1 << 2);
    pub const CALCULATED: Access = Access(1 << 3);
    pub const RELATION: Access = Access(1 << 4);
    pub const AUTO_INCREMENT: Access = Access(1 << 5);

    /// Readable, insertable and updatable
    pub const READ_WRITE: Access = Access(1 | (1 << 1) | (1 << 2));

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Access) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Access) -> Access {
        Access(self.0 | other.0)
    }

    pub const fn difference(self, other: Access) -> Access {
        Access(self.0 & !other.0)
    }
}

impl Default for Access {
    fn default() -> Self {
        Access::READ_WRITE
    }
}

impl BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        self.union(rhs)
    }
}

impl BitOrAssign for Access {
    fn bitor_assign(&mut self, rhs: Access) {
        *self = self.union(rhs);
    }
}

/// How an unset value is filled in on insert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum DefaultRule {
    #[default]
    None,
    /// A constant value
    Value(Value),
    /// Current date and time
    Now,
    /// Current date
    Today,
    /// A freshly generated v4 UUID
    NewUuid,
}

/// Kind of a relation property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    pub fn data_type(&self) -> DataType {
        match self {
            RelationKind::ManyToOne => DataType::ManyToOne,
            RelationKind::OneToMany => DataType::OneToMany,
            RelationKind::ManyToMany => DataType::ManyToMany,
        }
    }
}

/// One column pair of a relation link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkModel {
    /// Property on the side the link starts from
    pub local: String,
    /// Property on the side the link points to
    pub foreign: String,
}

impl LinkModel {
    pub fn new(local: impl Into<String>, foreign: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            foreign: foreign.into(),
        }
    }
}

/// Description of a relation between two entities
///
/// * ManyToOne: `links` map owner foreign-key properties to target primary keys.
/// * OneToMany: `links` map owner primary keys to target foreign-key properties.
/// * ManyToMany: `links` map owner primary keys to properties of the `via`
///   entity, and `via_links` map `via` properties to target primary keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationModel {
    pub kind: RelationKind,
    pub target: String,
    pub links: Vec<LinkModel>,
    pub via: Option<String>,
    pub via_links: Vec<LinkModel>,
}

/// Description of a single entity property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyModel {
    /// Property name used in XQL and in code
    pub name: String,

    /// Data type tag
    pub data_type: DataType,

    /// Column name in storage
    pub field: String,

    /// Length for strings, total digits for numerics
    pub size: Option<u32>,

    /// Fractional digits for numerics
    pub precision: Option<u32>,

    /// Whether the property is part of the primary key
    pub primary_key: bool,

    /// Access rights
    pub access: Access,

    /// Default-value rule applied on insert
    pub default: DefaultRule,

    /// Allowed values for Enum properties
    pub enum_values: Vec<String>,

    /// Relation description for relation-typed properties
    pub relation: Option<RelationModel>,
}

impl PropertyModel {
    /// Create a readable, insertable and updatable property stored in a
    /// column of the same name
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            field: name.to_string(),
            size: None,
            precision: None,
            primary_key: false,
            access: Access::READ_WRITE,
            default: DefaultRule::None,
            enum_values: Vec::new(),
            relation: None,
        }
    }

    pub fn uuid(name: &str) -> Self {
        Self::new(name, DataType::Uuid)
    }

    pub fn string(name: &str, size: u32) -> Self {
        Self::new(name, DataType::String).size(size)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, DataType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, DataType::Integer)
    }

    pub fn numeric(name: &str, size: u32, precision: u32) -> Self {
        Self::new(name, DataType::Numeric)
            .size(size)
            .precision(precision)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, DataType::Date)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, DataType::DateTime)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, DataType::Bool)
    }

    pub fn enumeration<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prop = Self::new(name, DataType::Enum);
        prop.enum_values = values.into_iter().map(Into::into).collect();
        prop
    }

    pub fn array(name: &str) -> Self {
        Self::new(name, DataType::Array)
    }

    pub fn object(name: &str) -> Self {
        Self::new(name, DataType::Object)
    }

    /// Many-to-one relation. `links` pairs local foreign-key properties with
    /// the target's primary-key properties.
    pub fn many_to_one(name: &str, target: &str, links: &[(&str, &str)]) -> Self {
        Self::relation(name, RelationKind::ManyToOne, target, links)
    }

    /// One-to-many relation. `links` pairs local primary-key properties with
    /// the target's foreign-key properties.
    pub fn one_to_many(name: &str, target: &str, links: &[(&str, &str)]) -> Self {
        Self::relation(name, RelationKind::OneToMany, target, links)
    }

    /// Many-to-many relation through a link entity
    pub fn many_to_many(
        name: &str,
        target: &str,
        via: &str,
        links: &[(&str, &str)],
        via_links: &[(&str, &str)],
    ) -> Self {
        let mut prop = Self::relation(name, RelationKind::ManyToMany, target, links);
        if let Some(relation) = prop.relation.as_mut() {
            relation.via = Some(via.to_string());
            relation.via_links = to_links(via_links);
        }
        prop
    }

    fn relation(name: &str, kind: RelationKind, target: &str, links: &[(&str, &str)]) -> Self {
        let mut prop = Self::new(name, kind.data_type());
        prop.access = Access::RELATION;
        prop.relation = Some(RelationModel {
            kind,
            target: target.to_string(),
            links: to_links(links),
            via: None,
            via_links: Vec::new(),
        });
        prop
    }

    /// Builder: set the storage column name
    pub fn field(mut self, field: &str) -> Self {
        self.field = field.to_string();
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Builder: mark as part of the primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Builder: database-generated key, implicitly read-only
    pub fn auto_increment(mut self) -> Self {
        self.access = Access::READ | Access::AUTO_INCREMENT;
        self
    }

    /// Builder: readable only, never written
    pub fn read_only(mut self) -> Self {
        self.access = Access::READ;
        self
    }

    /// Builder: written on insert, never updated
    pub fn insert_only(mut self) -> Self {
        self.access = Access::READ | Access::INSERT;
        self
    }

    /// Builder: computed by the application, neither selected nor stored
    pub fn calculated(mut self) -> Self {
        self.access = Access::READ | Access::CALCULATED;
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn default_rule(mut self, rule: DefaultRule) -> Self {
        self.default = rule;
        self
    }

    pub fn default_value<V: Into<Value>>(self, value: V) -> Self {
        self.default_rule(DefaultRule::Value(value.into()))
    }

    pub fn is_readable(&self) -> bool {
        self.access.contains(Access::READ)
    }

    pub fn is_insertable(&self) -> bool {
        self.access.contains(Access::INSERT) && !self.is_auto_increment()
    }

    pub fn is_updatable(&self) -> bool {
        self.access.contains(Access::UPDATE) && !self.is_auto_increment()
    }

    pub fn is_calculated(&self) -> bool {
        self.access.contains(Access::CALCULATED)
    }

    pub fn is_relation(&self) -> bool {
        self.access.contains(Access::RELATION) || self.data_type.is_relation()
    }

    pub fn is_auto_increment(&self) -> bool {
        self.access.contains(Access::AUTO_INCREMENT)
    }

    /// Whether the property maps to a selectable column
    pub fn is_stored(&self) -> bool {
        !self.is_calculated() && !self.is_relation()
    }

    /// Whether a change to this property makes the entity dirty
    pub fn is_tracked(&self) -> bool {
        self.is_stored() && (self.is_insertable() || self.is_updatable())
    }
}

fn to_links(links: &[(&str, &str)]) -> Vec<LinkModel> {
    links
        .iter()
        .map(|(local, foreign)| LinkModel::new(*local, *foreign))
        .collect()
}

/// Description of a persisted entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityModel {
    /// Entity name used in XQL
    pub name: String,

    /// Table name in storage
    pub table: String,

    /// Properties in declaration order
    properties: Vec<PropertyModel>,

    /// Primary-key property names in declaration order
    primary_keys: Vec<String>,

    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl EntityModel {
    /// Create an entity model with no properties
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            properties: Vec::new(),
            primary_keys: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Builder: append a property
    pub fn property(mut self, property: PropertyModel) -> Self {
        self.add_property(property);
        self
    }

    /// Append a property, replacing an earlier one of the same name
    pub fn add_property(&mut self, property: PropertyModel) {
        if let Some(&pos) = self.index.get(&property.name) {
            self.primary_keys.retain(|k| k != &property.name);
            if property.primary_key {
                self.primary_keys.push(property.name.clone());
            }
            self.properties[pos] = property;
            return;
        }

        if property.primary_key {
            self.primary_keys.push(property.name.clone());
        }
        self.index.insert(property.name.clone(), self.properties.len());
        self.properties.push(property);
    }

    /// Rebuild the name index after deserialization
    pub fn reindex(&mut self) {
        self.index = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
    }

    pub fn properties(&self) -> &[PropertyModel] {
        &self.properties
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn get(&self, name: &str) -> Option<&PropertyModel> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    /// Position of a property in declaration order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Look up a property or fail with an unknown-property error
    pub fn require(&self, name: &str) -> Result<&PropertyModel> {
        self.get(name)
            .ok_or_else(|| Error::unknown_property(&self.name, name))
    }

    pub fn primary_key_properties(&self) -> impl Iterator<Item = &PropertyModel> {
        self.primary_keys.iter().filter_map(|k| self.get(k))
    }

    /// Properties that map to selectable columns, in declaration order
    pub fn stored_properties(&self) -> impl Iterator<Item = &PropertyModel> {
        self.properties.iter().filter(|p| p.is_stored())
    }

    pub fn insertable_properties(&self) -> impl Iterator<Item = &PropertyModel> {
        self.stored_properties().filter(|p| p.is_insertable())
    }

    pub fn updatable_properties(&self) -> impl Iterator<Item = &PropertyModel> {
        self.stored_properties().filter(|p| p.is_updatable())
    }

    pub fn auto_increment_property(&self) -> Option<&PropertyModel> {
        self.properties.iter().find(|p| p.is_auto_increment())
    }

    pub fn relation_properties(&self) -> impl Iterator<Item = &PropertyModel> {
        self.properties.iter().filter(|p| p.relation.is_some())
    }
}

impl PartialEq for EntityModel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.table == other.table
            && self.properties == other.properties
            && self.primary_keys == other.primary_keys
    }
}
