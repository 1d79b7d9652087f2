//! Original values captured when an entity starts being watched

use crate::record::Record;
use xqlorm_core::Value;

/// Values of a watched entity as last read from or written to storage
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    entity: String,
    key: String,
    values: Vec<Value>,
}

impl Snapshot {
    /// Capture the current values of a record with a known primary key
    pub fn capture(record: &Record, key: &str) -> Self {
        Self {
            entity: record.entity_name().to_string(),
            key: key.to_string(),
            values: record.values().to_vec(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Primary-key text at capture time
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Captured value of a property
    pub fn original(&self, record: &Record, name: &str) -> Value {
        record
            .model()
            .position(name)
            .and_then(|i| self.values.get(i))
            .cloned()
            .unwrap_or_default()
    }

    /// True if any insertable or updatable stored property differs
    pub fn is_modified(&self, record: &Record) -> bool {
        record
            .model()
            .properties()
            .iter()
            .zip(record.values().iter().zip(&self.values))
            .any(|(property, (current, original))| property.is_tracked() && current != original)
    }

    /// Copy every readable property back onto `record`
    pub fn restore_into(&self, record: &mut Record) {
        let readable: Vec<usize> = record
            .model()
            .properties()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_readable() && !p.is_relation())
            .map(|(i, _)| i)
            .collect();
        for index in readable {
            if let Some(value) = self.values.get(index) {
                record.set_at(index, value.clone());
            }
        }
    }
}
