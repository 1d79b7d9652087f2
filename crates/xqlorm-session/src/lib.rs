//! XQLORM Session
//!
//! The entity manager and the instance types it tracks.
//!
//! # Modules
//!
//! - `record` - Dynamic entity instances and the entity traits
//! - `snapshot` - Original values used for dirty checking
//! - `manager` - The entity manager (unit of work)
//! - `config` - Entity manager configuration

pub mod config;
pub mod manager;
pub mod record;
pub mod snapshot;

pub use config::ManagerConfig;
pub use manager::EntityManager;
pub use record::{Entity, EntityState, EntityType, Record, Related};
pub use snapshot::Snapshot;
