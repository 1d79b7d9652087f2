//! Entity manager configuration

use serde::{Deserialize, Serialize};

/// Entity manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Watch every entity materialized from a select
    pub watch_loaded: bool,

    /// Attach deferred sub-queries for lazy relations to loaded entities
    pub attach_lazy: bool,

    /// Log every statement at info level instead of debug
    pub log_sql: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            watch_loaded: true,
            attach_lazy: true,
            log_sql: false,
        }
    }
}

impl ManagerConfig {
    /// Builder: set whether loaded entities are watched
    pub fn watch_loaded(mut self, enabled: bool) -> Self {
        self.watch_loaded = enabled;
        self
    }

    /// Builder: set whether lazy relations are attached on load
    pub fn attach_lazy(mut self, enabled: bool) -> Self {
        self.attach_lazy = enabled;
        self
    }

    /// Builder: set whether statements are logged at info level
    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert!(config.watch_loaded);
        assert!(config.attach_lazy);
        assert!(!config.log_sql);
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: ManagerConfig = serde_json::from_str(r#"{"log_sql": true}"#).unwrap();
        assert_eq!(config, ManagerConfig::default().log_sql(true));
    }
}
