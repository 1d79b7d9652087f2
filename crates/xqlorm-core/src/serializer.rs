//! Storage serialization for Array and Object properties

use crate::error::Result;

/// Converts structured values to and from their stored string form
pub trait ValueSerializer: Send + Sync {
    fn to_storage(&self, value: &serde_json::Value) -> Result<String>;

    fn from_storage(&self, raw: &str) -> Result<serde_json::Value>;
}

/// JSON text storage
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn to_storage(&self, value: &serde_json::Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn from_storage(&self, raw: &str) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_serializer() {
        let serializer = JsonSerializer;
        let value = json!({"tags": ["a", "b"], "count": 2});

        let raw = serializer.to_storage(&value).unwrap();
        assert_eq!(serializer.from_storage(&raw).unwrap(), value);
    }

    #[test]
    fn test_json_serializer_rejects_garbage() {
        let err = JsonSerializer.from_storage("{not json").unwrap_err();
        assert!(matches!(err, crate::Error::Serialization(_)));
    }
}
