//! Downlink directive messages

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::payload::{bool_value, int_value, number_value, string_value};
use super::signal::iso_timestamp;

/// Downlink command (platform → terminal)
///
/// `parameters` is accepted either as a JSON object or as a string holding a
/// JSON object; anything else deserializes to an empty map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default = "iso_timestamp")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_parameters")]
    pub parameters: Map<String, Value>,
}

impl Directive {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            timestamp: iso_timestamp(),
            parameters,
        }
    }

    pub fn string_parameter(&self, key: &str, default: &str) -> String {
        string_value(self.parameters.get(key)).unwrap_or_else(|| default.to_string())
    }

    pub fn int_parameter(&self, key: &str, default: i64) -> i64 {
        int_value(self.parameters.get(key)).unwrap_or(default)
    }

    pub fn number_parameter(&self, key: &str, default: f64) -> f64 {
        number_value(self.parameters.get(key)).unwrap_or(default)
    }

    pub fn bool_parameter(&self, key: &str, default: bool) -> bool {
        bool_value(self.parameters.get(key)).unwrap_or(default)
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

/// Ids sometimes arrive as numbers
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_parameters<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        Value::String(s) if !s.is_empty() => match serde_json::from_str(&s) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    })
}
