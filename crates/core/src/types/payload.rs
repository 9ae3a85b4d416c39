//! Key-value payload carried by signals

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object payload with lenient typed accessors
///
/// Getters never fail: a missing key or a value of the wrong shape yields the
/// caller's default. Numbers and booleans are also parsed from strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    data: Map<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        string_value(self.data.get(key)).unwrap_or_else(|| default.to_string())
    }

    /// Store a float; NaN and infinities become `null`
    pub fn set_number(&mut self, key: impl Into<String>, value: f64) {
        let value = serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number);
        self.data.insert(key.into(), value);
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.data.insert(key.into(), Value::Number(value.into()));
    }

    pub fn get_number(&self, key: &str, default: f64) -> f64 {
        number_value(self.data.get(key)).unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        int_value(self.data.get(key)).unwrap_or(default)
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.data.insert(key.into(), Value::Bool(value));
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        bool_value(self.data.get(key)).unwrap_or(default)
    }

    /// Store any JSON value
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Replace all entries
    pub fn set_data(&mut self, data: Map<String, Value>) {
        self.data = data;
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

pub(crate) fn string_value(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn number_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn int_value(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn bool_value(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let mut payload = Payload::new();
        payload.set_string("text", "hello");
        payload.set_int("volume", 7);
        payload.set_number("gain", 0.25);
        payload.set_bool("muted", false);

        assert_eq!(payload.get_string("text", ""), "hello");
        assert_eq!(payload.get_int("volume", 0), 7);
        assert_eq!(payload.get_number("volume", 0.0), 7.0);
        assert_eq!(payload.get_number("gain", 0.0), 0.25);
        assert!(!payload.get_bool("muted", true));
    }

    #[test]
    fn test_defaults_for_missing_or_mismatched() {
        let mut payload = Payload::new();
        payload.set_bool("flag", true);

        assert_eq!(payload.get_string("missing", "dflt"), "dflt");
        assert_eq!(payload.get_string("flag", "dflt"), "dflt");
        assert_eq!(payload.get_int("flag", -1), -1);
    }

    #[test]
    fn test_lenient_string_parsing() {
        let payload: Payload = serde_json::from_value(json!({
            "rate": "16000",
            "gain": " 0.5 ",
            "stereo": "TRUE",
        }))
        .unwrap();

        assert_eq!(payload.get_int("rate", 0), 16000);
        assert_eq!(payload.get_number("gain", 0.0), 0.5);
        assert!(payload.get_bool("stereo", false));
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut payload = Payload::new();
        payload.set_string("text", "hi");
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({"text": "hi"}));
    }
}
