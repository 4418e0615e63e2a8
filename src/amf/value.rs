//! AMF value types
//!
//! RTMP control and metadata messages only use a handful of AMF0 types.
//! This enum covers exactly those.

use std::collections::HashMap;

/// AMF0 value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    /// Null value (0x05)
    #[default]
    Null,

    /// Undefined value (0x06)
    Undefined,

    /// Boolean value (0x01)
    Boolean(bool),

    /// IEEE 754 double-precision floating point (0x00)
    Number(f64),

    /// UTF-8 string (0x02)
    String(String),

    /// Dense array (strict array, 0x0A)
    Array(Vec<AmfValue>),

    /// Anonymous key-value object (0x03)
    Object(HashMap<String, AmfValue>),

    /// ECMA array (0x08), laid out like an object with a count prefix
    EcmaArray(HashMap<String, AmfValue>),
}

impl AmfValue {
    /// Build an object from key/value pairs
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AmfValue)>,
    {
        AmfValue::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as a map, for objects and ECMA arrays alike
    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    /// Try to get this value as an array reference
    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    /// Get a string property from an object value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    /// Get a boolean property from an object value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<AmfValue>> From<HashMap<String, V>> for AmfValue {
    fn from(v: HashMap<String, V>) -> Self {
        AmfValue::Object(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        let s = AmfValue::String("live".into());
        assert_eq!(s.as_str(), Some("live"));
        assert_eq!(s.as_number(), None);

        let n = AmfValue::Number(1.0);
        assert_eq!(n.as_number(), Some(1.0));
        assert_eq!(n.as_bool(), None);
    }

    #[test]
    fn test_object_builder_and_lookup() {
        let obj = AmfValue::object([
            ("app", AmfValue::from("live")),
            ("objectEncoding", AmfValue::Number(0.0)),
            ("fpad", AmfValue::Boolean(false)),
        ]);

        assert_eq!(obj.get_string("app"), Some("live"));
        assert_eq!(obj.get_number("objectEncoding"), Some(0.0));
        assert_eq!(obj.get_bool("fpad"), Some(false));
        assert_eq!(obj.get("missing"), None);
    }

    #[test]
    fn test_ecma_array_reads_like_object() {
        let mut props = HashMap::new();
        props.insert("width".to_string(), AmfValue::Number(1280.0));
        let ecma = AmfValue::EcmaArray(props);

        assert_eq!(ecma.get_number("width"), Some(1280.0));
        assert!(ecma.as_array().is_none());
    }

    #[test]
    fn test_null_and_undefined() {
        assert!(AmfValue::Null.is_null_or_undefined());
        assert!(AmfValue::Undefined.is_null_or_undefined());
        assert!(!AmfValue::Boolean(false).is_null_or_undefined());
        assert_eq!(AmfValue::default(), AmfValue::Null);
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(AmfValue::from(true), AmfValue::Boolean(true));
        assert_eq!(AmfValue::from(3u32), AmfValue::Number(3.0));
        assert_eq!(
            AmfValue::from(vec![false, false]),
            AmfValue::Array(vec![AmfValue::Boolean(false), AmfValue::Boolean(false)])
        );
        assert!(matches!(AmfValue::from(String::from("x")), AmfValue::String(_)));
    }
}
