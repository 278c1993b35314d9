//! Plain data values.
//!
//! The tree stores a closed set of value shapes. Only [`Value::Record`] is a
//! container; everything else, lists and [`Opaque`] values included, is a
//! leaf and lives in a single cell. There is no runtime guessing about
//! whether something "looks like" a plain object: the variant decides.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Named children of a container, in insertion order.
pub type Record = IndexMap<String, Value>;

/// A plain data value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Lists are leaves: the whole list lives in one cell.
    List(Vec<Value>),
    /// The only container shape.
    Record(Record),
    Opaque(Opaque),
}

/// Values that are never recursed into, whatever their internal structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opaque {
    Timestamp(DateTime<Utc>),
    /// A regular expression source.
    Pattern(String),
    Bytes(Vec<u8>),
    Error { message: String },
    Url(String),
    /// Keyed collection with non-string keys.
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    /// Reference to something owned by the host (a callable, a pending
    /// task). Only its identity is stored.
    Handle { kind: String, id: u64 },
}

impl Value {
    /// Whether this value materializes as a container.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Record(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Opaque(opaque) => opaque.type_name(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Look up a direct child of a record.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record().and_then(|record| record.get(key))
    }

    /// Convert any serializable value through its JSON form.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Value> {
        Ok(Value::from(serde_json::to_value(value)?))
    }

    /// Convert into a typed value through the JSON projection.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// Project onto JSON.
    ///
    /// Opaque values lose their tag: timestamps become RFC 3339 strings,
    /// bytes and sets become arrays, maps become arrays of pairs, handles
    /// become `"kind#id"` strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(record) => Json::Object(
                record
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Opaque(opaque) => opaque.to_json(),
        }
    }

    /// Parse a JSON document. Objects become records, integers that fit
    /// `i64` become `Int`.
    pub fn from_json(json: &str) -> Result<Value> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        Ok(Value::from(parsed))
    }
}

impl Opaque {
    pub fn type_name(&self) -> &'static str {
        match self {
            Opaque::Timestamp(_) => "timestamp",
            Opaque::Pattern(_) => "pattern",
            Opaque::Bytes(_) => "bytes",
            Opaque::Error { .. } => "error",
            Opaque::Url(_) => "url",
            Opaque::Map(_) => "map",
            Opaque::Set(_) => "set",
            Opaque::Handle { .. } => "handle",
        }
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Opaque::Timestamp(at) => Json::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Opaque::Pattern(source) | Opaque::Url(source) => Json::String(source.clone()),
            Opaque::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Opaque::Error { message } => serde_json::json!({ "message": message }),
            Opaque::Map(entries) => Json::Array(
                entries
                    .iter()
                    .map(|(key, value)| Json::Array(vec![key.to_json(), value.to_json()]))
                    .collect(),
            ),
            Opaque::Set(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Opaque::Handle { kind, id } => Json::String(format!("{kind}#{id}")),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Value::Opaque(opaque)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(at: DateTime<Utc>) -> Self {
        Value::Opaque(Opaque::Timestamp(at))
    }
}

/// Build a [`Record`] from `key => value` pairs.
///
/// ```rust
/// use canopy_core::record;
///
/// let user = record! { "id" => 1, "name" => "Ada" };
/// assert_eq!(user.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::tree::Record::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::tree::Record::new();
        $( record.insert(::std::string::String::from($key), $crate::tree::Value::from($value)); )+
        record
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;

    #[test]
    fn only_records_are_containers() {
        assert!(Value::Record(Record::new()).is_container());
        assert!(!Value::List(vec![Value::Int(1)]).is_container());
        assert!(!Value::Opaque(Opaque::Map(vec![])).is_container());
        assert!(!Value::Opaque(Opaque::Set(vec![])).is_container());
    }

    #[test]
    fn json_numbers_keep_integers() {
        let value = Value::from(serde_json::json!({ "a": 1, "b": 1.5, "c": [true, null] }));
        assert_eq!(value.get("a"), Some(&Value::Int(1)));
        assert_eq!(value.get("b"), Some(&Value::Float(1.5)));
        assert_eq!(
            value.get("c"),
            Some(&Value::List(vec![Value::Bool(true), Value::Null]))
        );
    }

    #[test]
    fn opaque_values_project_to_json() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            Value::from(at).to_json(),
            serde_json::json!("2024-05-01T12:00:00.000Z")
        );
        assert_eq!(
            Value::Opaque(Opaque::Handle { kind: "fn".into(), id: 3 }).to_json(),
            serde_json::json!("fn#3")
        );
    }

    #[test]
    fn typed_round_trip_through_values() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct User {
            id: i64,
            name: String,
        }

        let user = User { id: 4, name: "Ada".into() };
        let value = Value::from_serialize(&user).unwrap();
        assert_eq!(value.get("name"), Some(&Value::from("Ada")));

        let back: User = value.deserialize_into().unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn record_macro_builds_in_order() {
        let record = record! { "b" => 2, "a" => "x" };
        let keys: Vec<_> = record.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(record["a"], Value::from("x"));
    }

    #[test]
    fn parse_json_documents() {
        let value = Value::from_json(r#"{ "user": { "name": "Ada", "age": 36 } }"#).unwrap();
        assert_eq!(value.get("user").and_then(|u| u.get("age")), Some(&Value::Int(36)));
        assert!(Value::from_json("{ nope").is_err());
    }
}
