//! Entity identifiers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tree::{Record, Segment, Value};

/// The key an entity is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Num(i64),
    Text(String),
}

impl EntityId {
    /// Read an id out of a value. Only integers and strings qualify.
    pub fn from_value(value: &Value) -> Option<EntityId> {
        match value {
            Value::Int(n) => Some(EntityId::Num(*n)),
            Value::Text(s) => Some(EntityId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Num(n) => Value::Int(*n),
            EntityId::Text(s) => Value::Text(s.clone()),
        }
    }

    /// The path segment addressing this entity inside its collection.
    ///
    /// Non-negative numbers become index segments, the same segment the
    /// path parser produces for their decimal form. Text ids are always key
    /// segments, so `Text("3")` and `Num(3)` publish at distinct paths even
    /// though both display as `3`. Subscribe to a numeric-looking text id
    /// with `PathPattern::from(collection.entity_path(&id))`.
    pub fn to_segment(&self) -> Segment {
        match self {
            EntityId::Num(n) => match usize::try_from(*n) {
                Ok(index) => Segment::Index(index),
                Err(_) => Segment::Key(Arc::from(n.to_string())),
            },
            EntityId::Text(s) => Segment::Key(Arc::from(s.as_str())),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Num(n) => write!(f, "{n}"),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Num(n)
    }
}

impl From<i32> for EntityId {
    fn from(n: i32) -> Self {
        EntityId::Num(i64::from(n))
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId::Text(s)
    }
}

impl From<&EntityId> for EntityId {
    fn from(id: &EntityId) -> Self {
        id.clone()
    }
}

/// Computes the id of an entity. `None` means the entity has no id.
pub type IdSelector = Arc<dyn Fn(&Record) -> Option<EntityId> + Send + Sync>;

/// Selector reading the `id` field.
pub fn default_selector() -> IdSelector {
    field_selector("id")
}

/// Selector reading the given field.
pub fn field_selector(field: impl Into<String>) -> IdSelector {
    let field = field.into();
    Arc::new(move |record: &Record| record.get(&field).and_then(EntityId::from_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn only_numbers_address_index_segments() {
        assert_eq!(EntityId::from(3).to_segment(), Segment::Index(3));
        assert_eq!(EntityId::from("3").to_segment(), Segment::Key("3".into()));
        assert_eq!(EntityId::from("u1").to_segment(), Segment::Key("u1".into()));
        assert_eq!(EntityId::from(-2).to_segment(), Segment::Key("-2".into()));
    }

    #[test]
    fn default_selector_reads_id_field() {
        let selector = default_selector();
        assert_eq!(selector(&record! { "id" => 1 }), Some(EntityId::Num(1)));
        assert_eq!(selector(&record! { "id" => "a" }), Some(EntityId::from("a")));
        assert_eq!(selector(&record! { "id" => true }), None);
        assert_eq!(selector(&record! { "name" => "x" }), None);
    }

    #[test]
    fn field_selector_reads_custom_field() {
        let selector = field_selector("slug");
        assert_eq!(
            selector(&record! { "id" => 1, "slug" => "intro" }),
            Some(EntityId::from("intro"))
        );
    }

    #[test]
    fn serializes_untagged() {
        assert_eq!(serde_json::to_string(&EntityId::from(4)).unwrap(), "4");
        assert_eq!(serde_json::to_string(&EntityId::from("x")).unwrap(), "\"x\"");
    }
}
