use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How an entity's key is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Integer key drawn from a per-table sequence; `0` means unset.
    #[default]
    Sequence,
    /// Random v4 UUID; the nil UUID means unset.
    Uuid,
    /// Supplied by the caller; never generated.
    Assigned,
}

impl KeyKind {
    /// Returns true if `key` is the "not yet assigned" value for this kind.
    pub fn is_unset(&self, key: &Value) -> bool {
        match key {
            Value::Null => true,
            Value::Number(n) => *self == KeyKind::Sequence && n.as_i64() == Some(0),
            Value::String(s) => match self {
                KeyKind::Uuid => s.parse::<uuid::Uuid>().map(|u| u.is_nil()).unwrap_or(true),
                _ => s.is_empty(),
            },
            _ => false,
        }
    }
}

/// A to-one reference from one table to another.
///
/// `name` is the field holding the related entity in the serialized form,
/// `foreign_key` the field holding its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub foreign_key: &'static str,
    pub target: &'static str,
}

impl Relation {
    pub const fn new(name: &'static str, foreign_key: &'static str, target: &'static str) -> Self {
        Self {
            name,
            foreign_key,
            target,
        }
    }
}

/// Table-level description of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    table: &'static str,
    key: &'static str,
    key_kind: KeyKind,
    relations: Vec<Relation>,
}

impl EntitySchema {
    pub fn new(table: &'static str, key: &'static str, key_kind: KeyKind) -> Self {
        Self {
            table,
            key,
            key_kind,
            relations: Vec::new(),
        }
    }

    pub fn with_relations(mut self, relations: Vec<Relation>) -> Self {
        self.relations = relations;
        self
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// A persistable value type.
///
/// Identity and relations are described through explicit accessors rather
/// than discovered at runtime. Relation fields should be
/// `Option<Related>` with `#[serde(default)]` so that an unloaded relation
/// deserializes as `None`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Id: Serialize + Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    const TABLE: &'static str;
    const KEY: &'static str;
    const KEY_KIND: KeyKind = KeyKind::Sequence;

    fn id(&self) -> Self::Id;

    fn relations() -> Vec<Relation> {
        Vec::new()
    }

    fn schema() -> EntitySchema {
        EntitySchema::new(Self::TABLE, Self::KEY, Self::KEY_KIND).with_relations(Self::relations())
    }

    /// True while the entity has no key, i.e. it was never added.
    fn is_transient(&self) -> bool {
        serde_json::to_value(self.id())
            .map(|key| Self::KEY_KIND.is_unset(&key))
            .unwrap_or(true)
    }
}
