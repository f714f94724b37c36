#![allow(dead_code)]

use scoped_persistence::{
    Entity, KeyKind, MemorySession, MemoryStore, Persistence, PersistenceOptions, Relation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub bar_id: Uuid,
    pub name: String,
}

impl Entity for Bar {
    type Id = Uuid;
    const TABLE: &'static str = "bars";
    const KEY: &'static str = "bar_id";
    const KEY_KIND: KeyKind = KeyKind::Uuid;

    fn id(&self) -> Uuid {
        self.bar_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Foo {
    pub foo_id: i64,
    pub name: String,
    #[serde(default)]
    pub bar_id: Option<Uuid>,
    #[serde(default)]
    pub bar: Option<Bar>,
}

impl Entity for Foo {
    type Id = i64;
    const TABLE: &'static str = "foos";
    const KEY: &'static str = "foo_id";

    fn id(&self) -> i64 {
        self.foo_id
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::new("bar", "bar_id", "bars")]
    }
}

pub fn bar(name: &str) -> Bar {
    Bar {
        bar_id: Uuid::nil(),
        name: name.to_string(),
    }
}

pub fn foo(name: &str) -> Foo {
    Foo {
        foo_id: 0,
        name: name.to_string(),
        bar_id: None,
        bar: None,
    }
}

pub fn foo_with_bar(name: &str, bar_name: &str) -> Foo {
    Foo {
        bar: Some(bar(bar_name)),
        ..foo(name)
    }
}

pub fn store() -> MemoryStore {
    MemoryStore::builder()
        .register::<Bar>()
        .register::<Foo>()
        .build()
        .unwrap()
}

pub fn setup(options: PersistenceOptions) -> (MemoryStore, Persistence<MemorySession>) {
    let store = store();
    let persistence = Persistence::memory(&store, options).unwrap();
    (store, persistence)
}

pub fn foo_rows(store: &MemoryStore) -> usize {
    store.row_count(Foo::TABLE).unwrap()
}
