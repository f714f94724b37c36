pub mod entity;
pub mod error;

pub use entity::{Entity, EntitySchema, KeyKind, Relation};
pub use error::{PersistenceError, Result, StorageError};
