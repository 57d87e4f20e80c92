mod document;
mod entity;

pub use document::{Document, KEY_FIELD, REV_FIELD, TYPE_FIELD};
pub use entity::{EntityDefinition, EntityKind, RangeView, Uniqueness};
