//! Entity records

use indexmap::IndexMap;

use crate::core::field::FieldValue;
use crate::core::key::{EntityId, EntityKey};

/// A stored or about-to-be-stored record of some entity kind.
///
/// Field values are held by name; the entity's [`EntitySchema`] decides which
/// names are meaningful and how they are populated and serialized. A field
/// that was never assigned is *unset*, which serializes as null.
///
/// [`EntitySchema`]: crate::core::schema::EntitySchema
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    kind: String,
    id: Option<EntityId>,
    properties: IndexMap<String, FieldValue>,
}

impl Entity {
    /// Create a new, unkeyed entity; storage allocates an id on first put
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            properties: IndexMap::new(),
        }
    }

    /// Create a new entity bound to a caller-chosen identifier
    pub fn with_id(kind: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(kind)
        }
    }

    /// Builder-style field assignment
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get the entity kind (e.g., "widget")
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    /// The entity's key, once it has an identifier
    pub fn key(&self) -> Option<EntityKey> {
        self.id.as_ref().map(|id| EntityKey {
            kind: self.kind.clone(),
            id: id.clone(),
        })
    }

    /// Get a field value; `None` means unset
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.properties.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn unset(&mut self, name: &str) -> Option<FieldValue> {
        self.properties.shift_remove(name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Iterate over assigned fields in assignment order
    pub fn properties(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_string)
    }

    pub fn get_reference(&self, name: &str) -> Option<&EntityKey> {
        self.get(name).and_then(FieldValue::as_reference)
    }
}
