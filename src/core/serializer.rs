//! Entity serialization to the JSON wire form
//!
//! Timestamps render as epoch milliseconds. Reference fields render either
//! as the bare referenced identifier or, when resolution is on, as the
//! referenced entity's own default serialization. A repeated reference field
//! is resolved with a single batch fetch. Resolution nests up to a fixed
//! depth; past it references stay bare, which also bounds reference cycles.
//!
//! A reference whose target no longer exists renders as `null`; in a
//! repeated field the element becomes `null` and keeps its position.

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};

use crate::core::entity::Entity;
use crate::core::field::FieldValue;
use crate::core::key::EntityKey;
use crate::core::schema::{ID_FIELD, SchemaSet};
use crate::core::store::EntityStore;

/// Default number of nested reference levels that are expanded
pub const DEFAULT_REFERENCE_DEPTH: usize = 2;

/// Per-call overrides of a type's serialization defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeOptions<'a> {
    /// Replaces the type's allow-list
    pub include: Option<&'a [String]>,
    /// Added to the type's excluded fields
    pub exclude: &'a [String],
    /// Overrides the type's `resolve_references` flag
    pub resolve_references: Option<bool>,
}

/// Renders entities using the registered schemas
pub struct Serializer<'a> {
    store: &'a dyn EntityStore,
    schemas: &'a SchemaSet,
    max_depth: usize,
}

impl<'a> Serializer<'a> {
    pub fn new(store: &'a dyn EntityStore, schemas: &'a SchemaSet) -> Self {
        Self {
            store,
            schemas,
            max_depth: DEFAULT_REFERENCE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Serialize one entity
    pub async fn serialize(&self, entity: &Entity, options: SerializeOptions<'_>) -> Result<Value> {
        let resolve = options.resolve_references.unwrap_or_else(|| {
            self.schemas
                .get(entity.kind())
                .is_none_or(|schema| schema.resolves_references())
        });
        self.render(entity, options.include, options.exclude, resolve, 0)
            .await
            .map(Value::Object)
    }

    /// Serialize each entity with the type defaults
    pub async fn serialize_all(&self, entities: &[Entity]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(entities.len());
        for entity in entities {
            out.push(self.serialize(entity, SerializeOptions::default()).await?);
        }
        Ok(out)
    }

    fn render<'s>(
        &'s self,
        entity: &'s Entity,
        include: Option<&'s [String]>,
        exclude: &'s [String],
        resolve: bool,
        depth: usize,
    ) -> BoxFuture<'s, Result<Map<String, Value>>> {
        async move {
            let mut out = Map::new();
            let id = entity.id().map_or(Value::Null, |id| id.to_json());

            let Some(schema) = self.schemas.get(entity.kind()) else {
                // no declared fields: emit what the record holds
                out.insert(ID_FIELD.to_string(), id);
                for (name, value) in entity.properties() {
                    out.insert(name.to_string(), value.to_json());
                }
                return Ok(out);
            };

            let selection = schema.serialized_fields(include, exclude);
            if selection.include_id {
                out.insert(ID_FIELD.to_string(), id);
            }

            let expand = resolve && depth < self.max_depth;
            for field in selection.fields {
                let value = match entity.get(&field.name) {
                    None => Value::Null,
                    Some(value) if expand && field.is_reference() => {
                        self.expand(value, depth + 1).await?
                    }
                    Some(value) => value.to_json(),
                };
                out.insert(field.name.clone(), value);
            }

            Ok(out)
        }
        .boxed()
    }

    async fn expand(&self, value: &FieldValue, depth: usize) -> Result<Value> {
        match value {
            FieldValue::Reference(key) => match self.store.get(key).await? {
                Some(target) => self.nested(&target, depth).await,
                None => {
                    tracing::debug!(key = %key, "referenced entity is gone, rendering null");
                    Ok(Value::Null)
                }
            },
            FieldValue::List(items) => {
                let keys: Vec<EntityKey> = items
                    .iter()
                    .filter_map(FieldValue::as_reference)
                    .cloned()
                    .collect();
                if keys.is_empty() {
                    return Ok(Value::Array(items.iter().map(|_| Value::Null).collect()));
                }

                let mut found = self.store.get_multi(&keys).await?.into_iter();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let rendered = match (item, item.as_reference().and_then(|_| found.next())) {
                        (FieldValue::Reference(_), Some(Some(target))) => {
                            self.nested(&target, depth).await?
                        }
                        _ => Value::Null,
                    };
                    out.push(rendered);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other.to_json()),
        }
    }

    async fn nested(&self, target: &Entity, depth: usize) -> Result<Value> {
        let resolve = self
            .schemas
            .get(target.kind())
            .is_none_or(|schema| schema.resolves_references());
        self.render(target, None, &[], resolve, depth)
            .await
            .map(Value::Object)
    }
}
