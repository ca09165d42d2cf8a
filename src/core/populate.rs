//! Field population from untrusted request parameters
//!
//! Each candidate field present in the source mapping is converted according
//! to its declared kind and assigned onto the target entity. A field is only
//! assigned once its whole value converted, so a rejected field never leaves
//! a partial value behind. Keys that are not candidates are ignored.

use serde_json::{Map, Value};

use crate::core::entity::Entity;
use crate::core::error::{RestError, ValidationError};
use crate::core::field::{FieldDescriptor, FieldKind, FieldValue, ScalarType, parse_millis};
use crate::core::key::{EntityId, EntityKey};
use crate::core::store::EntityStore;

/// Assign every candidate field found in `source` onto `entity`.
///
/// Stops at the first field that fails validation. Storage failures while
/// confirming references surface as [`RestError::Internal`].
pub async fn populate(
    entity: &mut Entity,
    candidates: &[&FieldDescriptor],
    source: &Map<String, Value>,
    store: &dyn EntityStore,
) -> Result<(), RestError> {
    for field in candidates {
        let Some(raw) = source.get(&field.name) else {
            continue;
        };
        let value = convert(field, raw, store).await?;
        entity.set(field.name.clone(), value);
    }
    Ok(())
}

async fn convert(
    field: &FieldDescriptor,
    raw: &Value,
    store: &dyn EntityStore,
) -> Result<FieldValue, RestError> {
    if raw.is_null() {
        return Ok(FieldValue::Null);
    }

    match (&field.kind, field.repeated) {
        (FieldKind::Timestamp, false) => Ok(timestamp(field, raw)?),
        (FieldKind::Timestamp, true) => {
            let items = raw.as_array().ok_or_else(|| invalid_datetime(field))?;
            let values = items
                .iter()
                .map(|item| timestamp(field, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FieldValue::List(values))
        }
        (FieldKind::Reference { target }, false) => {
            let key = reference_key(field, target, raw)?;
            if store.get(&key).await?.is_none() {
                tracing::debug!(field = %field.name, key = %key, "reference to missing entity");
                return Err(dangling(field).into());
            }
            Ok(FieldValue::Reference(key))
        }
        (FieldKind::Reference { target }, true) => {
            let items = raw.as_array().ok_or_else(|| ValidationError::InvalidValue {
                field: field.name.clone(),
                expected: "a list of entity identifiers".into(),
            })?;
            let keys = items
                .iter()
                .map(|item| reference_key(field, target, item))
                .collect::<Result<Vec<_>, _>>()?;
            if keys.is_empty() {
                return Ok(FieldValue::List(Vec::new()));
            }

            let found = store.get_multi(&keys).await?;
            if found.len() != keys.len() || found.iter().any(Option::is_none) {
                tracing::debug!(field = %field.name, "repeated reference to missing entity");
                return Err(dangling(field).into());
            }
            Ok(FieldValue::List(
                keys.into_iter().map(FieldValue::Reference).collect(),
            ))
        }
        (FieldKind::Scalar(scalar), false) => Ok(coerce(field, *scalar, raw)?),
        (FieldKind::Scalar(scalar), true) => {
            let items = raw.as_array().ok_or_else(|| ValidationError::InvalidValue {
                field: field.name.clone(),
                expected: format!("a list, each element {}", scalar.name()),
            })?;
            let values = items
                .iter()
                .map(|item| coerce(field, *scalar, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FieldValue::List(values))
        }
    }
}

fn timestamp(field: &FieldDescriptor, raw: &Value) -> Result<FieldValue, ValidationError> {
    parse_millis(raw)
        .map(FieldValue::DateTime)
        .ok_or_else(|| invalid_datetime(field))
}

fn coerce(
    field: &FieldDescriptor,
    scalar: ScalarType,
    raw: &Value,
) -> Result<FieldValue, ValidationError> {
    scalar
        .coerce(raw)
        .ok_or_else(|| ValidationError::InvalidValue {
            field: field.name.clone(),
            expected: scalar.name().to_string(),
        })
}

// an id that cannot name any entity is as dangling as one that names a missing entity
fn reference_key(
    field: &FieldDescriptor,
    target: &str,
    raw: &Value,
) -> Result<EntityKey, ValidationError> {
    EntityId::from_json(raw)
        .map(|id| EntityKey {
            kind: target.to_string(),
            id,
        })
        .ok_or_else(|| dangling(field))
}

fn invalid_datetime(field: &FieldDescriptor) -> ValidationError {
    ValidationError::InvalidDatetime {
        field: field.name.clone(),
    }
}

fn dangling(field: &FieldDescriptor) -> ValidationError {
    ValidationError::DanglingReference {
        field: field.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::millis_to_datetime;
    use crate::core::schema::EntitySchema;
    use crate::storage::in_memory::InMemoryEntityStore;
    use serde_json::json;

    fn widget() -> EntitySchema {
        EntitySchema::new("widget")
            .field(FieldDescriptor::string("name"))
            .field(FieldDescriptor::integer("count"))
            .field(FieldDescriptor::reference("owner", "user"))
            .field(FieldDescriptor::reference("tags", "tag").repeated())
            .field(FieldDescriptor::timestamp("created_at"))
            .field(FieldDescriptor::timestamp("seen").repeated())
            .field(FieldDescriptor::string("secret"))
            .excluded(["secret"])
            .read_only(["created_at"])
    }

    async fn store_with_fixtures() -> InMemoryEntityStore {
        let store = InMemoryEntityStore::new();
        store.put(Entity::with_id("user", "u1")).await.unwrap();
        store.put(Entity::with_id("tag", "red")).await.unwrap();
        store.put(Entity::with_id("tag", "blue")).await.unwrap();
        store
    }

    fn source(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn run(
        entity: &mut Entity,
        params: Value,
        store: &InMemoryEntityStore,
    ) -> Result<(), RestError> {
        let schema = widget();
        populate(entity, &schema.settable_fields(), &source(params), store).await
    }

    fn validation(result: Result<(), RestError>) -> ValidationError {
        match result {
            Err(RestError::Validation(err)) => err,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_populates_scalars_and_references() {
        let store = store_with_fixtures().await;
        let mut entity = Entity::new("widget");

        run(
            &mut entity,
            json!({"name": "a", "count": "3", "owner": "u1", "tags": ["red", "blue"]}),
            &store,
        )
        .await
        .unwrap();

        assert_eq!(entity.get_str("name"), Some("a"));
        assert_eq!(entity.get("count"), Some(&FieldValue::Integer(3)));
        assert_eq!(
            entity.get_reference("owner"),
            Some(&EntityKey::new("user", "u1"))
        );
        assert_eq!(
            entity.get("tags"),
            Some(&FieldValue::List(vec![
                FieldValue::Reference(EntityKey::new("tag", "red")),
                FieldValue::Reference(EntityKey::new("tag", "blue")),
            ]))
        );
    }

    #[tokio::test]
    async fn test_ignores_protected_and_unknown_keys() {
        let store = store_with_fixtures().await;
        let mut entity = Entity::new("widget");

        run(
            &mut entity,
            json!({"id": 9, "created_at": 12345, "secret": "x", "bogus": true}),
            &store,
        )
        .await
        .unwrap();

        assert!(entity.id().is_none());
        assert_eq!(entity.properties().count(), 0);
    }

    #[tokio::test]
    async fn test_dangling_single_reference() {
        let store = store_with_fixtures().await;
        let mut entity = Entity::new("widget");

        let err = validation(run(&mut entity, json!({"owner": "missing"}), &store).await);
        assert_eq!(err.to_string(), "stored key must reference an existing entity");
        assert!(!entity.is_set("owner"));

        let err = validation(run(&mut entity, json!({"owner": {"nested": 1}}), &store).await);
        assert_eq!(err.field(), "owner");
    }

    #[tokio::test]
    async fn test_repeated_reference_is_all_or_nothing() {
        let store = store_with_fixtures().await;
        let mut entity = Entity::new("widget").with(
            "tags",
            FieldValue::List(vec![FieldValue::Reference(EntityKey::new("tag", "red"))]),
        );
        let before = entity.clone();

        let err = validation(
            run(&mut entity, json!({"tags": ["blue", "missing", "red"]}), &store).await,
        );
        assert_eq!(err.to_string(), "stored key must reference an existing entity");
        assert_eq!(entity, before);
        assert_eq!(store.stats().batch_gets, 1);
    }

    #[tokio::test]
    async fn test_empty_reference_list_skips_storage() {
        let store = store_with_fixtures().await;
        let calls = store.stats().total();
        let mut entity = Entity::new("widget");

        run(&mut entity, json!({"tags": []}), &store).await.unwrap();

        assert_eq!(entity.get("tags"), Some(&FieldValue::List(Vec::new())));
        assert_eq!(store.stats().total(), calls);
    }

    #[tokio::test]
    async fn test_null_clears_without_lookup() {
        let store = store_with_fixtures().await;
        let calls = store.stats().total();
        let mut entity = Entity::new("widget").with("owner", EntityKey::new("user", "u1"));

        run(&mut entity, json!({"owner": null}), &store).await.unwrap();

        assert_eq!(entity.get("owner"), Some(&FieldValue::Null));
        assert_eq!(store.stats().total(), calls);
    }

    #[tokio::test]
    async fn test_timestamps() {
        let store = InMemoryEntityStore::new();
        let schema = EntitySchema::new("event")
            .field(FieldDescriptor::timestamp("at"))
            .field(FieldDescriptor::timestamp("seen").repeated());
        let fields = schema.settable_fields();

        let mut entity = Entity::new("event");
        populate(
            &mut entity,
            &fields,
            &source(json!({"at": 12345, "seen": [1, "2"]})),
            &store,
        )
        .await
        .unwrap();
        assert_eq!(
            entity.get("at"),
            Some(&FieldValue::DateTime(millis_to_datetime(12345).unwrap()))
        );
        assert_eq!(entity.get("seen").and_then(FieldValue::as_list).map(<[_]>::len), Some(2));

        let mut fresh = Entity::new("event");
        let err = populate(&mut fresh, &fields, &source(json!({"at": "noon"})), &store).await;
        assert_eq!(validation(err).to_string(), "failed to parse datetime");

        let err = populate(&mut fresh, &fields, &source(json!({"seen": [1, "x"]})), &store).await;
        assert_eq!(validation(err).to_string(), "failed to parse datetime");
        assert!(!fresh.is_set("seen"));
    }

    #[tokio::test]
    async fn test_scalar_type_mismatch() {
        let store = InMemoryEntityStore::new();
        let mut entity = Entity::new("widget");

        let err = validation(run(&mut entity, json!({"count": "many"}), &store).await);
        assert_eq!(
            err,
            ValidationError::InvalidValue {
                field: "count".into(),
                expected: "an integer".into()
            }
        );
    }
}
