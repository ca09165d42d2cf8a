//! Verb-to-workflow dispatch for exposed entity types
//!
//! | Verb   | Id      | Workflow                                                   |
//! |--------|---------|------------------------------------------------------------|
//! | GET    | absent  | list hook, fetch all, keep what `read` allows              |
//! | GET    | present | fetch (404), `read` (403)                                  |
//! | POST   | absent  | new entity, populate (400), `create` (403), persist        |
//! | POST   | present | fetch, populate (400), 404 if absent, `update` (403), persist |
//! | PUT    | present | fetch, populate (400), `create` or `update` (403), persist |
//! | PATCH  | present | fetch (404), populate (400), `update` (403), persist       |
//! | DELETE | present | fetch (404), `delete` (403), delete                        |
//!
//! PUT, PATCH and DELETE without an id are 405 before storage is touched.
//! Population always runs before the gate, so malformed input is reported
//! as 400 even when the caller would be denied.

use axum::http::Method;
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::core::auth::{AccessPolicy, Action, can_list, can_perform};
use crate::core::entity::Entity;
use crate::core::error::RestError;
use crate::core::key::{EntityId, EntityKey};
use crate::core::populate::populate;
use crate::core::request::RequestContext;
use crate::core::schema::{EntitySchema, SchemaSet};
use crate::core::serializer::{DEFAULT_REFERENCE_DEPTH, SerializeOptions, Serializer};
use crate::core::store::EntityStore;

/// HTTP verbs that map onto an entity workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Verb::Get),
            Method::POST => Some(Verb::Post),
            Method::PUT => Some(Verb::Put),
            Method::PATCH => Some(Verb::Patch),
            Method::DELETE => Some(Verb::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity type as exposed over REST: its schema plus its access policy
#[derive(Clone)]
pub struct ExposedEntity {
    pub schema: Arc<EntitySchema>,
    pub policy: Arc<dyn AccessPolicy>,
}

impl ExposedEntity {
    pub fn new(schema: EntitySchema, policy: impl AccessPolicy + 'static) -> Self {
        Self {
            schema: Arc::new(schema),
            policy: Arc::new(policy),
        }
    }

    pub fn kind(&self) -> &str {
        self.schema.kind()
    }
}

/// Runs entity workflows against the storage collaborator
pub struct RestDispatcher {
    store: Arc<dyn EntityStore>,
    schemas: Arc<SchemaSet>,
    max_reference_depth: usize,
}

impl RestDispatcher {
    pub fn new(store: Arc<dyn EntityStore>, schemas: Arc<SchemaSet>) -> Self {
        Self {
            store,
            schemas,
            max_reference_depth: DEFAULT_REFERENCE_DEPTH,
        }
    }

    pub fn with_max_reference_depth(mut self, depth: usize) -> Self {
        self.max_reference_depth = depth;
        self
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Run the workflow for `verb` on `target`, returning the response body
    pub async fn dispatch(
        &self,
        target: &ExposedEntity,
        verb: Verb,
        id: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Value, RestError> {
        let id = id.and_then(EntityId::parse);

        match (verb, id) {
            (Verb::Get, None) => self.list(target, ctx).await,
            (Verb::Get, Some(id)) => self.read(target, id, ctx).await,
            (Verb::Post, None) => self.create(target, ctx).await,
            (Verb::Post, Some(id)) => self.save(target, id, false, ctx).await,
            (Verb::Put, Some(id)) => self.save(target, id, true, ctx).await,
            (Verb::Patch, Some(id)) => self.patch(target, id, ctx).await,
            (Verb::Delete, Some(id)) => self.delete(target, id, ctx).await,
            (verb @ (Verb::Put | Verb::Patch | Verb::Delete), None) => {
                Err(RestError::MethodNotAllowed {
                    method: verb.to_string(),
                })
            }
        }
    }

    async fn list(&self, target: &ExposedEntity, ctx: &RequestContext) -> Result<Value, RestError> {
        if !can_list(target.policy.as_ref(), &ctx.identity).await {
            return Err(forbidden(target, "list"));
        }

        let mut visible = Vec::new();
        for entity in self.store.query(target.kind()).await? {
            if can_perform(target.policy.as_ref(), Action::Read, &ctx.identity, &entity).await {
                visible.push(entity);
            }
        }

        let items = self.serializer().serialize_all(&visible).await?;
        Ok(Value::Array(items))
    }

    async fn read(
        &self,
        target: &ExposedEntity,
        id: EntityId,
        ctx: &RequestContext,
    ) -> Result<Value, RestError> {
        let entity = self.fetch(target, id).await?;
        self.authorize(target, Action::Read, ctx, &entity).await?;
        self.render(&entity).await
    }

    async fn create(&self, target: &ExposedEntity, ctx: &RequestContext) -> Result<Value, RestError> {
        let mut entity = Entity::new(target.kind());
        self.populate(target, &mut entity, ctx).await?;
        self.authorize(target, Action::Create, ctx, &entity).await?;
        let entity = self.persist(target, entity).await?;
        self.render(&entity).await
    }

    /// POST and PUT with an id: build a fresh entity bound to the id.
    ///
    /// Fields callers can never set are carried over from the stored entity.
    /// Without `upsert` a missing entity is 404, reported after population.
    async fn save(
        &self,
        target: &ExposedEntity,
        id: EntityId,
        upsert: bool,
        ctx: &RequestContext,
    ) -> Result<Value, RestError> {
        let key = EntityKey {
            kind: target.kind().to_string(),
            id,
        };
        let existing = self.store.get(&key).await?;

        let mut entity = Entity::with_id(target.kind(), key.id.clone());
        if let Some(stored) = &existing {
            for field in target.schema.fields() {
                if target.schema.is_protected(&field.name) {
                    if let Some(value) = stored.get(&field.name) {
                        entity.set(field.name.clone(), value.clone());
                    }
                }
            }
        }

        self.populate(target, &mut entity, ctx).await?;

        let action = match existing {
            Some(_) => Action::Update,
            None if upsert => Action::Create,
            None => {
                return Err(RestError::NotFound {
                    kind: key.kind,
                    id: key.id,
                });
            }
        };
        self.authorize(target, action, ctx, &entity).await?;
        let entity = self.persist(target, entity).await?;
        self.render(&entity).await
    }

    async fn patch(
        &self,
        target: &ExposedEntity,
        id: EntityId,
        ctx: &RequestContext,
    ) -> Result<Value, RestError> {
        let mut entity = self.fetch(target, id).await?;
        self.populate(target, &mut entity, ctx).await?;
        self.authorize(target, Action::Update, ctx, &entity).await?;
        let entity = self.persist(target, entity).await?;
        self.render(&entity).await
    }

    async fn delete(
        &self,
        target: &ExposedEntity,
        id: EntityId,
        ctx: &RequestContext,
    ) -> Result<Value, RestError> {
        let entity = self.fetch(target, id).await?;
        self.authorize(target, Action::Delete, ctx, &entity).await?;

        let body = self.render(&entity).await?;
        if let Some(key) = entity.key() {
            self.store.delete(&key).await?;
        }
        Ok(body)
    }

    async fn fetch(&self, target: &ExposedEntity, id: EntityId) -> Result<Entity, RestError> {
        let key = EntityKey {
            kind: target.kind().to_string(),
            id,
        };
        match self.store.get(&key).await? {
            Some(entity) => Ok(entity),
            None => Err(RestError::NotFound {
                kind: key.kind,
                id: key.id,
            }),
        }
    }

    async fn populate(
        &self,
        target: &ExposedEntity,
        entity: &mut Entity,
        ctx: &RequestContext,
    ) -> Result<(), RestError> {
        let candidates = target.schema.settable_fields();
        populate(
            entity,
            &candidates,
            ctx.population_source(),
            self.store.as_ref(),
        )
        .await
    }

    async fn authorize(
        &self,
        target: &ExposedEntity,
        action: Action,
        ctx: &RequestContext,
        entity: &Entity,
    ) -> Result<(), RestError> {
        if can_perform(target.policy.as_ref(), action, &ctx.identity, entity).await {
            return Ok(());
        }
        tracing::debug!(
            kind = target.kind(),
            action = %action,
            user = ctx.identity.username.as_deref().unwrap_or("anonymous"),
            "request denied"
        );
        Err(forbidden(target, action.as_str()))
    }

    async fn persist(&self, target: &ExposedEntity, mut entity: Entity) -> Result<Entity, RestError> {
        target.schema.apply_auto_timestamps(&mut entity, Utc::now());
        target.schema.check_required(&entity)?;

        let key = self.store.put(entity.clone()).await?;
        entity.set_id(key.id);
        Ok(entity)
    }

    async fn render(&self, entity: &Entity) -> Result<Value, RestError> {
        Ok(self
            .serializer()
            .serialize(entity, SerializeOptions::default())
            .await?)
    }

    fn serializer(&self) -> Serializer<'_> {
        Serializer::new(self.store.as_ref(), &self.schemas).with_max_depth(self.max_reference_depth)
    }
}

fn forbidden(target: &ExposedEntity, operation: &'static str) -> RestError {
    RestError::Forbidden {
        kind: target.kind().to_string(),
        operation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::{Identity, RulePolicy};
    use crate::core::error::ValidationError;
    use crate::core::field::{FieldDescriptor, FieldValue};
    use crate::core::request::RequestParams;
    use crate::storage::in_memory::InMemoryEntityStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Allows everything and counts delete checks
    #[derive(Default)]
    struct Counting {
        delete_checks: AtomicUsize,
    }

    #[async_trait]
    impl AccessPolicy for Counting {
        async fn can_create(&self, _: &Identity, _: &Entity) -> Result<bool> {
            Ok(true)
        }
        async fn can_read(&self, _: &Identity, _: &Entity) -> Result<bool> {
            Ok(true)
        }
        async fn can_update(&self, _: &Identity, _: &Entity) -> Result<bool> {
            Ok(true)
        }
        async fn can_delete(&self, _: &Identity, _: &Entity) -> Result<bool> {
            self.delete_checks.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    /// Reads only entities flagged visible
    struct VisibleOnly;

    #[async_trait]
    impl AccessPolicy for VisibleOnly {
        async fn can_read(&self, _: &Identity, entity: &Entity) -> Result<bool> {
            Ok(entity.get("visible") == Some(&FieldValue::Boolean(true)))
        }
    }

    fn widget_schema() -> EntitySchema {
        EntitySchema::new("widget")
            .resource("widgets")
            .field(FieldDescriptor::string("name"))
            .field(FieldDescriptor::reference("owner", "user"))
            .field(FieldDescriptor::timestamp("created_at").auto_now_add())
            .field(FieldDescriptor::boolean("visible"))
            .read_only(["created_at"])
    }

    struct Fixture {
        store: InMemoryEntityStore,
        dispatcher: RestDispatcher,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryEntityStore::new();
        store
            .put(Entity::with_id("user", "u1").with("name", "Ann"))
            .await
            .unwrap();

        let mut schemas = SchemaSet::new();
        schemas.insert(Arc::new(widget_schema()));
        schemas.insert(Arc::new(
            EntitySchema::new("user").field(FieldDescriptor::string("name")),
        ));
        let dispatcher = RestDispatcher::new(Arc::new(store.clone()), Arc::new(schemas));
        Fixture { store, dispatcher }
    }

    fn exposed(policy: impl AccessPolicy + 'static) -> ExposedEntity {
        ExposedEntity::new(widget_schema(), policy)
    }

    fn body(value: Value) -> RequestContext {
        RequestContext::anonymous(RequestParams::from_body(
            value.as_object().cloned().unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_create_sets_server_timestamp_and_resolves_owner() {
        let fx = fixture().await;
        let ctx = body(json!({"name": "a", "owner": "u1", "created_at": 12345}));

        let out = fx
            .dispatcher
            .dispatch(&exposed(RulePolicy::public()), Verb::Post, None, &ctx)
            .await
            .unwrap();

        assert_eq!(out["id"], json!(1));
        assert_eq!(out["name"], json!("a"));
        assert_eq!(out["owner"], json!({"id": "u1", "name": "Ann"}));
        assert_ne!(out["created_at"], json!(12345));
        assert!(out["created_at"].as_i64().is_some());
        assert_eq!(fx.store.count("widget").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validation_beats_authorization() {
        let fx = fixture().await;
        let ctx = body(json!({"name": "a", "owner": "missing"}));

        let err = fx
            .dispatcher
            .dispatch(&exposed(RulePolicy::default()), Verb::Post, None, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RestError::Validation(ValidationError::DanglingReference { .. })
        ));
        assert_eq!(fx.store.count("widget").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_denied_create_is_not_persisted() {
        let fx = fixture().await;
        let err = fx
            .dispatcher
            .dispatch(&exposed(RulePolicy::default()), Verb::Post, None, &body(json!({"name": "a"})))
            .await
            .unwrap_err();

        assert!(matches!(err, RestError::Forbidden { operation: "create", .. }));
        assert_eq!(fx.store.stats().puts, 1);
    }

    #[tokio::test]
    async fn test_put_creates_with_requested_id() {
        let fx = fixture().await;
        let out = fx
            .dispatcher
            .dispatch(&exposed(RulePolicy::public()), Verb::Put, Some("7"), &body(json!({"name": "b"})))
            .await
            .unwrap();

        assert_eq!(out["id"], json!(7));
        let stored = fx.store.get(&EntityKey::new("widget", 7)).await.unwrap();
        assert_eq!(stored.unwrap().get_str("name"), Some("b"));
    }

    #[tokio::test]
    async fn test_post_with_missing_id_is_not_found_after_population() {
        let fx = fixture().await;
        let policy = RulePolicy::public();

        let err = fx
            .dispatcher
            .dispatch(&exposed(policy.clone()), Verb::Post, Some("7"), &body(json!({"name": "b"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::NotFound { .. }));

        let err = fx
            .dispatcher
            .dispatch(&exposed(policy), Verb::Post, Some("7"), &body(json!({"owner": "nobody"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Validation(_)));
    }

    #[tokio::test]
    async fn test_replace_keeps_protected_fields() {
        let fx = fixture().await;
        let policy = RulePolicy::public();
        let created = fx
            .dispatcher
            .dispatch(&exposed(policy.clone()), Verb::Put, Some("3"), &body(json!({"name": "a"})))
            .await
            .unwrap();

        let replaced = fx
            .dispatcher
            .dispatch(&exposed(policy), Verb::Post, Some("3"), &body(json!({"visible": true})))
            .await
            .unwrap();

        assert_eq!(replaced["created_at"], created["created_at"]);
        assert_eq!(replaced["name"], Value::Null);
        assert_eq!(replaced["visible"], json!(true));
    }

    #[tokio::test]
    async fn test_patch_updates_in_place() {
        let fx = fixture().await;
        fx.store
            .put(Entity::with_id("widget", 5).with("name", "old").with("visible", true))
            .await
            .unwrap();

        let out = fx
            .dispatcher
            .dispatch(&exposed(RulePolicy::public()), Verb::Patch, Some("5"), &body(json!({"name": "new"})))
            .await
            .unwrap();

        assert_eq!(out["name"], json!("new"));
        assert_eq!(out["visible"], json!(true));
    }

    #[tokio::test]
    async fn test_missing_id_is_method_not_allowed_without_storage() {
        let fx = fixture().await;
        let before = fx.store.stats();

        for verb in [Verb::Put, Verb::Patch, Verb::Delete] {
            let err = fx
                .dispatcher
                .dispatch(&exposed(RulePolicy::public()), verb, None, &body(json!({"name": "a"})))
                .await
                .unwrap_err();
            assert!(matches!(err, RestError::MethodNotAllowed { .. }));
        }

        assert_eq!(fx.store.stats(), before);
    }

    #[tokio::test]
    async fn test_delete_missing_skips_predicate() {
        let fx = fixture().await;
        let policy = Arc::new(Counting::default());
        let target = ExposedEntity {
            schema: Arc::new(widget_schema()),
            policy: policy.clone(),
        };

        let err = fx
            .dispatcher
            .dispatch(&target, Verb::Delete, Some("42"), &body(json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, RestError::NotFound { .. }));
        assert_eq!(policy.delete_checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_returns_pre_delete_entity() {
        let fx = fixture().await;
        fx.store
            .put(Entity::with_id("widget", 9).with("name", "bye"))
            .await
            .unwrap();

        let out = fx
            .dispatcher
            .dispatch(&exposed(Counting::default()), Verb::Delete, Some("9"), &body(json!({})))
            .await
            .unwrap();

        assert_eq!(out["name"], json!("bye"));
        assert_eq!(fx.store.count("widget").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_filters_unreadable() {
        let fx = fixture().await;
        for (id, visible) in [(1, true), (2, false), (3, true), (4, false), (5, false)] {
            fx.store
                .put(Entity::with_id("widget", id).with("visible", visible))
                .await
                .unwrap();
        }

        let out = fx
            .dispatcher
            .dispatch(&exposed(VisibleOnly), Verb::Get, None, &body(json!({})))
            .await
            .unwrap();

        assert_eq!(out.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_list_hook_denial_is_forbidden() {
        let fx = fixture().await;
        let policy = RulePolicy {
            list: crate::core::auth::PolicyRule::Authenticated,
            ..RulePolicy::public()
        };

        let err = fx
            .dispatcher
            .dispatch(&exposed(policy), Verb::Get, None, &body(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Forbidden { operation: "list", .. }));
    }

    #[tokio::test]
    async fn test_read_missing_and_denied() {
        let fx = fixture().await;
        fx.store
            .put(Entity::with_id("widget", 1).with("visible", false))
            .await
            .unwrap();

        let err = fx
            .dispatcher
            .dispatch(&exposed(VisibleOnly), Verb::Get, Some("2"), &body(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::NotFound { .. }));

        let err = fx
            .dispatcher
            .dispatch(&exposed(VisibleOnly), Verb::Get, Some("1"), &body(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Forbidden { operation: "read", .. }));
    }
}
