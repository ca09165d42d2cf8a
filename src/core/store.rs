//! Storage collaborator trait

use anyhow::Result;
use async_trait::async_trait;

use crate::core::entity::Entity;
use crate::core::key::EntityKey;

/// Key/document store backing every exposed entity type
///
/// Implementations must not cache entities across calls. The framework is
/// agnostic to the underlying storage mechanism.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Get an entity by key
    async fn get(&self, key: &EntityKey) -> Result<Option<Entity>>;

    /// List all entities of a kind
    async fn query(&self, kind: &str) -> Result<Vec<Entity>>;

    /// Fetch many entities in one round trip
    ///
    /// The result has the same length and order as `keys`; missing entities
    /// are `None`.
    async fn get_multi(&self, keys: &[EntityKey]) -> Result<Vec<Option<Entity>>>;

    /// Insert or replace an entity, allocating an id when it has none
    async fn put(&self, entity: Entity) -> Result<EntityKey>;

    /// Delete an entity; deleting a missing key is not an error
    async fn delete(&self, key: &EntityKey) -> Result<()>;
}
