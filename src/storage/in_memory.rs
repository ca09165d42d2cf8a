//! In-memory implementation of EntityStore for testing and development

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::core::entity::Entity;
use crate::core::key::{EntityId, EntityKey};
use crate::core::store::EntityStore;

#[derive(Default)]
struct Tables {
    kinds: HashMap<String, BTreeMap<EntityId, Entity>>,
    next_ids: HashMap<String, i64>,
}

/// Round-trip counters, one per storage operation
#[derive(Debug, Default)]
struct Counters {
    gets: AtomicUsize,
    queries: AtomicUsize,
    batch_gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

/// Snapshot of how many calls a store has served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: usize,
    pub queries: usize,
    pub batch_gets: usize,
    pub puts: usize,
    pub deletes: usize,
}

impl StoreStats {
    /// Total number of calls of any kind
    pub fn total(&self) -> usize {
        self.gets + self.queries + self.batch_gets + self.puts + self.deletes
    }
}

/// In-memory entity store
///
/// Useful for testing and development. Uses RwLock for thread-safe access.
/// Entities without an id get the next integer id of their kind, starting
/// at 1, the way a datastore allocates numeric ids.
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    tables: Arc<RwLock<Tables>>,
    counters: Arc<Counters>,
}

impl InMemoryEntityStore {
    /// Create a new in-memory entity store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls served so far
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
            batch_gets: self.counters.batch_gets.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    /// Number of stored entities of a kind
    pub fn count(&self, kind: &str) -> Result<usize> {
        let tables = self
            .tables
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(tables.kinds.get(kind).map_or(0, BTreeMap::len))
    }

    /// First free integer id of a kind at or after its allocation cursor
    fn allocate(tables: &Tables, kind: &str) -> Result<i64> {
        let rows = tables.kinds.get(kind);
        let mut candidate = tables.next_ids.get(kind).copied().unwrap_or(1);
        while rows.is_some_and(|rows| rows.contains_key(&EntityId::Int(candidate))) {
            candidate = candidate
                .checked_add(1)
                .ok_or_else(|| anyhow!("id space exhausted for kind '{}'", kind))?;
        }
        Ok(candidate)
    }

    fn lookup(tables: &Tables, key: &EntityKey) -> Option<Entity> {
        tables
            .kinds
            .get(&key.kind)
            .and_then(|rows| rows.get(&key.id))
            .cloned()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(&self, key: &EntityKey) -> Result<Option<Entity>> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let tables = self
            .tables
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(Self::lookup(&tables, key))
    }

    async fn query(&self, kind: &str) -> Result<Vec<Entity>> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let tables = self
            .tables
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(tables
            .kinds
            .get(kind)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_multi(&self, keys: &[EntityKey]) -> Result<Vec<Option<Entity>>> {
        self.counters.batch_gets.fetch_add(1, Ordering::Relaxed);
        let tables = self
            .tables
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(keys.iter().map(|key| Self::lookup(&tables, key)).collect())
    }

    async fn put(&self, mut entity: Entity) -> Result<EntityKey> {
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        let mut tables = self
            .tables
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let kind = entity.kind().to_string();
        let id = match entity.id().cloned() {
            Some(EntityId::Int(n)) => {
                // keep allocation ahead of caller-chosen integer ids
                let next = tables.next_ids.entry(kind.clone()).or_insert(1);
                if n >= *next {
                    if let Some(after) = n.checked_add(1) {
                        *next = after;
                    }
                }
                EntityId::Int(n)
            }
            Some(id) => id,
            None => {
                let n = Self::allocate(&tables, &kind)?;
                tables.next_ids.insert(kind.clone(), n.saturating_add(1));
                let id = EntityId::Int(n);
                entity.set_id(id.clone());
                id
            }
        };

        tables
            .kinds
            .entry(kind.clone())
            .or_default()
            .insert(id.clone(), entity);

        Ok(EntityKey { kind, id })
    }

    async fn delete(&self, key: &EntityKey) -> Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self
            .tables
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        if let Some(rows) = tables.kinds.get_mut(&key.kind) {
            rows.remove(&key.id);
        }

        Ok(())
    }
}
