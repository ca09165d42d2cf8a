//! Registry of exposed entity types, keyed by resource segment

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::ConfigError;
use crate::core::schema::SchemaSet;
use crate::dispatch::ExposedEntity;

/// Registry for all entities in the application
///
/// Resolves the first path segment of a request (`/widgets/7` → `widgets`)
/// to the exposed type, and keeps every schema by kind for serialization.
#[derive(Default, Clone)]
pub struct EntityRegistry {
    resources: HashMap<String, ExposedEntity>,
    schemas: SchemaSet,
}

impl EntityRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an exposed type under its resource segment
    ///
    /// The schema is validated here; a resource segment can only be taken once.
    pub fn register(&mut self, exposed: ExposedEntity) -> Result<(), ConfigError> {
        exposed.schema.validate()?;

        let resource = exposed.schema.resource_name().to_string();
        if self.resources.contains_key(&resource) {
            return Err(ConfigError::DuplicateResource { resource });
        }

        tracing::debug!(kind = exposed.kind(), resource = %resource, "registered entity resource");
        self.schemas.insert(Arc::clone(&exposed.schema));
        self.resources.insert(resource, exposed);
        Ok(())
    }

    /// Look up the type exposed under `resource`
    pub fn resolve(&self, resource: &str) -> Option<&ExposedEntity> {
        self.resources.get(resource)
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// Get all registered resource segments
    pub fn resources(&self) -> Vec<&str> {
        self.resources.keys().map(|s| s.as_str()).collect()
    }
}
