//! # entity-rest
//!
//! Generic REST exposure for storage-backed entity types.
//!
//! ## Features
//!
//! - **Derived endpoints**: list, read, create, upsert, patch and delete per entity type
//! - **Fail-closed authorization**: every action is denied unless a policy grants it
//! - **Typed population**: timestamps, scalars and references checked before persisting
//! - **Reference resolution**: referenced entities are expanded, repeated ones in one batch fetch
//! - **Signed-token callers**: identity from a token in the body or the query string
//! - **Configuration-Based**: declare entity types and rules in YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use entity_rest::prelude::*;
//!
//! let widget = EntitySchema::new("widget")
//!     .resource("widgets")
//!     .field(FieldDescriptor::string("name").required())
//!     .field(FieldDescriptor::reference("owner", "user"))
//!     .field(FieldDescriptor::timestamp("created_at").auto_now_add())
//!     .read_only(["created_at"]);
//!
//! ServerBuilder::new()
//!     .with_store(InMemoryEntityStore::new())
//!     .register(widget, RulePolicy::public())?
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod dispatch;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        auth::{AccessPolicy, Action, DenyAll, Identity, PolicyRule, RulePolicy},
        entity::Entity,
        error::{ConfigError, RestError, ValidationError},
        field::{FieldDescriptor, FieldKind, FieldValue, ScalarType},
        key::{EntityId, EntityKey},
        schema::{EntitySchema, SchemaSet},
        store::EntityStore,
        token::{InsecureJwsVerifier, RejectAllVerifier, TokenHeader, TokenVerifier, VerifiedToken},
    };

    // === Dispatch ===
    pub use crate::dispatch::{ExposedEntity, RestDispatcher, Verb};

    // === Storage ===
    pub use crate::storage::InMemoryEntityStore;

    // === Config ===
    pub use crate::config::{EntityAuthConfig, EntityConfig, FieldConfig, RestConfig, ServerSettings};

    // === Server ===
    pub use crate::server::{EntityRegistry, ServerBuilder, ServerHost};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
}
