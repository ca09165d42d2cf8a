//! Core module containing fundamental traits and types for the framework

pub mod auth;
pub mod entity;
pub mod error;
pub mod field;
pub mod key;
pub mod populate;
pub mod request;
pub mod schema;
pub mod serializer;
pub mod store;
pub mod token;

pub use auth::{AccessPolicy, Action, DenyAll, Identity, PolicyRule, RulePolicy};
pub use entity::Entity;
pub use error::{ConfigError, RestError, ValidationError};
pub use field::{FieldDescriptor, FieldKind, FieldValue, ScalarType};
pub use key::{EntityId, EntityKey};
pub use request::{RequestContext, RequestParams};
pub use schema::{EntitySchema, SchemaSet};
pub use serializer::{SerializeOptions, Serializer};
pub use store::EntityStore;
pub use token::{InsecureJwsVerifier, RejectAllVerifier, TokenVerifier, VerifiedToken};
