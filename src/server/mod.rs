//! Server module for building HTTP servers exposing entity types
//!
//! This module provides a `ServerBuilder` that registers entity types and
//! produces a router serving their REST endpoints.

pub mod builder;
pub mod entity_registry;
pub mod exposure;
pub mod host;

pub use builder::ServerBuilder;
pub use entity_registry::EntityRegistry;
pub use exposure::RestExposure;
pub use host::ServerHost;
