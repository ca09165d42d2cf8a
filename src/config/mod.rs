//! Configuration loading and management
//!
//! A [`RestConfig`] holds the server settings and the declarative entity
//! definitions. Loading validates everything, so a config that loads can be
//! registered without further checks.

use anyhow::{Context, Result};
use axum::http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::auth::{PolicyRule, RulePolicy};
use crate::core::error::ConfigError;
use crate::core::field::{FieldDescriptor, FieldKind, ScalarType};
use crate::core::schema::EntitySchema;
use crate::core::serializer::DEFAULT_REFERENCE_DEPTH;
use crate::dispatch::ExposedEntity;

/// Settings shared by every exposed resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Value of `Access-Control-Allow-Origin` on every response
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// Seconds responses may be cached; 0 disables caching
    #[serde(default)]
    pub cache_life: u64,

    /// Header carrying the caller's session context, echoed back verified
    #[serde(default = "default_session_header")]
    pub session_header: String,

    /// Query parameter carrying a token on requests without a body
    #[serde(default = "default_token_param")]
    pub token_param: String,

    /// Nested reference levels expanded during serialization
    #[serde(default = "default_reference_depth")]
    pub max_reference_depth: usize,
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_session_header() -> String {
    "x-session-token".to_string()
}

fn default_token_param() -> String {
    "jws".to_string()
}

fn default_reference_depth() -> usize {
    DEFAULT_REFERENCE_DEPTH
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            cors_origin: default_cors_origin(),
            cache_life: 0,
            session_header: default_session_header(),
            token_param: default_token_param(),
            max_reference_depth: default_reference_depth(),
        }
    }
}

impl ServerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |setting: &str, message: &str| ConfigError::InvalidSetting {
            setting: setting.to_string(),
            message: message.to_string(),
        };

        if HeaderValue::from_str(&self.cors_origin).is_err() {
            return Err(invalid("cors_origin", "not a valid header value"));
        }
        if HeaderName::from_bytes(self.session_header.as_bytes()).is_err() {
            return Err(invalid("session_header", "not a valid header name"));
        }
        if self.token_param.is_empty() {
            return Err(invalid("token_param", "must not be empty"));
        }
        Ok(())
    }

    /// Value of the `Cache-Control` header
    pub fn cache_control(&self) -> String {
        if self.cache_life > 0 {
            format!("max-age={}", self.cache_life)
        } else {
            "no-cache".to_string()
        }
    }
}

/// Wire type of a configured field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Json,
    Timestamp,
    Reference,
}

/// Configuration of a single field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Referenced kind, for reference fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default)]
    pub repeated: bool,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub auto_now: bool,

    #[serde(default)]
    pub auto_now_add: bool,
}

impl FieldConfig {
    fn to_descriptor(&self, kind: &str) -> Result<FieldDescriptor, ConfigError> {
        let field_kind = match self.field_type {
            FieldType::String => FieldKind::Scalar(ScalarType::String),
            FieldType::Integer => FieldKind::Scalar(ScalarType::Integer),
            FieldType::Float => FieldKind::Scalar(ScalarType::Float),
            FieldType::Boolean => FieldKind::Scalar(ScalarType::Boolean),
            FieldType::Json => FieldKind::Scalar(ScalarType::Json),
            FieldType::Timestamp => FieldKind::Timestamp,
            FieldType::Reference => FieldKind::Reference {
                target: self.target.clone().ok_or_else(|| ConfigError::InvalidSchema {
                    kind: kind.to_string(),
                    message: format!("reference field '{}' needs a target", self.name),
                })?,
            },
        };

        Ok(FieldDescriptor {
            name: self.name.clone(),
            kind: field_kind,
            repeated: self.repeated,
            required: self.required,
            auto_now: self.auto_now,
            auto_now_add: self.auto_now_add,
        })
    }
}

/// Authorization rules of an entity type, one per action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAuthConfig {
    #[serde(default = "default_list_rule")]
    pub list: String,

    #[serde(default = "default_entity_rule")]
    pub create: String,

    #[serde(default = "default_entity_rule")]
    pub read: String,

    #[serde(default = "default_entity_rule")]
    pub update: String,

    #[serde(default = "default_entity_rule")]
    pub delete: String,
}

fn default_list_rule() -> String {
    "public".to_string()
}

fn default_entity_rule() -> String {
    "deny".to_string()
}

impl Default for EntityAuthConfig {
    fn default() -> Self {
        Self {
            list: default_list_rule(),
            create: default_entity_rule(),
            read: default_entity_rule(),
            update: default_entity_rule(),
            delete: default_entity_rule(),
        }
    }
}

impl EntityAuthConfig {
    pub fn to_policy(&self) -> Result<RulePolicy, ConfigError> {
        Ok(RulePolicy {
            list: PolicyRule::parse(&self.list)?,
            create: PolicyRule::parse(&self.create)?,
            read: PolicyRule::parse(&self.read)?,
            update: PolicyRule::parse(&self.update)?,
            delete: PolicyRule::parse(&self.delete)?,
        })
    }
}

/// Configuration for an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Storage kind (e.g., "widget")
    pub kind: String,

    /// URL segment, defaults to the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    #[serde(default)]
    pub fields: Vec<FieldConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed: Option<Vec<String>>,

    #[serde(default)]
    pub excluded: Vec<String>,

    #[serde(default)]
    pub read_only: Vec<String>,

    #[serde(default = "default_resolve_references")]
    pub resolve_references: bool,

    #[serde(default)]
    pub auth: EntityAuthConfig,
}

fn default_resolve_references() -> bool {
    true
}

impl EntityConfig {
    /// Build and validate the schema this entry declares
    pub fn to_schema(&self) -> Result<EntitySchema, ConfigError> {
        let mut schema = EntitySchema::new(&self.kind)
            .resource(self.resource.as_deref().unwrap_or(&self.kind))
            .excluded(self.excluded.iter().cloned())
            .read_only(self.read_only.iter().cloned())
            .resolve_references(self.resolve_references);
        if let Some(exposed) = &self.exposed {
            schema = schema.exposed(exposed.iter().cloned());
        }
        for field in &self.fields {
            schema = schema.field(field.to_descriptor(&self.kind)?);
        }

        schema.validate()?;
        Ok(schema)
    }

    pub fn to_exposed(&self) -> Result<ExposedEntity, ConfigError> {
        Ok(ExposedEntity::new(self.to_schema()?, self.auth.to_policy()?))
    }
}

/// Complete configuration of a REST exposure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

impl RestConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings, schemas and rules without registering anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        let mut resources = std::collections::HashSet::new();
        for entity in &self.entities {
            let exposed = entity.to_exposed()?;
            let resource = exposed.schema.resource_name().to_string();
            if !resources.insert(resource.clone()) {
                return Err(ConfigError::DuplicateResource { resource });
            }
        }
        Ok(())
    }
}
