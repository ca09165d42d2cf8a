//! Per-type entity configuration
//!
//! An [`EntitySchema`] is built once when a type is registered and shared
//! immutably afterwards. It owns the field declarations and the three field
//! lists that drive population and serialization:
//!
//! - `exposed`: optional allow-list (default: every declared field)
//! - `excluded`: never serialized, never populated
//! - `read_only`: serialized, never populated
//!
//! The synthetic `id` field is never populated. It is serialized unless it
//! is excluded or left out of an allow-list.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::entity::Entity;
use crate::core::error::{ConfigError, ValidationError};
use crate::core::field::{FieldDescriptor, FieldKind, FieldValue};

/// Name of the synthetic identifier field on the wire
pub const ID_FIELD: &str = "id";

/// Immutable description of an entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    kind: String,
    resource: String,
    fields: Vec<FieldDescriptor>,
    exposed: Option<Vec<String>>,
    excluded: Vec<String>,
    read_only: Vec<String>,
    resolve_references: bool,
}

/// Fields chosen for one serialization
#[derive(Debug)]
pub struct FieldSelection<'a> {
    pub include_id: bool,
    pub fields: Vec<&'a FieldDescriptor>,
}

impl EntitySchema {
    /// Start a schema for `kind`, exposed under the resource segment `kind`
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            resource: kind.clone(),
            kind,
            fields: Vec::new(),
            exposed: None,
            excluded: Vec::new(),
            read_only: Vec::new(),
            resolve_references: true,
        }
    }

    /// Override the URL segment (e.g., "widgets")
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn exposed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exposed = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn excluded<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn read_only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_only = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether serialization expands references into the referenced entity
    pub fn resolve_references(mut self, resolve: bool) -> Self {
        self.resolve_references = resolve;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn exposed_fields(&self) -> Option<&[String]> {
        self.exposed.as_deref()
    }

    pub fn excluded_fields(&self) -> &[String] {
        &self.excluded
    }

    pub fn read_only_fields(&self) -> &[String] {
        &self.read_only
    }

    pub fn resolves_references(&self) -> bool {
        self.resolve_references
    }

    /// Check the declaration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidSchema {
            kind: self.kind.clone(),
            message,
        };

        if self.kind.is_empty() {
            return Err(invalid("kind must not be empty".into()));
        }
        if self.resource.is_empty() || self.resource.contains('/') {
            return Err(invalid(format!(
                "resource '{}' is not a single path segment",
                self.resource
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name == ID_FIELD {
                return Err(invalid("'id' is reserved for the entity identifier".into()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("field '{}' declared twice", field.name)));
            }
            match &field.kind {
                FieldKind::Reference { target } if target.is_empty() => {
                    return Err(invalid(format!(
                        "reference field '{}' has no target kind",
                        field.name
                    )));
                }
                FieldKind::Timestamp => {}
                _ if field.auto_now || field.auto_now_add => {
                    return Err(invalid(format!(
                        "auto timestamps only apply to timestamp fields, not '{}'",
                        field.name
                    )));
                }
                _ => {}
            }
        }

        let lists = [
            ("exposed", self.exposed.as_deref().unwrap_or_default()),
            ("excluded", self.excluded.as_slice()),
            ("read_only", self.read_only.as_slice()),
        ];
        for (list, names) in lists {
            for name in names {
                if name != ID_FIELD && !seen.contains(name.as_str()) {
                    return Err(invalid(format!("{} names undeclared field '{}'", list, name)));
                }
            }
        }

        Ok(())
    }

    /// Fields a caller may assign.
    ///
    /// The allow-list (or every declared field) minus excluded and read-only
    /// fields. The identifier is never among them.
    pub fn settable_fields(&self) -> Vec<&FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| self.allowed_by(self.exposed.as_deref(), &f.name))
            .filter(|f| !self.excluded.contains(&f.name) && !self.read_only.contains(&f.name))
            .collect()
    }

    /// Whether `name` is a declared field that callers can never assign
    pub fn is_protected(&self, name: &str) -> bool {
        self.field_named(name).is_some() && !self.settable_fields().iter().any(|f| f.name == name)
    }

    /// Select the fields to emit for a serialization.
    ///
    /// An explicit `include` list replaces the type's allow-list; `exclude`
    /// adds to the type's excluded fields.
    pub fn serialized_fields<'a>(
        &'a self,
        include: Option<&[String]>,
        exclude: &[String],
    ) -> FieldSelection<'a> {
        let allow = include.or(self.exposed.as_deref());
        let is_excluded =
            |name: &str| exclude.iter().any(|e| e == name) || self.excluded.iter().any(|e| e == name);

        FieldSelection {
            include_id: !is_excluded(ID_FIELD) && self.allowed_by(allow, ID_FIELD),
            fields: self
                .fields
                .iter()
                .filter(|f| self.allowed_by(allow, &f.name) && !is_excluded(&f.name))
                .collect(),
        }
    }

    fn allowed_by(&self, allow: Option<&[String]>, name: &str) -> bool {
        allow.is_none_or(|names| names.iter().any(|n| n == name))
    }

    /// Stamp `auto_now` fields, and `auto_now_add` fields that are still unset
    pub fn apply_auto_timestamps(&self, entity: &mut Entity, now: DateTime<Utc>) {
        for field in &self.fields {
            let unset = entity.get(&field.name).is_none_or(FieldValue::is_null);
            if field.auto_now || (field.auto_now_add && unset) {
                entity.set(field.name.clone(), FieldValue::DateTime(now));
            }
        }
    }

    /// Fail on the first required field that is unset, null or an empty list
    pub fn check_required(&self, entity: &Entity) -> Result<(), ValidationError> {
        for field in self.fields.iter().filter(|f| f.required) {
            let missing = match entity.get(&field.name) {
                None | Some(FieldValue::Null) => true,
                Some(FieldValue::List(items)) => items.is_empty(),
                Some(_) => false,
            };
            if missing {
                return Err(ValidationError::MissingRequired {
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Registered schemas indexed by entity kind
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    by_kind: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: Arc<EntitySchema>) {
        self.by_kind.insert(schema.kind().to_string(), schema);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<EntitySchema>> {
        self.by_kind.get(kind)
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}
