//! Authorization for entity operations
//!
//! Provides the caller identity derived from a verified token, the
//! [`AccessPolicy`] hooks consulted per action, and the fail-closed gate
//! ([`can_perform`]) the dispatcher goes through:
//! - every action is denied unless a policy grants it
//! - a predicate that errors or panics counts as a denial

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::fmt;
use std::panic::AssertUnwindSafe;

use crate::core::entity::Entity;
use crate::core::error::ConfigError;
use crate::core::field::FieldValue;

/// Caller identity for one request
///
/// Every field is unset for anonymous callers (no token, or a token that
/// failed verification).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub username: Option<String>,
    pub hostname: Option<String>,
    /// Parameters carried inside the verified token
    pub auth_params: Option<Map<String, Value>>,
    /// Session token to echo back to the caller
    pub session_token: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Identity for a named caller with no token parameters
    pub fn user(username: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            hostname: Some(hostname.into()),
            ..Self::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// Token-carried parameters, when the caller is verified and sent any
    pub fn trusted_params(&self) -> Option<&Map<String, Value>> {
        if !self.is_authenticated() {
            return None;
        }
        self.auth_params.as_ref().filter(|params| !params.is_empty())
    }
}

/// Operation being authorized on a single entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type authorization hooks
///
/// Every entity predicate denies by default; implementations grant what they
/// need. `can_list` gates the list endpoint as a whole and defaults to allow,
/// since listed entities are still filtered one by one through `can_read`.
///
/// Predicates see the entity after caller parameters have been applied and
/// before it is persisted, so they can inspect the values being written.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn can_list(&self, _identity: &Identity) -> Result<bool> {
        Ok(true)
    }

    async fn can_create(&self, _identity: &Identity, _entity: &Entity) -> Result<bool> {
        Ok(false)
    }

    async fn can_read(&self, _identity: &Identity, _entity: &Entity) -> Result<bool> {
        Ok(false)
    }

    async fn can_update(&self, _identity: &Identity, _entity: &Entity) -> Result<bool> {
        Ok(false)
    }

    async fn can_delete(&self, _identity: &Identity, _entity: &Entity) -> Result<bool> {
        Ok(false)
    }
}

/// Policy that keeps every default: list allowed, everything else denied
pub struct DenyAll;

impl AccessPolicy for DenyAll {}

/// Evaluate an action against a policy.
///
/// Never fails: an error or a panic inside the predicate is logged and
/// treated as a denial.
pub async fn can_perform(
    policy: &dyn AccessPolicy,
    action: Action,
    identity: &Identity,
    entity: &Entity,
) -> bool {
    let check = match action {
        Action::Create => policy.can_create(identity, entity),
        Action::Read => policy.can_read(identity, entity),
        Action::Update => policy.can_update(identity, entity),
        Action::Delete => policy.can_delete(identity, entity),
    };

    match AssertUnwindSafe(check).catch_unwind().await {
        Ok(Ok(allowed)) => allowed,
        Ok(Err(err)) => {
            tracing::warn!(action = %action, kind = entity.kind(), error = %err, "authorization predicate failed, denying");
            false
        }
        Err(_) => {
            tracing::warn!(action = %action, kind = entity.kind(), "authorization predicate panicked, denying");
            false
        }
    }
}

/// Evaluate the list-level hook with the same fail-closed handling
pub async fn can_list(policy: &dyn AccessPolicy, identity: &Identity) -> bool {
    match AssertUnwindSafe(policy.can_list(identity)).catch_unwind().await {
        Ok(Ok(allowed)) => allowed,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "list predicate failed, denying");
            false
        }
        Err(_) => {
            tracing::warn!("list predicate panicked, denying");
            false
        }
    }
}

/// Declarative authorization rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRule {
    /// Nobody
    Deny,

    /// Anyone, including anonymous callers
    Public,

    /// Any verified caller
    Authenticated,

    /// Verified caller whose username equals the entity's `field`
    /// (a string field or a reference whose id is the username)
    Owner { field: String },

    /// Verified caller whose token was issued for this host
    Host(String),

    /// Any of the rules
    Any(Vec<PolicyRule>),
}

impl PolicyRule {
    /// Check a caller against this rule; `entity` is absent for list checks
    pub fn check(&self, identity: &Identity, entity: Option<&Entity>) -> bool {
        match self {
            PolicyRule::Deny => false,
            PolicyRule::Public => true,
            PolicyRule::Authenticated => identity.is_authenticated(),
            PolicyRule::Owner { field } => {
                let (Some(username), Some(entity)) = (identity.username.as_deref(), entity) else {
                    return false;
                };
                match entity.get(field) {
                    Some(FieldValue::String(owner)) => owner == username,
                    Some(FieldValue::Reference(key)) => key.id.to_string() == username,
                    _ => false,
                }
            }
            PolicyRule::Host(host) => {
                identity.is_authenticated() && identity.hostname.as_deref() == Some(host.as_str())
            }
            PolicyRule::Any(rules) => rules.iter().any(|r| r.check(identity, entity)),
        }
    }

    /// Parse a rule from its configuration form.
    ///
    /// `deny`, `public`, `authenticated`, `owner:<field>`, `host:<name>`, and
    /// alternatives joined with `|`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let unknown = || ConfigError::UnknownRule { rule: s.to_string() };

        if s.contains('|') {
            let rules = s
                .split('|')
                .map(|part| Self::parse(part.trim()))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PolicyRule::Any(rules));
        }

        match s.trim() {
            "deny" => Ok(PolicyRule::Deny),
            "public" => Ok(PolicyRule::Public),
            "authenticated" => Ok(PolicyRule::Authenticated),
            other => {
                if let Some(field) = other.strip_prefix("owner:").filter(|f| !f.is_empty()) {
                    Ok(PolicyRule::Owner {
                        field: field.to_string(),
                    })
                } else if let Some(host) = other.strip_prefix("host:").filter(|h| !h.is_empty()) {
                    Ok(PolicyRule::Host(host.to_string()))
                } else {
                    Err(unknown())
                }
            }
        }
    }
}

/// [`AccessPolicy`] built from one rule per action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePolicy {
    pub list: PolicyRule,
    pub create: PolicyRule,
    pub read: PolicyRule,
    pub update: PolicyRule,
    pub delete: PolicyRule,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            list: PolicyRule::Public,
            create: PolicyRule::Deny,
            read: PolicyRule::Deny,
            update: PolicyRule::Deny,
            delete: PolicyRule::Deny,
        }
    }
}

impl RulePolicy {
    /// Grant every action to everyone
    pub fn public() -> Self {
        Self {
            list: PolicyRule::Public,
            create: PolicyRule::Public,
            read: PolicyRule::Public,
            update: PolicyRule::Public,
            delete: PolicyRule::Public,
        }
    }

    pub fn rule(&self, action: Action) -> &PolicyRule {
        match action {
            Action::Create => &self.create,
            Action::Read => &self.read,
            Action::Update => &self.update,
            Action::Delete => &self.delete,
        }
    }
}

#[async_trait]
impl AccessPolicy for RulePolicy {
    async fn can_list(&self, identity: &Identity) -> Result<bool> {
        Ok(self.list.check(identity, None))
    }

    async fn can_create(&self, identity: &Identity, entity: &Entity) -> Result<bool> {
        Ok(self.rule(Action::Create).check(identity, Some(entity)))
    }

    async fn can_read(&self, identity: &Identity, entity: &Entity) -> Result<bool> {
        Ok(self.rule(Action::Read).check(identity, Some(entity)))
    }

    async fn can_update(&self, identity: &Identity, entity: &Entity) -> Result<bool> {
        Ok(self.rule(Action::Update).check(identity, Some(entity)))
    }

    async fn can_delete(&self, identity: &Identity, entity: &Entity) -> Result<bool> {
        Ok(self.rule(Action::Delete).check(identity, Some(entity)))
    }
}
