//! Server host: everything a transport needs to serve requests
//!
//! The host owns the registry, the dispatcher, the token verifier and the
//! pre-validated response header values. Exposures only translate HTTP to
//! dispatcher calls.

use axum::http::{HeaderName, HeaderValue};
use std::sync::Arc;

use crate::config::ServerSettings;
use crate::core::error::ConfigError;
use crate::core::store::EntityStore;
use crate::core::token::TokenVerifier;
use crate::dispatch::RestDispatcher;
use crate::server::entity_registry::EntityRegistry;

/// Header values applied to every response
#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    pub allow_origin: HeaderValue,
    pub cache_control: HeaderValue,
    pub session_header: HeaderName,
}

impl ResponseHeaders {
    pub fn from_settings(settings: &ServerSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let invalid = |setting: &str| ConfigError::InvalidSetting {
            setting: setting.to_string(),
            message: "not a valid header".to_string(),
        };

        Ok(Self {
            allow_origin: HeaderValue::from_str(&settings.cors_origin)
                .map_err(|_| invalid("cors_origin"))?,
            cache_control: HeaderValue::from_str(&settings.cache_control())
                .map_err(|_| invalid("cache_life"))?,
            session_header: HeaderName::from_bytes(settings.session_header.as_bytes())
                .map_err(|_| invalid("session_header"))?,
        })
    }
}

/// Host context containing all framework state
pub struct ServerHost {
    pub settings: ServerSettings,
    pub headers: ResponseHeaders,
    pub registry: EntityRegistry,
    pub dispatcher: RestDispatcher,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl ServerHost {
    /// Build the host from builder components
    pub fn from_builder_components(
        settings: ServerSettings,
        registry: EntityRegistry,
        store: Arc<dyn EntityStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Result<Self, ConfigError> {
        let headers = ResponseHeaders::from_settings(&settings)?;
        let dispatcher = RestDispatcher::new(store, Arc::new(registry.schemas().clone()))
            .with_max_reference_depth(settings.max_reference_depth);

        Ok(Self {
            settings,
            headers,
            registry,
            dispatcher,
            verifier,
        })
    }

    /// Get resource segments registered in the host
    pub fn resources(&self) -> Vec<&str> {
        self.registry.resources()
    }
}
