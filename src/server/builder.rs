//! ServerBuilder for fluent API to build HTTP servers

use super::entity_registry::EntityRegistry;
use super::exposure::RestExposure;
use super::host::ServerHost;
use crate::config::{RestConfig, ServerSettings};
use crate::core::auth::AccessPolicy;
use crate::core::schema::EntitySchema;
use crate::core::store::EntityStore;
use crate::core::token::{RejectAllVerifier, TokenVerifier};
use crate::dispatch::ExposedEntity;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for creating HTTP servers exposing registered entity types
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_store(InMemoryEntityStore::new())
///     .with_config(RestConfig::from_yaml_file("widgets.yaml")?)?
///     .build()?;
/// ```
pub struct ServerBuilder {
    store: Option<Arc<dyn EntityStore>>,
    verifier: Arc<dyn TokenVerifier>,
    settings: ServerSettings,
    entity_registry: EntityRegistry,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    ///
    /// Until a verifier is set, every caller is anonymous.
    pub fn new() -> Self {
        Self {
            store: None,
            verifier: Arc::new(RejectAllVerifier),
            settings: ServerSettings::default(),
            entity_registry: EntityRegistry::new(),
            custom_routes: Vec::new(),
        }
    }

    /// Set the storage collaborator (required)
    pub fn with_store(mut self, store: impl EntityStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set an already shared storage collaborator
    pub fn with_shared_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the token verifier used to authenticate callers
    pub fn with_token_verifier(mut self, verifier: impl TokenVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn with_settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Add custom routes to the server
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Expose an entity type with its access policy
    pub fn register(mut self, schema: EntitySchema, policy: impl AccessPolicy + 'static) -> Result<Self> {
        self.entity_registry
            .register(ExposedEntity::new(schema, policy))?;
        Ok(self)
    }

    /// Expose an already assembled entity type
    pub fn register_exposed(mut self, exposed: ExposedEntity) -> Result<Self> {
        self.entity_registry.register(exposed)?;
        Ok(self)
    }

    /// Apply a loaded configuration: its settings and every entity it declares
    pub fn with_config(mut self, config: RestConfig) -> Result<Self> {
        for entity in &config.entities {
            self.entity_registry.register(entity.to_exposed()?)?;
        }
        self.settings = config.server;
        Ok(self)
    }

    /// Build the transport-agnostic host
    pub fn build_host(self) -> Result<ServerHost> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("EntityStore is required. Call .with_store()"))?;

        let host = ServerHost::from_builder_components(
            self.settings,
            self.entity_registry,
            store,
            self.verifier,
        )?;
        tracing::debug!(resources = ?host.resources(), "server host ready");
        Ok(host)
    }

    /// Build the final REST router
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);
        RestExposure::build_router(host, custom_routes)
    }

    /// Serve the application with graceful shutdown
    ///
    /// Handles SIGTERM and SIGINT (Ctrl+C).
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
