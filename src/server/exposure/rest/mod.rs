//! REST API exposure for the framework
//!
//! The REST exposure consumes a `ServerHost` and produces an Axum `Router`:
//!
//! - `GET /health`
//! - `/{resource}` and `/{resource}/{id}` for every verb, routed to the dispatcher
//! - `OPTIONS` on any resource path answers a static CORS preflight
//!
//! Every response carries the configured CORS and cache headers.

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router, middleware};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::super::host::ServerHost;
use crate::core::error::RestError;
use crate::core::request::{RequestContext, TokenPlacement};
use crate::dispatch::Verb;

/// Methods advertised by the preflight response
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// `custom_routes` are merged in and get the same response headers.
    pub fn build_router(host: Arc<ServerHost>, custom_routes: Vec<Router>) -> Result<Router> {
        let entity_routes = Router::new()
            .route("/{resource}", any(Self::collection))
            .route("/{resource}/{id}", any(Self::item))
            .with_state(host.clone());

        let mut app = Self::health_routes().merge(entity_routes);
        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        Ok(app
            .fallback(Self::fallback)
            .layer(middleware::map_response_with_state(host, Self::common_headers))
            .layer(TraceLayer::new_for_http()))
    }

    /// Build health check routes
    fn health_routes() -> Router {
        Router::new().route("/health", get(Self::health_check))
    }

    /// Health check endpoint handler
    async fn health_check() -> Json<Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn collection(
        State(host): State<Arc<ServerHost>>,
        Path(resource): Path<String>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        Self::handle(host, method, uri, headers, body, resource, None).await
    }

    async fn item(
        State(host): State<Arc<ServerHost>>,
        Path((resource, id)): Path<(String, String)>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        Self::handle(host, method, uri, headers, body, resource, Some(id)).await
    }

    async fn handle(
        host: Arc<ServerHost>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        resource: String,
        id: Option<String>,
    ) -> Response {
        if method == Method::OPTIONS {
            return Self::preflight();
        }

        let Some(target) = host.registry.resolve(&resource) else {
            return RestError::UnknownResource { resource }.into_response();
        };
        let Some(verb) = Verb::from_method(&method) else {
            return RestError::MethodNotAllowed {
                method: method.to_string(),
            }
            .into_response();
        };

        let query: HashMap<String, String> = Query::try_from_uri(&uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        let session = headers
            .get(&host.headers.session_header)
            .and_then(|v| v.to_str().ok());
        let placement = TokenPlacement {
            query_param: &host.settings.token_param,
        };
        let ctx = RequestContext::from_http(
            host.verifier.as_ref(),
            placement,
            uri.path(),
            &query,
            session,
            &body,
        )
        .await;

        let mut response = match host
            .dispatcher
            .dispatch(target, verb, id.as_deref(), &ctx)
            .await
        {
            Ok(value) => (StatusCode::OK, Json(value)).into_response(),
            Err(err) => err.into_response(),
        };

        if let Some(token) = ctx.identity.session_token.as_deref() {
            if let Ok(value) = HeaderValue::from_str(token) {
                response
                    .headers_mut()
                    .insert(host.headers.session_header.clone(), value);
            }
        }
        response
    }

    fn preflight() -> Response {
        (
            StatusCode::OK,
            [(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            )],
        )
            .into_response()
    }

    async fn fallback(method: Method, uri: Uri) -> Response {
        if method == Method::OPTIONS {
            return Self::preflight();
        }
        RestError::UnknownResource {
            resource: uri.path().trim_start_matches('/').to_string(),
        }
        .into_response()
    }

    async fn common_headers(State(host): State<Arc<ServerHost>>, mut response: Response) -> Response {
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, host.headers.allow_origin.clone());
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
        headers.insert(CACHE_CONTROL, host.headers.cache_control.clone());
        response
    }
}
