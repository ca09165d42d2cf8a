//! Per-request caller context: parameters and identity
//!
//! Parameters are the union of the query string and a JSON-object body, the
//! body winning on key collisions. The caller's token travels either as the
//! whole body (write requests, payload = the parameters) or as a query
//! parameter (read/delete requests, payload = the request path).

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::core::auth::Identity;
use crate::core::token::TokenVerifier;

/// Parsed request body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBody {
    pub params: Map<String, Value>,
    /// The body itself, when it is a compact signed token
    pub token: Option<String>,
}

/// Parse a raw body. Never fails: anything that is neither a JSON object nor
/// a token yields no parameters.
pub fn parse_body(bytes: &[u8]) -> ParsedBody {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return ParsedBody::default();
    };
    let text = text.trim();
    if looks_like_token(text) {
        return ParsedBody {
            params: Map::new(),
            token: Some(text.to_string()),
        };
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(params)) => ParsedBody {
            params,
            token: None,
        },
        _ => ParsedBody::default(),
    }
}

/// Three non-empty base64url segments separated by dots
pub fn looks_like_token(text: &str) -> bool {
    let segments: Vec<&str> = text.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|s| {
            !s.is_empty()
                && s.bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'=')
        })
}

/// The request parameter set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    query: Map<String, Value>,
    body: Map<String, Value>,
    merged: Map<String, Value>,
}

impl RequestParams {
    pub fn new(query: Map<String, Value>, body: Map<String, Value>) -> Self {
        let mut merged = query.clone();
        merged.extend(body.clone());
        Self {
            query,
            body,
            merged,
        }
    }

    /// Parameters from a JSON body alone
    pub fn from_body(body: Map<String, Value>) -> Self {
        Self::new(Map::new(), body)
    }

    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self::new(query_to_map(query), Map::new())
    }

    pub fn query(&self) -> &Map<String, Value> {
        &self.query
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Query and body parameters, body taking precedence
    pub fn all(&self) -> &Map<String, Value> {
        &self.merged
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.merged.get(key)
    }
}

fn query_to_map(query: &HashMap<String, String>) -> Map<String, Value> {
    query
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

/// Everything the dispatcher knows about the caller of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub identity: Identity,
    pub params: RequestParams,
}

/// Where the request carries its token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPlacement<'a> {
    /// Query parameter holding a token on non-body requests
    pub query_param: &'a str,
}

impl RequestContext {
    pub fn new(identity: Identity, params: RequestParams) -> Self {
        Self { identity, params }
    }

    pub fn anonymous(params: RequestParams) -> Self {
        Self::new(Identity::anonymous(), params)
    }

    /// Build the context of an HTTP request, verifying its token if present
    pub async fn from_http(
        verifier: &dyn TokenVerifier,
        placement: TokenPlacement<'_>,
        path: &str,
        query: &HashMap<String, String>,
        session: Option<&str>,
        body: &[u8],
    ) -> Self {
        let parsed = parse_body(body);
        let params = RequestParams::new(query_to_map(query), parsed.params);

        let token = match parsed.token.as_deref() {
            Some(token) => Some((token, None)),
            None => query
                .get(placement.query_param)
                .map(|token| (token.as_str(), Some(path))),
        };
        let identity = match token {
            Some((token, expected)) => authenticate(verifier, token, expected, session).await,
            None => Identity::anonymous(),
        };

        Self::new(identity, params)
    }

    /// Source mapping for field population.
    ///
    /// A verified caller's token parameters replace the raw body parameters
    /// whenever the token carried any.
    pub fn population_source(&self) -> &Map<String, Value> {
        self.identity
            .trusted_params()
            .unwrap_or_else(|| self.params.body())
    }
}

/// Verify a token into an identity; any failure demotes the caller to anonymous
pub async fn authenticate(
    verifier: &dyn TokenVerifier,
    token: &str,
    expected_payload: Option<&str>,
    session: Option<&str>,
) -> Identity {
    match verifier.verify(token, expected_payload, session).await {
        Ok(verified) => Identity {
            username: Some(verified.username),
            hostname: Some(verified.hostname),
            auth_params: verified.auth_params,
            session_token: verified.session_token,
        },
        Err(err) => {
            tracing::debug!(error = %err, "token rejected, treating caller as anonymous");
            Identity::anonymous()
        }
    }
}
