//! Signed-token verification collaborator
//!
//! Tokens use the compact form `base64url(header).base64url(payload).base64url(signature)`.
//! Real verification (fetching the issuer's certificate and checking the
//! signature) lives behind [`TokenVerifier`]; this module ships a verifier
//! that rejects everything and an unsigned decoder for local development.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of a successful verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub username: String,
    pub hostname: String,
    /// JSON object carried as the token payload, when the payload was not
    /// an expected value supplied by the caller
    pub auth_params: Option<Map<String, Value>>,
    pub session_token: Option<String>,
}

/// Verifies a signed token against the payload the request implies
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`.
    ///
    /// `expected_payload` is the value the token must sign (the request path
    /// for query-carried tokens); when absent the payload is returned as
    /// parameters. `session` is the caller's session context header, if any.
    async fn verify(
        &self,
        token: &str,
        expected_payload: Option<&str>,
        session: Option<&str>,
    ) -> Result<VerifiedToken>;
}

/// Verifier that accepts nothing; every caller is anonymous
pub struct RejectAllVerifier;

#[async_trait]
impl TokenVerifier for RejectAllVerifier {
    async fn verify(&self, _: &str, _: Option<&str>, _: Option<&str>) -> Result<VerifiedToken> {
        bail!("token verification is not configured")
    }
}

/// Claims read from the token header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Caller username
    pub usr: String,
    /// Host the token was issued for
    pub host: String,
    /// Expiry, epoch milliseconds
    pub exp: i64,
    /// Not-before, epoch milliseconds
    pub nbf: i64,
}

/// Decodes tokens and checks their claims WITHOUT checking the signature.
///
/// For local development and tests only: anyone can mint a token this
/// verifier accepts.
#[derive(Debug, Clone, Default)]
pub struct InsecureJwsVerifier;

impl InsecureJwsVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Build a token this verifier accepts, with a placeholder signature
    pub fn compose(header: &TokenHeader, payload: &str) -> Result<String> {
        let header = serde_json::to_vec(header).context("encoding token header")?;
        Ok(format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode("unsigned")
        ))
    }

    fn decode_segment(segment: &str) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .context("token segment is not base64url")
    }
}

#[async_trait]
impl TokenVerifier for InsecureJwsVerifier {
    async fn verify(
        &self,
        token: &str,
        expected_payload: Option<&str>,
        session: Option<&str>,
    ) -> Result<VerifiedToken> {
        let mut parts = token.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("token must have three segments");
        };
        if signature.is_empty() {
            bail!("token has no signature");
        }

        let header: TokenHeader = serde_json::from_slice(&Self::decode_segment(header)?)
            .context("token header is not valid JSON")?;
        let payload = String::from_utf8(Self::decode_segment(payload)?)
            .context("token payload is not UTF-8")?;

        let now = Utc::now().timestamp_millis();
        if now < header.nbf {
            bail!("token is not valid yet");
        }
        if now >= header.exp {
            bail!("token has expired");
        }

        let auth_params = match expected_payload {
            Some(expected) if expected == payload => None,
            Some(_) => bail!("token payload does not match the request"),
            None => match serde_json::from_str::<Value>(&payload)? {
                Value::Object(map) => Some(map),
                _ => return Err(anyhow!("token payload is not a JSON object")),
            },
        };

        Ok(VerifiedToken {
            username: header.usr,
            hostname: header.host,
            auth_params,
            session_token: session.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(offset_ms: i64) -> TokenHeader {
        let now = Utc::now().timestamp_millis();
        TokenHeader {
            usr: "alice".into(),
            host: "app.example.com".into(),
            exp: now + offset_ms,
            nbf: now - 60_000,
        }
    }

    #[tokio::test]
    async fn test_reject_all() {
        assert!(RejectAllVerifier.verify("a.b.c", None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_body_token_yields_params() {
        let token = InsecureJwsVerifier::compose(&header(60_000), r#"{"name":"a"}"#).unwrap();
        let verified = InsecureJwsVerifier
            .verify(&token, None, Some("sess-1"))
            .await
            .unwrap();

        assert_eq!(verified.username, "alice");
        assert_eq!(verified.hostname, "app.example.com");
        assert_eq!(verified.session_token.as_deref(), Some("sess-1"));
        let params = verified.auth_params.unwrap();
        assert_eq!(params.get("name"), Some(&Value::from("a")));
    }

    #[tokio::test]
    async fn test_query_token_must_sign_the_path() {
        let token = InsecureJwsVerifier::compose(&header(60_000), "/widgets/1").unwrap();

        let verified = InsecureJwsVerifier
            .verify(&token, Some("/widgets/1"), None)
            .await
            .unwrap();
        assert!(verified.auth_params.is_none());

        assert!(
            InsecureJwsVerifier
                .verify(&token, Some("/widgets/2"), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_expired_token_fails() {
        let token = InsecureJwsVerifier::compose(&header(-1), "{}").unwrap();
        assert!(InsecureJwsVerifier.verify(&token, None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_tokens_fail() {
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.x"] {
            assert!(InsecureJwsVerifier.verify(token, None, None).await.is_err());
        }

        let array_payload = InsecureJwsVerifier::compose(&header(60_000), "[1,2]").unwrap();
        assert!(
            InsecureJwsVerifier
                .verify(&array_payload, None, None)
                .await
                .is_err()
        );
    }
}
