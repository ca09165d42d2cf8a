//! Widget catalogue example
//!
//! Serves the entity types declared in `widgets.yaml` from an in-memory
//! store seeded with one user. Tokens are decoded without signature checks,
//! so mint one with `InsecureJwsVerifier::compose` to act as `u1`:
//!
//! ```text
//! curl localhost:3000/widgets
//! curl -X POST localhost:3000/widgets --data "$TOKEN"
//! ```

use anyhow::Result;
use entity_rest::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = include_str!("widgets.yaml");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,entity_rest=debug")),
        )
        .init();

    let config = RestConfig::from_yaml_str(CONFIG)?;

    let store = InMemoryEntityStore::new();
    store
        .put(Entity::with_id("user", "u1").with("name", "Ann"))
        .await?;

    let now = Utc::now().timestamp_millis();
    let sample = InsecureJwsVerifier::compose(
        &TokenHeader {
            usr: "u1".into(),
            host: "localhost".into(),
            exp: now + 3_600_000,
            nbf: now,
        },
        r#"{"name":"first widget","owner":"u1"}"#,
    )?;
    tracing::info!(token = %sample, "sample create token for u1");

    ServerBuilder::new()
        .with_store(store)
        .with_token_verifier(InsecureJwsVerifier::new())
        .with_config(config)?
        .serve("127.0.0.1:3000")
        .await
}
