use async_trait::async_trait;
use std::time::Duration;

use corelib::MarketplaceConnection;
use reliability::RawFailure;

use crate::EngineResult;

/// The wire calls a Poshmark-like marketplace actually exposes. Kept as a
/// trait so `engine.rs`'s action logic can be tested without HTTP (§9's
/// open question on mock clients vs. a real wire contract per marketplace).
#[async_trait]
pub trait PoshmarkClient: Send + Sync {
    async fn share_listing(&self, connection: &MarketplaceConnection, external_id: &str) -> EngineResult<()>;

    async fn bump_listing(&self, connection: &MarketplaceConnection, external_id: &str) -> EngineResult<()>;

    async fn drop_price(
        &self,
        connection: &MarketplaceConnection,
        external_id: &str,
        new_price_cents: i64,
    ) -> EngineResult<()>;

    async fn send_offer(
        &self,
        connection: &MarketplaceConnection,
        external_id: &str,
        offer_price_cents: i64,
    ) -> EngineResult<()>;

    async fn delist(&self, connection: &MarketplaceConnection, external_id: &str) -> EngineResult<()>;
}

pub struct HttpPoshmarkClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPoshmarkClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn failure_from_response(status: reqwest::StatusCode, body: String) -> RawFailure {
        RawFailure {
            marketplace: "poshmark".to_string(),
            http_status: Some(status.as_u16()),
            message: body,
            ..Default::default()
        }
    }

    async fn post(&self, connection: &MarketplaceConnection, path: &str, body: serde_json::Value) -> EngineResult<()> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&connection.access_credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| RawFailure {
                marketplace: "poshmark".to_string(),
                error_type_name: Some("reqwest::Error".to_string()),
                message: e.to_string(),
                ..Default::default()
            })?;

        if resp.status().is_success() {
            return Ok(());
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Self::failure_from_response(status, body))
    }
}

#[async_trait]
impl PoshmarkClient for HttpPoshmarkClient {
    #[tracing::instrument(skip(self, connection), fields(external_id))]
    async fn share_listing(&self, connection: &MarketplaceConnection, external_id: &str) -> EngineResult<()> {
        self.post(connection, &format!("/listings/{external_id}/share"), serde_json::json!({}))
            .await
    }

    #[tracing::instrument(skip(self, connection), fields(external_id))]
    async fn bump_listing(&self, connection: &MarketplaceConnection, external_id: &str) -> EngineResult<()> {
        self.post(connection, &format!("/listings/{external_id}/bump"), serde_json::json!({}))
            .await
    }

    #[tracing::instrument(skip(self, connection), fields(external_id, new_price_cents))]
    async fn drop_price(
        &self,
        connection: &MarketplaceConnection,
        external_id: &str,
        new_price_cents: i64,
    ) -> EngineResult<()> {
        self.post(
            connection,
            &format!("/listings/{external_id}/price"),
            serde_json::json!({ "price_cents": new_price_cents }),
        )
        .await
    }

    #[tracing::instrument(skip(self, connection), fields(external_id, offer_price_cents))]
    async fn send_offer(
        &self,
        connection: &MarketplaceConnection,
        external_id: &str,
        offer_price_cents: i64,
    ) -> EngineResult<()> {
        self.post(
            connection,
            &format!("/listings/{external_id}/offer"),
            serde_json::json!({ "offer_price_cents": offer_price_cents }),
        )
        .await
    }

    #[tracing::instrument(skip(self, connection), fields(external_id))]
    async fn delist(&self, connection: &MarketplaceConnection, external_id: &str) -> EngineResult<()> {
        self.post(connection, &format!("/listings/{external_id}/delist"), serde_json::json!({}))
            .await
    }
}
