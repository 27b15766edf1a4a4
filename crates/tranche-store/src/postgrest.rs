//! Supabase (PostgREST) backed trade store.

use crate::error::{StoreError, StoreResult};
use crate::record::TradeRecord;
use crate::store::{BoxFuture, TradeStore};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// Environment variable holding the project URL.
pub const URL_ENV: &str = "SUPABASE_URL";
/// Environment variable holding the service key.
pub const KEY_ENV: &str = "SUPABASE_KEY";

#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    pub table: String,
    pub timeout_ms: u64,
}

impl Default for PostgrestConfig {
    fn default() -> Self {
        Self {
            table: "orders".to_string(),
            timeout_ms: 10_000,
        }
    }
}

pub struct PostgrestStore {
    http: Client,
    endpoint: String,
    key: Zeroizing<String>,
}

impl PostgrestStore {
    pub fn new(url: &str, key: impl Into<String>, config: &PostgrestConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/rest/v1/{}", url.trim_end_matches('/'), config.table),
            key: Zeroizing::new(key.into()),
        })
    }

    /// Build from `SUPABASE_URL` / `SUPABASE_KEY`.
    pub fn from_env(config: &PostgrestConfig) -> StoreResult<Self> {
        let url = std::env::var(URL_ENV)
            .map_err(|_| StoreError::MissingConfig(format!("{URL_ENV} not set")))?;
        let key = std::env::var(KEY_ENV)
            .map_err(|_| StoreError::MissingConfig(format!("{KEY_ENV} not set")))?;
        Self::new(&url, key, config)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", self.key.as_str())
            .header("Authorization", format!("Bearer {}", self.key.as_str()))
    }

    async fn checked(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn select(&self, filter: Option<&str>) -> StoreResult<Vec<TradeRecord>> {
        let mut query = vec![("select", "*".to_string())];
        if let Some(symbol) = filter {
            query.push(("symbol", format!("eq.{symbol}")));
        }
        let response = self
            .authorized(self.http.get(&self.endpoint).query(&query))
            .send()
            .await?;
        let response = Self::checked(response).await?;
        Ok(response.json().await?)
    }
}

impl TradeStore for PostgrestStore {
    fn get(&self, symbol: &str) -> BoxFuture<'_, StoreResult<Option<TradeRecord>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let rows = self.select(Some(&symbol)).await?;
            Ok(rows.into_iter().next())
        })
    }

    fn upsert(&self, record: TradeRecord) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            debug!(symbol = %record.symbol, stage = record.stage, "Upserting trade row");
            let response = self
                .authorized(
                    self.http
                        .post(&self.endpoint)
                        .query(&[("on_conflict", "symbol")])
                        .header("Prefer", "resolution=merge-duplicates,return=minimal")
                        .json(&[record]),
                )
                .send()
                .await?;
            Self::checked(response).await?;
            Ok(())
        })
    }

    fn delete(&self, symbol: &str) -> BoxFuture<'_, StoreResult<()>> {
        let filter = format!("eq.{symbol}");
        Box::pin(async move {
            let response = self
                .authorized(self.http.delete(&self.endpoint).query(&[("symbol", filter)]))
                .send()
                .await?;
            Self::checked(response).await?;
            Ok(())
        })
    }

    fn list_all(&self) -> BoxFuture<'_, StoreResult<Vec<TradeRecord>>> {
        Box::pin(self.select(None))
    }

    fn name(&self) -> &'static str {
        "postgrest"
    }
}
