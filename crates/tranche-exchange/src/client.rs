//! Binance USDⓈ-M futures REST client.

use crate::error::{ExchangeError, ExchangeResult};
use crate::gateway::{BoxFuture, ExchangeGateway, ExchangePosition, OpenOrder, OrderAck};
use crate::signer::signed_query;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use tranche_core::{ClientOrderId, OrderSide, PositionSide, Price, Size, SymbolPrecision};
use zeroize::Zeroizing;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "BINANCE_KEY";
/// Environment variable holding the API secret.
pub const API_SECRET_ENV: &str = "BINANCE_SECRET";

/// API credentials. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
}

impl BinanceCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Zeroizing::new(api_secret.into()),
        }
    }

    /// Load from `BINANCE_KEY` / `BINANCE_SECRET`.
    pub fn from_env() -> ExchangeResult<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ExchangeError::MissingCredentials(format!("{API_KEY_ENV} not set")))?;
        let api_secret = std::env::var(API_SECRET_ENV)
            .map_err(|_| ExchangeError::MissingCredentials(format!("{API_SECRET_ENV} not set")))?;
        Ok(Self::new(api_key, api_secret))
    }
}

impl fmt::Debug for BinanceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub recv_window_ms: u64,
    pub timeout_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            recv_window_ms: 5000,
            timeout_ms: 10_000,
        }
    }
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPositionRisk {
    symbol: String,
    position_amt: rust_decimal::Decimal,
    entry_price: Price,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderAck {
    order_id: i64,
    symbol: String,
    #[serde(default)]
    client_order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenOrder {
    order_id: i64,
    symbol: String,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: String,
    #[serde(default)]
    stop_price: Option<Price>,
    #[serde(default)]
    close_position: bool,
    #[serde(default)]
    reduce_only: bool,
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct RawSymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

impl RawSymbolInfo {
    fn filter_value(&self, filter_type: &str, field: &str) -> Option<String> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
            .and_then(|f| f.get(field))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// `LOT_SIZE.stepSize` and `PRICE_FILTER.tickSize`.
    fn precision(&self) -> Option<SymbolPrecision> {
        let step: Size = self.filter_value("LOT_SIZE", "stepSize")?.parse().ok()?;
        let tick: Price = self.filter_value("PRICE_FILTER", "tickSize")?.parse().ok()?;
        Some(SymbolPrecision::new(step, tick))
    }
}

/// Signed REST client for Binance USDⓈ-M futures.
pub struct BinanceFuturesClient {
    http: Client,
    config: BinanceConfig,
    credentials: Option<BinanceCredentials>,
}

impl BinanceFuturesClient {
    pub fn new(config: BinanceConfig, credentials: Option<BinanceCredentials>) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExchangeError::Http(format!("Failed to create HTTP client: {e}")))?;

        if credentials.is_none() {
            warn!("No exchange credentials configured, private endpoints will fail");
        }

        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn creds(&self) -> ExchangeResult<&BinanceCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::MissingCredentials("exchange credentials".into()))
    }

    async fn signed_request<T>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> ExchangeResult<T>
    where
        T: DeserializeOwned,
    {
        let creds = self.creds()?;
        let timestamp = chrono::Utc::now().timestamp_millis();
        let query = signed_query(
            &params,
            timestamp,
            self.config.recv_window_ms,
            creds.api_secret.as_bytes(),
        )?;

        debug!(%method, path, "Signed exchange request");

        let response = self
            .http
            .request(method, format!("{}?{}", self.url(path), query))
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn public_request<T>(&self, path: &str, params: Vec<(&str, String)>) -> ExchangeResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.http.get(self.url(path)).query(&params).send().await?;
        Self::decode(response).await
    }

    async fn decode<T>(response: reqwest::Response) -> ExchangeResult<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => ExchangeError::Api {
                    code: err.code,
                    msg: err.msg,
                },
                Err(_) => ExchangeError::Http(format!("HTTP {status}: {body}")),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Parse(format!("{e}: {body}")))
    }

    async fn place_order(&self, mut params: Vec<(&str, String)>) -> ExchangeResult<OrderAck> {
        let client_order_id = ClientOrderId::new();
        params.push(("newClientOrderId", client_order_id.to_string()));

        let raw: RawOrderAck = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;

        info!(
            symbol = %raw.symbol,
            order_id = raw.order_id,
            client_order_id = %client_order_id,
            "Order accepted"
        );

        Ok(OrderAck {
            order_id: raw.order_id,
            client_order_id: if raw.client_order_id.is_empty() {
                client_order_id.to_string()
            } else {
                raw.client_order_id
            },
            symbol: raw.symbol,
        })
    }

    fn conditional_params(
        symbol: &str,
        side: OrderSide,
        order_type: &'static str,
        trigger: Price,
        quantity: Option<Size>,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", order_type.to_string()),
            ("stopPrice", trigger.inner().normalize().to_string()),
            ("timeInForce", "GTC".to_string()),
        ];
        match quantity {
            Some(qty) => {
                params.push(("quantity", qty.inner().normalize().to_string()));
                params.push(("reduceOnly", "true".to_string()));
            }
            None => params.push(("closePosition", "true".to_string())),
        }
        params
    }
}

impl ExchangeGateway for BinanceFuturesClient {
    fn get_position(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Option<ExchangePosition>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let rows: Vec<RawPositionRisk> = self
                .signed_request(
                    Method::GET,
                    "/fapi/v2/positionRisk",
                    vec![("symbol", symbol.clone())],
                )
                .await?;

            Ok(rows
                .into_iter()
                .find(|row| row.symbol == symbol && !row.position_amt.is_zero())
                .map(|row| ExchangePosition {
                    side: if row.position_amt.is_sign_negative() {
                        PositionSide::Short
                    } else {
                        PositionSide::Long
                    },
                    quantity: Size::new(row.position_amt.abs()),
                    entry_price: row.entry_price,
                    symbol: row.symbol,
                }))
        })
    }

    fn set_leverage(&self, symbol: &str, leverage: u32) -> BoxFuture<'_, ExchangeResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let _: serde_json::Value = self
                .signed_request(
                    Method::POST,
                    "/fapi/v1/leverage",
                    vec![("symbol", symbol), ("leverage", leverage.to_string())],
                )
                .await?;
            Ok(())
        })
    }

    fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Size,
        reduce_only: bool,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.inner().normalize().to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        Box::pin(self.place_order(params))
    }

    fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger: Price,
        quantity: Option<Size>,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        let params = Self::conditional_params(symbol, side, "STOP_MARKET", trigger, quantity);
        Box::pin(self.place_order(params))
    }

    fn place_take_profit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger: Price,
        quantity: Option<Size>,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        let params =
            Self::conditional_params(symbol, side, "TAKE_PROFIT_MARKET", trigger, quantity);
        Box::pin(self.place_order(params))
    }

    fn cancel_order(&self, symbol: &str, order_id: i64) -> BoxFuture<'_, ExchangeResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let _: serde_json::Value = self
                .signed_request(
                    Method::DELETE,
                    "/fapi/v1/order",
                    vec![("symbol", symbol), ("orderId", order_id.to_string())],
                )
                .await?;
            Ok(())
        })
    }

    fn cancel_all_orders(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let _: serde_json::Value = self
                .signed_request(
                    Method::DELETE,
                    "/fapi/v1/allOpenOrders",
                    vec![("symbol", symbol)],
                )
                .await?;
            Ok(())
        })
    }

    fn get_open_orders(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let rows: Vec<RawOpenOrder> = self
                .signed_request(
                    Method::GET,
                    "/fapi/v1/openOrders",
                    vec![("symbol", symbol)],
                )
                .await?;

            Ok(rows
                .into_iter()
                .map(|row| OpenOrder {
                    order_id: row.order_id,
                    symbol: row.symbol,
                    side: row.side,
                    order_type: row.order_type,
                    stop_price: row.stop_price.filter(|p| p.is_positive()),
                    close_position: row.close_position,
                    reduce_only: row.reduce_only,
                })
                .collect())
        })
    }

    fn get_instrument_precision(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<SymbolPrecision>> {
        let symbol = symbol.to_ascii_uppercase();
        Box::pin(async move {
            let info: RawExchangeInfo = self
                .public_request("/fapi/v1/exchangeInfo", vec![("symbol", symbol.clone())])
                .await?;

            info.symbols
                .iter()
                .find(|s| s.symbol == symbol)
                .and_then(RawSymbolInfo::precision)
                .ok_or(ExchangeError::UnknownSymbol(symbol))
        })
    }

    fn get_all_precisions(&self) -> BoxFuture<'_, ExchangeResult<HashMap<String, SymbolPrecision>>> {
        Box::pin(async move {
            let info: RawExchangeInfo = self
                .public_request("/fapi/v1/exchangeInfo", Vec::new())
                .await?;

            Ok(info
                .symbols
                .iter()
                .filter_map(|s| s.precision().map(|p| (s.symbol.clone(), p)))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_precision_from_filters() {
        let raw = r#"{
            "symbols": [{
                "symbol": "BTCUSDT",
                "status": "TRADING",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "556.80", "maxPrice": "4529764", "tickSize": "0.10"},
                    {"filterType": "LOT_SIZE", "maxQty": "1000", "minQty": "0.001", "stepSize": "0.001"},
                    {"filterType": "MARKET_LOT_SIZE", "stepSize": "0.001"}
                ]
            }, {
                "symbol": "NOFILTERS",
                "filters": []
            }]
        }"#;
        let info: RawExchangeInfo = serde_json::from_str(raw).unwrap();

        let btc = info.symbols[0].precision().unwrap();
        assert_eq!(btc.quantity_step, Size::new(dec!(0.001)));
        assert_eq!(btc.price_tick, Price::new(dec!(0.10)));
        assert!(info.symbols[1].precision().is_none());
    }

    #[test]
    fn test_position_risk_parsing() {
        let raw = r#"[{
            "symbol": "ETHUSDT",
            "positionAmt": "-0.500",
            "entryPrice": "2250.5",
            "markPrice": "2249.0",
            "leverage": "10",
            "positionSide": "BOTH"
        }]"#;
        let rows: Vec<RawPositionRisk> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows[0].position_amt, dec!(-0.500));
        assert_eq!(rows[0].entry_price, Price::new(dec!(2250.5)));
    }

    #[test]
    fn test_open_order_parsing() {
        let raw = r#"[{
            "orderId": 8886774,
            "symbol": "BTCUSDT",
            "side": "SELL",
            "type": "STOP_MARKET",
            "stopPrice": "41000",
            "closePosition": true,
            "reduceOnly": true,
            "origQty": "0"
        }]"#;
        let rows: Vec<RawOpenOrder> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows[0].side, OrderSide::Sell);
        assert_eq!(rows[0].stop_price, Some(Price::new(dec!(41000))));
        assert!(rows[0].close_position);
    }

    #[test]
    fn test_conditional_params_close_position() {
        let params = BinanceFuturesClient::conditional_params(
            "BTCUSDT",
            OrderSide::Sell,
            "STOP_MARKET",
            Price::new(dec!(41000.00)),
            None,
        );
        assert!(params.contains(&("stopPrice", "41000".to_string())));
        assert!(params.contains(&("closePosition", "true".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "quantity"));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = BinanceCredentials::new("key", "super-secret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("key"));
        assert!(!rendered.contains("super-secret"));
    }

    #[tokio::test]
    async fn test_private_call_without_credentials_fails() {
        let client = BinanceFuturesClient::new(BinanceConfig::default(), None).unwrap();
        let err = client.get_position("BTCUSDT").await.unwrap_err();
        assert!(matches!(err, ExchangeError::MissingCredentials(_)));
    }
}
