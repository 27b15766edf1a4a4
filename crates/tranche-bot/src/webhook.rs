//! Webhook intake and operator endpoints.
//!
//! The body is read as raw text: alerting platforms post JSON with a
//! `text/plain` content type. A payload that parses is acknowledged at once
//! and processed on its own task; the caller never learns the outcome.

use crate::error::{AppError, AppResult};
use crate::lifecycle::{LifecycleController, OpenSignal};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tranche_core::{Position, PositionSide, Price, Size, StopRule, TargetSpec};
use tranche_position::CloseReason;
use tranche_telemetry::Metrics;

/// Parsed webhook instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookCommand {
    Open(OpenSignal),
    Close { symbol: String },
}

/// Partial target entry: a bare price or a price with overrides.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetEntry {
    Price(Decimal),
    Detailed {
        price: Decimal,
        #[serde(default)]
        fraction: Option<Decimal>,
        #[serde(default, rename = "stopRule")]
        stop_rule: Option<StopRule>,
    },
}

impl TargetEntry {
    fn into_spec(self) -> TargetSpec {
        match self {
            Self::Price(price) => TargetSpec::at(Price::new(price)),
            Self::Detailed {
                price,
                fraction,
                stop_rule,
            } => TargetSpec {
                price: Price::new(price),
                close_fraction: fraction,
                stop_rule,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload {
    symbol: Option<String>,
    side: Option<String>,
    #[serde(alias = "qty")]
    quantity: Option<Decimal>,
    leverage: Option<Decimal>,
    entry_price: Option<Decimal>,
    #[serde(alias = "sl")]
    stop_price: Option<Decimal>,
    #[serde(alias = "tp")]
    final_target: Option<Decimal>,
    #[serde(default)]
    partial_targets: Option<Vec<TargetEntry>>,
    tp1: Option<Decimal>,
    tp2: Option<Decimal>,
    action: Option<String>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("missing field: {field}"))
}

/// Parse a raw webhook body.
pub fn parse_command(body: &str) -> Result<WebhookCommand, String> {
    let mut payload: WebhookPayload =
        serde_json::from_str(body.trim()).map_err(|e| format!("invalid JSON: {e}"))?;

    let symbol = required(payload.symbol.take(), "symbol")?.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err("missing field: symbol".to_string());
    }

    if let Some(action) = payload.action.take() {
        return match action.trim().to_ascii_lowercase().as_str() {
            "close" => Ok(WebhookCommand::Close { symbol }),
            "open" => parse_open(symbol, payload),
            other => Err(format!("unknown action: {other}")),
        };
    }
    parse_open(symbol, payload)
}

fn parse_open(symbol: String, payload: WebhookPayload) -> Result<WebhookCommand, String> {
    let side: PositionSide = required(payload.side, "side")?
        .parse()
        .map_err(|e| format!("{e}"))?;
    let leverage = required(payload.leverage, "leverage")?;
    let leverage = leverage
        .trunc()
        .to_u32()
        .filter(|l| *l > 0 && Decimal::from(*l) == leverage)
        .ok_or_else(|| format!("invalid leverage: {leverage}"))?;

    let targets: Vec<TargetSpec> = match payload.partial_targets {
        Some(entries) => entries.into_iter().map(TargetEntry::into_spec).collect(),
        None => [payload.tp1, payload.tp2]
            .into_iter()
            .flatten()
            .map(|p| TargetSpec::at(Price::new(p)))
            .collect(),
    };

    Ok(WebhookCommand::Open(OpenSignal {
        symbol,
        side,
        quantity: Size::new(required(payload.quantity, "quantity")?),
        leverage,
        entry_price: Price::new(required(payload.entry_price, "entryPrice")?),
        stop_price: Price::new(required(payload.stop_price, "stopPrice")?),
        final_target: Price::new(required(payload.final_target, "finalTarget")?),
        targets,
    }))
}

#[derive(Clone)]
pub struct WebhookState {
    controller: Arc<LifecycleController>,
}

impl WebhookState {
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self { controller }
    }
}

/// Create the axum router.
pub fn create_router(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", post(webhook))
        .route("/positions", get(positions))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "Server is running"
}

async fn webhook(State(state): State<WebhookState>, body: String) -> Response {
    let command = match parse_command(&body) {
        Ok(command) => command,
        Err(reason) => {
            warn!(%reason, "Webhook rejected");
            Metrics::signal("rejected");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    info!(?command, "Webhook accepted");
    tokio::spawn(process(state.controller.clone(), command));
    (StatusCode::OK, "Received").into_response()
}

async fn process(controller: Arc<LifecycleController>, command: WebhookCommand) {
    match command {
        WebhookCommand::Open(signal) => {
            let symbol = signal.symbol.clone();
            match controller.handle_signal(signal).await {
                Ok(outcome) => info!(symbol = %symbol, ?outcome, "Signal processed"),
                Err(e) => error!(symbol = %symbol, error = %e, "Signal failed"),
            }
        }
        WebhookCommand::Close { symbol } => {
            Metrics::signal("close");
            if let Err(e) = controller.close(&symbol, CloseReason::Manual).await {
                error!(symbol = %symbol, error = %e, "Close failed");
            }
        }
    }
}

async fn positions(State(state): State<WebhookState>) -> Json<Vec<Position>> {
    Json(state.controller.registry().snapshot())
}

async fn metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    bind: SocketAddr,
    state: WebhookState,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "Webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}
