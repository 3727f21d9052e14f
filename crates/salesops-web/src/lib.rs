//! Axum JSON API for the sales-ops dashboard.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use salesops_adapters::normalize;
use salesops_core::{EditError, OperatorEdit, OrderFilter, OrderQuery};
use salesops_provider::{FetchError, OrderSource, ProviderClient};
use salesops_storage::{OrderStore, PgOrderStore, StoreError};
use salesops_sync::{Reconciler, SyncConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "salesops-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub source: Arc<dyn OrderSource>,
    pub status_catalog: Option<Arc<ProviderClient>>,
}

impl AppState {
    pub fn new(store: Arc<dyn OrderStore>, source: Arc<dyn OrderSource>) -> Self {
        Self {
            store,
            source,
            status_catalog: None,
        }
    }

    pub fn with_status_catalog(mut self, client: Arc<ProviderClient>) -> Self {
        self.status_catalog = Some(client);
        self
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] FetchError),
}

impl From<EditError> for ApiError {
    fn from(err: EditError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Store(err) => {
                error!(error = %err, "order store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            ApiError::Provider(err) => {
                error!(error = %err, "provider request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/orders", get(list_orders_handler))
        .route("/api/orders/sync", post(sync_handler))
        .route("/api/orders/{id}", get(get_order_handler).patch(edit_order_handler))
        .route("/api/provider/orders", get(provider_orders_handler))
        .route("/api/provider/order-statuses", get(order_statuses_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let store = PgOrderStore::connect(&config.database_url).await?;
    store.migrate().await?;
    let provider = Arc::new(config.provider_client()?);
    let state = AppState::new(Arc::new(store), provider.clone()).with_status_catalog(provider);

    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "salesops web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn sync_handler(State(state): State<Arc<AppState>>) -> Response {
    let reconciler = Reconciler::new(state.source.clone(), state.store.clone());
    match reconciler.sync().await {
        Ok(result) => Json(json!({
            "success": true,
            "message": result.message(),
            "created": result.created,
            "updated": result.updated,
            "errors": result.errors,
            "total": result.total,
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "order sync failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "Failed to sync orders",
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    q: Option<String>,
    payment_method: Option<String>,
    status: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_date_param(name: &str, value: Option<String>) -> Result<Option<NaiveDate>, ApiError> {
    non_empty(value)
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("invalid {name}: {v}")))
        })
        .transpose()
}

impl ListParams {
    fn into_query(self) -> Result<OrderQuery, ApiError> {
        Ok(OrderQuery {
            q: non_empty(self.q),
            payment_method: non_empty(self.payment_method),
            status: non_empty(self.status),
            date_from: parse_date_param("date_from", self.date_from)?,
            date_to: parse_date_param("date_to", self.date_to)?,
        })
    }
}

async fn list_orders_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let query = params.into_query()?;
    let orders = state.store.list_orders(&query).await?;
    let total = orders.len();
    Ok(Json(json!({ "data": orders, "total": total })))
}

fn parse_order_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest("Invalid order ID".to_string()))
}

async fn get_order_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_order_id(&id)?;
    let order = state
        .store
        .get_order(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;
    Ok(Json(json!({ "data": order })))
}

async fn edit_order_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_order_id(&id)?;
    let fields = body
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("request body must be a JSON object".to_string()))?;
    let edit = OperatorEdit::from_body(fields)?;

    let order = state
        .store
        .apply_edit(id, &edit)
        .await?
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;
    info!(order_id = id, field = edit.field().column(), "operator field updated");
    Ok(Json(json!({ "success": true, "data": order })))
}

/// Repeated keys (`status_id`, `status_id[]`) accumulate; other keys keep the
/// last value seen.
fn provider_filter(pairs: Vec<(String, String)>) -> OrderFilter {
    let mut filter = OrderFilter::default();
    for (key, value) in pairs {
        if value.trim().is_empty() {
            continue;
        }
        match key.trim_end_matches("[]") {
            "status_id" => filter.status_ids.push(value),
            "payment_method" => filter.payment_methods.push(value),
            "date_from" => filter.date_from = Some(value),
            "date_to" => filter.date_to = Some(value),
            "q" => filter.q = Some(value),
            _ => {}
        }
    }
    filter
}

async fn provider_orders_handler(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let filter = provider_filter(pairs);
    let records = state.source.fetch_all_orders(&filter).await?;

    let mut orders = Vec::with_capacity(records.len());
    let mut errors = 0usize;
    for record in &records {
        match normalize(record) {
            Ok(order) => orders.push(order),
            Err(err) => {
                errors += 1;
                warn!(error = %err, "skipping malformed provider order");
            }
        }
    }
    Ok(Json(json!({ "data": orders, "total": orders.len(), "errors": errors })))
}

async fn order_statuses_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let statuses = match &state.status_catalog {
        Some(client) => client.fetch_order_statuses().await,
        None => Vec::new(),
    };
    Json(json!({ "data": statuses }))
}
