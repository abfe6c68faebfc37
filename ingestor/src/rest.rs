use crate::auth::{require_api_key, ApiKey};
use crate::errors::Error;
use crate::ingest::IngestionService;
use crate::metrics::{self, REJECTED_REQUESTS_TOTAL};
use crate::model::{MessageResponse, NewReading, Reading, ReadingPage, StatsSummary};
use crate::purge::PurgeService;
use crate::query::QueryService;
use crate::store::ReadingStore;
use crate::validate::{range_filter, validate_page};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

const SERVICE_NAME: &str = "thermo-ingestor";

/// Per-process handler context. Every service shares the one store handle.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ReadingStore>,
    ingest: IngestionService,
    query: QueryService,
    purge: PurgeService,
}

impl AppState {
    pub fn new(store: Arc<dyn ReadingStore>, max_batch_size: usize) -> Self {
        Self {
            ingest: IngestionService::new(store.clone(), max_batch_size),
            query: QueryService::new(store.clone()),
            purge: PurgeService::new(store.clone()),
            store,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    page: Option<i64>,
    per_page: Option<i64>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

pub fn create_router(state: AppState, api_key: ApiKey) -> Router {
    let protected = Router::new()
        .route("/api/temperature", post(create_reading))
        .route("/api/temperature/", post(create_reading))
        .route("/api/temperature/bulk", post(create_readings_bulk))
        .route(
            "/api/laravel/temperatures",
            get(list_readings).delete(delete_readings),
        )
        .route("/api/laravel/temperatures/latest", get(latest_reading))
        .route("/api/laravel/temperatures/stats/summary", get(reading_stats))
        .route("/api/laravel/temperatures/:id", get(reading_by_id))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(api_key, require_api_key));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let connected = state.store.ping().await.is_ok();
    Json(json!({
        "status": if connected { "ok" } else { "degraded" },
        "database": if connected { "connected" } else { "disconnected" },
    }))
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn create_reading(
    State(state): State<AppState>,
    payload: Result<Json<NewReading>, JsonRejection>,
) -> Result<Json<MessageResponse>, Error> {
    let Json(candidate) = payload.map_err(invalid_body)?;
    let id = state.ingest.create_one(candidate).await?;
    Ok(Json(MessageResponse::ok(format!("Reading stored with id: {}", id))))
}

async fn create_readings_bulk(
    State(state): State<AppState>,
    payload: Result<Json<Vec<NewReading>>, JsonRejection>,
) -> Result<Json<MessageResponse>, Error> {
    let Json(candidates) = payload.map_err(invalid_body)?;
    let inserted = state.ingest.create_batch(candidates).await?;
    Ok(Json(MessageResponse::ok(format!("{} readings stored", inserted))))
}

/// Malformed or mistyped bodies are validation failures like any other.
fn invalid_body(rejection: JsonRejection) -> Error {
    Error::Validation(rejection.body_text())
}

async fn list_readings(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ReadingPage>, Error> {
    let (page, per_page) = validate_page(params.page, params.per_page)?;
    let filter = range_filter(params.start_date.as_deref(), params.end_date.as_deref())?;
    Ok(Json(state.query.list(page, per_page, filter).await?))
}

async fn latest_reading(State(state): State<AppState>) -> Result<Json<Reading>, Error> {
    Ok(Json(state.query.latest().await?))
}

async fn reading_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Reading>, Error> {
    Ok(Json(state.query.get_by_id(&id).await?))
}

async fn reading_stats(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<StatsSummary>, Error> {
    let filter = range_filter(params.start_date.as_deref(), params.end_date.as_deref())?;
    Ok(Json(state.query.stats(filter).await?))
}

async fn delete_readings(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<MessageResponse>, Error> {
    let filter = range_filter(params.start_date.as_deref(), params.end_date.as_deref())?;
    let deleted = state.purge.delete_by_range(filter).await?;
    Ok(Json(MessageResponse::ok(format!("{} readings deleted", deleted))))
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidId(_) | Error::EmptyFilter => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(_) | Error::Migration(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let detail = match &self {
            Error::Validation(_) => {
                REJECTED_REQUESTS_TOTAL.inc();
                self.to_string()
            }
            Error::StoreUnavailable(_) => {
                error!("API error: {}", self);
                "Database unavailable".to_string()
            }
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!("API error: {}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    fn create_test_app() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), 100);
        (store, create_router(state, ApiKey::new(KEY)))
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-API-Key", KEY);
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn reading_json(adc: i64, temp: f64) -> Value {
        json!({ "adc_value": adc, "voltage": 1.65, "temperature_c": temp })
    }

    #[tokio::test]
    async fn test_health_endpoints_need_no_key() {
        let (_store, app) = create_test_app();

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["database"], "connected");
    }

    #[tokio::test]
    async fn test_health_degraded_when_store_down() {
        let (store, app) = create_test_app();
        store.set_unavailable(true);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["database"], "disconnected");
    }

    #[tokio::test]
    async fn test_missing_or_wrong_key_is_rejected_before_ingest() {
        let (store, app) = create_test_app();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/temperature/")
            .header("Content-Type", "application/json")
            .body(Body::from(reading_json(10, 20.0).to_string()))
            .unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(json["detail"].as_str().unwrap().contains("API key"));

        let req = Request::builder()
            .uri("/api/laravel/temperatures")
            .header("X-API-Key", "wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_create_then_get_by_id_round_trip() {
        let (_store, app) = create_test_app();
        let before = chrono::Utc::now();

        let (status, json) = send(
            &app,
            request(Method::POST, "/api/temperature/", Some(reading_json(128, 23.5))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");

        let message = json["message"].as_str().unwrap();
        let id = message.rsplit(' ').next().unwrap();

        let uri = format!("/api/laravel/temperatures/{}", id);
        let (status, json) = send(&app, request(Method::GET, &uri, None)).await;
        assert_eq!(status, StatusCode::OK);

        let reading: Reading = serde_json::from_value(json).unwrap();
        assert_eq!(reading.id.to_string(), id);
        assert_eq!(reading.adc_value, 128);
        assert_eq!(reading.voltage, 1.65);
        assert_eq!(reading.temperature_c, 23.5);
        assert!(reading.timestamp >= before);
    }

    #[tokio::test]
    async fn test_out_of_range_adc_is_unprocessable() {
        let (store, app) = create_test_app();
        let (status, json) = send(
            &app,
            request(Method::POST, "/api/temperature/", Some(reading_json(300, 20.0))),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["detail"].as_str().unwrap().contains("adc_value"));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_bodies_use_detail_shape() {
        let (store, app) = create_test_app();
        let before = REJECTED_REQUESTS_TOTAL.get();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/temperature/")
            .header("X-API-Key", KEY)
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["detail"].is_string());

        let missing_field = json!({ "adc_value": 10, "voltage": 1.0 });
        let (status, json) = send(
            &app,
            request(Method::POST, "/api/temperature/", Some(missing_field)),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["detail"].as_str().unwrap().contains("temperature_c"));

        let float_adc = json!([{ "adc_value": 1.5, "voltage": 1.0, "temperature_c": 20.0 }]);
        let (status, json) = send(
            &app,
            request(Method::POST, "/api/temperature/bulk", Some(float_adc)),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["detail"].is_string());

        assert_eq!(store.len(), 0);
        assert!(REJECTED_REQUESTS_TOTAL.get() >= before + 3.0);
    }

    #[tokio::test]
    async fn test_bulk_ingest_and_paginate() {
        let (_store, app) = create_test_app();
        let batch: Vec<Value> = (0..25).map(|i| reading_json(i, 20.0 + i as f64)).collect();

        let (status, json) = send(
            &app,
            request(Method::POST, "/api/temperature/bulk", Some(Value::Array(batch))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "25 readings stored");

        let (status, json) = send(
            &app,
            request(Method::GET, "/api/laravel/temperatures?page=3&per_page=10", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 25);
        assert_eq!(json["page"], 3);
        assert_eq!(json["per_page"], 10);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 5);
        // Oldest five, newest first.
        assert_eq!(data[0]["adc_value"], 4);
        assert_eq!(data[4]["adc_value"], 0);

        let (_, json) = send(&app, request(Method::GET, "/api/laravel/temperatures/latest", None)).await;
        assert_eq!(json["adc_value"], 24);
    }

    #[tokio::test]
    async fn test_bulk_with_one_invalid_item_stores_nothing() {
        let (store, app) = create_test_app();
        let batch = json!([reading_json(1, 20.0), reading_json(-1, 20.0)]);

        let (status, _) = send(&app, request(Method::POST, "/api/temperature/bulk", Some(batch))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(store.len(), 0);

        let (status, _) = send(&app, request(Method::POST, "/api/temperature/bulk", Some(json!([])))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_pagination_and_dates() {
        let (_store, app) = create_test_app();

        let (status, _) = send(
            &app,
            request(Method::GET, "/api/laravel/temperatures?per_page=101", None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            request(Method::GET, "/api/laravel/temperatures?page=0", None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            request(Method::GET, "/api/laravel/temperatures?start_date=tomorrow", None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let (_store, app) = create_test_app();

        let (status, _) = send(&app, request(Method::GET, "/api/laravel/temperatures/latest", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request(Method::GET, "/api/laravel/temperatures/xyz", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/laravel/temperatures/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&app, request(Method::GET, &uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_empty() {
        let (_store, app) = create_test_app();
        let (status, json) = send(
            &app,
            request(Method::GET, "/api/laravel/temperatures/stats/summary", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 0);
        assert!(json["avg_temperature"].is_null());
        assert!(json["min_temperature"].is_null());
        assert!(json["max_temperature"].is_null());
        assert!(json["last_reading"].is_null());
    }

    #[tokio::test]
    async fn test_stats_summary() {
        let (_store, app) = create_test_app();
        let batch = json!([reading_json(1, 10.0), reading_json(2, 20.0), reading_json(3, 30.0)]);
        send(&app, request(Method::POST, "/api/temperature/bulk", Some(batch))).await;

        let (status, json) = send(
            &app,
            request(Method::GET, "/api/laravel/temperatures/stats/summary", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 3);
        assert_eq!(json["avg_temperature"], 20.0);
        assert_eq!(json["min_temperature"], 10.0);
        assert_eq!(json["max_temperature"], 30.0);
        assert_eq!(json["last_reading"]["adc_value"], 3);
    }

    #[tokio::test]
    async fn test_delete_requires_a_bound() {
        let (store, app) = create_test_app();
        let batch = json!([reading_json(1, 10.0), reading_json(2, 20.0)]);
        send(&app, request(Method::POST, "/api/temperature/bulk", Some(batch))).await;

        let (status, _) = send(&app, request(Method::DELETE, "/api/laravel/temperatures", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.len(), 2);

        let (status, json) = send(
            &app,
            request(Method::DELETE, "/api/laravel/temperatures?start_date=2000-01-01", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "2 readings deleted");
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_store_unavailable_is_503() {
        let (store, app) = create_test_app();
        store.set_unavailable(true);

        let (status, json) = send(&app, request(Method::GET, "/api/laravel/temperatures", None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["detail"], "Database unavailable");

        let (status, _) = send(
            &app,
            request(Method::POST, "/api/temperature/", Some(reading_json(1, 1.0))),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_requires_key() {
        let (_store, app) = create_test_app();

        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/metrics", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
