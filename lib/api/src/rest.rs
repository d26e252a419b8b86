use crate::upstream::UpstreamClient;
use actix_cors::Cors;
use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use chrono::NaiveDate;
use recx_core::{DateRange, Error, ItemId, UserId};
use recx_storage::ModelManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub upstream: UpstreamClient,
}

#[derive(Debug, Deserialize)]
struct RebuildParams {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct RecommendRequest {
    customer_id: UserId,
    k: Option<usize>,
    n: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub product_id: ItemId,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendResponse {
    pub recommendations: Vec<RecommendationItem>,
    /// False when the active-item filter could not be applied.
    pub filtered: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    matrices_loaded: bool,
    version: Option<u64>,
    model: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Engine(Error),
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Engine(e) => write!(f, "{}", e),
            ApiError::Internal(detail) => write!(f, "internal error: {}", detail),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Engine(e)
    }
}

impl From<BlockingError> for ApiError {
    fn from(e: BlockingError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Engine(Error::Data(_) | Error::Training(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Engine(Error::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(Error::UpstreamFetch { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Engine(Error::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
            ApiError::Engine(Error::Persistence(_) | Error::Serialization(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let kind = match self {
            ApiError::Engine(e) => e.kind(),
            ApiError::Internal(_) => "internal_error",
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": kind,
            "detail": self.to_string(),
        }))
    }
}

pub struct RestApi;

impl RestApi {
    pub async fn start(state: AppState, port: u16) -> std::io::Result<()> {
        info!(port, "starting REST API");
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new().wrap(cors).configure(configure(state.clone()))
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    }
}

/// Routes and state, shared by the server and the tests.
pub fn configure(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(state))
            .route("/rebuild", web::post().to(rebuild))
            .route("/recommendations", web::post().to(recommend))
            .route("/health", web::get().to(health));
    }
}

async fn rebuild(
    state: web::Data<AppState>,
    params: web::Query<RebuildParams>,
) -> Result<HttpResponse, ApiError> {
    let range = DateRange::new(params.start_date, params.end_date);
    let batch = state.upstream.fetch_batch(&range).await?;

    let manager = state.manager.clone();
    let report = web::block(move || manager.rebuild(&batch)).await??;
    Ok(HttpResponse::Ok().json(report))
}

async fn recommend(
    state: web::Data<AppState>,
    req: web::Json<RecommendRequest>,
) -> Result<HttpResponse, ApiError> {
    let mut query = state.manager.default_query();
    if let Some(k) = req.k {
        query.top_k_neighbors = k;
    }
    if let Some(n) = req.n {
        query.top_n = n;
    }

    let (active, filtered) = match state.upstream.fetch_active_items().await {
        Ok(active) => (active, true),
        Err(e) => {
            warn!(error = %e, "active items unavailable, serving without the catalog filter");
            (None, false)
        }
    };

    let recommendations = state
        .manager
        .recommend(req.customer_id, &query, active.as_ref())?
        .into_iter()
        .map(|s| RecommendationItem {
            product_id: s.item_id,
            score: s.score,
        })
        .collect();
    Ok(HttpResponse::Ok().json(RecommendResponse {
        recommendations,
        filtered,
    }))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let health = state.manager.health();
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        matrices_loaded: health.loaded,
        version: health.version,
        model: health.model.map(|m| m.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamConfig;
    use actix_web::test;
    use recx_core::{AugmentConfig, EngineConfig, InteractionBatch, RawLineItem, RawOrder, RawReview};
    use recx_storage::MemoryArtifactStore;

    fn state() -> AppState {
        state_with_active_items(None)
    }

    fn state_with_active_items(active_items_url: Option<String>) -> AppState {
        let config = EngineConfig {
            augment: AugmentConfig::disabled(),
            ..EngineConfig::default()
        };
        let manager = ModelManager::new(Arc::new(MemoryArtifactStore::new()), config).unwrap();
        let upstream = UpstreamClient::new(UpstreamConfig {
            orders_url: "http://127.0.0.1:9/orders".to_string(),
            reviews_url: "http://127.0.0.1:9/reviews".to_string(),
            active_items_url,
            timeout_secs: 2,
        })
        .unwrap();
        AppState {
            manager: Arc::new(manager),
            upstream,
        }
    }

    fn batch() -> InteractionBatch {
        let order = |customer: i64, product: i64| RawOrder {
            id: None,
            customer_id: Some(customer),
            items: vec![RawLineItem {
                product_id: Some(product),
                variant_id: None,
                quantity: Some(1),
            }],
        };
        let review = RawReview {
            id: None,
            order_id: None,
            product_id: Some(12),
            customer_id: Some(2),
            rating: Some(5.0),
        };
        InteractionBatch::new(vec![order(1, 10), order(2, 10), order(2, 11), order(3, 11)], vec![review])
    }

    #[actix_web::test]
    async fn test_health_before_rebuild() {
        let app = test::init_service(App::new().configure(configure(state()))).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["matrices_loaded"], false);
        assert!(body["version"].is_null());
    }

    #[actix_web::test]
    async fn test_recommend_not_ready() {
        let app = test::init_service(App::new().configure(configure(state()))).await;
        let req = test::TestRequest::post()
            .uri("/recommendations")
            .set_json(serde_json::json!({"customer_id": 1}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "not_ready");
    }

    #[actix_web::test]
    async fn test_recommend_after_rebuild() {
        let state = state();
        state.manager.rebuild(&batch()).unwrap();
        let app = test::init_service(App::new().configure(configure(state))).await;

        let req = test::TestRequest::post()
            .uri("/recommendations")
            .set_json(serde_json::json!({"customer_id": 1, "k": 2, "n": 5}))
            .to_request();
        let body: RecommendResponse = test::call_and_read_body_json(&app, req).await;
        assert!(body.filtered);
        assert!(!body.recommendations.is_empty());
        assert!(body.recommendations.iter().all(|r| r.product_id != 10));

        let cold = test::TestRequest::post()
            .uri("/recommendations")
            .set_json(serde_json::json!({"customer_id": -1}))
            .to_request();
        let body: RecommendResponse = test::call_and_read_body_json(&app, cold).await;
        assert_eq!(body.recommendations.len(), 3);
    }

    #[actix_web::test]
    async fn test_recommend_flags_unfiltered_response() {
        let state = state_with_active_items(Some("http://127.0.0.1:9/active".to_string()));
        state.manager.rebuild(&batch()).unwrap();
        let app = test::init_service(App::new().configure(configure(state))).await;

        let req = test::TestRequest::post()
            .uri("/recommendations")
            .set_json(serde_json::json!({"customer_id": -1}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: RecommendResponse = test::read_body_json(resp).await;
        assert!(!body.filtered);
        assert_eq!(body.recommendations.len(), 3);
    }

    #[actix_web::test]
    async fn test_rebuild_with_unreachable_upstream() {
        let app = test::init_service(App::new().configure(configure(state()))).await;
        let req = test::TestRequest::post()
            .uri("/rebuild?start_date=2024-01-01&end_date=2024-02-01")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_web::test]
    async fn test_rebuild_rejects_bad_dates() {
        let app = test::init_service(App::new().configure(configure(state()))).await;
        let req = test::TestRequest::post().uri("/rebuild?start_date=yesterday").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_error_status_mapping() {
        let cases = [
            (Error::Data("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::Training("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::NotReady, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::UpstreamFetch {
                    status: Some(500),
                    detail: "x".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::InvalidConfig("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
    }
}
