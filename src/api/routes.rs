use crate::{
    api::health,
    config::Config,
    errors::Result,
    observability::HealthChecker,
    rate_limit::{rate_limit_middleware, AdmissionControl, AdmissionFilter},
    storage::LimiterStorage,
};
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub health_checker: Arc<HealthChecker>,
}

impl FromRef<AppState> for Arc<HealthChecker> {
    fn from_ref(state: &AppState) -> Self {
        state.health_checker.clone()
    }
}

/// Build the service router.
///
/// Application routes sit behind the admission filter; health and metrics
/// endpoints are never rate limited.
pub fn create_router(
    admission: Arc<dyn AdmissionControl>,
    storage: Arc<dyn LimiterStorage>,
    config: &Config,
) -> Result<Router> {
    let state = AppState {
        health_checker: Arc::new(HealthChecker::new(storage)),
    };

    let filter = AdmissionFilter::from_config(admission, &config.rate_limit)?;

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limited = Router::new()
        .route("/", get(index))
        .route_layer(from_fn_with_state(filter, rate_limit_middleware));

    let mut router = Router::new()
        // Health endpoints
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/health/startup", get(health::startup));

    if config.observability.metrics_enabled {
        router = router.route("/metrics", get(health::metrics));
    }

    Ok(router
        .merge(limited)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// GET /
async fn index() -> Json<Value> {
    Json(json!({ "message": "Hello, World!" }))
}
