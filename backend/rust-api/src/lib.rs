use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{TutorError, TutorResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(extractors::LEARNER_HEADER),
            HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1/lesson", lesson_routes().layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn lesson_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/next-step", get(handlers::lesson::next_step))
        .route("/next-example", post(handlers::lesson::next_example))
        .route("/answers", post(handlers::lesson::submit_answer))
        .route("/current-stage", get(handlers::lesson::current_stage))
        .route("/profile", get(handlers::lesson::profile))
        .route("/stages", get(handlers::lesson::list_stages))
        .route("/reset", post(handlers::lesson::reset))
}
