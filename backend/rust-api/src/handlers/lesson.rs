use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::TutorError,
    extractors::{AppJson, Learner},
    models::{lesson::SubmitAnswerRequest, stage::Stage},
    services::{lesson_service::LessonService, AppState},
};

const NEXT_STEP_PATH: &str = "/api/v1/lesson/next-step";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The learner must fetch a fresh step before retrying.
    Conflict { message: String, redirect: &'static str },
    Internal(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        match err {
            TutorError::NoActiveQuestion => ApiError::Conflict {
                message: err.to_string(),
                redirect: NEXT_STEP_PATH,
            },
            TutorError::UnknownChoice(_) | TutorError::InvalidNumber(_) | TutorError::UnsupportedPlaces(_) => {
                ApiError::BadRequest(err.to_string())
            }
            e if e.is_invariant_violation() => {
                tracing::error!("Invariant violation: {}", e);
                ApiError::Internal(e.to_string())
            }
            e => {
                tracing::error!("Lesson turn failed: {}", e);
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "message": message, "status": 400 }),
            ),
            ApiError::Conflict { message, redirect } => (
                StatusCode::CONFLICT,
                serde_json::json!({ "message": message, "status": 409, "redirect": redirect }),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "message": message, "status": 500 }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// GET /api/v1/lesson/next-step
pub async fn next_step(
    State(state): State<Arc<AppState>>,
    learner: Learner,
) -> Result<impl IntoResponse, ApiError> {
    let step = LessonService::new(&state).next_step(&learner.id).await?;
    Ok((learner.jar, Json(step)))
}

/// POST /api/v1/lesson/next-example
pub async fn next_example(
    State(state): State<Arc<AppState>>,
    learner: Learner,
) -> Result<impl IntoResponse, ApiError> {
    let step = LessonService::new(&state).next_example(&learner.id).await?;
    Ok((learner.jar, Json(step)))
}

/// POST /api/v1/lesson/answers
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    learner: Learner,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let response = LessonService::new(&state)
        .submit_answer(&learner.id, &req)
        .await?;
    Ok((learner.jar, Json(response)))
}

/// GET /api/v1/lesson/current-stage
pub async fn current_stage(
    State(state): State<Arc<AppState>>,
    learner: Learner,
) -> Result<impl IntoResponse, ApiError> {
    let progress = LessonService::new(&state).current_stage(&learner.id).await?;
    Ok((learner.jar, Json(progress)))
}

/// GET /api/v1/lesson/profile
pub async fn profile(
    State(state): State<Arc<AppState>>,
    learner: Learner,
) -> Result<impl IntoResponse, ApiError> {
    let profile = LessonService::new(&state).profile(&learner.id).await?;
    Ok((learner.jar, Json(profile)))
}

/// GET /api/v1/lesson/stages
pub async fn list_stages(State(state): State<Arc<AppState>>) -> Json<&'static [Stage]> {
    Json(state.engine.catalog())
}

/// POST /api/v1/lesson/reset
pub async fn reset(
    State(state): State<Arc<AppState>>,
    learner: Learner,
) -> Result<impl IntoResponse, ApiError> {
    let step = LessonService::new(&state).reset(&learner.id).await?;
    Ok((learner.jar, Json(step)))
}
