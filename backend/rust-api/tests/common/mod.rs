use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use roundingtutor_api::{
    config::Config,
    create_router,
    models::question::{ActiveQuestion, ChoiceLetter},
    services::AppState,
};

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    // In-memory snapshots, no AI endpoint
    let state = Arc::new(
        AppState::in_memory(Config::default()).expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    learner: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-learner-id", learner);

    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Walks through worked examples until a practice question is served.
pub async fn reach_practice(app: &Router, learner: &str) -> serde_json::Value {
    let (status, mut step) = send(app, "GET", "/api/v1/lesson/next-step", learner, None).await;
    assert_eq!(status, StatusCode::OK);

    while step["mode"] == "example" {
        let (status, next) =
            send(app, "POST", "/api/v1/lesson/next-example", learner, None).await;
        assert_eq!(status, StatusCode::OK);
        step = next;
    }

    step
}

pub async fn active_question(state: &AppState, learner: &str) -> ActiveQuestion {
    let raw = state
        .store
        .load(&format!("lesson:{}:question", learner))
        .await
        .unwrap()
        .expect("no active question stored");
    serde_json::from_str(&raw).unwrap()
}

pub async fn correct_letter(state: &AppState, learner: &str) -> ChoiceLetter {
    active_question(state, learner).await.question.correct_letter
}

pub async fn wrong_letter(state: &AppState, learner: &str) -> ChoiceLetter {
    let question = active_question(state, learner).await.question;
    *question
        .choices
        .keys()
        .find(|letter| **letter != question.correct_letter)
        .unwrap()
}
