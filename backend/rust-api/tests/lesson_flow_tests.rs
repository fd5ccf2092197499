use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{correct_letter, reach_practice, send, wrong_letter};

#[tokio::test]
async fn test_new_learner_gets_cookie_and_first_example() {
    let app = common::create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/lesson/next-step")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("learner cookie should be issued")
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("learner_id="));
    assert!(cookie.contains("HttpOnly"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["mode"], "example");
    assert_eq!(json["stage"], "1.1");
    assert_eq!(json["example_index"], 1);
    assert_eq!(json["example"]["steps"]["correct_answer"], "12.6");
}

#[tokio::test]
async fn test_cookie_identifies_returning_learner() {
    let app = common::create_test_app();

    let first = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/lesson/next-example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let cookie = first
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let second = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/lesson/current-stage")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers().get(header::SET_COOKIE).is_none());
    let body = to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["current_example_index"], 2);
}

#[tokio::test]
async fn test_invalid_learner_header_is_rejected() {
    let app = common::create_test_app();

    let (status, _) = send(
        &app.router,
        "GET",
        "/api/v1/lesson/next-step",
        "not a valid id!",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_examples_lead_to_practice_question() {
    let app = common::create_test_app();

    let step = reach_practice(&app.router, "walker").await;

    assert_eq!(step["mode"], "practice");
    assert_eq!(step["stage"], "1.1");
    let choices = step["question"]["choices"].as_object().unwrap();
    assert!(choices.len() >= 3 && choices.len() <= 4);
    assert!(step["question"].get("correct_letter").is_none());
}

#[tokio::test]
async fn test_correct_answer_advances_stage() {
    let app = common::create_test_app();
    reach_practice(&app.router, "climber").await;
    let letter = correct_letter(&app.state, "climber").await;

    let (status, json) = send(
        &app.router,
        "POST",
        "/api/v1/lesson/answers",
        "climber",
        Some(json!({ "chosen_letter": letter.to_string(), "response_time_secs": 4.5 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_correct"], true);
    assert_eq!(json["outcome"]["outcome"], "advanced");
    assert_eq!(json["outcome"]["from"], "1.1");
    assert_eq!(json["outcome"]["to"], "1.2");
    assert_eq!(json["progress"]["stage"], "1.2");
    assert_eq!(json["progress"]["consecutive_correct"], 0);
    assert_eq!(json["feedback"]["source"], "template");

    // 1.2 opens straight into practice
    let (_, step) = send(&app.router, "GET", "/api/v1/lesson/next-step", "climber", None).await;
    assert_eq!(step["mode"], "practice");
    assert_eq!(step["stage"], "1.2");
}

#[tokio::test]
async fn test_wrong_answer_reports_misconception_and_keeps_stage() {
    let app = common::create_test_app();
    reach_practice(&app.router, "stumbler").await;
    let letter = wrong_letter(&app.state, "stumbler").await;

    let (status, json) = send(
        &app.router,
        "POST",
        "/api/v1/lesson/answers",
        "stumbler",
        Some(json!({ "chosen_letter": letter.to_string() })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_correct"], false);
    assert_eq!(json["outcome"]["outcome"], "stayed");
    assert!(json["verification"]["misconception"]["kind"].is_string());
    assert!(!json["feedback"]["message"].as_str().unwrap().is_empty());

    let (_, profile) = send(&app.router, "GET", "/api/v1/lesson/profile", "stumbler", None).await;
    assert_eq!(profile["total_questions"], 1);
    assert_eq!(profile["total_correct"], 0);
}

#[tokio::test]
async fn test_answer_without_question_conflicts() {
    let app = common::create_test_app();

    let (status, json) = send(
        &app.router,
        "POST",
        "/api/v1/lesson/answers",
        "early-bird",
        Some(json!({ "chosen_letter": "A" })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], 409);
    assert_eq!(json["redirect"], "/api/v1/lesson/next-step");
}

#[tokio::test]
async fn test_answer_cannot_be_submitted_twice() {
    let app = common::create_test_app();
    reach_practice(&app.router, "double").await;
    let letter = wrong_letter(&app.state, "double").await;
    let body = json!({ "chosen_letter": letter.to_string() });

    let (first, _) = send(&app.router, "POST", "/api/v1/lesson/answers", "double", Some(body.clone())).await;
    let (second, _) = send(&app.router, "POST", "/api/v1/lesson/answers", "double", Some(body)).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_answer_payloads_are_bad_requests() {
    let app = common::create_test_app();
    reach_practice(&app.router, "typo").await;

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/lesson/answers",
        "typo",
        Some(json!({ "chosen_letter": "Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/lesson/answers",
        "typo",
        Some(json!({ "chosen_letter": "AB" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/lesson/answers",
        "typo",
        Some(json!({ "chosen_letter": "A", "response_time_secs": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The question survives rejected submissions
    assert!(common::active_question(&app.state, "typo").await.question.choices.len() >= 3);
}

#[tokio::test]
async fn test_always_correct_learner_completes_lesson() {
    let app = common::create_test_app();
    let learner = "prodigy";
    let mut step = reach_practice(&app.router, learner).await;

    for _ in 0..100 {
        if step["mode"] == "complete" {
            break;
        }
        if step["mode"] == "example" {
            step = reach_practice(&app.router, learner).await;
            continue;
        }

        let letter = correct_letter(&app.state, learner).await;
        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/lesson/answers",
            learner,
            Some(json!({ "chosen_letter": letter.to_string() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["is_correct"], true);

        let (_, next) = send(&app.router, "GET", "/api/v1/lesson/next-step", learner, None).await;
        step = next;
    }

    assert_eq!(step["mode"], "complete");
    let (_, progress) = send(&app.router, "GET", "/api/v1/lesson/current-stage", learner, None).await;
    assert_eq!(progress["stage"], "complete");
}

#[tokio::test]
async fn test_reset_returns_to_first_example() {
    let app = common::create_test_app();
    reach_practice(&app.router, "restart").await;

    let (status, step) = send(&app.router, "POST", "/api/v1/lesson/reset", "restart", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["mode"], "example");
    assert_eq!(step["stage"], "1.1");
    assert_eq!(step["example_index"], 1);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/lesson/answers",
        "restart",
        Some(json!({ "chosen_letter": "A" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_stages_returns_catalog() {
    let app = common::create_test_app();

    let (status, json) = send(&app.router, "GET", "/api/v1/lesson/stages", "anyone", None).await;

    assert_eq!(status, StatusCode::OK);
    let stages = json.as_array().unwrap();
    assert_eq!(stages.len(), 6);
    assert_eq!(stages[0]["id"], "1.1");
    assert_eq!(stages[5]["id"], "complete");
}
