use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

pub const LEARNER_COOKIE: &str = "learner_id";
pub const LEARNER_HEADER: &str = "x-learner-id";

lazy_static! {
    static ref LEARNER_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

fn bad_request(message: String) -> Response {
    tracing::warn!("{}", message);
    let error_response = json!({
        "message": message,
        "status": 400
    });
    (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
}

/// Custom JSON extractor that returns JSON error responses instead of HTML
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(bad_request(format!(
                "Failed to parse JSON request body: {}",
                rejection
            ))),
        }
    }
}

/// Learner identity for the current turn. API clients send `x-learner-id`; browsers
/// carry the `learner_id` cookie, which is issued on first contact.
pub struct Learner {
    pub id: String,
    /// Carries the new cookie when one was issued; return it with the response.
    pub jar: CookieJar,
}

impl Learner {
    fn issue(jar: CookieJar) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("Issuing learner id {}", id);
        let cookie = Cookie::build((LEARNER_COOKIE, id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::days(30))
            .build();
        Self {
            id,
            jar: jar.add(cookie),
        }
    }
}

impl<S> FromRequestParts<S> for Learner
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        if let Some(header) = parts.headers.get(LEARNER_HEADER) {
            let id = header
                .to_str()
                .map_err(|_| bad_request("Invalid x-learner-id header".to_string()))?;
            if !LEARNER_ID_RE.is_match(id) {
                return Err(bad_request(format!("Invalid learner id: {}", id)));
            }
            return Ok(Self {
                id: id.to_string(),
                jar,
            });
        }

        match jar.get(LEARNER_COOKIE).map(|c| c.value().to_string()) {
            Some(id) if LEARNER_ID_RE.is_match(&id) => Ok(Self { id, jar }),
            Some(id) => {
                tracing::warn!("Replacing malformed learner cookie {:?}", id);
                Ok(Self::issue(jar))
            }
            None => Ok(Self::issue(jar)),
        }
    }
}
