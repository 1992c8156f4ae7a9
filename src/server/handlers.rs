//! Endpoint handlers.
//!
//! Each handler validates its inputs, calls one service operation and
//! shapes the response. Error bodies share a single JSON structure with
//! a stable code, a request id and the request path.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{OriginalUri, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cache;
use crate::error::FeedError;
use crate::model::FeedOptions;
use crate::util::PageUrl;

use super::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct FeedQuery {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PreviewQuery {
    url: Option<String>,
    limit: Option<usize>,
    page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UrlQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ValidateBody {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: bool,
    code: &'static str,
    message: String,
    request_id: String,
    timestamp: String,
    path: String,
}

/// Fixed message for non-operational errors in production mode.
const OPAQUE_MESSAGE: &str = "An internal error occurred";

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(super) fn error_response(state: &AppState, err: FeedError, path: &str) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let message = if state.production && !err.is_operational() {
        OPAQUE_MESSAGE.to_owned()
    } else {
        err.to_string()
    };

    let body = ErrorBody {
        error: true,
        code: err.code(),
        message,
        request_id: next_request_id(),
        timestamp: Utc::now().to_rfc3339(),
        path: path.to_owned(),
    };

    let mut response = (status, Json(body)).into_response();
    if let FeedError::OriginBlocked { retry_after_secs } = err {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

fn next_request_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:06x}", Utc::now().timestamp(), counter & 0xff_ffff)
}

pub(super) async fn feed(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<FeedQuery>,
) -> Response {
    serve_feed(state, uri.path(), query, false).await
}

/// Same bytes as `/feed`, advertised as Atom for readers that insist on
/// the content type.
pub(super) async fn feed_atom(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<FeedQuery>,
) -> Response {
    serve_feed(state, uri.path(), query, true).await
}

async fn serve_feed(state: AppState, path: &str, query: FeedQuery, as_atom: bool) -> Response {
    let Some(url) = query.url else {
        return error_response(
            &state,
            FeedError::InvalidInput("url query parameter is required".to_owned()),
            path,
        );
    };

    let opts = FeedOptions {
        title: query.title,
        description: query.description,
        limit: query.limit,
    };

    let cached = match state.service.feed(&url, opts.clone()).await {
        Ok(cached) => cached,
        Err(e) => return error_response(&state, e, path),
    };

    let content_type = if as_atom {
        "application/atom+xml"
    } else {
        cached.kind.content_type()
    };

    let mut headers = HeaderMap::new();
    insert_header(
        &mut headers,
        header::CONTENT_TYPE,
        &format!("{content_type}; charset=utf-8"),
    );
    insert_header(
        &mut headers,
        header::CACHE_CONTROL,
        &format!(
            "public, max-age={}",
            state.service.config().cache_duration.as_secs()
        ),
    );
    insert_header(
        &mut headers,
        header::LAST_MODIFIED,
        &cached
            .inserted_at
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string(),
    );
    if let Ok(page) = PageUrl::parse(&url) {
        insert_header(
            &mut headers,
            header::ETAG,
            &format!("\"{}\"", cache::etag(&page, &opts)),
        );
    }

    (StatusCode::OK, headers, cached.bytes.to_vec()).into_response()
}

pub(super) async fn preview(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let Some(url) = query.url else {
        return error_response(
            &state,
            FeedError::InvalidInput("url query parameter is required".to_owned()),
            uri.path(),
        );
    };

    match state
        .service
        .preview(&url, query.limit, query.page.unwrap_or(0))
        .await
    {
        Ok(articles) => Json(serde_json::json!({
            "url": url,
            "count": articles.len(),
            "articles": articles,
        }))
        .into_response(),
        Err(e) => error_response(&state, e, uri.path()),
    }
}

pub(super) async fn metadata(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<UrlQuery>,
) -> Response {
    let Some(url) = query.url else {
        return error_response(
            &state,
            FeedError::InvalidInput("url query parameter is required".to_owned()),
            uri.path(),
        );
    };

    match state.service.metadata(&url).await {
        Ok(metadata) => Json(metadata).into_response(),
        Err(e) => error_response(&state, e, uri.path()),
    }
}

pub(super) async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> Response {
    Json(state.service.validate(&body.url).await).into_response()
}

pub(super) async fn cache_stats(State(state): State<AppState>) -> Response {
    Json(state.service.stats().await).into_response()
}

pub(super) async fn cache_clear(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<UrlQuery>,
) -> Response {
    match state.service.clear_cache(query.url.as_deref()).await {
        Ok(removed) => Json(serde_json::json!({
            "cleared": true,
            "removedEntries": removed,
        }))
        .into_response(),
        Err(e) => error_response(&state, e, uri.path()),
    }
}

pub(super) async fn health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

fn insert_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::orchestrator::FeedService;
    use std::sync::Arc;

    fn test_state(production: bool) -> AppState {
        let config = Config {
            production,
            ..Default::default()
        };
        let service = Arc::new(FeedService::new(config.clone()).unwrap());
        AppState {
            limiter: Arc::new(super::super::RateLimiter::new(
                config.rate_window,
                config.rate_max,
            )),
            production,
            service,
        }
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let state = test_state(false);
        let response = error_response(
            &state,
            FeedError::InvalidInput("bad url".to_owned()),
            "/feed",
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["code"], "INVALID_INPUT");
        assert_eq!(body["path"], "/feed");
        assert!(body["requestId"].as_str().is_some());
        assert!(body["timestamp"].as_str().is_some());
        assert!(body["message"].as_str().unwrap().contains("bad url"));
    }

    #[tokio::test]
    async fn test_production_hides_internal_messages() {
        let state = test_state(true);
        let response = error_response(
            &state,
            FeedError::Internal("connection pool exploded".to_owned()),
            "/feed",
        );
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], OPAQUE_MESSAGE);
    }

    #[tokio::test]
    async fn test_production_keeps_operational_messages() {
        let state = test_state(true);
        let response = error_response(&state, FeedError::OriginTimeout, "/feed");
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "ORIGIN_TIMEOUT");
        assert!(body["message"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_blocked_origin_carries_retry_after() {
        let state = test_state(false);
        let response = error_response(
            &state,
            FeedError::OriginBlocked {
                retry_after_secs: 240,
            },
            "/feed",
        );
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "240"
        );
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = next_request_id();
        let b = next_request_id();
        assert_ne!(a, b);
    }
}
