use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, TypedHeader};
use axum::handler::Handler;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use headers::Host;
use pastebin_lite_common::{
    paste_url, CreatePasteRequest, CreatePasteResponse, PasteView, TestNow, Url, API_ENDPOINT,
    HEALTH_ENDPOINT, VIEW_ENDPOINT,
};
use serde_json::{json, Value};
use tokio::task;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, instrument, warn};

use crate::config::Config;
use crate::error::{Error, ValidationError};
use crate::service::PasteService;
use crate::time::request_time;

pub struct AppState {
    pub service: PasteService,
    pub config: Config,
}

impl AppState {
    fn now(&self, header: Option<TypedHeader<TestNow>>) -> DateTime<Utc> {
        request_time(self.config.test_mode, header.map(|TypedHeader(now)| now))
    }

    fn base_url(&self, host: Option<TypedHeader<Host>>) -> Result<Url, Error> {
        if let Some(base) = &self.config.base_url {
            return Ok(base.clone());
        }

        let authority = host.map_or_else(
            || self.config.bind_addr.to_string(),
            |TypedHeader(host)| host.to_string(),
        );
        Url::parse(&format!("http://{}", authority))
            .map_err(|_| ValidationError::Body(format!("bad Host header {:?}", authority)).into())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route(HEALTH_ENDPOINT, get(health))
        .route(API_ENDPOINT, post(create))
        .route(&format!("{}/", API_ENDPOINT), post(create))
        .route(&format!("{}/:id", API_ENDPOINT), get(read))
        .route(&format!("{}/:id", VIEW_ENDPOINT), get(preview))
        .fallback(route_not_found.into_service())
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Runs a store-bound closure off the async runtime. Overrunning `timeout`
/// reports the store as unavailable; the closure itself still runs to
/// completion in the background.
async fn blocking<T, F>(timeout: Duration, f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to join handle: {}", e);
            Err(Error::StoreUnavailable(e.to_string()))
        }
        Err(_) => {
            warn!("Store call exceeded {:?}", timeout);
            Err(Error::StoreUnavailable("store call timed out".to_string()))
        }
    }
}

async fn index() -> Json<Value> {
    Json(json!({ "success": true, "message": "Pastebin-Lite API is running" }))
}

async fn route_not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "Route not found" })),
    )
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let store = Arc::clone(state.service.store());
    let ok = blocking(state.config.store_timeout, move || Ok(store.ping()?))
        .await
        .is_ok();
    Json(json!({ "ok": ok }))
}

#[instrument(skip_all)]
async fn create(
    Extension(state): Extension<Arc<AppState>>,
    host: Option<TypedHeader<Host>>,
    test_now: Option<TypedHeader<TestNow>>,
    payload: Result<Json<CreatePasteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatePasteResponse>), Error> {
    let Json(request) = payload.map_err(|e| ValidationError::Body(e.to_string()))?;
    let now = state.now(test_now);

    let id = {
        let state = Arc::clone(&state);
        blocking(state.config.store_timeout, move || {
            state.service.create_paste(request, now)
        })
        .await?
    };

    let url = paste_url(&state.base_url(host)?, &id).map_err(|e| {
        error!("Failed to build paste url: {}", e);
        Error::StoreUnavailable(e.to_string())
    })?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePasteResponse {
            id,
            url: url.to_string(),
        }),
    ))
}

/// JSON view of a paste. Each successful call spends one view.
///
/// A call that times out still runs to completion in the background, so the
/// view may be spent even though the caller got a 503.
async fn read(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    test_now: Option<TypedHeader<TestNow>>,
) -> Result<Json<PasteView>, Error> {
    let now = state.now(test_now);
    let timeout = state.config.store_timeout;
    blocking(timeout, move || state.service.read_paste(&id, now, true))
        .await
        .map(Json)
}

/// Plain-text view of a paste. Looking does not spend a view.
async fn preview(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    test_now: Option<TypedHeader<TestNow>>,
) -> Result<String, Error> {
    let now = state.now(test_now);
    let timeout = state.config.store_timeout;
    blocking(timeout, move || state.service.read_paste(&id, now, false))
        .await
        .map(|view| view.content)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, Response};
    use tower::ServiceExt;

    use super::*;
    use crate::store::MemoryStore;

    const T0: i64 = 1_700_000_000_000;

    fn app_with(config: Config) -> Router {
        let service = PasteService::new(Arc::new(MemoryStore::new()));
        router(Arc::new(AppState { service, config }))
    }

    fn app() -> Router {
        app_with(Config {
            base_url: Some(Url::parse("http://paste.test").unwrap()),
            test_mode: true,
            ..Config::default()
        })
    }

    fn post_json(body: &str, now_ms: Option<i64>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(API_ENDPOINT)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(now) = now_ms {
            builder = builder.header("x-test-now-ms", now);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, now_ms: Option<i64>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(now) = now_ms {
            builder = builder.header("x-test-now-ms", now);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_bytes<B>(response: Response<B>) -> Vec<u8>
    where
        B: axum::body::HttpBody,
        B::Error: std::fmt::Debug,
    {
        hyper::body::to_bytes(response.into_body())
            .await
            .unwrap()
            .to_vec()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_bytes(response).await)
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn create(app: &Router, body: &str, now_ms: Option<i64>) -> CreatePasteResponse {
        let (status, body) = send(app, post_json(body, now_ms)).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn single_view_paste_round_trip() {
        let app = app();
        let created = create(&app, r#"{"content":"hello","max_views":1}"#, None).await;
        assert_eq!(created.url, format!("http://paste.test/p/{}", created.id));

        let uri = format!("{}/{}", API_ENDPOINT, created.id);
        let (status, view) = send_json(&app, get(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["content"], "hello");
        assert_eq!(view["remaining_views"], 0);
        assert!(view["expires_at"].is_null());

        let (status, gone) = send(&app, get(&uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Spent and never-existed pastes are indistinguishable
        let (status, never) = send(&app, get(&format!("{}/CFGHJMPQRVWX", API_ENDPOINT), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(gone, never);
    }

    #[tokio::test]
    async fn ttl_follows_test_clock() {
        let app = app();
        let created = create(&app, r#"{"content":"hi","ttl_seconds":10}"#, Some(T0)).await;
        let uri = format!("{}/{}", API_ENDPOINT, created.id);

        let (status, view) = send_json(&app, get(&uri, Some(T0 + 5_000))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["content"], "hi");
        assert!(view["remaining_views"].is_null());
        assert_eq!(view["expires_at"], "2023-11-14T22:13:30.000Z");

        let (status, _) = send(&app, get(&uri, Some(T0 + 10_000))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, get(&uri, Some(T0 + 11_000))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clock_is_ignored_outside_test_mode() {
        let app = app_with(Config {
            base_url: Some(Url::parse("http://paste.test").unwrap()),
            ..Config::default()
        });
        let created = create(&app, r#"{"content":"hi","ttl_seconds":60}"#, None).await;
        let uri = format!("{}/{}", API_ENDPOINT, created.id);

        let (status, _) = send(&app, get(&uri, Some(T0 * 2))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_invalid_bodies() {
        let app = app();
        for body in [
            r#"{"content":""}"#,
            r#"{"content":"   "}"#,
            r#"{"content":"x","ttl_seconds":0}"#,
            r#"{"content":"x","ttl_seconds":1.5}"#,
            r#"{"content":"x","ttl_seconds":"10"}"#,
            r#"{"content":"x","max_views":0}"#,
            r#"{"content":"x","max_views":-3}"#,
            r#"{"ttl_seconds":10}"#,
            r#"{"content":42}"#,
            "not json",
        ] {
            let (status, json) = send_json(&app, post_json(body, None)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
            assert_eq!(json["success"], false, "body: {}", body);
        }
    }

    #[tokio::test]
    async fn accepts_trailing_slash_and_whole_floats() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri(format!("{}/", API_ENDPOINT))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"content":"slash","ttl_seconds":60.0,"max_views":2.0}"#))
            .unwrap();

        let (status, json) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::CREATED);

        let uri = format!("{}/{}", API_ENDPOINT, json["id"].as_str().unwrap());
        let (status, view) = send_json(&app, get(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["remaining_views"], 1);
        assert!(view["expires_at"].is_string());
    }

    #[tokio::test]
    async fn preview_does_not_spend_views() {
        let app = app();
        let created = create(&app, r#"{"content":"peek","max_views":1}"#, None).await;
        let preview_uri = format!("{}/{}", VIEW_ENDPOINT, created.id);

        for _ in 0..3 {
            let (status, body) = send(&app, get(&preview_uri, None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"peek");
        }

        let (_, view) = send_json(&app, get(&format!("{}/{}", API_ENDPOINT, created.id), None)).await;
        assert_eq!(view["remaining_views"], 0);

        let (status, _) = send(&app, get(&preview_uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn url_falls_back_to_host_header() {
        let app = app_with(Config::default());
        let request = Request::builder()
            .method("POST")
            .uri(API_ENDPOINT)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::HOST, "example.org:8080")
            .body(Body::from(r#"{"content":"x"}"#))
            .unwrap();

        let (status, json) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json["id"].as_str().unwrap();
        assert_eq!(json["url"], format!("http://example.org:8080/p/{}", id));
    }

    #[tokio::test]
    async fn health_index_and_fallback() {
        let app = app();

        let (status, json) = send_json(&app, get(HEALTH_ENDPOINT, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);

        let (status, json) = send_json(&app, get("/", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        let (status, json) = send_json(&app, get("/nope/nothing", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "Route not found");
    }

    #[tokio::test]
    async fn slow_store_calls_time_out() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let result = blocking(Duration::from_millis(10), move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));

        // The store call is not cancelled, only abandoned
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrent_requests_for_the_last_view() {
        let app = app();
        let created = create(&app, r#"{"content":"race","max_views":1}"#, None).await;
        let uri = format!("{}/{}", API_ENDPOINT, created.id);

        let (a, b) = tokio::join!(send(&app, get(&uri, None)), send(&app, get(&uri, None)));
        let mut statuses = [a.0, b.0];
        statuses.sort_by_key(StatusCode::as_u16);
        assert_eq!(statuses, [StatusCode::OK, StatusCode::NOT_FOUND]);
    }
}
