//! JSON service boundary over the discovery engine.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use linkscout_core::{DiscoveryQuery, PlatformTarget};
use linkscout_storage::PlatformSink;
use linkscout_sync::{build_sink, maybe_build_scheduler, DiscoveryConfig, DiscoveryEngine, DiscoveryError};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "linkscout-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DiscoveryEngine>,
    pub sink: Arc<dyn PlatformSink>,
}

impl AppState {
    pub fn new(engine: Arc<DiscoveryEngine>, sink: Arc<dyn PlatformSink>) -> Self {
        Self { engine, sink }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    sources: Vec<&'static str>,
    sink: &'static str,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/discover", post(discover_handler))
        .route("/validate", post(validate_handler))
        .route("/ingest", post(ingest_handler))
        .route("/stats", post(stats_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = DiscoveryConfig::from_env();
    let engine = Arc::new(DiscoveryEngine::from_config(&config)?);
    let sink = build_sink(&config).await?;

    let scheduler = maybe_build_scheduler(Arc::clone(&engine), &config, Arc::clone(&sink)).await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!(cron = %config.revalidate_cron, "revalidation scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, sink = sink.name(), "listening");
    axum::serve(listener, app(AppState::new(engine, sink))).await?;
    Ok(())
}

async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        sources: state.engine.source_ids(),
        sink: state.sink.name(),
    })
}

async fn discover_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DiscoveryQuery>, JsonRejection>,
) -> Response {
    let Json(query) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match state.engine.discover(&query).await {
        Ok(result) => Json(result).into_response(),
        Err(err @ DiscoveryError::InvalidQuery(_)) => bad_request(err.to_string()),
        Err(err) => {
            warn!(%err, "discovery failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn validate_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<PlatformTarget>>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(platforms)) => Json(state.engine.validate(platforms).await).into_response(),
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<PlatformTarget>>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(platforms)) => {
            Json(state.engine.ingest(state.sink.as_ref(), &platforms).await).into_response()
        }
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

async fn stats_handler(body: Result<Json<Vec<PlatformTarget>>, JsonRejection>) -> Response {
    match body {
        Ok(Json(platforms)) => Json(DiscoveryEngine::stats(&platforms)).into_response(),
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

fn bad_request(error: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use linkscout_adapters::{AdapterContext, AdapterError, SourceAdapter, SourceYield};
    use linkscout_core::PlatformType;
    use linkscout_storage::MemorySink;
    use linkscout_sync::{LivenessProber, ProbeVerdict};
    use tower::ServiceExt;

    struct TwoVenues;

    #[async_trait]
    impl SourceAdapter for TwoVenues {
        fn source_id(&self) -> &'static str {
            "fixed"
        }

        async fn discover(&self, _ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
            let candidates = ["forum.example", "wiki.example"]
                .iter()
                .zip([PlatformType::Forum, PlatformType::Wiki])
                .filter_map(|(d, t)| PlatformTarget::placeholder(d, t, "fixed").ok())
                .collect();
            Ok(SourceYield::from_candidates(candidates))
        }
    }

    struct LiveUnlessWiki;

    #[async_trait]
    impl LivenessProber for LiveUnlessWiki {
        async fn check(&self, target: &PlatformTarget) -> ProbeVerdict {
            if target.platform_type == PlatformType::Wiki {
                ProbeVerdict::Dead {
                    reason: "HTTP 404".into(),
                }
            } else {
                ProbeVerdict::Live { form_detected: None }
            }
        }
    }

    fn test_app() -> Router {
        let engine = DiscoveryEngine::builder()
            .adapter(Arc::new(TwoVenues))
            .prober(Arc::new(LiveUnlessWiki))
            .build()
            .unwrap();
        app(AppState::new(Arc::new(engine), Arc::new(MemorySink::new())))
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn venues() -> Vec<PlatformTarget> {
        vec![
            PlatformTarget::placeholder("forum.example", PlatformType::Forum, "fixed").unwrap(),
            PlatformTarget::placeholder("wiki.example", PlatformType::Wiki, "fixed").unwrap(),
        ]
    }

    #[tokio::test]
    async fn healthz_lists_sources() {
        let resp = test_app()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sources"][0], "fixed");
        assert_eq!(body["sink"], "memory");
    }

    #[tokio::test]
    async fn discover_returns_result_shape() {
        let resp = test_app()
            .oneshot(post_json("/discover", r#"{"keywords":["seo"],"platformTypes":["forum"]}"#.into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["totalFound"], 1);
        assert_eq!(body["platforms"][0]["domain"], "forum.example");
        assert_eq!(body["sources"][0], "fixed");
        assert!(body["processingTimeMs"].is_u64());
    }

    #[tokio::test]
    async fn invalid_queries_are_bad_requests() {
        let app = test_app();
        let inverted = app
            .clone()
            .oneshot(post_json("/discover", r#"{"keywords":["seo"],"minDA":90,"maxDA":10}"#.into()))
            .await
            .unwrap();
        assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(inverted).await["error"]
            .as_str()
            .unwrap()
            .contains("greater than maxDA"));

        let garbage = app
            .oneshot(post_json("/discover", r#"{"keywords": "seo""#.into()))
            .await
            .unwrap();
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn validate_ingest_and_stats_round() {
        let app = test_app();
        let payload = serde_json::to_string(&venues()).unwrap();

        let validated = app
            .clone()
            .oneshot(post_json("/validate", payload.clone()))
            .await
            .unwrap();
        assert_eq!(validated.status(), StatusCode::OK);
        let body = json_body(validated).await;
        assert_eq!(body["validated"].as_array().unwrap().len(), 1);
        assert_eq!(body["excluded"][0]["domain"], "wiki.example");
        assert!(body["validated"][0]["lastTested"].is_string());

        let first = json_body(app.clone().oneshot(post_json("/ingest", payload.clone())).await.unwrap()).await;
        assert_eq!(first["added"], 2);
        let second = json_body(app.clone().oneshot(post_json("/ingest", payload.clone())).await.unwrap()).await;
        assert_eq!(second["added"], 0);
        assert_eq!(second["failed"], 2);
        assert_eq!(second["errors"].as_array().unwrap().len(), 2);

        let stats = json_body(app.oneshot(post_json("/stats", payload)).await.unwrap()).await;
        assert_eq!(stats["totalPlatforms"], 2);
        assert_eq!(stats["byType"]["forum"], 1);
    }
}
