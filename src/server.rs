//! HTTP surface: `/brat` (image), `/bratvid` (video) and a JSON index

use crate::pipeline::{ImageArtifact, Pipeline, VideoArtifact};
use crate::sequence::RenderRequest;
use crate::Error;
use axum::extract::{Query, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

const ENDPOINTS: [&str; 2] = ["/brat?text=your_text_here", "/bratvid?text=your_text_here"];

/// In-memory request counters (reset on restart)
#[derive(Debug, Default)]
pub struct Stats {
    hits: AtomicU64,
    images: AtomicU64,
    videos: AtomicU64,
    failures: AtomicU64,
}

impl Stats {
    fn hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn images(&self) -> u64 {
        self.images.load(Ordering::Relaxed)
    }

    pub fn videos(&self) -> u64 {
        self.videos.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    stats: Arc<Stats>,
    started: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            stats: Arc::new(Stats::default()),
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/brat", get(brat))
        .route("/bratvid", get(bratvid))
        .fallback(not_found)
        // One line per request (method, path, status, latency); `tracing`
        // forwards these to the `log` backend
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                })
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<S>(listener: TcpListener, state: AppState, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// HTTP status for a pipeline error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InputInvalid(_) => StatusCode::BAD_REQUEST,
        Error::RendererUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::RenderTimeout(_) | Error::EncodeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct TextQuery {
    text: Option<String>,
}

async fn index(State(state): State<AppState>) -> Response {
    let hit = state.stats.hit();
    Json(json!({
        "message": "Brat Generator API - Image and Video generation",
        "hit": hit,
        "endpoints": {
            "brat": ENDPOINTS[0],
            "bratvid": ENDPOINTS[1],
        },
        "stats": {
            "images": state.stats.images(),
            "videos": state.stats.videos(),
            "failures": state.stats.failures(),
        },
        "runtime": {
            "os": std::env::consts::OS,
            "architecture": std::env::consts::ARCH,
            "cpuCount": num_cpus::get(),
            "uptime": format!("{} seconds", state.started.elapsed().as_secs()),
        },
    }))
    .into_response()
}

fn parse_request(query: TextQuery, example: &str) -> std::result::Result<RenderRequest, Response> {
    RenderRequest::new(query.text.unwrap_or_default()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": "Parameter `text` is required",
                "example": example,
            })),
        )
            .into_response()
    })
}

fn error_response(state: &AppState, context: &str, err: Error) -> Response {
    state.stats.failures.fetch_add(1, Ordering::Relaxed);
    error!("{}: {}", context, err);
    (
        status_for(&err),
        Json(json!({
            "message": err.category(),
            "error": err.to_string(),
        })),
    )
        .into_response()
}

async fn brat(State(state): State<AppState>, Query(query): Query<TextQuery>) -> Response {
    state.stats.hit();
    let request = match parse_request(query, ENDPOINTS[0]) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.pipeline.render_image(&request).await {
        Ok(image) => {
            state.stats.images.fetch_add(1, Ordering::Relaxed);
            ([(header::CONTENT_TYPE, ImageArtifact::CONTENT_TYPE)], image.bytes).into_response()
        }
        Err(e) => error_response(&state, "Error generating brat image", e),
    }
}

async fn bratvid(State(state): State<AppState>, Query(query): Query<TextQuery>) -> Response {
    state.stats.hit();
    let request = match parse_request(query, ENDPOINTS[1]) {
        Ok(request) => request,
        Err(response) => return response,
    };
    info!("/bratvid : {}", request.text());

    match state.pipeline.render_video(&request).await {
        Ok(video) => {
            state.stats.videos.fetch_add(1, Ordering::Relaxed);
            ([(header::CONTENT_TYPE, VideoArtifact::CONTENT_TYPE)], video.bytes).into_response()
        }
        Err(e) => error_response(&state, "Error generating bratvid", e),
    }
}

async fn not_found(State(state): State<AppState>) -> Response {
    state.stats.hit();
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "message": "Endpoint not found",
            "availableEndpoints": ENDPOINTS,
        })),
    )
        .into_response()
}
