//! HTTP front end for the tagger.
//!
//! API endpoints:
//! - GET  /                      - Health check
//! - POST /ai/person-tags        - Tag a batch of images with person ids
//! - GET  /ai/identities         - All known identities (`?image=` filters)
//! - GET  /ai/identities/{id}    - One identity

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use mindlog_personid::{BatchResult, Identity, IdentityStore, ImageFaces, ImageStatus, Skipped, Tagger};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Batch request body.
#[derive(Debug, Clone, Deserialize)]
pub struct TagRequest {
    pub images: Vec<ImageFaces>,
}

/// One tag on an image.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tag_name: String,
}

/// Tags of one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageResult {
    pub image_url: String,
    pub tags: Vec<Tag>,
    pub status: ImageStatus,
}

/// Batch response body.
#[derive(Debug, Clone, Serialize)]
pub struct TagResponse {
    pub results: Vec<ImageResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<Skipped>,
}

impl From<BatchResult> for TagResponse {
    fn from(result: BatchResult) -> Self {
        Self {
            results: result
                .images
                .into_iter()
                .map(|img| ImageResult {
                    image_url: img.image,
                    tags: img
                        .identities
                        .into_iter()
                        .map(|id| Tag {
                            kind: "person",
                            tag_name: id,
                        })
                        .collect(),
                    status: img.status,
                })
                .collect(),
            skipped: result.skipped,
        }
    }
}

/// Identity listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: String,
    pub embeddings: usize,
    pub images: Vec<String>,
}

impl From<&Identity> for IdentitySummary {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id().to_string(),
            embeddings: identity.len(),
            images: identity.images().into_iter().map(String::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct IdentityDetail {
    #[serde(flatten)]
    summary: IdentitySummary,
    centroid: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct IdentityQuery {
    image: Option<String>,
}

#[derive(Clone)]
struct AppState {
    tagger: Arc<Tagger>,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": detail.into() }))).into_response()
}

/// Identity summaries, restricted to those seen in `image` when given.
pub fn summaries(store: &IdentityStore, image: Option<&str>) -> Vec<IdentitySummary> {
    match image {
        Some(image) => store
            .identities_of_image(image)
            .into_iter()
            .filter_map(|id| store.get(id))
            .map(IdentitySummary::from)
            .collect(),
        None => store.iter().map(IdentitySummary::from).collect(),
    }
}

/// Builds the router. Split from [`start_server`] for tests.
pub fn router(tagger: Arc<Tagger>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ai/person-tags", post(person_tags))
        .route("/ai/identities", get(list_identities))
        .route("/ai/identities/{id}", get(get_identity))
        .layer(CorsLayer::permissive())
        .with_state(AppState { tagger })
}

/// Start the HTTP server.
pub async fn start_server(addr: &str, tagger: Arc<Tagger>) -> Result<()> {
    let app = router(tagger);
    let addr = parse_addr(addr)?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "facetag listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Parse address string to SocketAddr.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    Ok(addr.parse()?)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "facetag is running" }))
}

async fn person_tags(State(state): State<AppState>, Json(req): Json<TagRequest>) -> Response {
    let tagger = Arc::clone(&state.tagger);
    // Batches block on store I/O and hold the store lock.
    let joined = tokio::task::spawn_blocking(move || tagger.tag(req.images)).await;
    match joined {
        Ok(Ok(result)) => Json(TagResponse::from(result)).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "tagging failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("tagging failed: {e}"))
        }
        Err(e) => {
            error!(error = %e, "tagging task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "tagging task aborted")
        }
    }
}

async fn list_identities(
    State(state): State<AppState>,
    Query(query): Query<IdentityQuery>,
) -> Response {
    let tagger = Arc::clone(&state.tagger);
    match tokio::task::spawn_blocking(move || tagger.snapshot()).await {
        Ok(store) => Json(summaries(&store, query.image.as_deref())).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_identity(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let tagger = Arc::clone(&state.tagger);
    let store = match tokio::task::spawn_blocking(move || tagger.snapshot()).await {
        Ok(store) => store,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    match store.get(&id) {
        Some(identity) => Json(IdentityDetail {
            summary: IdentitySummary::from(identity),
            centroid: identity.centroid().unwrap_or_default(),
        })
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("identity not found: {id}")),
    }
}
