//! # lorekeep-api
//!
//! HTTP surface for lorekeep: collections, folder and batch uploads, job
//! progress over Server-Sent Events, the folder hierarchy, and semantic
//! search.
//!
//! The binary in `main.rs` wires PostgreSQL and Ollama; [`router`] accepts
//! any [`AppState`], so tests can run it over in-memory repositories.

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use handlers::{collections, library, uploads};

pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the application router with its middleware stack.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(state.config.cors_origins()))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(library::health_check))
        // Collections
        .route(
            "/api/v1/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/api/v1/collections/:id",
            get(collections::get_collection).delete(collections::delete_collection),
        )
        // Uploads and jobs
        .route(
            "/api/v1/collections/:id/upload-folder",
            post(uploads::upload_folder),
        )
        .route(
            "/api/v1/collections/:id/upload-batch",
            post(uploads::upload_batch),
        )
        .route("/api/v1/collections/:id/upload-jobs", get(uploads::list_jobs))
        .route(
            "/api/v1/collections/:id/upload-jobs/:job_id",
            get(uploads::get_job).delete(uploads::cancel_job),
        )
        .route(
            "/api/v1/collections/:id/upload-jobs/:job_id/stream",
            get(uploads::stream_job),
        )
        // Library
        .route(
            "/api/v1/collections/:id/documents",
            get(library::list_documents),
        )
        .route(
            "/api/v1/collections/:id/folder-tree",
            get(library::folder_tree),
        )
        .route(
            "/api/v1/collections/:id/folder-stats",
            get(library::folder_stats),
        )
        .route(
            "/api/v1/collections/:id/folders/rebuild-statistics",
            post(library::rebuild_folder_statistics),
        )
        .route("/api/v1/collections/:id/search", post(library::search))
        .route("/api/v1/formats/supported", get(library::formats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(CatchPanicLayer::new())
        .layer(cors)
        // Multipart uploads are bounded by the request limit, not axum's 2 MB default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
