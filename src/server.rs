//! HTTP server exposing the synapse engine

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::{RunOutput, RunRequest, SynapseEngine};
use crate::error::RunFailure;

/// Simplified HTTP request structure
#[derive(Debug, Deserialize)]
pub struct RunRequestHttp {
    pub seed: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_market")]
    pub market: String,
}

fn default_language() -> String {
    "sv".to_string()
}

fn default_market() -> String {
    "se".to_string()
}

#[derive(Debug, Serialize)]
pub struct RunResponseHttp {
    pub related_queries: crate::artifacts::RelatedQueriesOutput,
    pub graph: crate::artifacts::GraphArtifact,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Run handler
async fn run_handler(
    State(engine): State<Arc<SynapseEngine>>,
    Json(req): Json<RunRequestHttp>,
) -> Result<Json<RunResponseHttp>, (StatusCode, Json<ErrorResponse>)> {
    info!(
        "received run request: seed='{}', market={}, language={}",
        req.seed, req.market, req.language
    );

    let run_req = RunRequest::new(req.seed, req.language, req.market);

    match engine.run(run_req).await {
        Ok(RunOutput { related, graph }) => Ok(Json(RunResponseHttp {
            related_queries: related,
            graph,
        })),
        Err(failure) => {
            error!("run failed: {failure}");
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: "run failed".to_string(),
                    failure: Some(failure),
                }),
            ))
        }
    }
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "synapse-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create and configure the HTTP server
pub fn create_router(engine: Arc<SynapseEngine>) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_handler))
        .route("/run", post(run_handler))
        .with_state(engine)
}

/// Run the HTTP server
pub async fn run_server(engine: Arc<SynapseEngine>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    info!("starting synapse-engine server on {addr}");

    let app = create_router(engine);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("server listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
