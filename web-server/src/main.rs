//! HTTP boundary for the finx planning pipeline.
//!
//! Thin transport layer: request bodies deserialize straight into
//! `AnalyzeRequest`, the pipeline does the work, and error kinds map
//! to status codes here and nowhere else.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use finx_core::config::Settings;
use finx_core::embedding::{HashEmbedder, RemoteEmbedder, SharedEmbedder};
use finx_core::llm::{RemoteSynthesizer, SharedSynthesizer, SimSynthesizer};
use finx_core::models::{AnalyzeRequest, AnalyzeResponse, KnowledgeDocument};
use finx_core::pipeline::PlanningPipeline;
use finx_core::retrieval::{Retriever, SharedDocumentStore};
use finx_core::store::{
    InMemoryDocumentStore, InMemoryPlanStore, PgDocumentStore, PgPlanStore, SharedPlanStore,
};
use finx_core::OrchestratorError;

// Application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PlanningPipeline>,
}

// API envelope
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "finx_web_server=info,finx_core=info,tower_http=debug".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = Settings::from_env();
    info!(
        sim_mode = settings.sim_mode,
        top_k = settings.top_k,
        "starting orchestrator"
    );

    // All shared clients and pools are built exactly once here and
    // injected; requests never initialize process-wide state.
    let pipeline = build_pipeline(&settings).await?;
    let app = create_router(AppState { pipeline });

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);
    let addr = format!("0.0.0.0:{}", port);
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_pipeline(settings: &Settings) -> anyhow::Result<Arc<PlanningPipeline>> {
    let (embedder, synthesizer, documents, plans): (
        SharedEmbedder,
        SharedSynthesizer,
        SharedDocumentStore,
        SharedPlanStore,
    ) = if settings.sim_mode {
        let embedder: SharedEmbedder = Arc::new(HashEmbedder::new());
        let documents = seed_documents(&embedder).await?;
        (
            embedder,
            Arc::new(SimSynthesizer),
            Arc::new(InMemoryDocumentStore::new(documents)),
            Arc::new(InMemoryPlanStore::new()),
        )
    } else {
        info!("connecting to database");
        let pool = sqlx::PgPool::connect(&settings.database_url).await?;
        (
            Arc::new(RemoteEmbedder::new(settings)?),
            Arc::new(RemoteSynthesizer::new(settings)?),
            Arc::new(PgDocumentStore::new(pool.clone())),
            Arc::new(PgPlanStore::new(pool)),
        )
    };

    let retriever = Retriever::new(embedder, documents);
    Ok(Arc::new(PlanningPipeline::new(
        retriever,
        synthesizer,
        plans,
        settings.top_k,
    )))
}

/// Small card-perk corpus for SIM mode so retrieval has something to
/// rank without a database.
async fn seed_documents(embedder: &SharedEmbedder) -> anyhow::Result<Vec<KnowledgeDocument>> {
    let seeds = [
        (
            1,
            "Amex Gold",
            "American Express",
            "https://example.com/amex-gold",
            "Earns 4x points at U.S. supermarkets and on dining worldwide, \
             making it a leading card for groceries and restaurants.",
        ),
        (
            2,
            "Citi Custom Cash",
            "Citi",
            "https://example.com/citi-custom-cash",
            "Earns 5% cash back in your top eligible spend category each \
             billing cycle, including gas stations and grocery stores.",
        ),
        (
            3,
            "Chase Sapphire Preferred",
            "Chase",
            "https://example.com/sapphire-preferred",
            "Earns 2x points on travel and offers strong transfer partners \
             for flights and hotels.",
        ),
    ];

    let texts: Vec<String> = seeds
        .iter()
        .map(|(_, _, _, _, text)| text.to_string())
        .collect();
    let embeddings = embedder.embed(&texts).await?;

    Ok(seeds
        .iter()
        .zip(embeddings)
        .map(|((id, card, issuer, url, text), embedding)| KnowledgeDocument {
            id: *id,
            card: card.to_string(),
            issuer: issuer.to_string(),
            url: url.to_string(),
            text: text.to_string(),
            embedding: Some(embedding),
        })
        .collect())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/v1/analyze", post(analyze))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse {
        success: true,
        data: Some("OK".to_string()),
        error: None,
    })
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> (StatusCode, Json<ApiResponse<AnalyzeResponse>>) {
    match state.pipeline.analyze(request).await {
        Ok(response) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(response),
                error: None,
            }),
        ),
        Err(err) => {
            warn!(%err, "analyze request failed");
            (
                status_for(&err),
                Json(ApiResponse {
                    success: false,
                    data: None,
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}

fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
        OrchestratorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
