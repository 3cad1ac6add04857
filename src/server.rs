use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{OutbreakError, Result};
use crate::models::{OrchestrationRequest, OrchestrationResult};
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    started: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub region_hint: Option<String>,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<OutbreakError> for ErrorResponse {
    fn from(err: OutbreakError) -> Self {
        let status = match err {
            OutbreakError::Input(_) => StatusCode::BAD_REQUEST,
            OutbreakError::Transient(_) | OutbreakError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            error: err.to_string(),
            code: status.as_u16(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/ask", post(ask_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

async fn ask_handler(
    State(state): State<AppState>,
    Json(body): Json<AskRequest>,
) -> std::result::Result<Json<OrchestrationResult>, ErrorResponse> {
    let mut request = OrchestrationRequest::new(body.question, body.region_hint);
    if let Some(as_of) = body.as_of {
        request = request.with_as_of(as_of);
    }
    let request_id = request.request_id;

    match state.orchestrator.handle(request).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            warn!(%request_id, error = %e, "request rejected");
            Err(e.into())
        }
    }
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server starting");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("could not install ctrl-c handler");
            }
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimVerifier;
    use crate::collaborators::{MemorySource, Unavailable};
    use crate::config::{Config, UnitCosts};
    use crate::models::OrchestrationState;
    use crate::orchestrator::Specialists;
    use crate::planner::ResourcePlanner;

    fn state() -> AppState {
        let orchestrator = Orchestrator::new(
            Config::default(),
            Specialists {
                data: Arc::new(MemorySource::new()),
                classifier: Arc::new(Unavailable),
                claims: Arc::new(ClaimVerifier::new(Arc::new(Unavailable), Default::default()).unwrap()),
                planner: Arc::new(ResourcePlanner::new(UnitCosts::default(), 14)),
            },
        )
        .unwrap();
        AppState::new(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn empty_question_is_a_bad_request() {
        let body = AskRequest {
            question: " ".to_string(),
            region_hint: None,
            as_of: None,
        };
        let err = ask_handler(State(state()), Json(body)).await.unwrap_err();
        assert_eq!(err.code, 400);
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn partial_failures_still_answer_ok() {
        let body: AskRequest =
            serde_json::from_str(r#"{"question": "Is there an outbreak?", "region_hint": "Ohio"}"#).unwrap();
        let Json(result) = ask_handler(State(state()), Json(body)).await.unwrap();
        assert_eq!(result.state, OrchestrationState::Complete);
        assert_eq!(result.region_key, "Ohio");
        assert!(!result.synthesized_summary.is_empty());
    }

    #[tokio::test]
    async fn health_reports_version() {
        let Json(health) = health_handler(State(state())).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
