use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use hagglz_core::domain::bill::Bill;
use hagglz_core::domain::classification::BillCategory;
use hagglz_core::domain::negotiation::{ExecutionRecord, NegotiationId, NegotiationState};
use hagglz_core::errors::{ApplicationError, ErrorKind, InterfaceError};
use hagglz_core::orchestrator::{EngineStats, Orchestrator};
use hagglz_core::savings::{calculate_savings, SavingsReport, SavingsRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Orchestrator,
}

#[derive(Debug, Deserialize)]
pub struct NegotiateRequest {
    pub bill_text: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub category_hint: Option<BillCategory>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Run to completion (or to a human handoff) before responding.
    #[serde(default)]
    pub wait: bool,
}

impl NegotiateRequest {
    fn into_bill(self) -> Bill {
        Bill {
            raw_text: self.bill_text,
            company: self.company,
            amount: self.amount,
            due_date: self.due_date,
            category_hint: self.category_hint,
            user_id: self.user_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    pub negotiation_id: String,
    pub state: NegotiationState,
    pub status_url: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub success: bool,
    #[serde(default)]
    pub savings_amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub success: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_application(error: ApplicationError, correlation_id: String) -> Self {
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let (status, detail) = match &error {
            InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, Some(message.clone())),
            InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, Some(message.clone())),
            InterfaceError::Conflict { message, .. } => (StatusCode::CONFLICT, Some(message.clone())),
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        tracing::warn!(
            event_name = "api.request.failed",
            correlation_id = error.correlation_id(),
            error_kind = error.kind().as_str(),
            status = status.as_u16(),
            error = %error,
            "request failed"
        );

        let body = ErrorBody {
            kind: error.kind(),
            message: error.user_message().to_string(),
            detail,
            correlation_id: error.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/api/v1/negotiate", post(negotiate))
        .route("/api/v1/negotiations/{id}", get(negotiation_status))
        .route("/api/v1/negotiations/{id}/feedback", post(submit_feedback))
        .route("/api/v1/negotiations/{id}/resolve", post(resolve_handoff))
        .route("/api/v1/negotiations/{id}/cancel", post(cancel_negotiation))
        .route("/api/v1/users/{user_id}/negotiations", get(user_history))
        .route("/api/v1/stats", get(engine_stats))
        .route("/api/v1/savings", post(savings))
        .with_state(ApiState { orchestrator })
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()))
}

async fn negotiate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NegotiateRequest>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_id(&headers);
    let wait = body.wait;
    let bill = body.into_bill();

    if wait {
        let record = state
            .orchestrator
            .run(bill)
            .await
            .map_err(|error| ApiError::from_application(error, correlation_id.clone()))?;
        info!(
            event_name = "api.negotiation.completed",
            correlation_id = %correlation_id,
            negotiation_id = %record.id,
            state = record.state.as_str(),
            "negotiation ran to a stable state"
        );
        return Ok((StatusCode::OK, Json(record)).into_response());
    }

    let id = state
        .orchestrator
        .submit(bill)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id.clone()))?;
    info!(
        event_name = "api.negotiation.accepted",
        correlation_id = %correlation_id,
        negotiation_id = %id,
        "negotiation accepted"
    );
    let accepted = Accepted {
        status_url: format!("/api/v1/negotiations/{id}"),
        negotiation_id: id.0,
        state: NegotiationState::Received,
    };
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

async fn negotiation_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let correlation_id = correlation_id(&headers);
    state
        .orchestrator
        .get_status(&NegotiationId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, correlation_id))
}

async fn submit_feedback(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<FeedbackRequest>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let record = state
        .orchestrator
        .submit_feedback(&NegotiationId(id), body.success, body.savings_amount)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id.clone()))?;
    info!(
        event_name = "api.feedback.recorded",
        correlation_id = %correlation_id,
        negotiation_id = %record.id,
        success = body.success,
        "negotiation feedback recorded"
    );
    Ok(Json(record))
}

async fn resolve_handoff(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let correlation_id = correlation_id(&headers);
    state
        .orchestrator
        .resolve_handoff(&NegotiationId(id), body.success)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, correlation_id))
}

async fn cancel_negotiation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_id(&headers);
    state
        .orchestrator
        .cancel(&NegotiationId(id))
        .await
        .map(|()| StatusCode::ACCEPTED)
        .map_err(|error| ApiError::from_application(error, correlation_id))
}

async fn user_history(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    state
        .orchestrator
        .list_for_user(&user_id, limit)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, correlation_id))
}

async fn engine_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<EngineStats>, ApiError> {
    let correlation_id = correlation_id(&headers);
    state
        .orchestrator
        .stats()
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, correlation_id))
}

async fn savings(
    headers: HeaderMap,
    Json(body): Json<SavingsRequest>,
) -> Result<Json<SavingsReport>, ApiError> {
    calculate_savings(&body)
        .map(Json)
        .map_err(|error| ApiError::from_application(error, correlation_id(&headers)))
}
