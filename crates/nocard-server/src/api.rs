use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nocard_config::ServerSection;
use nocard_core::reporting::{self, DashboardSnapshot, ExportRow, DEFAULT_DASHBOARD_LIMIT};
use nocard_core::{
    validate_amount, EventDetails, EventType, FailureKind, LoginStatus, NewEvent, NoCardError,
    RateLimitCounter, RiskLevel, SecurityEvent, SecurityMonitor, SecurityStats,
    DEFAULT_QUERY_LIMIT,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

pub const LOGIN_RATE_ACTION: &str = "login";
pub const PAYMENT_RATE_ACTION: &str = "payment";

#[derive(Clone)]
pub struct AppState {
    pub monitor: SecurityMonitor,
    pub limits: ServerSection,
}

#[derive(Debug)]
pub enum ApiError {
    /// Taxonomy failure rendered as `{code, message, timestamp, details}`.
    Failure(NoCardError),
    /// Monitor work panicked or was cancelled on the blocking pool.
    Worker(String),
}

impl From<NoCardError> for ApiError {
    fn from(err: NoCardError) -> Self {
        Self::Failure(err)
    }
}

/// Runs monitor writes on the blocking pool; a file-backed store syncs to
/// disk on every append.
pub async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        error!(error = %err, "monitor task failed");
        ApiError::Worker(err.to_string())
    })
}

pub fn status_for(kind: &FailureKind) -> StatusCode {
    match kind {
        FailureKind::UserBlocked { .. } => StatusCode::LOCKED,
        FailureKind::InvalidCredentials { .. } => StatusCode::UNAUTHORIZED,
        FailureKind::UserNotFound { .. } => StatusCode::NOT_FOUND,
        FailureKind::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        FailureKind::SuspiciousActivity { .. } => StatusCode::FORBIDDEN,
        FailureKind::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        FailureKind::TransactionPrecision { .. } | FailureKind::InvalidAmount { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::Failure(err) => err,
            Self::Worker(message) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "code": "INTERNAL_ERROR", "message": message })),
                )
                    .into_response();
            }
        };
        let mut response = (status_for(err.kind()), Json(err.to_body())).into_response();
        if let FailureKind::RateLimitExceeded {
            retry_after_secs, ..
        } = err.kind()
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub degraded: bool,
    pub events: usize,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub subject: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub lookback_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitRequest {
    pub action: String,
    pub subject: String,
    pub limit: u32,
    pub window_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub counter: Option<RateLimitCounter>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub subject: String,
    pub device: Option<String>,
    /// Outcome of the credential check done by the caller.
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub subject: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub subject: String,
    /// Amount as typed by the user.
    pub amount: String,
    pub available: f64,
    pub method: Option<String>,
    pub transaction_id: Option<String>,
    pub device: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(list_events).post(append_event))
        .route("/stats", get(stats))
        .route("/dashboard", get(dashboard))
        .route("/export", get(export))
        .route("/rate-limit/check", post(check_rate_limit))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/status/{subject}", get(login_status))
        .route("/payments/attempt", post(payment_attempt))
        .with_state(state)
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "nocard-server",
        degraded: state.monitor.is_degraded(),
        events: state.monitor.event_count(),
    })
}

pub async fn append_event(
    State(state): State<AppState>,
    Json(new_event): Json<NewEvent>,
) -> Result<(StatusCode, Json<SecurityEvent>), ApiError> {
    let event = blocking(move || state.monitor.append(new_event)).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<SecurityEvent>> {
    Json(state.monitor.query(
        query.subject.as_deref(),
        query.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
    ))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<SecurityStats> {
    let lookback = query
        .lookback_ms
        .map(Duration::from_millis)
        .unwrap_or(reporting::DEFAULT_STATS_LOOKBACK);
    Json(state.monitor.stats(lookback))
}

pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<DashboardSnapshot> {
    Json(reporting::dashboard(
        &state.monitor,
        query.subject.as_deref(),
        query.limit.unwrap_or(DEFAULT_DASHBOARD_LIMIT),
    ))
}

pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Json<Vec<ExportRow>> {
    Json(reporting::export(
        &state.monitor,
        query.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
    ))
}

pub async fn check_rate_limit(
    State(state): State<AppState>,
    Json(request): Json<RateLimitRequest>,
) -> Result<Json<RateLimitResponse>, ApiError> {
    let monitor = state.monitor;
    let counter = blocking(move || {
        monitor.check_and_consume(
            &request.action,
            &request.subject,
            request.limit,
            Duration::from_millis(request.window_ms),
        )?;
        Ok::<_, NoCardError>(monitor.rate_limit(&request.action, &request.subject))
    })
    .await??;
    Ok(Json(RateLimitResponse {
        allowed: true,
        counter,
    }))
}

pub async fn login(
    State(AppState { monitor, limits }): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<SecurityEvent>, ApiError> {
    let event = blocking(move || {
        monitor.check_and_consume(
            LOGIN_RATE_ACTION,
            &request.subject,
            limits.login_limit,
            limits.login_window(),
        )?;
        monitor.record_login(
            &request.subject,
            request.device.as_deref(),
            request.success,
        )
    })
    .await??;
    info!(subject = event.subject.as_deref(), "login accepted");
    Ok(Json(event))
}

pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<SecurityEvent>, ApiError> {
    let event = blocking(move || state.monitor.record_logout(&request.subject)).await?;
    Ok(Json(event))
}

pub async fn login_status(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Json<LoginStatus> {
    Json(state.monitor.login_status(&subject))
}

/// Validates and records a payment attempt. Rejected amounts are recorded as
/// failed attempts before the error is returned.
pub async fn payment_attempt(
    State(AppState { monitor, limits }): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<SecurityEvent>), ApiError> {
    let event = blocking(move || record_payment(&monitor, &limits, request)).await??;
    Ok((StatusCode::CREATED, Json(event)))
}

fn record_payment(
    monitor: &SecurityMonitor,
    limits: &ServerSection,
    request: PaymentRequest,
) -> Result<SecurityEvent, NoCardError> {
    monitor.check_and_consume(
        PAYMENT_RATE_ACTION,
        &request.subject,
        limits.payment_limit,
        limits.payment_window(),
    )?;

    let validated = validate_amount(&request.amount, request.available);
    let (amount, success, risk) = match &validated {
        Ok(amount) => (Some(*amount), true, RiskLevel::Low),
        Err(_) => (None, false, RiskLevel::Medium),
    };
    let details = EventDetails::Payment {
        transaction_id: request.transaction_id,
        amount,
        method: request.method,
        success: Some(success),
    };
    let mut new_event = NewEvent::new(EventType::PaymentAttempt, details)
        .subject(request.subject)
        .risk(risk);
    new_event.device_info = request.device;
    let event = monitor.append(new_event);

    validated?;
    Ok(event)
}
