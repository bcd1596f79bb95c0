//! Request Handlers
//!
//! Thin adapters from HTTP to the duel service, queue, identity directory and
//! task store. Business rules live behind them; handlers only translate.

use super::{errors::ApiError, middleware::RequestId, models::*};
use crate::app::App;
use crate::duels::{Duel, NewChallenge, PrecheckRequest, QueueEntry};
use crate::identity::LinkOutcome;
use axum::{
    async_trait,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// JSON body extractor whose rejections use the structured error body
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(&request_id, rejection.body_text())
                .with_code("INVALID_BODY")),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// GET /health
pub async fn health_handler(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dispatcher_enabled: app.config.dispatcher.enabled,
        settlement_enabled: app.settlement.is_some(),
    })
}

/// GET /metrics
pub async fn metrics_handler(State(app): State<Arc<App>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        app.metrics.to_prometheus_format(),
    )
}

/// POST /api/duels/precheck
pub async fn precheck_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    ApiJson(request): ApiJson<PrecheckRequest>,
) -> ApiResult<PrecheckResponse> {
    app.duels
        .precheck(&request)
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(PrecheckResponse { eligible: true }))
}

/// POST /api/duels
pub async fn create_duel_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    ApiJson(request): ApiJson<NewChallenge>,
) -> Result<(StatusCode, Json<Duel>), ApiError> {
    let duel = app
        .duels
        .create_challenge(request)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok((StatusCode::CREATED, Json(duel)))
}

/// GET /api/duels/:id
pub async fn get_duel_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> ApiResult<Duel> {
    let duel = app
        .duels
        .get(&id)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(duel))
}

/// POST /api/duels/:id/accept
pub async fn accept_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(actor): ApiJson<ActorRequest>,
) -> ApiResult<TransitionResponse> {
    let outcome = app
        .duels
        .accept(&id, &actor.participant_id)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(outcome.into()))
}

/// POST /api/duels/:id/decline
pub async fn decline_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(actor): ApiJson<ActorRequest>,
) -> ApiResult<TransitionResponse> {
    let outcome = app
        .duels
        .decline(&id, &actor.participant_id)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(outcome.into()))
}

/// POST /api/duels/:id/start
pub async fn start_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(actor): ApiJson<ActorRequest>,
) -> ApiResult<TransitionResponse> {
    let outcome = app
        .duels
        .start(&id, &actor.participant_id)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(outcome.into()))
}

/// POST /api/duels/:id/confirm
pub async fn confirm_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(actor): ApiJson<ActorRequest>,
) -> ApiResult<TransitionResponse> {
    let outcome = app
        .duels
        .confirm(&id, &actor.participant_id)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(outcome.into()))
}

/// POST /api/duels/:id/dispute
pub async fn dispute_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<DisputeRequest>,
) -> ApiResult<TransitionResponse> {
    let outcome = app
        .duels
        .dispute(&id, &request.participant_id, &request.reason, request.video_evidence)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(outcome.into()))
}

/// POST /api/duels/:id/result (referee)
pub async fn result_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<Value>,
) -> ApiResult<ResultResponse> {
    let outcome = app
        .duels
        .ingest_result(&id, &payload)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(outcome.into()))
}

/// GET /api/referee/jobs?game={game}&limit={n} (referee)
pub async fn referee_jobs_handler(
    State(app): State<Arc<App>>,
    Query(query): Query<JobsQuery>,
) -> Json<JobsResponse> {
    let jobs = app.referee_queue.take(query.game, query.limit.min(100)).await;
    Json(JobsResponse { jobs })
}

/// POST /api/queue/join
pub async fn queue_join_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    ApiJson(request): ApiJson<QueueJoinRequest>,
) -> ApiResult<QueueJoinResponse> {
    let outcome = app
        .matchmaker
        .join(
            &request.participant_id,
            request.game,
            request.wager,
            request.match_parameters,
        )
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    Ok(Json(outcome.into()))
}

/// POST /api/queue/leave
pub async fn queue_leave_handler(
    State(app): State<Arc<App>>,
    ApiJson(actor): ApiJson<ActorRequest>,
) -> Json<QueueLeaveResponse> {
    let removed = app.matchmaker.leave(&actor.participant_id).await;
    Json(QueueLeaveResponse { removed })
}

/// GET /api/queue
pub async fn queue_list_handler(State(app): State<Arc<App>>) -> Json<Vec<QueueEntry>> {
    Json(app.matchmaker.waiting().await)
}

/// POST /api/accounts/link
pub async fn link_account_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    ApiJson(request): ApiJson<LinkAccountRequest>,
) -> ApiResult<LinkAccountResponse> {
    let outcome = app
        .identities
        .link_account(&request.participant_id, request.game, &request.username)
        .await
        .map_err(|e| ApiError::from_identity(&request_id.0, e))?;
    Ok(Json(LinkAccountResponse {
        linked: outcome == LinkOutcome::Linked,
    }))
}

/// POST /api/accounts/payout-address
pub async fn payout_address_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    ApiJson(request): ApiJson<PayoutAddressRequest>,
) -> Result<StatusCode, ApiError> {
    app.identities
        .set_payout_address(&request.participant_id, &request.address)
        .map_err(|e| ApiError::from_identity(&request_id.0, e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/accounts/:id/balance
pub async fn balance_handler(
    State(app): State<Arc<App>>,
    Path(participant_id): Path<String>,
) -> Json<BalanceResponse> {
    let balance = app.ledger.balance(&participant_id);
    Json(BalanceResponse {
        participant_id,
        balance,
    })
}

/// GET /api/tasks/pending?limit={n}
pub async fn pending_tasks_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Query(query): Query<PendingTasksQuery>,
) -> ApiResult<TasksResponse> {
    let tasks = app
        .tasks
        .fetch_pending(query.limit.min(1000))
        .await
        .map_err(|e| ApiError::internal_error(&request_id.0, format!("Failed to read tasks: {}", e)))?;
    Ok(Json(TasksResponse { tasks }))
}

/// POST /api/admin/duels/:id/void
pub async fn admin_void_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<VoidRequest>,
) -> ApiResult<TransitionResponse> {
    let outcome = app
        .duels
        .void(&id, &request.note)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    info!(duel_id = %id, applied = outcome.is_applied(), "Admin void");
    Ok(Json(outcome.into()))
}

/// POST /api/admin/duels/:id/resolve
pub async fn admin_resolve_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ResolveRequest>,
) -> ApiResult<TransitionResponse> {
    let outcome = app
        .duels
        .resolve(&id, &request.winner_id)
        .await
        .map_err(|e| ApiError::from_duel(&request_id.0, e))?;
    info!(duel_id = %id, winner = %request.winner_id, applied = outcome.is_applied(), "Admin resolve");
    Ok(Json(outcome.into()))
}

/// POST /api/admin/servers/status
pub async fn admin_server_status_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    ApiJson(request): ApiJson<ServerStatusRequest>,
) -> ApiResult<ServerStatusResponse> {
    if request.region.trim().is_empty() || request.status.trim().is_empty() {
        return Err(ApiError::bad_request(&request_id.0, "Region and status are required")
            .with_code("VALIDATION_FAILED"));
    }
    let changed = app
        .server_board
        .set_status(&request.region, &request.status, request.silent)
        .await;
    Ok(Json(ServerStatusResponse {
        status: app.server_board.status(&request.region),
        region: request.region.trim().to_lowercase(),
        changed,
    }))
}

/// POST /api/admin/accounts/:id/deposit
pub async fn admin_deposit_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    Path(participant_id): Path<String>,
    ApiJson(request): ApiJson<DepositRequest>,
) -> ApiResult<BalanceResponse> {
    let balance = app
        .ledger
        .deposit(&participant_id, request.amount)
        .map_err(|e| ApiError::bad_request(&request_id.0, e.to_string()).with_code("VALIDATION_FAILED"))?;
    info!(participant = %participant_id, amount = request.amount, "Admin deposit");
    Ok(Json(BalanceResponse {
        participant_id,
        balance,
    }))
}

/// GET /api/admin/payouts
pub async fn admin_payouts_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
) -> ApiResult<PayoutsResponse> {
    let payouts = match &app.settlement {
        Some(parts) => parts.payouts.list().await.map_err(|e| {
            ApiError::service_unavailable(&request_id.0, format!("Failed to read payouts: {}", e))
        })?,
        None => Vec::new(),
    };
    Ok(Json(PayoutsResponse { payouts }))
}

/// POST /api/admin/flags
pub async fn admin_set_flag_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
    ApiJson(request): ApiJson<FlagUpdateRequest>,
) -> ApiResult<FlagsResponse> {
    app.flag_source.set(&request.key, request.enabled);
    refresh_flags(&app, &request_id).await
}

/// POST /api/admin/flags/refresh
pub async fn admin_refresh_flags_handler(
    Extension(request_id): Extension<RequestId>,
    State(app): State<Arc<App>>,
) -> ApiResult<FlagsResponse> {
    refresh_flags(&app, &request_id).await
}

async fn refresh_flags(app: &App, request_id: &RequestId) -> ApiResult<FlagsResponse> {
    app.flags
        .refresh()
        .await
        .map_err(|e| ApiError::service_unavailable(&request_id.0, e.to_string()))?;
    Ok(Json(FlagsResponse {
        flags: app.flags.snapshot(),
    }))
}
