//! Route Definitions
//!
//! Maps URLs to handlers. Referee and admin routes sit behind their own
//! API-key guard; every route gets a request id.

use super::{
    handlers::*,
    middleware::{admin_auth, referee_auth, request_id_middleware},
};
use crate::app::App;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(app: Arc<App>) -> Router {
    let referee = Router::new()
        .route("/api/duels/:id/result", post(result_handler))
        .route("/api/referee/jobs", get(referee_jobs_handler))
        .route_layer(from_fn_with_state(app.clone(), referee_auth));

    let admin = Router::new()
        .route("/api/admin/duels/:id/void", post(admin_void_handler))
        .route("/api/admin/duels/:id/resolve", post(admin_resolve_handler))
        .route("/api/admin/servers/status", post(admin_server_status_handler))
        .route("/api/admin/accounts/:id/deposit", post(admin_deposit_handler))
        .route("/api/admin/payouts", get(admin_payouts_handler))
        .route("/api/admin/flags", post(admin_set_flag_handler))
        .route("/api/admin/flags/refresh", post(admin_refresh_flags_handler))
        .route_layer(from_fn_with_state(app.clone(), admin_auth));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Duel lifecycle
        .route("/api/duels/precheck", post(precheck_handler))
        .route("/api/duels", post(create_duel_handler))
        .route("/api/duels/:id", get(get_duel_handler))
        .route("/api/duels/:id/accept", post(accept_handler))
        .route("/api/duels/:id/decline", post(decline_handler))
        .route("/api/duels/:id/start", post(start_handler))
        .route("/api/duels/:id/confirm", post(confirm_handler))
        .route("/api/duels/:id/dispute", post(dispute_handler))
        // Quick match
        .route("/api/queue", get(queue_list_handler))
        .route("/api/queue/join", post(queue_join_handler))
        .route("/api/queue/leave", post(queue_leave_handler))
        // Accounts
        .route("/api/accounts/link", post(link_account_handler))
        .route("/api/accounts/payout-address", post(payout_address_handler))
        .route("/api/accounts/:id/balance", get(balance_handler))
        // Operator inspection
        .route("/api/tasks/pending", get(pending_tasks_handler))
        .merge(referee)
        .merge(admin)
        .layer(from_fn(request_id_middleware))
        .with_state(app)
}
