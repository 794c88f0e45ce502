//! Campaign management API.
//!
//! Creates, lists and deletes campaigns and exposes the send history. The
//! dispatch worker is a separate process; the two share only the database.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    api_dashboard, campaign_history, create_campaign, delete_campaign, health, history,
    list_campaigns, view_logs, view_tags, ApiError, AppState, CreateCampaignRequest,
    CreatedResponse, HealthResponse, UploadedFile,
};

/// Every route of the management API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/campaigns", post(create_campaign))
        .route("/api/dashboard", get(api_dashboard))
        .route("/api/campaigns", get(list_campaigns))
        .route("/history", get(history))
        .route("/campaigns/:uid/history", get(campaign_history))
        .route("/campaigns/:uid/delete", post(delete_campaign))
        .route("/campaigns/:uid", axum::routing::delete(delete_campaign))
        .route("/logs", get(view_logs))
        .route("/tags", get(view_tags))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
