//! HTTP handlers for campaign management.
//!
//! Handlers only touch storage; sending is left entirely to the dispatch
//! worker, which picks new campaigns up on its next pass.

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::attachments::sanitize_filename;
use crate::clock::Clock;
use crate::config::Config;
use crate::db::{self, DashboardStats};
use crate::models::{
    Campaign, CampaignStatus, DeliveryBackend, NewCampaign, ScheduleType, SendLog,
};
use crate::template::{Tag, TAGS};

/// Number of rows returned by the global history view.
const HISTORY_LIMIT: i64 = 100;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            clock,
        }
    }
}

/// Error body: `{"ok": false, "error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("campaign not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request_failed");
        }
        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Campaign Creation
// =============================================================================

/// Attachment uploaded with the creation request.
#[derive(Debug, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    /// Base64-encoded file content
    pub content: String,
}

/// Campaign creation payload. Omitted fields take the defaults below.
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sender_name: String,
    pub sender_email: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Newline-delimited subject variants
    #[serde(default)]
    pub subjects: String,
    /// Message text; sent as-is for plain text and with `<br>` line breaks as HTML
    #[serde(default)]
    pub body_html: String,
    #[serde(default)]
    pub pdf_html_template: String,
    #[serde(default)]
    pub min_delay: Option<i64>,
    #[serde(default)]
    pub max_delay: Option<i64>,
    #[serde(default)]
    pub hourly_limit: Option<i64>,
    #[serde(default)]
    pub daily_limit: Option<i64>,
    #[serde(default)]
    pub minute_limit: Option<i64>,
    #[serde(default)]
    pub use_relay: bool,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<i64>,
    #[serde(default)]
    pub smtp_user: Option<String>,
    /// SMTP password, or the relay API key when `use_relay` is set
    #[serde(default)]
    pub smtp_pass: Option<String>,
    #[serde(default)]
    pub use_starttls: Option<bool>,
    #[serde(default)]
    pub attach_pdf: bool,
    #[serde(default)]
    pub manual_attachment_path: Option<String>,
    #[serde(default)]
    pub attachment: Option<UploadedFile>,
    #[serde(default)]
    pub schedule_type: Option<ScheduleType>,
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    /// Newline-delimited recipient addresses
    #[serde(default)]
    pub recipients: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub ok: bool,
    pub id: i64,
    pub uid: String,
}

/// Random 10-digit public identifier.
fn generate_uid() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000u64..=9_999_999_999)
        .to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Status and first dispatch instant for a new campaign.
fn initial_schedule(
    schedule_type: ScheduleType,
    schedule_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (CampaignStatus, DateTime<Utc>) {
    match (schedule_type, schedule_time) {
        (ScheduleType::Now, _) | (_, None) => (CampaignStatus::Running, now),
        (_, Some(at)) => (CampaignStatus::Scheduled, at),
    }
}

async fn store_upload(upload_dir: &str, uid: &str, file: &UploadedFile) -> Result<String, ApiError> {
    let bytes = STANDARD
        .decode(file.content.trim())
        .map_err(|e| ApiError::BadRequest(format!("attachment is not valid base64: {e}")))?;

    let original = Path::new(&file.filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment");
    let path = Path::new(upload_dir).join(format!("{uid}-{}", sanitize_filename(original)));

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("creating upload dir: {e}")))?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("storing upload: {e}")))?;

    info!(path = %path.display(), size = bytes.len(), "attachment_uploaded");
    Ok(path.to_string_lossy().to_string())
}

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let sender_email = req.sender_email.trim().to_string();
    if sender_email.is_empty() {
        return Err(ApiError::BadRequest("sender_email is required".to_string()));
    }

    let uid = generate_uid();
    let uploaded_attachment_path = match &req.attachment {
        Some(file) if !file.filename.trim().is_empty() => {
            Some(store_upload(&state.config.upload_dir, &uid, file).await?)
        }
        _ => None,
    };

    let now = state.clock.now();
    let schedule_type = req.schedule_type.unwrap_or(ScheduleType::Now);
    let (status, next_send_time) = initial_schedule(schedule_type, req.schedule_time, now);
    let defaults = NewCampaign::default();

    let new = NewCampaign {
        uid,
        name: non_empty(req.name).unwrap_or(defaults.name),
        sender_name: req.sender_name.trim().to_string(),
        sender_email,
        reply_to: non_empty(req.reply_to),
        subjects_raw: req.subjects,
        body_html: req.body_html.replace('\n', "<br>"),
        body_plain: req.body_html,
        pdf_html_template: req.pdf_html_template,
        min_delay: req.min_delay.unwrap_or(defaults.min_delay),
        max_delay: req.max_delay.unwrap_or(defaults.max_delay),
        status,
        hourly_limit: req.hourly_limit.unwrap_or(defaults.hourly_limit),
        daily_limit: req.daily_limit.unwrap_or(defaults.daily_limit),
        minute_limit: req.minute_limit.unwrap_or(defaults.minute_limit),
        backend: if req.use_relay {
            DeliveryBackend::Relay
        } else {
            DeliveryBackend::Direct
        },
        smtp_host: non_empty(req.smtp_host),
        smtp_port: req.smtp_port.unwrap_or(defaults.smtp_port),
        smtp_user: non_empty(req.smtp_user),
        smtp_pass: non_empty(req.smtp_pass),
        use_starttls: req.use_starttls.unwrap_or(defaults.use_starttls),
        attach_pdf: req.attach_pdf,
        manual_attachment_path: non_empty(req.manual_attachment_path),
        uploaded_attachment_path,
        schedule_type,
        schedule_time: req.schedule_time,
        next_send_time: Some(next_send_time),
    };

    let recipients: Vec<String> = req.recipients.lines().map(str::to_string).collect();
    let campaign = db::create_campaign(&state.pool, &new, &recipients, now).await?;

    info!(
        campaign_uid = %campaign.uid,
        status = campaign.status.as_str(),
        schedule_type = ?campaign.schedule_type,
        backend = ?campaign.backend,
        "campaign_created"
    );

    Ok(Json(CreatedResponse {
        ok: true,
        id: campaign.id,
        uid: campaign.uid,
    }))
}

// =============================================================================
// Read-only Views
// =============================================================================

pub async fn api_dashboard(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(db::dashboard_stats(&state.pool).await?))
}

pub async fn list_campaigns(State(state): State<AppState>) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(db::list_campaigns(&state.pool).await?))
}

pub async fn history(State(state): State<AppState>) -> Result<Json<Vec<SendLog>>, ApiError> {
    Ok(Json(db::recent_logs(&state.pool, HISTORY_LIMIT).await?))
}

pub async fn campaign_history(
    State(state): State<AppState>,
    UrlPath(uid): UrlPath<String>,
) -> Result<Json<Vec<SendLog>>, ApiError> {
    let campaign = db::find_campaign_by_uid(&state.pool, &uid)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(db::logs_for_campaign(&state.pool, campaign.id).await?))
}

/// Contents of the configured log file.
pub async fn view_logs(State(state): State<AppState>) -> String {
    let Some(path) = state.config.log_file.as_deref() else {
        return "Log file not found.".to_string();
    };
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path, error = %e, "log_file_unreadable");
            "Log file not found.".to_string()
        }
    }
}

pub async fn view_tags() -> Json<&'static [Tag]> {
    Json(TAGS)
}

// =============================================================================
// Deletion
// =============================================================================

pub async fn delete_campaign(
    State(state): State<AppState>,
    UrlPath(uid): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign = db::find_campaign_by_uid(&state.pool, &uid)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !db::delete_campaign(&state.pool, campaign.id).await? {
        return Err(ApiError::NotFound);
    }

    info!(campaign_uid = %uid, "campaign_deleted");
    Ok(Json(json!({ "ok": true })))
}
