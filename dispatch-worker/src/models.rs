//! Persisted record types: campaigns, their recipients and the send audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum CampaignStatus {
    Queued,
    Running,
    Scheduled,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Queued => "queued",
            CampaignStatus::Running => "running",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

/// How a campaign fires.
///
/// `Now` and `Once` complete when the queue drains; `Daily` and `Weekly`
/// advance `next_send_time` and refill the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ScheduleType {
    Now,
    Once,
    Daily,
    Weekly,
}

impl ScheduleType {
    /// Period between refires, `None` for one-shot schedules.
    pub fn period(&self) -> Option<chrono::Duration> {
        match self {
            ScheduleType::Now | ScheduleType::Once => None,
            ScheduleType::Daily => Some(chrono::Duration::days(1)),
            ScheduleType::Weekly => Some(chrono::Duration::weeks(1)),
        }
    }
}

/// Which delivery backend a campaign sends through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum DeliveryBackend {
    /// HTTP relay API
    Relay,
    /// Direct SMTP connection to the campaign's host
    Direct,
}

/// Outcome recorded in a send log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum LogStatus {
    Sent,
    Failed,
}

/// A configured mailing job.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Campaign {
    pub id: i64,
    /// Public identifier used in URLs
    pub uid: String,
    pub name: String,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    /// Newline-delimited subject variants
    pub subjects_raw: String,
    pub body_plain: String,
    pub body_html: String,
    pub pdf_html_template: String,
    /// Pacing bounds in seconds
    pub min_delay: i64,
    pub max_delay: i64,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    /// Send caps, 0 = unlimited
    pub hourly_limit: i64,
    pub daily_limit: i64,
    pub minute_limit: i64,
    pub backend: DeliveryBackend,
    pub smtp_host: Option<String>,
    pub smtp_port: i64,
    pub smtp_user: Option<String>,
    /// SMTP password, or the relay API key when `backend` is `Relay`
    #[serde(skip_serializing)]
    pub smtp_pass: Option<String>,
    pub use_starttls: bool,
    pub attach_pdf: bool,
    pub manual_attachment_path: Option<String>,
    pub uploaded_attachment_path: Option<String>,
    pub schedule_type: ScheduleType,
    pub schedule_time: Option<DateTime<Utc>>,
    /// Scheduling cursor: earliest instant a `scheduled` campaign may dispatch
    pub next_send_time: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Subject variants, one per non-empty line.
    pub fn subject_lines(&self) -> Vec<&str> {
        self.subjects_raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect()
    }

    /// File attachment to send, preferring an uploaded file over a manual path.
    pub fn attachment_path(&self) -> Option<&str> {
        [&self.uploaded_attachment_path, &self.manual_attachment_path]
            .into_iter()
            .flatten()
            .map(|p| p.trim())
            .find(|p| !p.is_empty())
    }

    /// Whether the dispatch loop may work on this campaign at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            CampaignStatus::Running | CampaignStatus::Queued => true,
            CampaignStatus::Scheduled => self.next_send_time.is_some_and(|t| t <= now),
            CampaignStatus::Paused | CampaignStatus::Completed => false,
        }
    }
}

/// One destination address within a campaign.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Recipient {
    pub id: i64,
    pub campaign_id: i64,
    pub email: String,
    pub sent: bool,
    pub last_error: Option<String>,
}

impl Recipient {
    /// Part of the address before the `@`.
    pub fn local_part(&self) -> &str {
        local_part(&self.email)
    }
}

/// Part of an address before the `@` (the whole string when there is none).
pub fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// Immutable audit record of one delivery attempt.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SendLog {
    pub id: i64,
    pub campaign_id: i64,
    pub recipient: String,
    pub subject: String,
    /// Comma-space separated attachment filenames
    pub attachment_name: String,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fields for a new campaign; storage assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub uid: String,
    pub name: String,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    pub subjects_raw: String,
    pub body_plain: String,
    pub body_html: String,
    pub pdf_html_template: String,
    pub min_delay: i64,
    pub max_delay: i64,
    pub status: CampaignStatus,
    pub hourly_limit: i64,
    pub daily_limit: i64,
    pub minute_limit: i64,
    pub backend: DeliveryBackend,
    pub smtp_host: Option<String>,
    pub smtp_port: i64,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub use_starttls: bool,
    pub attach_pdf: bool,
    pub manual_attachment_path: Option<String>,
    pub uploaded_attachment_path: Option<String>,
    pub schedule_type: ScheduleType,
    pub schedule_time: Option<DateTime<Utc>>,
    pub next_send_time: Option<DateTime<Utc>>,
}

impl Default for NewCampaign {
    fn default() -> Self {
        NewCampaign {
            uid: String::new(),
            name: "campaign".to_string(),
            sender_name: String::new(),
            sender_email: String::new(),
            reply_to: None,
            subjects_raw: String::new(),
            body_plain: String::new(),
            body_html: String::new(),
            pdf_html_template: String::new(),
            min_delay: 1,
            max_delay: 5,
            status: CampaignStatus::Queued,
            hourly_limit: 100,
            daily_limit: 1000,
            minute_limit: 10,
            backend: DeliveryBackend::Direct,
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            use_starttls: true,
            attach_pdf: false,
            manual_attachment_path: None,
            uploaded_attachment_path: None,
            schedule_type: ScheduleType::Now,
            schedule_time: None,
            next_send_time: None,
        }
    }
}

/// Fields for a new send log row.
#[derive(Debug, Clone)]
pub struct NewSendLog {
    pub campaign_id: i64,
    pub recipient: String,
    pub subject: String,
    pub attachment_name: String,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
