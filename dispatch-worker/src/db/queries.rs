//! Campaign, recipient and send log queries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::models::{
    Campaign, CampaignStatus, LogStatus, NewCampaign, NewSendLog, Recipient, SendLog,
};

/// Insert a campaign and its recipients in one transaction.
///
/// Blank recipient lines are skipped and surrounding whitespace is trimmed.
pub async fn create_campaign(
    pool: &SqlitePool,
    campaign: &NewCampaign,
    recipients: &[String],
    now: DateTime<Utc>,
) -> Result<Campaign, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO campaigns (
            uid, name, sender_name, sender_email, reply_to, subjects_raw,
            body_plain, body_html, pdf_html_template, min_delay, max_delay,
            status, created_at, hourly_limit, daily_limit, minute_limit,
            backend, smtp_host, smtp_port, smtp_user, smtp_pass, use_starttls,
            attach_pdf, manual_attachment_path, uploaded_attachment_path,
            schedule_type, schedule_time, next_send_time
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&campaign.uid)
    .bind(&campaign.name)
    .bind(&campaign.sender_name)
    .bind(&campaign.sender_email)
    .bind(&campaign.reply_to)
    .bind(&campaign.subjects_raw)
    .bind(&campaign.body_plain)
    .bind(&campaign.body_html)
    .bind(&campaign.pdf_html_template)
    .bind(campaign.min_delay)
    .bind(campaign.max_delay)
    .bind(campaign.status)
    .bind(now)
    .bind(campaign.hourly_limit)
    .bind(campaign.daily_limit)
    .bind(campaign.minute_limit)
    .bind(campaign.backend)
    .bind(&campaign.smtp_host)
    .bind(campaign.smtp_port)
    .bind(&campaign.smtp_user)
    .bind(&campaign.smtp_pass)
    .bind(campaign.use_starttls)
    .bind(campaign.attach_pdf)
    .bind(&campaign.manual_attachment_path)
    .bind(&campaign.uploaded_attachment_path)
    .bind(campaign.schedule_type)
    .bind(campaign.schedule_time)
    .bind(campaign.next_send_time)
    .fetch_one(&mut *tx)
    .await?;

    for email in recipients.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
        sqlx::query("INSERT INTO recipients (campaign_id, email) VALUES (?, ?)")
            .bind(id)
            .bind(email)
            .execute(&mut *tx)
            .await?;
    }

    let created = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(created)
}

pub async fn get_campaign(pool: &SqlitePool, id: i64) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_campaign_by_uid(
    pool: &SqlitePool,
    uid: &str,
) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE uid = ?")
        .bind(uid)
        .fetch_optional(pool)
        .await
}

/// All campaigns, newest first.
pub async fn list_campaigns(pool: &SqlitePool) -> Result<Vec<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns ORDER BY created_at DESC, id DESC")
        .fetch_all(pool)
        .await
}

/// Campaigns the dispatch loop may work on at `now`: running or queued, or
/// scheduled with a cursor that has come due.
pub async fn eligible_campaigns(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> Result<Vec<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        SELECT * FROM campaigns
        WHERE status IN ('running', 'queued')
           OR (status = 'scheduled' AND next_send_time IS NOT NULL AND next_send_time <= ?)
        ORDER BY id
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Number of send attempts logged for a campaign at or after `since`.
pub async fn count_logs_since(
    pool: &SqlitePool,
    campaign_id: i64,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM send_logs WHERE campaign_id = ? AND timestamp >= ?")
        .bind(campaign_id)
        .bind(since)
        .fetch_one(pool)
        .await
}

/// First unsent recipient in insertion order.
pub async fn next_unsent_recipient(
    pool: &SqlitePool,
    campaign_id: i64,
) -> Result<Option<Recipient>, sqlx::Error> {
    sqlx::query_as::<_, Recipient>(
        "SELECT * FROM recipients WHERE campaign_id = ? AND sent = 0 ORDER BY id LIMIT 1",
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_recipients(
    pool: &SqlitePool,
    campaign_id: i64,
) -> Result<Vec<Recipient>, sqlx::Error> {
    sqlx::query_as::<_, Recipient>("SELECT * FROM recipients WHERE campaign_id = ? ORDER BY id")
        .bind(campaign_id)
        .fetch_all(pool)
        .await
}

pub async fn set_campaign_status(
    pool: &SqlitePool,
    campaign_id: i64,
    status: CampaignStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE campaigns SET status = ? WHERE id = ?")
        .bind(status)
        .bind(campaign_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move a recurring campaign's cursor to `next_send_time` and mark every
/// recipient unsent again, atomically.
pub async fn advance_schedule(
    pool: &SqlitePool,
    campaign_id: i64,
    next_send_time: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE campaigns SET next_send_time = ? WHERE id = ?")
        .bind(next_send_time)
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;

    let reset = sqlx::query("UPDATE recipients SET sent = 0 WHERE campaign_id = ?")
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(reset)
}

/// Append the log row for one attempt and mark the recipient sent,
/// storing the backend message as `last_error` when the attempt failed.
pub async fn record_send(
    pool: &SqlitePool,
    recipient_id: i64,
    log: &NewSendLog,
) -> Result<SendLog, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, SendLog>(
        r#"
        INSERT INTO send_logs (campaign_id, recipient, subject, attachment_name, status, message, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(log.campaign_id)
    .bind(&log.recipient)
    .bind(&log.subject)
    .bind(&log.attachment_name)
    .bind(log.status)
    .bind(&log.message)
    .bind(log.timestamp)
    .fetch_one(&mut *tx)
    .await?;

    let last_error = match log.status {
        LogStatus::Sent => None,
        LogStatus::Failed => Some(log.message.as_str()),
    };

    sqlx::query("UPDATE recipients SET sent = 1, last_error = ? WHERE id = ?")
        .bind(last_error)
        .bind(recipient_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(row)
}

/// Delete a campaign together with its recipients and logs.
///
/// Returns `false` when no campaign had that id.
pub async fn delete_campaign(pool: &SqlitePool, campaign_id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM recipients WHERE campaign_id = ?")
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM send_logs WHERE campaign_id = ?")
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM campaigns WHERE id = ?")
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(deleted > 0)
}

/// Most recent send logs across all campaigns.
pub async fn recent_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<SendLog>, sqlx::Error> {
    sqlx::query_as::<_, SendLog>("SELECT * FROM send_logs ORDER BY timestamp DESC, id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
}

pub async fn logs_for_campaign(
    pool: &SqlitePool,
    campaign_id: i64,
) -> Result<Vec<SendLog>, sqlx::Error> {
    sqlx::query_as::<_, SendLog>(
        "SELECT * FROM send_logs WHERE campaign_id = ? ORDER BY timestamp DESC, id DESC",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await
}

/// Counters behind the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    /// Running plus queued campaigns
    pub running: i64,
    pub sent: i64,
    pub failed: i64,
    /// Campaign counts: running, queued, paused, completed
    pub pie: [i64; 4],
}

pub async fn dashboard_stats(pool: &SqlitePool) -> Result<DashboardStats, sqlx::Error> {
    let by_status: Vec<(CampaignStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM campaigns GROUP BY status")
            .fetch_all(pool)
            .await?;
    let count = |wanted: CampaignStatus| {
        by_status
            .iter()
            .find(|(s, _)| *s == wanted)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };

    let logs: Vec<(LogStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM send_logs GROUP BY status")
            .fetch_all(pool)
            .await?;
    let log_count = |wanted: LogStatus| {
        logs.iter()
            .find(|(s, _)| *s == wanted)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };

    let running = count(CampaignStatus::Running);
    let queued = count(CampaignStatus::Queued);
    Ok(DashboardStats {
        running: running + queued,
        sent: log_count(LogStatus::Sent),
        failed: log_count(LogStatus::Failed),
        pie: [
            running,
            queued,
            count(CampaignStatus::Paused),
            count(CampaignStatus::Completed),
        ],
    })
}
