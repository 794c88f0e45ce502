//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::models::{Campaign, CampaignStatus, DeliveryBackend, ScheduleType};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

/// A running direct-protocol campaign with no limits and no delays.
pub fn campaign() -> Campaign {
    Campaign {
        id: 1,
        uid: "1234567890".to_string(),
        name: "June Update".to_string(),
        sender_name: "Acme Updates".to_string(),
        sender_email: "updates@acme.test".to_string(),
        reply_to: Some("support@acme.test".to_string()),
        subjects_raw: "June update for #email#".to_string(),
        body_plain: "Hello #email#".to_string(),
        body_html: "<p>Hello #email#</p>".to_string(),
        pdf_html_template: String::new(),
        min_delay: 0,
        max_delay: 0,
        status: CampaignStatus::Running,
        created_at: t0(),
        hourly_limit: 0,
        daily_limit: 0,
        minute_limit: 0,
        backend: DeliveryBackend::Direct,
        smtp_host: Some("smtp.acme.test".to_string()),
        smtp_port: 587,
        smtp_user: None,
        smtp_pass: None,
        use_starttls: false,
        attach_pdf: false,
        manual_attachment_path: None,
        uploaded_attachment_path: None,
        schedule_type: ScheduleType::Now,
        schedule_time: None,
        next_send_time: Some(t0()),
    }
}
