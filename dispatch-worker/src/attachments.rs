//! Attachment assembly for one outgoing message.
//!
//! Both the rendered document and the campaign's file are best effort: a
//! failure is logged and the message goes out without that attachment.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::models::{local_part, Campaign};
use crate::pdf::render_pdf;
use crate::template::render_at;

/// What produced an attachment; backends only send documents when the
/// campaign opted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// PDF rendered from the campaign's HTML template
    Document,
    /// Uploaded or manually referenced file
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Per-recipient attachment name:
/// `{YYYYMMDD}-{sanitized campaign name}-{recipient local part}{extension}`.
pub fn attachment_filename(
    original: &str,
    recipient_email: &str,
    campaign_name: &str,
    now: DateTime<Utc>,
) -> String {
    let extension = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    format!(
        "{}-{}-{}{}",
        now.format("%Y%m%d"),
        sanitize_filename(campaign_name),
        local_part(recipient_email),
        extension
    )
}

/// Replace everything outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Render the campaign's document template for this recipient, if the
/// campaign attaches one.
pub fn document_attachment(
    campaign: &Campaign,
    recipient_email: &str,
    now: DateTime<Utc>,
) -> Option<Attachment> {
    if !campaign.attach_pdf || campaign.pdf_html_template.trim().is_empty() {
        return None;
    }

    let html = render_at(&campaign.pdf_html_template, recipient_email, now);
    match render_pdf(&html) {
        Ok(bytes) => Some(Attachment {
            kind: AttachmentKind::Document,
            filename: attachment_filename("document.pdf", recipient_email, &campaign.name, now),
            content_type: "application/pdf".to_string(),
            bytes,
        }),
        Err(e) => {
            error!(
                campaign_uid = %campaign.uid,
                recipient = %recipient_email,
                error = %e,
                "pdf_render_failed"
            );
            None
        }
    }
}

/// Read the campaign's uploaded (preferred) or manual attachment file.
pub async fn file_attachment(
    campaign: &Campaign,
    recipient_email: &str,
    now: DateTime<Utc>,
) -> Option<Attachment> {
    let path = campaign.attachment_path()?;

    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let original = Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(path);
            info!(
                campaign_uid = %campaign.uid,
                path = %path,
                size = bytes.len(),
                "attachment_loaded"
            );
            Some(Attachment {
                kind: AttachmentKind::File,
                filename: attachment_filename(original, recipient_email, &campaign.name, now),
                content_type: mime_guess::from_path(path)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string(),
                bytes,
            })
        }
        Err(e) => {
            error!(
                campaign_uid = %campaign.uid,
                path = %path,
                error = %e,
                "attachment_read_failed"
            );
            None
        }
    }
}
