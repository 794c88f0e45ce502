//! Direct SMTP backend.
//!
//! Builds a multipart message, connects to the campaign's own host and
//! retries up to three attempts when the connection drops, times out or is
//! refused, waiting 5s then 10s between attempts. Other errors end the
//! send immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{error, info};

use super::{Deliver, OutgoingMessage, SendError, SentInfo};
use crate::clock::Clock;
use crate::models::Campaign;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_secs(5);

/// Connection settings for one campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpServer {
    pub host: String,
    pub port: u16,
    /// Present only when both username and password are configured
    pub credentials: Option<(String, String)>,
    pub starttls: bool,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection dropped, timed out or refused; worth another attempt
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

/// One connection attempt carrying one message.
#[async_trait]
pub trait SmtpConnector: Send + Sync + 'static {
    async fn deliver(&self, server: &SmtpServer, message: &Message) -> Result<(), TransportError>;
}

/// [`SmtpConnector`] over lettre's tokio transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LettreConnector;

#[async_trait]
impl SmtpConnector for LettreConnector {
    async fn deliver(&self, server: &SmtpServer, message: &Message) -> Result<(), TransportError> {
        let mut builder = if server.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host).map_err(classify)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&server.host)
        };

        builder = builder.port(server.port).timeout(Some(server.timeout));

        if let Some((username, password)) = &server.credentials {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        } else {
            info!(host = %server.host, "smtp_auth_skipped");
        }

        builder
            .build()
            .send(message.clone())
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

/// Sort a lettre error into retryable and final.
fn classify(err: lettre::transport::smtp::Error) -> TransportError {
    let text = err.to_string();
    if err.is_timeout() || is_connection_failure(&err) {
        TransportError::Transient(text)
    } else {
        TransportError::Permanent(text)
    }
}

fn is_connection_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    use std::io::ErrorKind;

    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::TimedOut
            );
        }
        current = e.source();
    }
    false
}

pub struct DirectBackend<C = LettreConnector> {
    connector: C,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl<C: SmtpConnector> DirectBackend<C> {
    pub fn new(connector: C, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            connector,
            clock,
            timeout,
        }
    }

    /// Connection settings from the campaign.
    pub fn server(&self, campaign: &Campaign) -> Result<SmtpServer, SendError> {
        let host = campaign
            .smtp_host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                SendError::MissingConfig("SMTP host is not configured for this campaign.".to_string())
            })?;

        let port = u16::try_from(campaign.smtp_port).map_err(|_| {
            SendError::MissingConfig(format!("invalid SMTP port {}", campaign.smtp_port))
        })?;

        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let credentials = non_empty(&campaign.smtp_user).zip(non_empty(&campaign.smtp_pass));

        Ok(SmtpServer {
            host: host.to_string(),
            port,
            credentials,
            starttls: campaign.use_starttls,
            timeout: self.timeout,
        })
    }
}

/// MIME message: plain text with an optional HTML alternative, plus attachments.
pub fn build_message(campaign: &Campaign, message: &OutgoingMessage) -> Result<Message, SendError> {
    let sender = campaign
        .sender_email
        .parse::<Address>()
        .map_err(|e| SendError::Build(format!("invalid sender address {:?}: {e}", campaign.sender_email)))?;
    let sender_name = Some(campaign.sender_name.clone()).filter(|n| !n.is_empty());
    let to = message
        .to
        .parse::<Mailbox>()
        .map_err(|e| SendError::Build(format!("invalid recipient address {:?}: {e}", message.to)))?;

    let mut builder = Message::builder()
        .from(Mailbox::new(sender_name, sender))
        .to(to)
        .subject(message.subject.clone());

    if let Some(reply_to) = campaign.reply_to.as_deref().filter(|r| !r.trim().is_empty()) {
        let mailbox = reply_to
            .parse::<Mailbox>()
            .map_err(|e| SendError::Build(format!("invalid reply-to address {reply_to:?}: {e}")))?;
        builder = builder.reply_to(mailbox);
    }

    let body = if message.body_html.is_empty() {
        MultiPart::alternative().singlepart(SinglePart::plain(message.body_plain.clone()))
    } else {
        MultiPart::alternative_plain_html(message.body_plain.clone(), message.body_html.clone())
    };

    let mut attachments = message.attachments_for(campaign).peekable();
    let built = if attachments.peek().is_none() {
        builder.multipart(body)
    } else {
        let mut mixed = MultiPart::mixed().multipart(body);
        for attachment in attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| SendError::Build(format!("bad content type {:?}: {e}", attachment.content_type)))?;
            mixed = mixed.singlepart(
                MimeAttachment::new(attachment.filename.clone())
                    .body(attachment.bytes.clone(), content_type),
            );
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| SendError::Build(e.to_string()))
}

#[async_trait]
impl<C: SmtpConnector> Deliver for DirectBackend<C> {
    async fn send(
        &self,
        campaign: &Campaign,
        message: &OutgoingMessage,
    ) -> Result<SentInfo, SendError> {
        let server = self.server(campaign).inspect_err(|e| {
            error!(campaign_uid = %campaign.uid, error = %e, "smtp_config_invalid");
        })?;
        let email = build_message(campaign, message)?;

        info!(
            recipient = %message.to,
            host = %server.host,
            port = server.port,
            starttls = server.starttls,
            "smtp_send_starting"
        );

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.connector.deliver(&server, &email).await {
                Ok(()) => {
                    info!(recipient = %message.to, attempt = attempt, "smtp_send_complete");
                    return Ok(SentInfo {
                        message: "Sent".to_string(),
                    });
                }
                Err(TransportError::Transient(text)) => {
                    error!(
                        recipient = %message.to,
                        attempt = attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %text,
                        "smtp_send_transient_failure"
                    );
                    last_error = text;
                    if attempt < MAX_ATTEMPTS {
                        self.clock.sleep(BACKOFF_STEP * attempt).await;
                    }
                }
                Err(TransportError::Permanent(text)) => {
                    error!(recipient = %message.to, error = %text, "smtp_send_failed");
                    return Err(SendError::Transport(text));
                }
            }
        }

        Err(SendError::Transport(last_error))
    }
}
