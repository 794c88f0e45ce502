//! HTTP relay API backend.
//!
//! One POST per message to `{POSTAL_API_URL}/api/v1/send/message` with the
//! campaign's API key in `X-Server-API-Key`. Any transport error or non-2xx
//! response is final.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};
use url::Url;

use super::{Deliver, OutgoingMessage, SendError, SentInfo};
use crate::models::Campaign;

const SEND_PATH: &str = "api/v1/send/message";
const API_KEY_HEADER: &str = "X-Server-API-Key";

/// JSON envelope accepted by the relay.
#[derive(Debug, Serialize)]
struct RelayEnvelope<'a> {
    to: Vec<&'a str>,
    from: String,
    reply_to: Option<&'a str>,
    subject: &'a str,
    plain_body: &'a str,
    html_body: &'a str,
    attachments: Vec<RelayAttachment<'a>>,
}

#[derive(Debug, Serialize)]
struct RelayAttachment<'a> {
    name: &'a str,
    content_type: &'a str,
    /// Base64-encoded content
    data: String,
}

#[derive(Clone)]
pub struct RelayBackend {
    client: Client,
    base_url: Option<String>,
}

impl RelayBackend {
    /// `base_url` is the process-wide relay location; `None` makes every
    /// send fail without touching the network.
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    fn endpoint(base: &str) -> Result<Url, SendError> {
        Url::parse(&format!("{}/", base.trim_end_matches('/')))
            .and_then(|u| u.join(SEND_PATH))
            .map_err(|e| SendError::MissingConfig(format!("invalid POSTAL_API_URL: {e}")))
    }
}

#[async_trait]
impl Deliver for RelayBackend {
    async fn send(
        &self,
        campaign: &Campaign,
        message: &OutgoingMessage,
    ) -> Result<SentInfo, SendError> {
        let Some(base) = self.base_url.as_deref() else {
            error!("POSTAL_API_URL not set");
            return Err(SendError::MissingConfig("POSTAL_API_URL not set".to_string()));
        };

        let api_key = campaign
            .smtp_pass
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                error!(campaign_uid = %campaign.uid, "relay_api_key_missing");
                SendError::MissingConfig("Postal API key not set in campaign".to_string())
            })?;

        let endpoint = Self::endpoint(base)?;

        let envelope = RelayEnvelope {
            to: vec![message.to.as_str()],
            from: format!("{} <{}>", campaign.sender_name, campaign.sender_email),
            reply_to: campaign.reply_to.as_deref().filter(|r| !r.is_empty()),
            subject: &message.subject,
            plain_body: &message.body_plain,
            html_body: &message.body_html,
            attachments: message
                .attachments_for(campaign)
                .map(|a| RelayAttachment {
                    name: &a.filename,
                    content_type: &a.content_type,
                    data: STANDARD.encode(&a.bytes),
                })
                .collect(),
        };

        info!(
            recipient = %message.to,
            endpoint = %endpoint,
            attachments = envelope.attachments.len(),
            "relay_send_starting"
        );

        let result = self
            .client
            .post(endpoint)
            .header(API_KEY_HEADER, api_key)
            .json(&envelope)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(resp) => {
                info!(
                    recipient = %message.to,
                    status_code = resp.status().as_u16(),
                    "relay_send_complete"
                );
                Ok(SentInfo {
                    message: "Sent via Postal".to_string(),
                })
            }
            Err(e) => {
                error!(recipient = %message.to, error = %e, "relay_send_failed");
                Err(SendError::Relay(e.to_string()))
            }
        }
    }
}
