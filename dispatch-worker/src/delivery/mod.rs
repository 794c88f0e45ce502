//! Delivery backends.
//!
//! Two interchangeable senders share the [`Deliver`] contract:
//! - [`RelayBackend`]: one JSON POST to an HTTP relay API, no retry
//! - [`DirectBackend`]: SMTP to the campaign's host with retry on transient errors
//!
//! Every failure comes back as a [`SendError`]; nothing panics or escapes
//! to the dispatch loop as anything else.

pub mod direct;
pub mod relay;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::attachments::{Attachment, AttachmentKind};
use crate::models::{Campaign, DeliveryBackend};

pub use direct::{DirectBackend, LettreConnector, SmtpConnector, SmtpServer, TransportError};
pub use relay::RelayBackend;

/// A fully rendered message for one recipient.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body_plain: String,
    pub body_html: String,
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    /// Attachments this campaign actually sends: rendered documents only
    /// when it opted in, files always.
    pub fn attachments_for<'a>(
        &'a self,
        campaign: &'a Campaign,
    ) -> impl Iterator<Item = &'a Attachment> + 'a {
        self.attachments
            .iter()
            .filter(move |a| a.kind != AttachmentKind::Document || campaign.attach_pdf)
    }
}

/// Successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentInfo {
    /// Human-readable outcome stored in the send log
    pub message: String,
}

#[derive(Debug, Error)]
pub enum SendError {
    /// Backend or campaign lacks required settings
    #[error("{0}")]
    MissingConfig(String),

    #[error("Postal API error: {0}")]
    Relay(String),

    #[error("failed to build message: {0}")]
    Build(String),

    /// Last transport error after any retries
    #[error("{0}")]
    Transport(String),
}

/// Capability shared by all delivery backends.
#[async_trait]
pub trait Deliver: Send + Sync + 'static {
    async fn send(
        &self,
        campaign: &Campaign,
        message: &OutgoingMessage,
    ) -> Result<SentInfo, SendError>;
}

/// The configured backends, selected per campaign.
#[derive(Clone)]
pub struct Backends {
    pub relay: Arc<dyn Deliver>,
    pub direct: Arc<dyn Deliver>,
}

impl Backends {
    pub fn new(relay: Arc<dyn Deliver>, direct: Arc<dyn Deliver>) -> Self {
        Self { relay, direct }
    }

    pub fn for_campaign(&self, campaign: &Campaign) -> &dyn Deliver {
        match campaign.backend {
            DeliveryBackend::Relay => self.relay.as_ref(),
            DeliveryBackend::Direct => self.direct.as_ref(),
        }
    }
}
