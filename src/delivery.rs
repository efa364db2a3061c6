//! Delivery of results over the mail and SMS channels.
//!
//! Each channel is enabled by an address and independently set to immediate
//! (one message per result) or batch (one message per cycle) mode. Failures
//! are logged and counted, never retried, and never touch problem markers.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::{MailConfig, SmsConfig};
use crate::message::{
    compose_mail, compose_mail_batch, compose_sms, compose_sms_batch, validate_templates,
    ComposeError, Message,
};
use crate::result::CheckResult;
use crate::template::TemplateError;
use crate::transport::Transport;

/// Which channel a message went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Primary mail channel.
    Mail,
    /// Secondary SMS channel.
    Sms,
}

/// Counts of delivery attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Messages accepted by the transport.
    pub sent: usize,
    /// Messages that failed to compose or send.
    pub failed: usize,
}

impl DeliveryReport {
    /// Add another report's counts to this one.
    pub fn merge(&mut self, other: Self) {
        self.sent = self.sent.saturating_add(other.sent);
        self.failed = self.failed.saturating_add(other.failed);
    }
}

/// Routes results to the configured channels.
pub struct Dispatcher {
    mail: MailConfig,
    sms: SmsConfig,
    host: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mail", &self.mail)
            .field("sms", &self.sms)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher after validating every template.
    ///
    /// # Errors
    ///
    /// Returns the name of the first template that references an unknown
    /// field, with the render error.
    pub fn new(
        mail: MailConfig,
        sms: SmsConfig,
        host: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, (String, TemplateError)> {
        validate_templates(&mail, &sms)?;
        Ok(Self {
            mail,
            sms,
            host: host.into(),
            transport,
        })
    }

    /// Send `result` on every enabled channel in immediate mode.
    pub async fn deliver_immediate(&self, result: &CheckResult) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if let Some(address) = self.mail.address.as_deref().filter(|_| !self.mail.batch) {
            let composed = compose_mail(address, &self.mail, result);
            report.merge(self.send(Channel::Mail, composed).await);
        }
        if let Some(address) = self.sms.address.as_deref().filter(|_| !self.sms.batch) {
            let composed = compose_sms(address, &self.sms, result);
            report.merge(self.send(Channel::Sms, composed).await);
        }

        report
    }

    /// Send the cycle's results on every enabled channel in batch mode.
    ///
    /// An empty batch is only sent on the mail channel, and only when the
    /// heartbeat policy is on.
    pub async fn deliver_batch(&self, results: &[CheckResult]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if let Some(address) = self.mail.address.as_deref().filter(|_| self.mail.batch) {
            if results.is_empty() && !self.mail.heartbeat {
                debug!("empty cycle, no mail batch");
            } else {
                let composed = compose_mail_batch(address, &self.mail, &self.host, results);
                report.merge(self.send(Channel::Mail, composed).await);
            }
        }
        if let Some(address) = self.sms.address.as_deref().filter(|_| self.sms.batch) {
            if results.is_empty() {
                debug!("empty cycle, no SMS batch");
            } else {
                let composed = compose_sms_batch(address, &self.sms, &self.host, results);
                report.merge(self.send(Channel::Sms, composed).await);
            }
        }

        report
    }

    async fn send(
        &self,
        channel: Channel,
        composed: Result<Message, ComposeError>,
    ) -> DeliveryReport {
        let message = match composed {
            Ok(message) => message,
            Err(e) => {
                error!(channel = ?channel, error = %e, "failed to compose message");
                return DeliveryReport { sent: 0, failed: 1 };
            }
        };

        match self.transport.send(&message).await {
            Ok(()) => {
                debug!(channel = ?channel, to = ?message.to, "delivered");
                DeliveryReport { sent: 1, failed: 0 }
            }
            Err(e) => {
                warn!(channel = ?channel, to = ?message.to, error = %e, "delivery failed");
                DeliveryReport { sent: 0, failed: 1 }
            }
        }
    }
}
