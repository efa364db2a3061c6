//! Outgoing message transports.
//!
//! The engine only needs "send this message". [`SmtpTransport`] does that
//! over a STARTTLS relay; [`MemoryTransport`] records messages for dry runs
//! and tests.

use std::sync::Mutex;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor};
use thiserror::Error;
use tracing::debug;

use crate::message::{Message, Part};

/// Error type for message delivery.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A sender or recipient is not a valid mailbox.
    #[error("invalid address '{address}': {source}")]
    Address {
        /// The offending address.
        address: String,
        /// Parse failure.
        #[source]
        source: lettre::address::AddressError,
    },
    /// The message could not be assembled.
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    /// A MIME content type could not be parsed.
    #[error("invalid content type: {0}")]
    ContentType(String),
    /// An attachment could not be serialised.
    #[error("failed to serialize attachment: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The relay rejected or failed to deliver the message.
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    /// The message has no recipients or no parts.
    #[error("message is empty: {0}")]
    Empty(&'static str),
    /// The transport refused the message.
    #[error("transport rejected message: {0}")]
    Rejected(String),
}

/// Something that can deliver a [`Message`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message. Blocks the caller until the transport answers.
    async fn send(&self, message: &Message) -> Result<(), TransportError>;
}

/// SMTP relay transport with STARTTLS and login credentials.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// Build a transport for `server:port`, authenticating as `username`.
    ///
    /// No connection is made until the first send.
    ///
    /// # Errors
    ///
    /// Returns an error if `username` is not a valid mailbox or the relay
    /// cannot be configured.
    pub fn new(
        server: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<Self, TransportError> {
        let from = parse_mailbox(username)?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)?
            .port(port)
            .credentials(SmtpCredentials::new(
                username.to_owned(),
                password.to_owned(),
            ))
            .build();
        Ok(Self { mailer, from })
    }

    /// Convert a [`Message`] into a MIME email.
    ///
    /// A single text part becomes a plain-text body; anything else becomes
    /// `multipart/mixed` with JSON parts as attachments.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is invalid or the message is empty.
    pub fn build_email(&self, message: &Message) -> Result<Email, TransportError> {
        let first = message
            .to
            .first()
            .ok_or(TransportError::Empty("no recipients"))?;

        let mut builder = Email::builder()
            .from(self.from.clone())
            .reply_to(parse_mailbox(first)?);
        for address in &message.to {
            builder = builder.to(parse_mailbox(address)?);
        }
        if let Some(subject) = &message.subject {
            builder = builder.subject(subject.clone());
        }

        let email = match message.parts.as_slice() {
            [] => return Err(TransportError::Empty("no parts")),
            [Part::Text(text)] => builder.singlepart(SinglePart::plain(text.clone()))?,
            [first, rest @ ..] => {
                let mut multipart = MultiPart::mixed().singlepart(mime_part(first)?);
                for part in rest {
                    multipart = multipart.singlepart(mime_part(part)?);
                }
                builder.multipart(multipart)?
            }
        };
        Ok(email)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let email = self.build_email(message)?;
        self.mailer.send(email).await?;
        debug!(to = ?message.to, subject = ?message.subject, "message sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .trim()
        .parse()
        .map_err(|source| TransportError::Address {
            address: address.to_owned(),
            source,
        })
}

fn mime_part(part: &Part) -> Result<SinglePart, TransportError> {
    match part {
        Part::Text(text) => Ok(SinglePart::plain(text.clone())),
        Part::Json { filename, value } => {
            let content_type = ContentType::parse("application/json; charset=utf-8")
                .map_err(|e| TransportError::ContentType(e.to_string()))?;
            Ok(Attachment::new(filename.clone()).body(serde_json::to_string(value)?, content_type))
        }
    }
}

/// Records messages instead of sending them.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<Message>>,
    fail_with: Option<String>,
}

impl MemoryTransport {
    /// A transport that accepts and records every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that rejects every message with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Some(reason.into()),
        }
    }

    /// Messages accepted so far, in send order.
    pub fn messages(&self) -> Vec<Message> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if let Some(reason) = &self.fail_with {
            return Err(TransportError::Rejected(reason.clone()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(())
    }
}
