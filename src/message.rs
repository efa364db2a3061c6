//! Message composition for the mail and SMS channels.
//!
//! Mail messages pair a human-readable text part with a JSON attachment of
//! the data used to render it. SMS messages are a single short text part.

use serde::Serialize;
use thiserror::Error;

use crate::config::{MailConfig, SmsConfig};
use crate::result::{BatchSummary, CheckResult, Outcome};
use crate::template::{render, Fields, TemplateError};

/// Placeholder for an empty name list in SMS batches.
pub const NONE_PLACEHOLDER: &str = "(none)";

/// Error type for message composition.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// A template failed to render.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// The structured attachment could not be serialised.
    #[error("failed to serialize attachment: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One part of an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Human-readable plain text.
    Text(String),
    /// Machine-readable JSON attachment.
    Json {
        /// Attachment file name.
        filename: String,
        /// Attached value.
        value: serde_json::Value,
    },
}

/// An outgoing message, independent of transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Recipients.
    pub to: Vec<String>,
    /// Subject line, if any.
    pub subject: Option<String>,
    /// Parts in order.
    pub parts: Vec<Part>,
}

impl Message {
    /// Text parts in order.
    pub fn texts(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(text) => Some(text.as_str()),
                Part::Json { .. } => None,
            })
            .collect()
    }

    /// JSON attachments in order, as `(filename, value)`.
    pub fn attachments(&self) -> Vec<(&str, &serde_json::Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Json { filename, value } => Some((filename.as_str(), value)),
                Part::Text(_) => None,
            })
            .collect()
    }
}

/// Split a comma-separated address list, trimming each entry.
pub fn split_addresses(address: &str) -> Vec<String> {
    address
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_owned)
        .collect()
}

fn json_part<T: Serialize + ?Sized>(filename: &str, value: &T) -> Result<Part, ComposeError> {
    Ok(Part::Json {
        filename: format!("{filename}.json"),
        value: serde_json::to_value(value)?,
    })
}

/// JSON attachment for a single result, named after the check.
///
/// # Errors
///
/// Returns an error if serialisation fails.
pub fn result_attachment(result: &CheckResult) -> Result<Part, ComposeError> {
    json_part(&result.name, result)
}

/// JSON attachment for a whole batch, named `batch.json`.
///
/// # Errors
///
/// Returns an error if serialisation fails.
pub fn batch_attachment(results: &[CheckResult]) -> Result<Part, ComposeError> {
    json_part("batch", results)
}

fn mail_templates(config: &MailConfig, outcome: Outcome) -> (&str, &str) {
    match outcome {
        Outcome::Problem => (config.problem_subject.as_str(), config.problem_body.as_str()),
        Outcome::Recovery => (config.recovery_subject.as_str(), config.recovery_body.as_str()),
    }
}

/// Mail for a single result: rendered text plus a JSON attachment.
///
/// # Errors
///
/// Returns an error if a template references an unknown field.
pub fn compose_mail(
    address: &str,
    config: &MailConfig,
    result: &CheckResult,
) -> Result<Message, ComposeError> {
    let fields = result.fields();
    let (subject, body) = mail_templates(config, result.outcome);
    Ok(Message {
        to: split_addresses(address),
        subject: Some(render(subject, &fields)?),
        parts: vec![
            Part::Text(render(body, &fields)?),
            result_attachment(result)?,
        ],
    })
}

/// Fields available to batch templates on the mail channel.
pub fn mail_batch_fields(fqdn: &str, summary: &BatchSummary) -> Fields {
    let mut fields = count_fields(fqdn, summary);
    fields.insert("problems", summary.problems.len().to_string());
    fields.insert("recoveries", summary.recoveries.len().to_string());
    fields
}

/// Fields available to batch templates on the SMS channel.
pub fn sms_batch_fields(fqdn: &str, summary: &BatchSummary) -> Fields {
    let mut fields = count_fields(fqdn, summary);
    fields.insert("problems", join_or_none(&summary.problems));
    fields.insert("recoveries", join_or_none(&summary.recoveries));
    fields
}

fn count_fields(fqdn: &str, summary: &BatchSummary) -> Fields {
    let mut fields = Fields::new();
    fields.insert("fqdn", fqdn.to_owned());
    fields.insert("problem_count", summary.problems.len().to_string());
    fields.insert("recovery_count", summary.recoveries.len().to_string());
    fields
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        NONE_PLACEHOLDER.to_owned()
    } else {
        names.join(", ")
    }
}

/// One mail for a whole cycle.
///
/// The first part is the JSON attachment of every result; then one text
/// part per result, rendered with that result's own subject and body.
///
/// # Errors
///
/// Returns an error if a template references an unknown field.
pub fn compose_mail_batch(
    address: &str,
    config: &MailConfig,
    fqdn: &str,
    results: &[CheckResult],
) -> Result<Message, ComposeError> {
    let summary = BatchSummary::from_results(results);
    let mut parts = Vec::with_capacity(results.len().saturating_add(1));
    parts.push(batch_attachment(results)?);

    for result in results {
        let fields = result.fields();
        let (subject, body) = mail_templates(config, result.outcome);
        parts.push(Part::Text(format!(
            "{}\n\n{}\n\n",
            render(subject, &fields)?,
            render(body, &fields)?
        )));
    }

    Ok(Message {
        to: split_addresses(address),
        subject: Some(render(
            &config.batch_subject,
            &mail_batch_fields(fqdn, &summary),
        )?),
        parts,
    })
}

/// SMS for a single result: one plain-text part, no subject.
///
/// # Errors
///
/// Returns an error if a template references an unknown field.
pub fn compose_sms(
    address: &str,
    config: &SmsConfig,
    result: &CheckResult,
) -> Result<Message, ComposeError> {
    let body = match result.outcome {
        Outcome::Problem => &config.problem_body,
        Outcome::Recovery => &config.recovery_body,
    };
    Ok(Message {
        to: split_addresses(address),
        subject: None,
        parts: vec![Part::Text(render(body, &result.fields())?)],
    })
}

/// One SMS for a whole cycle, listing problem and recovery names.
///
/// # Errors
///
/// Returns an error if a template references an unknown field.
pub fn compose_sms_batch(
    address: &str,
    config: &SmsConfig,
    fqdn: &str,
    results: &[CheckResult],
) -> Result<Message, ComposeError> {
    let fields = sms_batch_fields(fqdn, &BatchSummary::from_results(results));
    let subject = config
        .batch_subject
        .as_deref()
        .map(|s| render(s, &fields))
        .transpose()?;
    Ok(Message {
        to: split_addresses(address),
        subject,
        parts: vec![Part::Text(render(&config.batch_body, &fields)?)],
    })
}

/// Render every configured template against sample data.
///
/// Catches unknown placeholders at startup instead of mid-cycle.
///
/// # Errors
///
/// Returns the first template that fails to render, with its name.
pub fn validate_templates(mail: &MailConfig, sms: &SmsConfig) -> Result<(), (String, TemplateError)> {
    let problem = CheckResult::problem("sample", "localhost", "sample", "sample", String::new());
    let recovery = CheckResult::recovery("sample", "localhost", String::new());
    let summary = BatchSummary::default();
    let mail_batch = mail_batch_fields("localhost", &summary);
    let sms_batch = sms_batch_fields("localhost", &summary);

    let mut templates: Vec<(&str, &str, Fields)> = vec![
        ("mail.problem_subject", mail.problem_subject.as_str(), problem.fields()),
        ("mail.problem_body", mail.problem_body.as_str(), problem.fields()),
        ("mail.recovery_subject", mail.recovery_subject.as_str(), recovery.fields()),
        ("mail.recovery_body", mail.recovery_body.as_str(), recovery.fields()),
        ("mail.batch_subject", mail.batch_subject.as_str(), mail_batch),
        ("sms.problem_body", sms.problem_body.as_str(), problem.fields()),
        ("sms.recovery_body", sms.recovery_body.as_str(), recovery.fields()),
        ("sms.batch_body", sms.batch_body.as_str(), sms_batch.clone()),
    ];
    if let Some(subject) = &sms.batch_subject {
        templates.push(("sms.batch_subject", subject.as_str(), sms_batch));
    }

    for (name, template, fields) in templates {
        render(template, &fields).map_err(|e| (name.to_owned(), e))?;
    }
    Ok(())
}
