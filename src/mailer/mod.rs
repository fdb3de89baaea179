//! Delivers a job's result (or failure notice) by email (spec.md §4.4).

pub mod email;

use crate::config::AppConfig;
use crate::error::MailError;
use crate::table::Table;
use async_trait::async_trait;
use email::Email;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as LettreAttachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

/// Sends a built [`Email`] (spec.md §4.4).
///
/// A trait so the Executor's retry/backoff logic can be exercised against
/// a `mockall` fake, mirroring `#[cfg_attr(test, mockall::automock)]` on
/// the teacher's `EmailSender`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver `email`, following the retry policy spec.md §4.4 describes:
    /// up to 2 attempts total, with a 5 second pause between them, only
    /// for transient failures.
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// The production [`EmailSender`]: SMTP via `lettre`, with STARTTLS when
/// configured.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: String,
}

impl SmtpMailer {
    /// Build a mailer from validated application configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the SMTP transport cannot be constructed (bad
    /// host string, TLS setup failure).
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let host = config
            .smtp_host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("SMTP_HOST is required"))?;
        let from = config
            .smtp_from_email
            .clone()
            .ok_or_else(|| anyhow::anyhow!("SMTP_FROM_EMAIL is required"))?;

        let mut builder = if config.smtp_use_tls {
            SmtpTransport::starttls_relay(&host)?
        } else {
            SmtpTransport::builder_dangerous(&host)
        };
        builder = builder.port(config.smtp_port);

        if let (Some(user), Some(password)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(email: &Email) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(
                email
                    .sender()
                    .unwrap_or_default()
                    .parse()
                    .map_err(|err| MailError::Permanent(format!("invalid sender: {err}")))?,
            )
            .subject(email.subject_text().unwrap_or_default());

        for recipient in email.recipients() {
            builder = builder.to(recipient
                .parse()
                .map_err(|err| MailError::Permanent(format!("invalid recipient: {err}")))?);
        }

        let body_text = email.body_text().unwrap_or_default().to_string();

        let message = if email.attachments().is_empty() {
            builder
                .header(ContentType::TEXT_PLAIN)
                .body(body_text)
                .map_err(|err| MailError::Permanent(err.to_string()))?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(body_text),
            );

            for attachment in email.attachments() {
                let content_type = attachment
                    .content_type
                    .parse::<ContentType>()
                    .unwrap_or(ContentType::TEXT_PLAIN);
                multipart = multipart.singlepart(
                    LettreAttachment::new(attachment.filename.clone())
                        .body(attachment.bytes.clone(), content_type),
                );
            }

            builder
                .multipart(multipart)
                .map_err(|err| MailError::Permanent(err.to_string()))?
        };

        Ok(message)
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        email.validate()?;
        let message = Self::build_message(&email)?;

        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|err| MailError::Transient(err.to_string()))?
            .map_err(|err| {
                if err.is_permanent() {
                    MailError::Permanent(err.to_string())
                } else {
                    MailError::Transient(err.to_string())
                }
            })
    }
}

/// Serialize a table to CSV bytes: one header row, data rows, fields
/// quoted only when necessary (spec.md §6).
///
/// # Errors
///
/// Returns an error if the CSV writer fails (never expected for
/// in-memory buffers, but the writer's own `Result` is propagated rather
/// than unwrapped).
pub fn table_to_csv(table: &Table) -> Result<Vec<u8>, MailError> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());

    writer
        .write_record(&table.columns)
        .map_err(|err| MailError::Permanent(err.to_string()))?;

    for row in &table.rows {
        let fields: Vec<String> = row.iter().map(crate::table::Cell::to_csv_field).collect();
        writer
            .write_record(&fields)
            .map_err(|err| MailError::Permanent(err.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|err| MailError::Permanent(err.to_string()))
}

/// Retry policy wrapper: attempt `send` up to `max_attempts` times with a
/// fixed pause between attempts, stopping early on a permanent error
/// (spec.md §4.4: "up to 2 attempts total").
pub async fn send_with_retry(
    sender: &dyn EmailSender,
    email: Email,
    max_attempts: u32,
    pause: Duration,
) -> Result<(), MailError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match sender.send(email.clone_for_retry()).await {
            Ok(()) => return Ok(()),
            Err(MailError::Permanent(msg)) => return Err(MailError::Permanent(msg)),
            Err(transient) if attempt >= max_attempts => return Err(transient),
            Err(transient) => {
                tracing::warn!(attempt, error = %transient, "retrying email delivery");
                tokio::time::sleep(pause).await;
            }
        }
    }
}

impl Email {
    fn clone_for_retry(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        /// CSV round-trip preserves header names and cell values verbatim
        /// for string/int/bool cells (spec.md §8, property 5).
        #[test]
        fn csv_round_trip_preserves_header_and_values(
            amount in -1000i64..1000,
            label in "[a-zA-Z]{1,8}",
            flag in any::<bool>(),
        ) {
            let table = Table {
                columns: vec!["amount".to_string(), "label".to_string(), "flag".to_string()],
                rows: vec![vec![Cell::Int(amount), Cell::Text(label.clone()), Cell::Bool(flag)]],
            };

            let csv_bytes = table_to_csv(&table).unwrap();
            let mut reader = csv::Reader::from_reader(csv_bytes.as_slice());
            let headers: Vec<String> = reader
                .headers()
                .unwrap()
                .iter()
                .map(str::to_string)
                .collect();
            prop_assert_eq!(&headers, &table.columns);

            let record = reader.records().next().unwrap().unwrap();
            prop_assert_eq!(&record[0], amount.to_string().as_str());
            prop_assert_eq!(&record[1], label.as_str());
            prop_assert_eq!(&record[2], flag.to_string().as_str());
        }
    }

    #[test]
    fn table_to_csv_quotes_only_when_necessary() {
        let table = Table::from_json(&json!([{"a": "plain", "b": "has,comma"}])).unwrap();
        let csv_bytes = table_to_csv(&table).unwrap();
        let csv_text = String::from_utf8(csv_bytes).unwrap();
        assert!(csv_text.contains("plain"));
        assert!(csv_text.contains("\"has,comma\""));
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_error() {
        let mut mock = MockEmailSender::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Box::pin(async { Err(MailError::Permanent("bad address".to_string())) }));

        let email = Email::builder()
            .to("x@y.test")
            .from("a@b.test")
            .subject("s")
            .text("t");
        let result = send_with_retry(&mock, email, 2, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(MailError::Permanent(_))));
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_failure() {
        let mut mock = MockEmailSender::new();
        let mut call = 0;
        mock.expect_send().times(2).returning(move |_| {
            call += 1;
            if call == 1 {
                Box::pin(async { Err(MailError::Transient("timeout".to_string())) })
            } else {
                Box::pin(async { Ok(()) })
            }
        });

        let email = Email::builder()
            .to("x@y.test")
            .from("a@b.test")
            .subject("s")
            .text("t");
        let result = send_with_retry(&mock, email, 2, Duration::from_millis(1)).await;
        assert!(result.is_ok());
    }
}
