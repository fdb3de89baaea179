//! Email builder, adapted from `email::builder::Email` and extended with
//! attachment support the teacher's retrieved builder did not carry.

use crate::error::MailError;

/// A single file attached to an outgoing email.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) bytes: Vec<u8>,
}

/// A message to be sent, built up fluently then validated before send.
#[derive(Debug, Clone, Default)]
pub struct Email {
    to: Vec<String>,
    from: Option<String>,
    subject: Option<String>,
    text: Option<String>,
    attachments: Vec<Attachment>,
}

impl Email {
    /// Start building a new, empty email.
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    /// Add a recipient. May be called multiple times.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Set the envelope "From" address.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Set the subject line.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the plain-text body.
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    /// Attach a file, grounded on `lettre::message::Attachment`.
    #[must_use]
    pub fn attachment(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        });
        self
    }

    /// Validate the message is well-formed enough to send.
    pub fn validate(&self) -> Result<(), MailError> {
        if self.to.is_empty() {
            return Err(MailError::Permanent("email has no recipients".to_string()));
        }
        if self.from.is_none() {
            return Err(MailError::Permanent("email has no sender".to_string()));
        }
        if self.subject.is_none() {
            return Err(MailError::Permanent("email has no subject".to_string()));
        }
        if self.text.is_none() && self.attachments.is_empty() {
            return Err(MailError::Permanent("email has no content".to_string()));
        }
        Ok(())
    }

    pub(crate) fn recipients(&self) -> &[String] {
        &self.to
    }

    pub(crate) fn sender(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub(crate) fn subject_text(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub(crate) fn body_text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub(crate) fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_recipients_fails_validation() {
        let email = Email::builder().from("a@b.test").subject("s").text("t");
        assert!(matches!(
            email.validate(),
            Err(MailError::Permanent(_))
        ));
    }

    #[test]
    fn attachment_only_email_is_valid_without_text() {
        let email = Email::builder()
            .to("x@y.test")
            .from("a@b.test")
            .subject("s")
            .attachment("report.csv", "text/csv", b"a,b\n1,2\n".to_vec());
        assert!(email.validate().is_ok());
    }

    #[test]
    fn fully_populated_email_validates() {
        let email = Email::builder()
            .to("x@y.test")
            .from("a@b.test")
            .subject("s")
            .text("body");
        assert!(email.validate().is_ok());
    }
}
