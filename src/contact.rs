//! The contact form in front of the mail client.
//!
//! Validates a submission, turns it into a [`MailEnvelope`] addressed to the
//! relay's own inbox, and maps the delivery outcome onto a response that
//! never reveals why a delivery failed.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    EmailAddress, EnvelopeError, MailEnvelope, Sent, SmtpError,
    message::{escape_html, text_to_html},
};

pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_EMAIL_LENGTH: usize = 255;
pub const MAX_SUBJECT_LENGTH: usize = 200;
pub const MAX_MESSAGE_LENGTH: usize = 5000;

pub const SUCCESS_MESSAGE: &str = "Email sent successfully";

/// Why a submission was refused. The messages are meant for the submitter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactError {
    #[error("Invalid JSON in request body")]
    InvalidJson,
    #[error("All fields are required")]
    MissingFields,
    #[error("Name is too long (max 100 characters)")]
    NameTooLong,
    #[error("Email is too long")]
    EmailTooLong,
    #[error("Subject is too long (max 200 characters)")]
    SubjectTooLong,
    #[error("Message is too long (max 5000 characters)")]
    MessageTooLong,
    #[error("Invalid email format")]
    InvalidEmail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

fn too_long(value: &str, max: usize) -> bool {
    value.chars().count() > max
}

// the subject header and the name lose their control characters, the rest of the body keeps them
fn strip_controls(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

impl ContactForm {
    /// The submitter's name as it appears in the notification.
    pub fn display_name(&self) -> String {
        strip_controls(&self.name).trim().to_string()
    }

    pub fn from_json(body: &str) -> Result<Self, ContactError> {
        serde_json::from_str(body).map_err(|_| ContactError::InvalidJson)
    }

    pub fn validate(&self) -> Result<(), ContactError> {
        if [&self.name, &self.email, &self.subject, &self.message]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(ContactError::MissingFields);
        }
        if too_long(&self.name, MAX_NAME_LENGTH) {
            return Err(ContactError::NameTooLong);
        }
        if too_long(&self.email, MAX_EMAIL_LENGTH) {
            return Err(ContactError::EmailTooLong);
        }
        if too_long(&self.subject, MAX_SUBJECT_LENGTH) {
            return Err(ContactError::SubjectTooLong);
        }
        if too_long(&self.message, MAX_MESSAGE_LENGTH) {
            return Err(ContactError::MessageTooLong);
        }
        if !EmailAddress::is_valid(&self.email) {
            return Err(ContactError::InvalidEmail);
        }
        Ok(())
    }

    /// Plain-text notification body.
    pub fn text_body(&self) -> String {
        format!(
            "Name: {}\nEmail: {}\nSubject: {}\n\nMessage:\n{}",
            self.display_name(),
            self.email,
            self.subject,
            self.message
        )
        .trim()
        .to_string()
    }

    /// HTML notification body, every field escaped.
    pub fn html_body(&self) -> String {
        format!(
            "<h2>New Contact Form Submission</h2>\n\
             <p><strong>Name:</strong> {}</p>\n\
             <p><strong>Email:</strong> {}</p>\n\
             <p><strong>Subject:</strong> {}</p>\n\
             <p><strong>Message:</strong></p>\n\
             <p>{}</p>",
            escape_html(&self.display_name()),
            escape_html(&self.email),
            escape_html(&self.subject),
            text_to_html(&self.message)
        )
    }

    /// Builds the notification for `mailbox`, which both sends and receives it.
    /// Replies go to the submitter.
    pub fn to_envelope(&self, mailbox: &str) -> Result<MailEnvelope, EnvelopeError> {
        MailEnvelope::builder()
            .sender(mailbox)
            .recipient(mailbox)
            .reply_to(self.email.trim())
            .sender_name(self.name.as_str())
            .subject(format!("Contact Form: {}", strip_controls(&self.subject)))
            .text_body(self.text_body())
            .html_body(self.html_body())
            .build()
    }
}

/// What the caller hands back to the submitter: a status code and a JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl RelayResponse {
    pub fn ok() -> Self {
        RelayResponse {
            status: 200,
            body: json!({ "message": SUCCESS_MESSAGE }),
        }
    }

    pub fn bad_request(err: &ContactError) -> Self {
        RelayResponse {
            status: 400,
            body: json!({ "error": err.to_string() }),
        }
    }

    /// The only thing a submitter learns about a failed delivery.
    pub fn failure() -> Self {
        RelayResponse {
            status: 500,
            body: json!({ "error": crate::PUBLIC_FAILURE_MESSAGE }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

impl From<Result<Sent, SmtpError>> for RelayResponse {
    fn from(outcome: Result<Sent, SmtpError>) -> Self {
        match outcome {
            Ok(_) => RelayResponse::ok(),
            Err(_) => RelayResponse::failure(),
        }
    }
}

#[cfg(feature = "log-04")]
fn truncated(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Validates `form` and hands its envelope to `deliver`.
///
/// Failures are logged in full here; the returned response only ever carries
/// the generic failure message.
pub async fn relay_with<F, Fut>(form: &ContactForm, mailbox: &str, deliver: F) -> RelayResponse
where
    F: FnOnce(MailEnvelope) -> Fut,
    Fut: Future<Output = Result<Sent, SmtpError>>,
{
    #[cfg(feature = "log-04")]
    log::info!(
        "contact form submission from {:?} <{}>",
        truncated(&form.name, 20),
        truncated(&form.email, 30)
    );
    if let Err(e) = form.validate() {
        #[cfg(feature = "log-04")]
        log::warn!("rejected submission: {e}");
        return RelayResponse::bad_request(&e);
    }
    let envelope = match form.to_envelope(mailbox) {
        Ok(envelope) => envelope,
        Err(_e) => {
            #[cfg(feature = "log-04")]
            log::error!("could not build the notification: {_e}");
            return RelayResponse::failure();
        }
    };
    let outcome = deliver(envelope).await;
    match &outcome {
        Ok(_sent) => {
            #[cfg(feature = "log-04")]
            log::info!("email sent: {}", _sent.response());
        }
        Err(_e) => {
            #[cfg(feature = "log-04")]
            log::error!("error sending email: {_e}");
        }
    }
    outcome.into()
}

/// Validates `form` and delivers it through the configured server.
#[cfg(feature = "rustls")]
pub async fn relay(form: &ContactForm, config: &crate::SmtpConfig) -> RelayResponse {
    let client = config.client();
    relay_with(form, config.mailbox(), |envelope| async move {
        client.send(&envelope, &config.credentials).await
    })
    .await
}

/// [`relay`] for a raw request body.
#[cfg(feature = "rustls")]
pub async fn relay_json(body: &str, config: &crate::SmtpConfig) -> RelayResponse {
    match ContactForm::from_json(body) {
        Ok(form) => relay(&form, config).await,
        Err(e) => RelayResponse::bad_request(&e),
    }
}
