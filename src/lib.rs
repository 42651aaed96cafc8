//! Delivers contact-form submissions to an inbox over authenticated SMTPS.

mod error;
pub use error::*;

pub mod reader;
pub use reader::ReplyReader;

pub mod smtp;
pub use smtp::Smtp;

pub mod message;
pub use message::{EmailAddress, EnvelopeError, MailEnvelope, Message};

pub mod session;
pub use session::{Credentials, Password, Sent, SmtpMailClient};

pub mod config;
pub use config::{ConfigError, SmtpConfig};

pub mod contact;
pub use contact::{ContactError, ContactForm, RelayResponse};

pub mod integrations {
    pub mod tokio;
}

/// A byte stream to an SMTP server.
pub trait ReadWrite {
    type Error: core::error::Error;
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, Self::Error>>;
    fn write_single(&mut self, buf: &[u8]) -> impl Future<Output = Result<(), Self::Error>>;
    fn write_multi(&mut self, buf: &[&[u8]]) -> impl Future<Output = Result<(), Self::Error>> {
        async move {
            for b in buf {
                self.write_single(b).await?;
            }
            Ok(())
        }
    }
    /// Flushes and shuts the stream down. Streams that close on drop can keep
    /// the default.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> {
        async { Ok(()) }
    }
}
