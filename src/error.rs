use core::{fmt, time::Duration};

/// errors that originated from a malformed server reply
/// Does not track io errors or well-formed rejections (like failed authentication)
#[derive(Debug, thiserror::Error)]
pub enum MalformedError {
    // we error out on lines which aren't terminated with \r\n
    // because the RFC says that a client should not send bare CR or LF
    // https://datatracker.ietf.org/doc/html/rfc5321#section-2.3.8
    #[error("Invalid line termination")]
    InvalidLineTermination,
    #[error("Invalid encoding")]
    InvalidEncoding,
    #[error("No code")]
    NoCode,
    #[error("Invalid continuation marker {0:?}")]
    InvalidContinuation(char),
    #[error("code changed midway through a response. Was {old_code}, now {new_code}")]
    CodeChanged { old_code: u16, new_code: u16 },
    #[error("Reply exceeds {0} bytes")]
    ReplyTooLong(usize),
    #[error("Unexpected EOF reached")]
    UnexpectedEof,
}

/// any error that can occur while exchanging a single command
/// can be categorized into three categories:
/// - IO errors
/// - well-formed replies carrying a code we did not expect
/// - malformed replies
#[derive(Debug, thiserror::Error)]
pub enum Error<T: core::error::Error> {
    #[error("IO Error: {0}")]
    IoError(T),
    #[error("Recieved unexpected code {actual}, expected one of {expected:?}: {message}")]
    UnexpectedCode {
        expected: &'static [u16],
        actual: u16,
        message: String,
    },
    #[error(transparent)]
    MalformedError(#[from] MalformedError),
}

impl<T: core::error::Error> Error<T> {
    /// the reply code carried by a rejection, if this is one
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::UnexpectedCode { actual, .. } => Some(*actual),
            _ => None,
        }
    }
}

/// The step of the SMTP exchange during which a protocol error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Greeting,
    Ehlo,
    AuthLogin,
    AuthUser,
    AuthPass,
    MailFrom,
    RcptTo,
    Data,
    MessageSend,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Greeting => "greeting",
            Stage::Ehlo => "ehlo",
            Stage::AuthLogin => "auth-login",
            Stage::AuthUser => "auth-user",
            Stage::AuthPass => "auth-pass",
            Stage::MailFrom => "mail-from",
            Stage::RcptTo => "rcpt-to",
            Stage::Data => "data",
            Stage::MessageSend => "message-send",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The message every end user sees, whatever went wrong.
pub const PUBLIC_FAILURE_MESSAGE: &str = "Failed to send message. Please try again later.";

/// Classified outcome of a failed delivery.
///
/// The `Display` output is a diagnostic for server-side logs. It may name the
/// stage and quote the server's reply, so it must not be shown to end users;
/// use [`SmtpError::public_message`] for that.
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("protocol error during {stage}: {detail}")]
    ProtocolError { stage: Stage, detail: String },
    #[error("authentication rejected: {0}")]
    AuthFailed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl SmtpError {
    pub(crate) fn at<T: core::error::Error>(stage: Stage, err: Error<T>) -> Self {
        SmtpError::ProtocolError {
            stage,
            detail: err.to_string(),
        }
    }

    /// the stage of a protocol error
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SmtpError::ProtocolError { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether a fresh call may succeed. Rejected credentials will be
    /// rejected again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SmtpError::AuthFailed(_))
    }

    pub fn public_message(&self) -> &'static str {
        PUBLIC_FAILURE_MESSAGE
    }
}
