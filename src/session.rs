//! One authenticated delivery, driven as an explicit state machine.
//!
//! ```text
//! AwaitGreeting -> Greeted -> EhloDone -> AwaitUser -> AwaitPass
//!   -> Authenticated -> MailFromOk -> RcptOk -> DataReady -> Sent -> Closed
//! ```
//!
//! Every state has exactly one successor. Any failure leaves the machine
//! through [`SmtpError`], and the stream is closed whichever way it exits.

use core::fmt;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};

use crate::{Error, MailEnvelope, ReadWrite, Smtp, SmtpError, Stage, smtp::EhloResponse};

/// Ceiling on a whole delivery, connect through QUIT.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// how long a polite shutdown may take once the outcome is known, within the deadline
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A secret that stays out of `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Password(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([censored])")
    }
}

impl From<String> for Password {
    fn from(password: String) -> Self {
        Password(password)
    }
}

impl From<&str> for Password {
    fn from(password: &str) -> Self {
        Password(password.to_owned())
    }
}

/// Where to connect and how to authenticate.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Password,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<Password>,
    ) -> Self {
        Credentials {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A message the server accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    response: String,
}

impl Sent {
    pub(crate) fn new(response: impl Into<String>) -> Self {
        Sent {
            response: response.into(),
        }
    }

    /// The server's reply to the end of DATA, usually carrying a queue id.
    pub fn response(&self) -> &str {
        &self.response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitGreeting,
    Greeted,
    EhloDone,
    AwaitUser,
    AwaitPass,
    Authenticated,
    MailFromOk,
    RcptOk,
    DataReady,
    Sent,
    Closed,
}

struct Session<'a, T: ReadWrite> {
    smtp: &'a mut Smtp<T>,
    envelope: &'a MailEnvelope,
    credentials: &'a Credentials,
    helo_domain: &'a str,
    accepted: Option<String>,
}

impl<'a, T: ReadWrite> Session<'a, T> {
    async fn run(&mut self) -> Result<(), SmtpError> {
        let mut state = State::AwaitGreeting;
        while state != State::Closed {
            state = self.step(state).await?;
        }
        Ok(())
    }

    async fn step(&mut self, state: State) -> Result<State, SmtpError> {
        #[cfg(feature = "log-04")]
        log::trace!("smtp state {state:?}");
        match state {
            State::AwaitGreeting => self.await_greeting().await,
            State::Greeted => self.greeted().await,
            State::EhloDone => self.ehlo_done().await,
            State::AwaitUser => self.await_user().await,
            State::AwaitPass => self.await_pass().await,
            State::Authenticated => self.authenticated().await,
            State::MailFromOk => self.mail_from_ok().await,
            State::RcptOk => self.rcpt_ok().await,
            State::DataReady => self.data_ready().await,
            State::Sent => self.sent().await,
            State::Closed => Ok(State::Closed),
        }
    }

    async fn await_greeting(&mut self) -> Result<State, SmtpError> {
        let _ready = self
            .smtp
            .ready()
            .await
            .map_err(|e| SmtpError::at(Stage::Greeting, e))?;
        #[cfg(feature = "log-04")]
        log::debug!("greeted by {}", _ready.hostname());
        Ok(State::Greeted)
    }

    async fn greeted(&mut self) -> Result<State, SmtpError> {
        let ehlo = self
            .smtp
            .ehlo(self.helo_domain)
            .await
            .map_err(|e| SmtpError::at(Stage::Ehlo, e))?;
        warn_without_auth_login(&ehlo);
        Ok(State::EhloDone)
    }

    async fn ehlo_done(&mut self) -> Result<State, SmtpError> {
        self.smtp
            .auth_login()
            .await
            .map_err(|e| SmtpError::at(Stage::AuthLogin, e))?;
        Ok(State::AwaitUser)
    }

    async fn await_user(&mut self) -> Result<State, SmtpError> {
        self.smtp
            .auth_login_username(&self.credentials.username)
            .await
            .map_err(|e| SmtpError::at(Stage::AuthUser, e))?;
        Ok(State::AwaitPass)
    }

    async fn await_pass(&mut self) -> Result<State, SmtpError> {
        match self
            .smtp
            .auth_login_password(self.credentials.password.expose())
            .await
        {
            Ok(_) => Ok(State::Authenticated),
            // any well-formed answer other than 235 means the credentials were refused
            Err(e @ Error::UnexpectedCode { .. }) => Err(SmtpError::AuthFailed(e.to_string())),
            Err(e) => Err(SmtpError::at(Stage::AuthPass, e)),
        }
    }

    async fn authenticated(&mut self) -> Result<State, SmtpError> {
        self.smtp
            .mail_from(self.envelope.sender())
            .await
            .map_err(|e| SmtpError::at(Stage::MailFrom, e))?;
        Ok(State::MailFromOk)
    }

    async fn mail_from_ok(&mut self) -> Result<State, SmtpError> {
        self.smtp
            .rcpt_to(self.envelope.recipient())
            .await
            .map_err(|e| SmtpError::at(Stage::RcptTo, e))?;
        Ok(State::RcptOk)
    }

    async fn rcpt_ok(&mut self) -> Result<State, SmtpError> {
        self.smtp
            .data()
            .await
            .map_err(|e| SmtpError::at(Stage::Data, e))?;
        Ok(State::DataReady)
    }

    async fn data_ready(&mut self) -> Result<State, SmtpError> {
        let message = self.envelope.message().to_string();
        let reply = self
            .smtp
            .send_data(message.as_bytes())
            .await
            .map_err(|e| SmtpError::at(Stage::MessageSend, e))?;
        self.accepted = Some(reply.text());
        Ok(State::Sent)
    }

    // the message is already accepted, a bad goodbye does not undo that
    async fn sent(&mut self) -> Result<State, SmtpError> {
        if let Err(_e) = self.smtp.quit().await {
            #[cfg(feature = "log-04")]
            log::warn!("QUIT after delivery failed: {_e}");
        }
        Ok(State::Closed)
    }
}

#[cfg(feature = "log-04")]
fn warn_without_auth_login(ehlo: &EhloResponse) {
    use crate::smtp::Extensions;
    if !ehlo.supports(Extensions::Auth("LOGIN")) {
        log::warn!("server does not advertise AUTH LOGIN, trying anyway");
    }
}

#[cfg(not(feature = "log-04"))]
fn warn_without_auth_login(_: &EhloResponse) {}

/// Delivers one message per call over a fresh connection.
#[derive(Debug, Clone)]
pub struct SmtpMailClient {
    helo_domain: Option<String>,
    timeout: Duration,
}

impl SmtpMailClient {
    pub fn new() -> Self {
        SmtpMailClient {
            helo_domain: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Ceiling on the whole call, connect through closing the socket. A
    /// shutdown that would run past it is abandoned and the socket dropped.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name announced in EHLO. Defaults to the sender's domain.
    #[must_use]
    pub fn with_helo_domain(mut self, domain: impl Into<String>) -> Self {
        self.helo_domain = Some(domain.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connects to `credentials.host:credentials.port` over implicit TLS and
    /// delivers `envelope`.
    #[cfg(feature = "rustls")]
    pub async fn send(
        &self,
        envelope: &MailEnvelope,
        credentials: &Credentials,
    ) -> Result<Sent, SmtpError> {
        use crate::integrations::tokio::connect_tls;

        let deadline = Instant::now() + self.timeout;
        let stream = match timeout_at(deadline, connect_tls(&credentials.host, credentials.port))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(SmtpError::ConnectFailed(e.to_string())),
            Err(_) => return Err(SmtpError::Timeout(self.timeout)),
        };
        self.deliver_until(stream, envelope, credentials, deadline)
            .await
    }

    /// Delivers `envelope` over an already open stream, which is closed
    /// before this returns.
    pub async fn deliver<T: ReadWrite>(
        &self,
        stream: T,
        envelope: &MailEnvelope,
        credentials: &Credentials,
    ) -> Result<Sent, SmtpError> {
        let deadline = Instant::now() + self.timeout;
        self.deliver_until(stream, envelope, credentials, deadline)
            .await
    }

    async fn deliver_until<T: ReadWrite>(
        &self,
        stream: T,
        envelope: &MailEnvelope,
        credentials: &Credentials,
        deadline: Instant,
    ) -> Result<Sent, SmtpError> {
        let mut smtp = Smtp::new(stream);
        let helo_domain = self
            .helo_domain
            .as_deref()
            .unwrap_or_else(|| envelope.sender_domain());
        let mut session = Session {
            smtp: &mut smtp,
            envelope,
            credentials,
            helo_domain,
            accepted: None,
        };
        let outcome = match timeout_at(deadline, session.run()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SmtpError::Timeout(self.timeout)),
        };
        let outcome = match (outcome, session.accepted.take()) {
            (Ok(()), accepted) => Ok(Sent::new(accepted.unwrap_or_default())),
            // once DATA is accepted the message is out, even if QUIT stalls
            (Err(_e), Some(response)) => {
                #[cfg(feature = "log-04")]
                log::warn!("message accepted but the session ended badly: {_e}");
                Ok(Sent::new(response))
            }
            (Err(e), None) => Err(e),
        };

        let close_by = deadline.min(Instant::now() + CLOSE_GRACE);
        match timeout_at(close_by, smtp.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(_e)) => {
                #[cfg(feature = "log-04")]
                log::debug!("closing the connection failed: {_e}");
            }
            Err(_) => {
                #[cfg(feature = "log-04")]
                log::debug!("closing the connection timed out");
            }
        }
        outcome
    }
}

impl Default for SmtpMailClient {
    fn default() -> Self {
        Self::new()
    }
}
