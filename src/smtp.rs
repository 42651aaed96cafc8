use core::{fmt::Display, ops::Deref};

use base64::prelude::*;

use super::Error;
use crate::{ReadWrite, reader::ReplyReader};

#[derive(Debug, Clone, Copy)]
pub struct ReplyLine<'a> {
    code: u16,
    is_last: bool,
    message: &'a str,
}

impl<'a> ReplyLine<'a> {
    pub(crate) fn new(code: u16, is_last: bool, message: &'a str) -> Self {
        ReplyLine {
            code,
            is_last,
            message,
        }
    }
    pub fn code(&self) -> u16 {
        self.code
    }
    pub fn is_last(&self) -> bool {
        self.is_last
    }
    pub fn message(&self) -> &'a str {
        self.message
    }
}

impl Display for ReplyLine<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.code,
            if self.is_last { ' ' } else { '-' },
            self.message
        )
    }
}

/// A complete server reply: one code and every line of text that came with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub(crate) fn new(code: u16, lines: Vec<String>) -> Self {
        Reply { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn replies(&self) -> impl Iterator<Item = ReplyLine<'_>> {
        let last = self.lines.len().saturating_sub(1);
        self.lines
            .iter()
            .enumerate()
            .map(move |(idx, line)| ReplyLine::new(self.code, idx == last, line))
    }

    pub fn current_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }

    /// all lines joined by a single space
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

fn expect_code<E: core::error::Error>(
    reply: Reply,
    expected: &'static [u16],
) -> Result<Reply, Error<E>> {
    if expected.contains(&reply.code) {
        Ok(reply)
    } else {
        Err(Error::UnexpectedCode {
            expected,
            actual: reply.code,
            message: reply.text(),
        })
    }
}

/// Prepares a message for the DATA phase.
///
/// Line endings become CRLF, lines starting with '.' get an extra '.'
/// (RFC 5321 §4.5.2), and the terminating `.` line is appended.
pub fn encode_data(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 5);
    let mut line_start = true;
    let mut iter = data.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        match byte {
            b'\r' => {
                iter.next_if_eq(&b'\n');
                out.extend_from_slice(b"\r\n");
                line_start = true;
            }
            b'\n' => {
                out.extend_from_slice(b"\r\n");
                line_start = true;
            }
            _ => {
                if line_start && byte == b'.' {
                    out.push(b'.');
                }
                out.push(byte);
                line_start = false;
            }
        }
    }
    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

pub struct Smtp<T: ReadWrite> {
    // the underlying stream, e.g. TcpStream or TlsStream
    stream: T,
    // frames the replies coming back from the server
    reader: ReplyReader,
    closed: bool,
}

impl<T: ReadWrite> Smtp<T> {
    pub fn new(stream: T) -> Self {
        Smtp {
            stream,
            reader: ReplyReader::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn read_reply(&mut self) -> Result<Reply, Error<T::Error>> {
        self.reader.read_reply(&mut self.stream).await
    }

    async fn command(
        &mut self,
        parts: &[&[u8]],
        expected: &'static [u16],
    ) -> Result<Reply, Error<T::Error>> {
        self.stream
            .write_multi(parts)
            .await
            .map_err(Error::IoError)?;
        let reply = self.read_reply().await?;
        expect_code(reply, expected)
    }

    pub async fn ready(&mut self) -> Result<Ready, Error<T::Error>> {
        // wait for the server to be ready
        let reply = self.read_reply().await?;
        // 220 or 554 are expected
        Ok(Ready::new(expect_code(reply, &[220])?))
    }

    pub async fn ehlo(&mut self, domain: &str) -> Result<EhloResponse, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>EHLO {}", domain);
        // or 504, 550, 502
        let reply = self
            .command(&[b"EHLO ", domain.as_bytes(), b"\r\n"], &[250])
            .await?;
        Ok(EhloResponse::new(reply))
    }

    pub async fn auth_login(&mut self) -> Result<Reply, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>AUTH LOGIN");
        self.command(&[b"AUTH LOGIN\r\n"], &[334]).await
    }

    pub async fn auth_login_username(&mut self, username: &str) -> Result<Reply, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>[username]");
        let payload = BASE64_STANDARD.encode(username);
        self.command(&[payload.as_bytes(), b"\r\n"], &[334]).await
    }

    pub async fn auth_login_password(&mut self, password: &str) -> Result<Reply, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>[censored]");
        let payload = BASE64_STANDARD.encode(password);
        // 235, or 535 for bad credentials
        self.command(&[payload.as_bytes(), b"\r\n"], &[235]).await
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<Reply, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>MAIL FROM:<{}>", from);
        self.command(&[b"MAIL FROM:<", from.as_bytes(), b">\r\n"], &[250])
            .await
    }

    pub async fn rcpt_to(&mut self, recipient: &str) -> Result<Reply, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>RCPT TO:<{}>", recipient);
        // 251 is a forward, still accepted
        self.command(&[b"RCPT TO:<", recipient.as_bytes(), b">\r\n"], &[250, 251])
            .await
    }

    pub async fn data(&mut self) -> Result<Reply, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>DATA");
        self.command(&[b"DATA\r\n"], &[354]).await
    }

    /// sends the message body, dot-stuffed and terminated, and waits for acceptance
    pub async fn send_data(&mut self, data: &[u8]) -> Result<Reply, Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>[{} bytes of data]<CR><LF>.<CR><LF>", data.len());
        let encoded = encode_data(data);
        self.command(&[encoded.as_slice()], &[250]).await
    }

    pub async fn quit(&mut self) -> Result<Reply, Error<T::Error>> {
        self.fast_quit().await?;
        let reply = self.read_reply().await?;
        // 221 or 554 are expected
        expect_code(reply, &[221])
    }

    pub async fn fast_quit(&mut self) -> Result<(), Error<T::Error>> {
        #[cfg(feature = "log-04")]
        log::debug!("c>QUIT");
        self.stream
            .write_single(b"QUIT\r\n")
            .await
            .map_err(Error::IoError)?;
        Ok(())
    }

    /// Shuts the stream down. Calling this again is a no-op.
    pub async fn close(&mut self) -> Result<(), T::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        #[cfg(feature = "log-04")]
        log::debug!("c>[close]");
        self.stream.close().await
    }
}

pub struct Ready {
    hostname: String,
    reply: Reply,
}

impl Ready {
    pub fn new(reply: Reply) -> Self {
        let first_line = reply.current_line();
        let hostname = first_line
            .split_once(' ')
            .map_or(first_line, |(hostname, _)| hostname)
            .to_owned();
        Ready { hostname, reply }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl Deref for Ready {
    type Target = Reply;
    fn deref(&self) -> &Self::Target {
        &self.reply
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extensions<'a> {
    /// AUTH extension with supported mechanisms (e.g., "PLAIN LOGIN")
    Auth(&'a str),
    Other(&'a str, &'a str),
}

impl Display for Extensions<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Extensions::Auth(mechanisms) => {
                if mechanisms.is_empty() {
                    write!(f, "AUTH")
                } else {
                    write!(f, "AUTH {mechanisms}")
                }
            }
            Extensions::Other(s, arg) => {
                if arg.is_empty() {
                    write!(f, "{s}")
                } else {
                    write!(f, "{s} {arg}")
                }
            }
        }
    }
}

impl Extensions<'_> {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Extensions<'_> {
        let (keyword, args) = s.split_once(' ').unwrap_or((s, ""));

        if keyword.eq_ignore_ascii_case("AUTH") {
            // RFC 4954 Section 3: space-separated list of SASL mechanisms
            #[cfg(feature = "log-04")]
            if args.is_empty() {
                log::warn!("AUTH extension with no mechanisms advertised");
            }
            Extensions::Auth(args)
        } else {
            Extensions::Other(keyword, args)
        }
    }
}

pub struct EhloResponse {
    reply: Reply,
}

impl Deref for EhloResponse {
    type Target = Reply;
    fn deref(&self) -> &Self::Target {
        &self.reply
    }
}

impl EhloResponse {
    pub fn new(reply: Reply) -> Self {
        EhloResponse { reply }
    }

    /// Check if the server supports an extension.
    ///
    /// For `Auth`, you can pass:
    /// - `Auth("")` to check if AUTH is supported at all
    /// - `Auth("LOGIN")` to check if a specific mechanism is supported
    pub fn supports(&self, ext: Extensions) -> bool {
        self.extensions().any(|e| match (&e, &ext) {
            (Extensions::Auth(server_mechs), Extensions::Auth(wanted)) => {
                wanted.is_empty()
                    || server_mechs
                        .split_whitespace()
                        .any(|m| m.eq_ignore_ascii_case(wanted))
            }
            _ => e == ext,
        })
    }

    pub fn extensions(&self) -> impl Iterator<Item = Extensions<'_>> {
        // the first line is the server's greeting, not an extension
        self.reply.lines().skip(1).map(Extensions::from_str)
    }
}
