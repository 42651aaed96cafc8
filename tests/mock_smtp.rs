//! Delivery tests against a scripted SMTP server.
//!
//! Server replies are queued upfront and every client write is captured, so
//! the whole conversation can be checked without a network.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use contact_smtp::{
    Credentials, Error, MailEnvelope, MalformedError, ReadWrite, Smtp, SmtpError, SmtpMailClient,
    Stage, integrations::tokio::TokioIo,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

// ══════════════════════════════════════════════════════════════════════════════
// Mock Error Type
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct MockError(String);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MockError: {}", self.0)
    }
}

impl std::error::Error for MockError {}

// ══════════════════════════════════════════════════════════════════════════════
// MockStream
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Inner {
    /// each entry is handed out by one read() call
    responses: VecDeque<Vec<u8>>,
    /// one entry per write, multi-part writes are joined
    writes: Vec<Vec<u8>>,
    /// once the responses run out, reads never complete instead of hitting EOF
    hang: bool,
    fail_writes: bool,
    /// close() is counted but never completes
    hang_on_close: bool,
    closes: usize,
}

/// A scripted server. Clones share state, so a test can keep one and hand the
/// other to the client.
#[derive(Clone, Default)]
pub struct MockStream(Arc<Mutex<Inner>>);

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.0.lock().unwrap()
    }

    /// Queue a single-line reply (adds \r\n automatically).
    pub fn queue_line(&self, line: &str) -> &Self {
        self.queue_raw(format!("{line}\r\n"))
    }

    /// Queue a multi-line reply, continuation lines marked with '-'.
    pub fn queue_multiline(&self, code: u16, lines: &[&str]) -> &Self {
        let mut response = String::new();
        for (i, line) in lines.iter().enumerate() {
            let separator = if i == lines.len() - 1 { ' ' } else { '-' };
            response.push_str(&format!("{code}{separator}{line}\r\n"));
        }
        self.queue_raw(response)
    }

    /// Queue raw bytes, returned as-is by one read.
    pub fn queue_raw(&self, data: impl Into<Vec<u8>>) -> &Self {
        self.inner().responses.push_back(data.into());
        self
    }

    pub fn hang_when_drained(&self) -> &Self {
        self.inner().hang = true;
        self
    }

    pub fn hang_on_close(&self) -> &Self {
        self.inner().hang_on_close = true;
        self
    }

    pub fn fail_writes(&self) -> &Self {
        self.inner().fail_writes = true;
        self
    }

    pub fn writes(&self) -> Vec<String> {
        self.inner()
            .writes
            .iter()
            .map(|w| String::from_utf8(w.clone()).expect("client wrote utf-8"))
            .collect()
    }

    /// The command lines the client sent, message data excluded.
    pub fn commands(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|w| !w.ends_with("\r\n.\r\n"))
            .collect()
    }

    pub fn data(&self) -> String {
        self.writes()
            .into_iter()
            .find(|w| w.ends_with("\r\n.\r\n"))
            .expect("no message data was sent")
    }

    pub fn closes(&self) -> usize {
        self.inner().closes
    }
}

impl ReadWrite for MockStream {
    type Error = MockError;

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let hang = {
            let mut inner = self.inner();
            if let Some(data) = inner.responses.pop_front() {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                if len < data.len() {
                    inner.responses.push_front(data[len..].to_vec());
                }
                return Ok(len);
            }
            inner.hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        // nothing left to say: EOF
        Ok(0)
    }

    async fn write_single(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        let mut inner = self.inner();
        if inner.fail_writes {
            return Err(MockError("broken pipe".into()));
        }
        inner.writes.push(buf.to_vec());
        Ok(())
    }

    async fn write_multi(&mut self, buf: &[&[u8]]) -> Result<(), Self::Error> {
        self.write_single(&buf.concat()).await
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        let hang = {
            let mut inner = self.inner();
            inner.closes += 1;
            inner.hang_on_close
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

const USER_B64: &str = "Y29udGFjdEBleGFtcGxlLm9yZw==";
const PASS_B64: &str = "aHVudGVyMg==";

fn credentials() -> Credentials {
    Credentials::new("smtp.example.org", 465, "contact@example.org", "hunter2")
}

fn envelope() -> MailEnvelope {
    MailEnvelope::builder()
        .sender("contact@example.org")
        .recipient("contact@example.org")
        .reply_to("visitor@example.com")
        .sender_name("Visitor")
        .subject("Contact Form: Hello")
        .text_body("Hi there")
        .build()
        .unwrap()
}

/// The replies of a successful delivery, in order, one per step.
fn happy_replies() -> Vec<Vec<&'static str>> {
    vec![
        vec!["220 smtp.example.org ESMTP ready"],
        vec!["250-smtp.example.org", "250-SIZE 10485760", "250 AUTH LOGIN PLAIN"],
        vec!["334 VXNlcm5hbWU6"],
        vec!["334 UGFzc3dvcmQ6"],
        vec!["235 Authentication successful"],
        vec!["250 OK"],
        vec!["250 OK"],
        vec!["354 End data with <CR><LF>.<CR><LF>"],
        vec!["250 OK queued as 12345"],
        vec!["221 Bye"],
    ]
}

fn queue(mock: &MockStream, replies: &[Vec<&str>]) {
    for reply in replies {
        let raw: String = reply.iter().map(|l| format!("{l}\r\n")).collect();
        mock.queue_raw(raw);
    }
}

fn happy_mock() -> MockStream {
    let mock = MockStream::new();
    queue(&mock, &happy_replies());
    mock
}

async fn deliver(mock: &MockStream) -> Result<contact_smtp::Sent, SmtpError> {
    SmtpMailClient::new()
        .deliver(mock.clone(), &envelope(), &credentials())
        .await
}

// ══════════════════════════════════════════════════════════════════════════════
// Tests: Delivery
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_happy_path() {
    let mock = happy_mock();
    let sent = deliver(&mock).await.expect("delivery should succeed");
    assert_eq!(sent.response(), "OK queued as 12345");

    assert_eq!(
        mock.commands(),
        vec![
            "EHLO example.org\r\n".to_string(),
            "AUTH LOGIN\r\n".to_string(),
            format!("{USER_B64}\r\n"),
            format!("{PASS_B64}\r\n"),
            "MAIL FROM:<contact@example.org>\r\n".to_string(),
            "RCPT TO:<contact@example.org>\r\n".to_string(),
            "DATA\r\n".to_string(),
            "QUIT\r\n".to_string(),
        ]
    );
    // data goes out between DATA and QUIT
    let writes = mock.writes();
    assert!(writes[7].ends_with("\r\n.\r\n"));
    assert_eq!(mock.closes(), 1);
}

#[tokio::test]
async fn test_message_on_the_wire() {
    let mock = happy_mock();
    deliver(&mock).await.unwrap();
    let data = mock.data();

    assert!(data.contains("From: \"Visitor\" <contact@example.org>\r\n"));
    assert!(data.contains("To: contact@example.org\r\n"));
    assert!(data.contains("Reply-To: visitor@example.com\r\n"));
    assert!(data.contains("Subject: Contact Form: Hello\r\n"));
    assert!(data.contains("MIME-Version: 1.0\r\n"));
    assert!(data.contains("Content-Type: multipart/alternative; boundary="));
    assert!(data.contains("Content-Type: text/plain; charset=\"UTF-8\""));
    assert!(data.contains("Content-Type: text/html; charset=\"UTF-8\""));
    assert!(data.starts_with("Date: "));
}

#[tokio::test]
async fn test_helo_domain_override() {
    let mock = happy_mock();
    SmtpMailClient::new()
        .with_helo_domain("relay.example.net")
        .deliver(mock.clone(), &envelope(), &credentials())
        .await
        .unwrap();
    assert_eq!(mock.commands()[0], "EHLO relay.example.net\r\n");
}

#[tokio::test]
async fn test_dot_stuffing_and_line_endings() {
    let mock = happy_mock();
    let env = MailEnvelope::builder()
        .sender("contact@example.org")
        .recipient("contact@example.org")
        .text_body("first\n.hidden\n.\n..two\r\nlast")
        .build()
        .unwrap();
    SmtpMailClient::new()
        .deliver(mock.clone(), &env, &credentials())
        .await
        .unwrap();

    let data = mock.data();
    assert!(data.contains("\r\nfirst\r\n..hidden\r\n..\r\n...two\r\nlast\r\n"));
    // the only lone dot is the terminator
    assert_eq!(data.matches("\r\n.\r\n").count(), 1);
    assert!(data.ends_with("\r\n.\r\n"));
    for (i, _) in data.match_indices('\n') {
        assert_eq!(&data[i - 1..i], "\r", "bare LF at byte {i}");
    }
}

#[tokio::test]
async fn test_header_injection_is_neutralised_on_the_wire() {
    let mock = happy_mock();
    let env = MailEnvelope::builder()
        .sender("contact@example.org")
        .recipient("contact@example.org")
        .sender_name("Mallory\"\r\nBcc: everyone@example.com\r\n")
        .text_body("hi")
        .build()
        .unwrap();
    SmtpMailClient::new()
        .deliver(mock.clone(), &env, &credentials())
        .await
        .unwrap();

    let data = mock.data();
    assert!(data.contains("From: \"Mallory\\\"Bcc: everyone@example.com\" <contact@example.org>\r\n"));
    assert!(!data.contains("\r\nBcc:"));
    // no extra recipients were introduced
    let rcpts = mock
        .commands()
        .iter()
        .filter(|c| c.starts_with("RCPT TO"))
        .count();
    assert_eq!(rcpts, 1);
}

#[tokio::test]
async fn test_replies_split_across_reads() {
    let mock = MockStream::new();
    for reply in happy_replies() {
        let raw: String = reply.iter().map(|l| format!("{l}\r\n")).collect();
        // a few bytes per read, splitting codes and line endings
        for chunk in raw.as_bytes().chunks(3) {
            mock.queue_raw(chunk);
        }
    }
    let sent = deliver(&mock).await.expect("delivery should succeed");
    assert_eq!(sent.response(), "OK queued as 12345");
}

#[tokio::test]
async fn test_quit_failure_after_acceptance_still_counts() {
    let mock = MockStream::new();
    let replies = happy_replies();
    // no reply to QUIT, the server just hangs up
    queue(&mock, &replies[..replies.len() - 1]);

    let sent = deliver(&mock).await.expect("accepted message is sent");
    assert_eq!(sent.response(), "OK queued as 12345");
    assert_eq!(mock.closes(), 1);
}

#[tokio::test]
async fn test_quit_stall_after_acceptance_still_counts() {
    let mock = MockStream::new();
    let replies = happy_replies();
    queue(&mock, &replies[..replies.len() - 1]);
    mock.hang_when_drained();

    let sent = SmtpMailClient::new()
        .with_timeout(Duration::from_millis(200))
        .deliver(mock.clone(), &envelope(), &credentials())
        .await
        .expect("accepted message is sent");
    assert_eq!(sent.response(), "OK queued as 12345");
}

// ══════════════════════════════════════════════════════════════════════════════
// Tests: Failures
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_rejection_at_every_stage() {
    let cases = [
        (0, "554 No service", Stage::Greeting),
        (1, "502 Command not implemented", Stage::Ehlo),
        (2, "504 Unrecognized authentication type", Stage::AuthLogin),
        (3, "501 Cannot decode", Stage::AuthUser),
        (5, "550 Sender rejected", Stage::MailFrom),
        (6, "550 User unknown", Stage::RcptTo),
        (7, "554 Transaction failed", Stage::Data),
        (8, "552 Message too large", Stage::MessageSend),
    ];
    for (step, rejection, stage) in cases {
        let mock = MockStream::new();
        queue(&mock, &happy_replies()[..step]);
        mock.queue_line(rejection);

        let err = deliver(&mock).await.unwrap_err();
        assert_eq!(err.stage(), Some(stage), "{rejection}: {err}");
        assert!(err.to_string().contains(&rejection[..3]), "{err}");
        assert!(err.is_retryable());
        assert_eq!(mock.closes(), 1, "socket left open after {stage}");
        // nothing is sent after a rejection, not even QUIT
        assert_eq!(mock.writes().len(), step);
    }
}

#[tokio::test]
async fn test_auth_rejected() {
    let mock = MockStream::new();
    queue(&mock, &happy_replies()[..4]);
    mock.queue_line("535 5.7.8 Authentication failed");

    let err = deliver(&mock).await.unwrap_err();
    assert!(matches!(err, SmtpError::AuthFailed(_)), "{err:?}");
    assert!(!err.is_retryable());
    assert_eq!(err.stage(), None);
    assert!(!mock.commands().iter().any(|c| c.starts_with("MAIL FROM")));
    assert_eq!(mock.closes(), 1);

    let shown = format!("{err} {err:?}");
    assert!(!shown.contains("hunter2"));
    assert!(!shown.contains(PASS_B64));
    assert_eq!(err.public_message(), contact_smtp::PUBLIC_FAILURE_MESSAGE);
}

#[tokio::test]
async fn test_unexpected_eof() {
    let mock = MockStream::new();
    queue(&mock, &happy_replies()[..5]);
    // the server disappears before answering MAIL FROM

    let err = deliver(&mock).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::MailFrom));
    assert_eq!(mock.closes(), 1);
}

#[tokio::test]
async fn test_eof_during_password_is_not_an_auth_failure() {
    let mock = MockStream::new();
    queue(&mock, &happy_replies()[..4]);

    let err = deliver(&mock).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::AuthPass));
}

#[tokio::test]
async fn test_malformed_reply() {
    let mock = MockStream::new();
    mock.queue_raw("220 ready\n");

    let err = deliver(&mock).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Greeting));
    assert_eq!(mock.closes(), 1);
}

#[tokio::test]
async fn test_write_failure() {
    let mock = happy_mock();
    mock.fail_writes();

    let err = deliver(&mock).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Ehlo));
    assert!(err.to_string().contains("broken pipe"));
}

#[tokio::test]
async fn test_timeout() {
    let mock = MockStream::new();
    queue(&mock, &happy_replies()[..1]);
    mock.hang_when_drained();

    let started = tokio::time::Instant::now();
    let err = SmtpMailClient::new()
        .with_timeout(Duration::from_millis(100))
        .deliver(mock.clone(), &envelope(), &credentials())
        .await
        .unwrap_err();
    assert!(matches!(err, SmtpError::Timeout(d) if d == Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(mock.closes(), 1);
}

#[tokio::test]
async fn test_stalled_close_stays_within_timeout() {
    let mock = MockStream::new();
    queue(&mock, &happy_replies()[..1]);
    mock.hang_when_drained().hang_on_close();

    let started = tokio::time::Instant::now();
    let err = SmtpMailClient::new()
        .with_timeout(Duration::from_millis(100))
        .deliver(mock.clone(), &envelope(), &credentials())
        .await
        .unwrap_err();
    assert!(matches!(err, SmtpError::Timeout(_)));
    // the shutdown was attempted but not waited on past the deadline
    assert_eq!(mock.closes(), 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

// ══════════════════════════════════════════════════════════════════════════════
// Tests: Connecting
// ══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "rustls")]
#[tokio::test]
async fn test_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let creds = Credentials::new("127.0.0.1", port, "contact@example.org", "hunter2");
    let err = SmtpMailClient::new()
        .with_timeout(Duration::from_secs(5))
        .send(&envelope(), &creds)
        .await
        .unwrap_err();
    assert!(matches!(err, SmtpError::ConnectFailed(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(!err.to_string().contains("hunter2"));
}

#[cfg(feature = "rustls")]
#[tokio::test]
async fn test_silent_server_times_out_during_handshake() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // accept and hold the socket without ever answering the TLS hello
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
        Ok::<_, std::io::Error>(())
    });

    let creds = Credentials::new("127.0.0.1", port, "contact@example.org", "hunter2");
    let started = tokio::time::Instant::now();
    let err = SmtpMailClient::new()
        .with_timeout(Duration::from_millis(200))
        .send(&envelope(), &creds)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SmtpError::Timeout(d) if d == Duration::from_millis(200)),
        "{err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    server.abort();
}

// ══════════════════════════════════════════════════════════════════════════════
// Tests: Command layer
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_ehlo_parses_extensions() {
    use contact_smtp::smtp::Extensions;

    let mock = MockStream::new();
    mock.queue_line("220 mail.example.com ESMTP ready");
    mock.queue_multiline(
        250,
        &["mail.example.com", "STARTTLS", "AUTH PLAIN LOGIN", "SIZE 10485760"],
    );
    let mut smtp = Smtp::new(mock.clone());

    let ready = smtp.ready().await.unwrap();
    assert_eq!(ready.hostname(), "mail.example.com");
    let ehlo = smtp.ehlo("client.example.com").await.unwrap();
    assert!(ehlo.supports(Extensions::Other("STARTTLS", "")));
    assert!(ehlo.supports(Extensions::Auth("LOGIN")));
    assert!(!ehlo.supports(Extensions::Auth("CRAM-MD5")));
    assert_eq!(mock.commands(), vec!["EHLO client.example.com\r\n"]);
}

#[tokio::test]
async fn test_code_change_mid_reply() {
    let mock = MockStream::new();
    mock.queue_raw("250-first\r\n251 second\r\n");
    let mut smtp = Smtp::new(mock);

    let err = smtp.read_reply().await.unwrap_err();
    assert!(matches!(
        err,
        Error::MalformedError(MalformedError::CodeChanged {
            old_code: 250,
            new_code: 251
        })
    ));
}

#[tokio::test]
async fn test_pipelined_replies_are_kept() {
    let mock = MockStream::new();
    mock.queue_raw("220 ready\r\n250 OK\r\n");
    let mut smtp = Smtp::new(mock);

    assert_eq!(smtp.read_reply().await.unwrap().code(), 220);
    assert_eq!(smtp.read_reply().await.unwrap().code(), 250);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let mock = MockStream::new();
    let mut smtp = Smtp::new(mock.clone());
    smtp.close().await.unwrap();
    smtp.close().await.unwrap();
    assert!(smtp.is_closed());
    assert_eq!(mock.closes(), 1);
}

// ══════════════════════════════════════════════════════════════════════════════
// Tests: Tokio streams
// ══════════════════════════════════════════════════════════════════════════════

/// Answers one delivery over a real byte stream.
async fn serve(stream: tokio::io::DuplexStream) -> std::io::Result<Vec<String>> {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    let mut seen = Vec::new();
    let mut in_data = false;

    write.write_all(b"220 smtp.example.org ESMTP\r\n").await?;
    while let Some(line) = lines.next_line().await? {
        seen.push(line.clone());
        let reply: &[u8] = if in_data {
            if line != "." {
                continue;
            }
            in_data = false;
            b"250 OK queued\r\n"
        } else if line.starts_with("EHLO") {
            b"250-smtp.example.org\r\n250 AUTH LOGIN\r\n"
        } else if line == "AUTH LOGIN" || line == USER_B64 {
            b"334 go on\r\n"
        } else if line == PASS_B64 {
            b"235 OK\r\n"
        } else if line == "DATA" {
            in_data = true;
            b"354 go ahead\r\n"
        } else if line == "QUIT" {
            write.write_all(b"221 Bye\r\n").await?;
            break;
        } else {
            b"250 OK\r\n"
        };
        write.write_all(reply).await?;
    }
    write.shutdown().await?;
    Ok(seen)
}

#[tokio::test]
async fn test_delivery_over_tokio_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let server = tokio::spawn(serve(server));

    let sent = SmtpMailClient::new()
        .deliver(TokioIo(client), &envelope(), &credentials())
        .await
        .expect("delivery should succeed");
    assert_eq!(sent.response(), "OK queued");

    let seen = server.await.unwrap().unwrap();
    assert_eq!(seen.first().map(String::as_str), Some("EHLO example.org"));
    assert!(seen.iter().any(|l| l == "Subject: Contact Form: Hello"));
    assert_eq!(seen.last().map(String::as_str), Some("QUIT"));
}
