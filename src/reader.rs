use crate::{
    Error, MalformedError, ReadWrite,
    smtp::{Reply, ReplyLine},
};

/// Replies larger than this are treated as hostile.
pub const MAX_REPLY_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Accumulates bytes from the server and hands them out one complete reply at
/// a time.
///
/// A reply may arrive over several reads, and one read may carry more than
/// one reply; neither is assumed away. Bytes beyond the end of a reply stay
/// buffered for the next call.
#[derive(Debug)]
pub struct ReplyReader {
    // received but not yet consumed
    pending: Vec<u8>,
    chunk: Box<[u8]>,
    max_len: usize,
}

impl ReplyReader {
    pub fn new() -> Self {
        Self::with_limit(MAX_REPLY_LEN)
    }

    pub fn with_limit(max_len: usize) -> Self {
        ReplyReader {
            pending: Vec::new(),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            max_len,
        }
    }

    /// reads until one full (possibly multi-line) reply has been received.
    pub async fn read_reply<T: ReadWrite>(
        &mut self,
        stream: &mut T,
    ) -> Result<Reply, Error<T::Error>> {
        loop {
            if let Some((reply, used)) = parse_reply(&self.pending)? {
                self.pending.drain(..used);
                #[cfg(feature = "log-04")]
                for line in reply.replies() {
                    log::debug!("s>{line}");
                }
                return Ok(reply);
            }
            if self.pending.len() > self.max_len {
                return Err(MalformedError::ReplyTooLong(self.max_len).into());
            }
            self.fill(stream).await?;
        }
    }

    async fn fill<T: ReadWrite>(&mut self, stream: &mut T) -> Result<(), Error<T::Error>> {
        let n_bytes = stream
            .read(&mut self.chunk)
            .await
            .map_err(Error::IoError)?;
        if n_bytes == 0 {
            return Err(MalformedError::UnexpectedEof.into());
        }
        self.pending.extend_from_slice(&self.chunk[..n_bytes]);
        Ok(())
    }

    /// number of received bytes not yet handed out
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ReplyReader {
    fn default() -> Self {
        Self::new()
    }
}

// index of the \r of the next \r\n at or after `from`, None if the line is incomplete
fn find_terminator(buf: &[u8], from: usize) -> Result<Option<usize>, MalformedError> {
    let mut iter = buf[from..].iter().enumerate();
    while let Some((idx, byte)) = iter.next() {
        match byte {
            b'\r' => {
                return match iter.next() {
                    Some((_, b'\n')) => Ok(Some(from + idx)),
                    Some(_) => Err(MalformedError::InvalidLineTermination),
                    None => Ok(None),
                };
            }
            b'\n' => return Err(MalformedError::InvalidLineTermination),
            _ => {}
        }
    }
    Ok(None)
}

// a line is a three digit code, then ' ' (last line) or '-' (more to come), then text.
// a bare code is accepted as a last line.
fn parse_line(line: &[u8]) -> Result<ReplyLine<'_>, MalformedError> {
    if line.len() < 3 || !line[..3].iter().all(u8::is_ascii_digit) {
        return Err(MalformedError::NoCode);
    }
    let code = line[..3]
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    let is_last = match line.get(3) {
        None | Some(b' ') => true,
        Some(b'-') => false,
        Some(other) => return Err(MalformedError::InvalidContinuation(char::from(*other))),
    };
    let text = line.get(4..).unwrap_or_default();
    let message = core::str::from_utf8(text).map_err(|_| MalformedError::InvalidEncoding)?;
    Ok(ReplyLine::new(code, is_last, message))
}

/// Parses one complete reply from the front of `buf`.
///
/// Returns the reply and the number of bytes it occupied, or `None` when the
/// terminal line has not arrived yet.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, MalformedError> {
    let mut pos = 0;
    let mut code = None;
    let mut lines = Vec::new();
    while let Some(end) = find_terminator(buf, pos)? {
        let line = parse_line(&buf[pos..end])?;
        match code {
            None => code = Some(line.code()),
            Some(old_code) if old_code != line.code() => {
                return Err(MalformedError::CodeChanged {
                    old_code,
                    new_code: line.code(),
                });
            }
            Some(_) => {}
        }
        lines.push(line.message().to_owned());
        pos = end + 2;
        if line.is_last() {
            return Ok(Some((Reply::new(line.code(), lines), pos)));
        }
    }
    Ok(None)
}
