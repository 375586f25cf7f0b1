//! Wire protocol for the stay-open worker.
//!
//! Commands are argument lines terminated by an execute sentinel. Replies are
//! a continuous stream of JSON values on stdout, one per sentinel, optionally
//! separated by `{ready}` markers (exiftool prints one after every command).

use serde_json::Value;

use super::error::{WorkerError, WorkerResult};

/// Flag prepended to every command to keep informational chatter off stdout.
pub const QUIET_FLAG: &str = "-q";

/// Line that makes the worker execute the arguments received so far.
pub const EXECUTE_SENTINEL: &str = "-execute";

/// Marker the worker prints after finishing a command.
const READY_MARKER: &[u8] = b"{ready";

/// Frame command lines into a single batched write.
///
/// The result is `-q`, the lines, and the execute sentinel, each followed by
/// a newline.
pub fn frame_command<S: AsRef<str>>(lines: &[S]) -> Vec<u8> {
    let mut framed = String::new();
    framed.push_str(QUIET_FLAG);
    framed.push('\n');
    for line in lines {
        framed.push_str(line.as_ref());
        framed.push('\n');
    }
    framed.push_str(EXECUTE_SENTINEL);
    framed.push('\n');
    framed.into_bytes()
}

/// Incremental decoder for the worker's reply stream.
///
/// Bytes are fed as they arrive; every complete JSON value is returned in
/// order. A reply that cannot be decoded, or outgrows `max_len`, yields a
/// single error and everything up to the next `{ready}` marker is dropped,
/// so each command still gets exactly one reply.
#[derive(Debug)]
pub struct ReplyDecoder {
    buf: Vec<u8>,
    max_len: usize,
    /// Dropping the remains of a failed reply.
    resyncing: bool,
}

impl ReplyDecoder {
    /// Create a decoder that gives up on replies larger than `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
            resyncing: false,
        }
    }

    /// Number of buffered bytes not yet decoded.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk of stdout and collect every reply it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<WorkerResult<Value>> {
        self.buf.extend_from_slice(bytes);
        let mut replies = Vec::new();

        loop {
            if self.resyncing {
                if !self.skip_past_marker() {
                    break;
                }
                self.resyncing = false;
            }
            match self.next_reply() {
                Some(reply) => {
                    self.resyncing = reply.is_err();
                    replies.push(reply);
                }
                None => break,
            }
        }

        replies
    }

    fn next_reply(&mut self) -> Option<WorkerResult<Value>> {
        loop {
            let Some(start) = self.buf.iter().position(|b| !b.is_ascii_whitespace()) else {
                self.buf.clear();
                return None;
            };
            self.buf.drain(..start);

            if self.buf.starts_with(READY_MARKER) {
                let end = self.buf.iter().position(|&b| b == b'}')?;
                self.buf.drain(..=end);
                continue;
            }
            if READY_MARKER.starts_with(&self.buf) {
                // Could still become a ready marker.
                return None;
            }

            let next = {
                let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
                values
                    .next()
                    .map(|result| result.map(|value| (value, values.byte_offset())))
            };

            return match next? {
                Ok((value, consumed)) => {
                    self.buf.drain(..consumed);
                    Some(Ok(value))
                }
                Err(err) if err.is_eof() => {
                    if self.buf.len() > self.max_len {
                        Some(Err(WorkerError::ReplyTooLarge(self.max_len)))
                    } else {
                        None
                    }
                }
                Err(err) => Some(Err(err.into())),
            };
        }
    }

    /// Drop input up to and including the next `{ready}` line. Returns
    /// `false` when more input is needed to find it.
    fn skip_past_marker(&mut self) -> bool {
        let mut from = 0;
        while let Some(offset) = self.buf[from..]
            .windows(READY_MARKER.len())
            .position(|window| window == READY_MARKER)
        {
            let start = from + offset;
            if start == 0 || self.buf[start - 1] == b'\n' {
                return match self.buf[start..].iter().position(|&b| b == b'}') {
                    Some(end) => {
                        self.buf.drain(..=start + end);
                        true
                    }
                    None => {
                        self.buf.drain(..start);
                        false
                    }
                };
            }
            from = start + 1;
        }

        // Keep just enough to recognise a marker split across reads.
        let keep = (READY_MARKER.len() + 1).min(self.buf.len());
        self.buf.drain(..self.buf.len() - keep);
        false
    }
}
