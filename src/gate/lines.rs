//! Incremental LF line splitter for the gate's reply stream.
//!
//! The gate batches replies, so one serial read may hold several lines or a
//! fraction of one. Feed arbitrary chunks with [`LineFramer::push`] and pull
//! complete lines with [`LineFramer::next_line`]. A line that grows past the
//! size limit is discarded up to its terminating LF and reported once as
//! [`LineError::Oversized`]; it is never truncated and passed on.
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Longest reply line accepted, terminator excluded.
pub const MAX_LINE_LEN: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("line exceeds {limit} bytes ({seen} bytes discarded)")]
    Oversized { limit: usize, seen: usize },
    #[error("line is not valid UTF-8")]
    Encoding,
}

pub struct LineFramer {
    buf: BytesMut,
    limit: usize,
    /// Bytes of an oversized line thrown away so far; `Some` while skipping to the next LF.
    discarding: Option<usize>,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_LEN)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            limit,
            discarding: None,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non-empty line with any trailing CR removed.
    /// Returns `None` once the buffer holds no further complete line.
    pub fn next_line(&mut self) -> Option<Result<String, LineError>> {
        loop {
            let newline = self.buf.iter().position(|&b| b == b'\n');

            if let Some(seen) = self.discarding {
                match newline {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                        self.discarding = None;
                        return Some(Err(LineError::Oversized {
                            limit: self.limit,
                            seen: seen + pos,
                        }));
                    }
                    None => {
                        let n = self.buf.len();
                        self.buf.clear();
                        self.discarding = Some(seen + n);
                        return None;
                    }
                }
            }

            let Some(pos) = newline else {
                // A full-length line may be waiting on its LF after the CR.
                let allowed = self.limit + usize::from(self.buf.last() == Some(&b'\r'));
                if self.buf.len() > allowed {
                    let n = self.buf.len();
                    self.buf.clear();
                    self.discarding = Some(n);
                }
                return None;
            };

            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if line.len() > self.limit {
                return Some(Err(LineError::Oversized {
                    limit: self.limit,
                    seen: line.len(),
                }));
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8(line.to_vec()).map_err(|_| LineError::Encoding));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(f: &mut LineFramer) -> Vec<Result<String, LineError>> {
        std::iter::from_fn(|| f.next_line()).collect()
    }

    #[test]
    fn splits_batched_lines_and_strips_cr() {
        let mut f = LineFramer::new();
        f.push(b"!\r\nA1122334455667788\n\nK11");
        assert_eq!(
            drain(&mut f),
            vec![Ok("!".to_string()), Ok("A1122334455667788".to_string())]
        );
        f.push(b"22334455667788\n");
        assert_eq!(drain(&mut f), vec![Ok("K1122334455667788".to_string())]);
    }

    #[test]
    fn oversized_line_is_dropped_not_truncated() {
        let mut f = LineFramer::with_limit(8);
        f.push(b"I0123456789");
        assert!(f.next_line().is_none());
        f.push(b"abcdef\n!\n");
        let out = drain(&mut f);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(LineError::Oversized { limit: 8, .. })));
        assert_eq!(out[1], Ok("!".to_string()));
    }

    #[test]
    fn oversized_complete_line_in_one_chunk() {
        let mut f = LineFramer::with_limit(4);
        f.push(b"123456\nP\n");
        let out = drain(&mut f);
        assert_eq!(
            out,
            vec![
                Err(LineError::Oversized { limit: 4, seen: 6 }),
                Ok("P".to_string())
            ]
        );
    }

    #[test]
    fn full_length_line_split_between_cr_and_lf() {
        let mut f = LineFramer::with_limit(4);
        f.push(b"ABCD\r");
        assert!(f.next_line().is_none());
        f.push(b"\nP\n");
        assert_eq!(drain(&mut f), vec![Ok("ABCD".to_string()), Ok("P".to_string())]);

        // One byte more than the limit is still too long.
        f.push(b"ABCDE\r");
        assert!(f.next_line().is_none());
        f.push(b"\n");
        let out = drain(&mut f);
        assert!(matches!(out.as_slice(), [Err(LineError::Oversized { limit: 4, .. })]));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut f = LineFramer::new();
        f.push(&[0x49, 0xff, 0xfe, b'\n']);
        assert_eq!(drain(&mut f), vec![Err(LineError::Encoding)]);
    }
}
