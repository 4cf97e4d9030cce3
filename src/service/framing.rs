//! Newline framing and validation of received bytes.
//!
//! Bytes are accumulated raw and only decoded once a full line is available,
//! so a multi-byte UTF-8 sequence split across two reads decodes correctly.

use memchr::memchr;
use tracing::{debug, warn};

use crate::state::MAX_MESSAGE_CHARS;

/// Largest unterminated line kept between reads.
pub const MAX_PARTIAL_BYTES: usize = 64 * 1024;

/// Counters for lines that never reached the buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramerStats {
    pub accepted: u64,
    pub too_long: u64,
    pub unprintable: u64,
    pub overflows: u64,
}

/// Splits a byte stream into validated text lines.
#[derive(Debug)]
pub struct LineFramer {
    partial: Vec<u8>,
    max_partial: usize,
    /// Set after an overflow: bytes are dropped up to the next newline.
    discarding: bool,
    stats: FramerStats,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_PARTIAL_BYTES)
    }
}

impl LineFramer {
    pub fn new(max_partial: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_partial,
            discarding: false,
            stats: FramerStats::default(),
        }
    }

    /// Feed one chunk and return every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = memchr(b'\n', rest) {
            if self.discarding {
                self.discarding = false;
            } else {
                self.partial.extend_from_slice(&rest[..pos]);
                let raw = std::mem::take(&mut self.partial);
                if let Some(line) = self.accept(&raw) {
                    lines.push(line);
                }
            }
            rest = &rest[pos + 1..];
        }

        if !self.discarding && !rest.is_empty() {
            self.partial.extend_from_slice(rest);
            if self.partial.len() > self.max_partial {
                warn!(
                    "Dropping {} bytes of unterminated input (limit {})",
                    self.partial.len(),
                    self.max_partial
                );
                self.partial.clear();
                self.discarding = true;
                self.stats.overflows += 1;
            }
        }

        lines
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    fn accept(&mut self, raw: &[u8]) -> Option<String> {
        let decoded = decode_dropping_invalid(raw);
        let line = decoded.trim();
        if line.is_empty() {
            return None;
        }

        let chars = line.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            warn!("Received message too long ({} chars), discarding", chars);
            self.stats.too_long += 1;
            return None;
        }
        if !line.chars().all(is_printable) {
            debug!("Received non-printable characters, discarding");
            self.stats.unprintable += 1;
            return None;
        }

        self.stats.accepted += 1;
        Some(line.to_string())
    }
}

/// ASCII letters, digits, punctuation and whitespace.
pub fn is_printable(c: char) -> bool {
    c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Decode UTF-8, silently dropping invalid sequences.
pub fn decode_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, after) = bytes.split_at(e.valid_up_to());
                if let Ok(valid) = std::str::from_utf8(valid) {
                    out.push_str(valid);
                }
                match e.error_len() {
                    Some(len) => bytes = &after[len..],
                    // Truncated sequence at the end of the line.
                    None => return out,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_line_split_across_chunks() {
        let mut framer = LineFramer::default();
        assert_eq!(framer.push(b"hello\nwor"), vec!["hello".to_string()]);
        assert_eq!(framer.pending(), 3);
        assert_eq!(framer.push(b"ld\n"), vec!["world".to_string()]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_lines_are_trimmed_and_blank_lines_skipped() {
        let mut framer = LineFramer::default();
        let lines = framer.push(b"  temp=21.5 \r\n\r\n\n\tok\n");
        assert_eq!(lines, vec!["temp=21.5".to_string(), "ok".to_string()]);
    }

    #[test]
    fn test_overlong_line_is_discarded() {
        let mut framer = LineFramer::default();
        let mut input = vec![b'x'; 1001];
        input.push(b'\n');
        input.extend_from_slice(b"next\n");

        assert_eq!(framer.push(&input), vec!["next".to_string()]);
        assert_eq!(framer.stats().too_long, 1);
    }

    #[test]
    fn test_exactly_max_chars_is_kept() {
        let mut framer = LineFramer::default();
        let mut input = vec![b'y'; 1000];
        input.push(b'\n');
        let lines = framer.push(&input);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 1000);
    }

    #[test]
    fn test_non_ascii_line_is_discarded() {
        let mut framer = LineFramer::default();
        let lines = framer.push("caf\u{e9}\nplain\n".as_bytes());
        assert_eq!(lines, vec!["plain".to_string()]);
        assert_eq!(framer.stats().unprintable, 1);
    }

    #[test]
    fn test_control_bytes_are_unprintable() {
        let mut framer = LineFramer::default();
        assert!(framer.push(b"bell\x07\n").is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_dropped_not_replaced() {
        assert_eq!(decode_dropping_invalid(b"ab\xffcd"), "abcd");
        assert_eq!(decode_dropping_invalid(b"ok\xe2\x82"), "ok");

        let mut framer = LineFramer::default();
        assert_eq!(framer.push(b"ab\xff\xfecd\n"), vec!["abcd".to_string()]);
    }

    #[test]
    fn test_split_multibyte_sequence_decodes_whole() {
        assert_eq!(decode_dropping_invalid("\u{20ac}".as_bytes()), "\u{20ac}");
        let mut framer = LineFramer::default();
        // Euro sign split across reads; still non-ASCII so still discarded,
        // but not decoded into fragments that leak through.
        assert!(framer.push(b"x\xe2\x82").is_empty());
        assert!(framer.push(b"\xac\n").is_empty());
        assert_eq!(framer.stats().unprintable, 1);
    }

    #[test]
    fn test_partial_overflow_drops_until_newline() {
        let mut framer = LineFramer::new(16);
        assert!(framer.push(&[b'a'; 20]).is_empty());
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.stats().overflows, 1);

        assert!(framer.push(b"still garbage").is_empty());
        assert_eq!(framer.push(b"tail\nfresh\n"), vec!["fresh".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_lines(
            lines in proptest::collection::vec("[a-z0-9 ]{0,40}", 0..10),
            split in 0usize..400,
        ) {
            let mut stream = Vec::new();
            for line in &lines {
                stream.extend_from_slice(line.as_bytes());
                stream.push(b'\n');
            }
            let split = split.min(stream.len());

            let mut whole = LineFramer::default();
            let expected = whole.push(&stream);

            let mut chunked = LineFramer::default();
            let mut got = chunked.push(&stream[..split]);
            got.extend(chunked.push(&stream[split..]));

            prop_assert_eq!(got, expected);
        }
    }
}
