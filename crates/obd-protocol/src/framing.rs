//! Reply Framing
//!
//! The adapter ends every exchange with a `>` prompt and separates reply
//! lines with `\r`. Serial reads can split or merge exchanges arbitrarily,
//! so bytes are buffered until a prompt arrives. Text is decoded per line,
//! after splitting, so a multi-byte character cut by a read survives.

/// Prompt byte terminating one exchange
pub const PROMPT: u8 = b'>';

/// Separator between reply lines
pub const LINE_TERMINATOR: u8 = b'\r';

/// Every line the adapter sent up to one prompt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    pub lines: Vec<String>,
}

/// Reassembles prompt-terminated exchanges from raw chunks
#[derive(Debug, Default)]
pub struct FrameAssembler {
    partial: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the exchanges it completed.
    ///
    /// Text after the last prompt stays buffered for the next call, so the
    /// result does not depend on where the transport split the stream.
    pub fn ingest(&mut self, chunk: &[u8]) -> Vec<Exchange> {
        self.partial.extend_from_slice(chunk);

        let Some(last_prompt) = self.partial.iter().rposition(|&b| b == PROMPT) else {
            return Vec::new();
        };

        let remainder = self.partial.split_off(last_prompt + 1);
        let complete = std::mem::replace(&mut self.partial, remainder);

        complete
            .split(|&b| b == PROMPT)
            .filter_map(|batch| {
                let lines: Vec<String> = batch
                    .split(|&b| b == LINE_TERMINATOR)
                    .map(|line| {
                        String::from_utf8_lossy(line)
                            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
                            .to_string()
                    })
                    .filter(|line| !line.is_empty())
                    .collect();
                (!lines.is_empty()).then_some(Exchange { lines })
            })
            .collect()
    }

    /// Bytes received since the last prompt
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    pub fn reset(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lines(exchanges: &[Exchange]) -> Vec<String> {
        exchanges.iter().flat_map(|e| e.lines.clone()).collect()
    }

    #[test]
    fn test_single_exchange() {
        let mut assembler = FrameAssembler::new();
        let out = assembler.ingest(b"410C1AF8\r\r>");
        assert_eq!(
            out,
            vec![Exchange {
                lines: vec!["410C1AF8".into()]
            }]
        );
        assert!(assembler.pending().is_empty());
    }

    #[test]
    fn test_reply_split_across_chunks() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.ingest(b"410C").is_empty());
        assert!(assembler.ingest(b"1AF8\r").is_empty());
        assert_eq!(assembler.pending(), b"410C1AF8\r");

        let out = assembler.ingest(b"\r>");
        assert_eq!(lines(&out), vec!["410C1AF8"]);
    }

    #[test]
    fn test_merged_exchanges() {
        let mut assembler = FrameAssembler::new();
        let out = assembler.ingest(b"OK\r\r>410D32\r\r>4105");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].lines, vec!["OK"]);
        assert_eq!(out[1].lines, vec!["410D32"]);
        assert_eq!(assembler.pending(), b"4105");
    }

    #[test]
    fn test_multi_line_exchange() {
        let mut assembler = FrameAssembler::new();
        let out = assembler.ingest(b"SEARCHING...\r4301000200000000\r\n4304200000000000\r\r>");
        assert_eq!(
            out[0].lines,
            vec!["SEARCHING...", "4301000200000000", "4304200000000000"]
        );
    }

    #[test]
    fn test_bare_prompt_yields_nothing() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.ingest(b">").is_empty());
        assert!(assembler.ingest(b"\r\0\r>").is_empty());
        assert!(assembler.pending().is_empty());
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let stream = "\u{e9}OK\r>".as_bytes();

        let mut whole = FrameAssembler::new();
        assert_eq!(lines(&whole.ingest(stream)), vec!["\u{e9}OK"]);

        let mut chunked = FrameAssembler::new();
        let actual: Vec<String> = stream
            .iter()
            .flat_map(|b| lines(&chunked.ingest(std::slice::from_ref(b))))
            .collect();
        assert_eq!(actual, vec!["\u{e9}OK"]);
    }

    proptest! {
        #[test]
        fn test_chunk_boundary_independence(
            cut_points in prop::collection::vec(0usize..64, 0..12)
        ) {
            let stream: &[u8] = b"OK\r\r>410C1AF8\r\r>NO DATA\r\r>43010002000000\r4304200000000000\r\r>410D";

            let mut whole = FrameAssembler::new();
            let expected = lines(&whole.ingest(stream));

            let mut cuts: Vec<usize> = cut_points.into_iter().map(|c| c.min(stream.len())).collect();
            cuts.sort_unstable();
            cuts.dedup();

            let mut chunked = FrameAssembler::new();
            let mut actual = Vec::new();
            let mut start = 0;
            for cut in cuts.into_iter().chain(std::iter::once(stream.len())) {
                actual.extend(lines(&chunked.ingest(&stream[start..cut])));
                start = cut;
            }

            prop_assert_eq!(actual, expected);
            prop_assert_eq!(chunked.pending(), whole.pending());
        }

        #[test]
        fn test_byte_at_a_time(stream in "[0-9A-F \r>\u{e9}\u{b0}\u{20ac}]{0,80}") {
            let mut whole = FrameAssembler::new();
            let expected = lines(&whole.ingest(stream.as_bytes()));

            let mut chunked = FrameAssembler::new();
            let actual: Vec<String> = stream
                .as_bytes()
                .iter()
                .flat_map(|b| lines(&chunked.ingest(std::slice::from_ref(b))))
                .collect();

            prop_assert_eq!(actual, expected);
        }
    }
}
