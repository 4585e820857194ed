use log::debug;

/// Text encoding a configuration file was decoded with; re-encoding uses the same one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16 { big_endian: bool, bom: bool },
    Latin1,
}

impl TextEncoding {
    /// Candidates in the order they are attempted.
    const CANDIDATES: [Candidate; 3] = [Candidate::Utf8, Candidate::Utf16, Candidate::Latin1];

    fn detect(bytes: &[u8]) -> Option<(String, TextEncoding)> {
        Self::CANDIDATES
            .iter()
            .find_map(|candidate| candidate.decode(bytes))
    }

    fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Some(text.as_bytes().to_vec()),
            TextEncoding::Utf16 { big_endian, bom } => {
                let mut out = Vec::with_capacity(text.len() * 2 + 2);
                let mut push = |unit: u16| {
                    let pair = if big_endian {
                        unit.to_be_bytes()
                    } else {
                        unit.to_le_bytes()
                    };
                    out.extend_from_slice(&pair);
                };
                if bom {
                    push(0xFEFF);
                }
                text.encode_utf16().for_each(&mut push);
                Some(out)
            }
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
        }
    }
}

#[derive(Clone, Copy)]
enum Candidate {
    Utf8,
    Utf16,
    Latin1,
}

impl Candidate {
    fn decode(self, bytes: &[u8]) -> Option<(String, TextEncoding)> {
        match self {
            Candidate::Utf8 => std::str::from_utf8(bytes)
                .ok()
                .map(|text| (text.to_owned(), TextEncoding::Utf8)),
            Candidate::Utf16 => decode_utf16(bytes),
            Candidate::Latin1 => Some((
                bytes.iter().map(|&b| char::from(b)).collect(),
                TextEncoding::Latin1,
            )),
        }
    }
}

fn decode_utf16(bytes: &[u8]) -> Option<(String, TextEncoding)> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let (big_endian, bom, body) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (true, true, rest),
        [0xFF, 0xFE, rest @ ..] => (false, true, rest),
        _ => (false, false, bytes),
    };
    let units = body.chunks_exact(2).map(|pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    });
    let text = char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .ok()?;
    Some((text, TextEncoding::Utf16 { big_endian, bom }))
}

/// Result of running a configuration file through [`ConfigRewriter::rewrite`].
#[derive(Clone, Debug)]
pub struct Rewrite {
    /// Rewritten bytes, or the untouched input when nothing changed.
    pub bytes: Vec<u8>,
    pub changed_lines: usize,
    pub encoding: Option<TextEncoding>,
}

impl Rewrite {
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.changed_lines > 0
    }

    fn unchanged(input: &[u8], encoding: Option<TextEncoding>) -> Self {
        Self {
            bytes: input.to_vec(),
            changed_lines: 0,
            encoding,
        }
    }
}

/// Zeroes out `key = value` lines that mention one of the configured network features.
#[derive(Clone, Debug)]
pub struct ConfigRewriter {
    keywords: Vec<String>,
    separator: char,
    comment_markers: Vec<&'static str>,
}

impl Default for ConfigRewriter {
    fn default() -> Self {
        Self::new(["waypoint"])
    }
}

impl ConfigRewriter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            separator: '=',
            comment_markers: vec!["//", ";"],
        }
    }

    pub fn rewrite(&self, input: &[u8]) -> Rewrite {
        let Some((text, encoding)) = TextEncoding::detect(input) else {
            debug!("rewrite: no candidate encoding decoded the file; leaving as-is");
            return Rewrite::unchanged(input, None);
        };

        let mut output = String::with_capacity(text.len());
        let mut changed_lines = 0;
        for (content, ending) in split_lines(&text) {
            match self.rewrite_line(content) {
                Some(replacement) if replacement != content => {
                    debug!("rewrite: {} -> {}", content.trim(), replacement);
                    output.push_str(&replacement);
                    changed_lines += 1;
                }
                _ => output.push_str(content),
            }
            output.push_str(ending);
        }

        if changed_lines == 0 {
            return Rewrite::unchanged(input, Some(encoding));
        }
        match encoding.encode(&output) {
            Some(bytes) => Rewrite {
                bytes,
                changed_lines,
                encoding: Some(encoding),
            },
            None => Rewrite::unchanged(input, Some(encoding)),
        }
    }

    fn rewrite_line(&self, content: &str) -> Option<String> {
        let trimmed = content.trim();
        if self
            .comment_markers
            .iter()
            .any(|marker| trimmed.starts_with(marker))
        {
            return None;
        }
        let (key, _) = trimmed.split_once(self.separator)?;
        let lowered = trimmed.to_lowercase();
        if !self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return None;
        }
        Some(format!("{} {} 0", key.trim(), self.separator))
    }
}

/// Split into `(content, terminator)` pairs; the terminator is `\r\n`, `\n`, `\r`, or empty
/// for a final unterminated line.
fn split_lines(text: &str) -> Vec<(&str, &str)> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push((&text[start..i], &text[i..i + 1]));
                i += 1;
                start = i;
            }
            b'\r' => {
                let end = if bytes.get(i + 1) == Some(&b'\n') {
                    i + 2
                } else {
                    i + 1
                };
                lines.push((&text[start..i], &text[i..end]));
                i = end;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        lines.push((&text[start..], ""));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut out = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn zeroes_every_matching_line() {
        let input = b"WaypointEnabled = 1\nname = hello\nSkipWaypointLogin=true\n";
        let result = ConfigRewriter::default().rewrite(input);
        assert_eq!(result.changed_lines, 2);
        assert_eq!(
            String::from_utf8(result.bytes).unwrap(),
            "WaypointEnabled = 0\nname = hello\nSkipWaypointLogin = 0\n"
        );
        assert_eq!(result.encoding, Some(TextEncoding::Utf8));
    }

    #[test]
    fn preserves_crlf_and_missing_final_newline() {
        let input = b"  waypointUrl = https://x\r\nother=1\r\nWAYPOINT_TIMEOUT = 30";
        let result = ConfigRewriter::default().rewrite(input);
        assert_eq!(result.changed_lines, 2);
        assert_eq!(
            String::from_utf8(result.bytes).unwrap(),
            "waypointUrl = 0\r\nother=1\r\nWAYPOINT_TIMEOUT = 0"
        );
    }

    #[test]
    fn skips_comments_and_lines_without_separator() {
        let input = b"// WaypointEnabled = 1\n; waypoint = 2\nwaypoint enabled\n";
        let result = ConfigRewriter::default().rewrite(input);
        assert!(!result.is_modified());
        assert_eq!(result.bytes, input.to_vec());
    }

    #[test]
    fn already_neutral_lines_are_not_changes() {
        let rewriter = ConfigRewriter::default();
        let first = rewriter.rewrite(b"WaypointEnabled = 1\nWaypointRetries = 3\n");
        assert_eq!(first.changed_lines, 2);

        let second = rewriter.rewrite(&first.bytes);
        assert_eq!(second.changed_lines, 0);
        assert_eq!(second.bytes, first.bytes);
    }

    #[test]
    fn keeps_utf16_encoding_and_bom() {
        let input = utf16le_with_bom("WaypointEnabled=1\r\nFoo=2\r\n");
        let result = ConfigRewriter::default().rewrite(&input);
        assert_eq!(result.changed_lines, 1);
        assert_eq!(
            result.encoding,
            Some(TextEncoding::Utf16 {
                big_endian: false,
                bom: true
            })
        );
        assert_eq!(
            result.bytes,
            utf16le_with_bom("WaypointEnabled = 0\r\nFoo=2\r\n")
        );
    }

    #[test]
    fn latin1_text_round_trips() {
        let mut input = b"caf\xe9 = 1\nwaypoint = 1\n".to_vec();
        input.push(0xE9);
        let result = ConfigRewriter::default().rewrite(&input);
        assert_eq!(result.encoding, Some(TextEncoding::Latin1));
        assert_eq!(result.bytes, b"caf\xe9 = 1\nwaypoint = 0\n\xe9".to_vec());
    }

    #[test]
    fn empty_and_binary_inputs_are_untouched() {
        let rewriter = ConfigRewriter::default();
        let empty = rewriter.rewrite(b"");
        assert!(!empty.is_modified());
        assert!(empty.bytes.is_empty());

        let binary = [0x00, 0xFF, 0x13, 0x37, 0x80];
        let result = rewriter.rewrite(&binary);
        assert!(!result.is_modified());
        assert_eq!(result.bytes, binary.to_vec());
    }

    #[test]
    fn custom_keywords_are_case_insensitive() {
        let rewriter = ConfigRewriter::new(["Telemetry", "XboxLive"]);
        let result = rewriter.rewrite(b"TELEMETRYLevel = 3\nxboxliveenabled = 1\nwaypoint = 1\n");
        assert_eq!(result.changed_lines, 2);
        assert_eq!(
            String::from_utf8(result.bytes).unwrap(),
            "TELEMETRYLevel = 0\nxboxliveenabled = 0\nwaypoint = 1\n"
        );
    }

    #[test]
    fn splits_lines_with_mixed_terminators() {
        let lines = split_lines("a\r\nb\nc\rd");
        assert_eq!(lines, vec![("a", "\r\n"), ("b", "\n"), ("c", "\r"), ("d", "")]);
    }
}
