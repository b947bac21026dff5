//! Matchers for the two file-delimiting marker grammars.
//!
//! Tagged blocks: `<file path="src/main.rs">` ... `</file>`.
//! Fenced blocks: ```` ```lang\n ```` ... ```` ``` ```` at the start of a line.
//!
//! Every matcher is handed the buffered text starting at a candidate position
//! and answers whether a complete marker starts there, whether the text so far
//! is still a viable prefix of one, or whether it can be ruled out.

/// Literal close marker of a tagged block.
pub const CLOSE_TAG: &str = "</file>";

/// Fence delimiter used by the fallback grammar.
pub const FENCE: &str = "```";

const OPEN_TAG_NAME: &str = "<file";
const PATH_ATTRIBUTE: &str = "path";

pub(crate) const MAX_PATH_LEN: usize = 1024;
const MAX_LANGUAGE_LEN: usize = 32;
const MAX_FENCE_PADDING: usize = 8;
const MAX_OPEN_TAG_LEN: usize = MAX_PATH_LEN + 64;

/// Upper bound, in bytes, of any marker either grammar recognizes. Text that
/// would only form a marker beyond this length is treated as plain text.
pub const MAX_MARKER_LEN: usize = MAX_OPEN_TAG_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MarkerMatch<T> {
    NoMatch,
    Partial,
    Complete { len: usize, value: T },
}

impl<T> MarkerMatch<T> {
    pub(crate) fn map<U>(self, f: impl FnOnce(T) -> U) -> MarkerMatch<U> {
        match self {
            Self::NoMatch => MarkerMatch::NoMatch,
            Self::Partial => MarkerMatch::Partial,
            Self::Complete { len, value } => MarkerMatch::Complete {
                len,
                value: f(value),
            },
        }
    }
}

enum ScanStop {
    Incomplete,
    Mismatch,
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn peek(&self) -> Result<u8, ScanStop> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(ScanStop::Incomplete)
    }

    fn literal(&mut self, expected: &str) -> Result<(), ScanStop> {
        for &byte in expected.as_bytes() {
            if self.peek()? != byte {
                return Err(ScanStop::Mismatch);
            }
            self.pos += 1;
        }
        Ok(())
    }

    /// Consumes a run of bytes accepted by `accept`, failing when the run is
    /// shorter than `min` or longer than `max`.
    fn run(
        &mut self,
        accept: impl Fn(u8) -> bool,
        min: usize,
        max: usize,
    ) -> Result<usize, ScanStop> {
        let start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                Some(&byte) if accept(byte) => {
                    self.pos += 1;
                    if self.pos - start > max {
                        return Err(ScanStop::Mismatch);
                    }
                }
                Some(_) => break,
                None => return Err(ScanStop::Incomplete),
            }
        }
        if self.pos - start < min {
            return Err(ScanStop::Mismatch);
        }
        Ok(start)
    }
}

fn is_tag_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_language_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'+' | b'#' | b'.' | b'-')
}

fn finish_scan<T>(
    result: Result<T, ScanStop>,
    scanned: usize,
    within_bound: bool,
) -> MarkerMatch<T> {
    match result {
        Ok(value) => MarkerMatch::Complete {
            len: scanned,
            value,
        },
        Err(ScanStop::Incomplete) if within_bound => MarkerMatch::Partial,
        Err(ScanStop::Incomplete | ScanStop::Mismatch) => MarkerMatch::NoMatch,
    }
}

/// Matches `<file path="...">` at the start of `text`, yielding the path.
pub(crate) fn match_open_tag(text: &str) -> MarkerMatch<String> {
    let window = &text.as_bytes()[..text.len().min(MAX_OPEN_TAG_LEN)];
    let mut scanner = Scanner::new(window);
    let result = scan_open_tag(&mut scanner, text);
    finish_scan(result, scanner.pos, text.len() < MAX_OPEN_TAG_LEN)
}

fn scan_open_tag(scanner: &mut Scanner<'_>, text: &str) -> Result<String, ScanStop> {
    scanner.literal(OPEN_TAG_NAME)?;
    scanner.run(is_tag_space, 1, usize::MAX)?;
    scanner.literal(PATH_ATTRIBUTE)?;
    scanner.run(is_tag_space, 0, usize::MAX)?;
    scanner.literal("=")?;
    scanner.run(is_tag_space, 0, usize::MAX)?;
    let quote = scanner.peek()?;
    if quote != b'"' && quote != b'\'' {
        return Err(ScanStop::Mismatch);
    }
    scanner.pos += 1;
    let path_start = scanner.run(
        |byte| !matches!(byte, b'"' | b'\'' | b'\n' | b'\r'),
        1,
        MAX_PATH_LEN,
    )?;
    let path_end = scanner.pos;
    if scanner.peek()? != quote {
        return Err(ScanStop::Mismatch);
    }
    scanner.pos += 1;
    scanner.run(is_tag_space, 0, usize::MAX)?;
    scanner.literal(">")?;
    // Quotes are ASCII, so both ends of the path sit on char boundaries.
    Ok(text[path_start..path_end].to_string())
}

/// Matches the literal `</file>` at the start of `text`.
pub(crate) fn match_close_tag(text: &str) -> MarkerMatch<()> {
    match_literal(text, CLOSE_TAG)
}

/// Matches a fence opening (```` ```lang\n ````), yielding the language word.
pub(crate) fn match_fence_open(text: &str) -> MarkerMatch<Option<String>> {
    let mut scanner = Scanner::new(text.as_bytes());
    let result = scan_fence_open(&mut scanner, text);
    // Language and padding runs are bounded by the scanner itself.
    finish_scan(result, scanner.pos, true)
}

fn scan_fence_open(scanner: &mut Scanner<'_>, text: &str) -> Result<Option<String>, ScanStop> {
    scanner.literal(FENCE)?;
    let language_start = scanner.run(is_language_byte, 0, MAX_LANGUAGE_LEN)?;
    let language_end = scanner.pos;
    scanner.run(
        |byte| matches!(byte, b' ' | b'\t' | b'\r'),
        0,
        MAX_FENCE_PADDING,
    )?;
    scanner.literal("\n")?;
    let language = &text[language_start..language_end];
    Ok((!language.is_empty()).then(|| language.to_string()))
}

/// Matches a fence close at the start of `text`. The caller checks that the
/// candidate sits at the start of a line.
pub(crate) fn match_fence_close(text: &str) -> MarkerMatch<()> {
    match_literal(text, FENCE)
}

fn match_literal(text: &str, literal: &str) -> MarkerMatch<()> {
    if text.starts_with(literal) {
        MarkerMatch::Complete {
            len: literal.len(),
            value: (),
        }
    } else if literal.starts_with(text) {
        MarkerMatch::Partial
    } else {
        MarkerMatch::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::MAX_MARKER_LEN;
    use super::MarkerMatch;
    use super::match_close_tag;
    use super::match_fence_close;
    use super::match_fence_open;
    use super::match_open_tag;
    use pretty_assertions::assert_eq;

    #[test]
    fn open_tag_yields_path_and_length() {
        assert_eq!(
            match_open_tag("<file path=\"src/main.rs\">fn main() {}"),
            MarkerMatch::Complete {
                len: 25,
                value: "src/main.rs".to_string(),
            }
        );
    }

    #[test]
    fn open_tag_accepts_single_quotes_and_padding() {
        assert_eq!(
            match_open_tag("<file  path = 'a b.txt' >"),
            MarkerMatch::Complete {
                len: 25,
                value: "a b.txt".to_string(),
            }
        );
    }

    #[test]
    fn open_tag_prefixes_are_partial() {
        for prefix in [
            "<",
            "<fi",
            "<file",
            "<file ",
            "<file path",
            "<file path=\"",
            "<file path=\"a.py",
            "<file path=\"a.py\"",
        ] {
            assert_eq!(match_open_tag(prefix), MarkerMatch::Partial, "{prefix:?}");
        }
    }

    #[test]
    fn open_tag_rejects_other_markup() {
        for text in [
            "<div>",
            "<filepath=\"a\">",
            "<file name=\"a\">",
            "<file path=\"\">",
            "<file path=\"a\nb\">",
            "< file",
        ] {
            assert_eq!(match_open_tag(text), MarkerMatch::NoMatch, "{text:?}");
        }
    }

    #[test]
    fn open_tag_with_oversized_path_is_not_a_marker() {
        let text = format!("<file path=\"{}", "a".repeat(MAX_MARKER_LEN));
        assert_eq!(match_open_tag(&text), MarkerMatch::NoMatch);
    }

    #[test]
    fn close_tag_is_literal() {
        assert_eq!(
            match_close_tag("</file>\nrest"),
            MarkerMatch::Complete { len: 7, value: () }
        );
        assert_eq!(match_close_tag("</fi"), MarkerMatch::Partial);
        assert_eq!(match_close_tag("</files>"), MarkerMatch::NoMatch);
    }

    #[test]
    fn fence_open_captures_optional_language() {
        assert_eq!(
            match_fence_open("```python\nx = 1"),
            MarkerMatch::Complete {
                len: 10,
                value: Some("python".to_string()),
            }
        );
        assert_eq!(
            match_fence_open("```\r\n"),
            MarkerMatch::Complete {
                len: 5,
                value: None,
            }
        );
    }

    #[test]
    fn fence_open_waits_for_end_of_line() {
        assert_eq!(match_fence_open("`"), MarkerMatch::Partial);
        assert_eq!(match_fence_open("```"), MarkerMatch::Partial);
        assert_eq!(match_fence_open("```c++"), MarkerMatch::Partial);
    }

    #[test]
    fn inline_code_is_not_a_fence() {
        assert_eq!(match_fence_open("`app.js`"), MarkerMatch::NoMatch);
        assert_eq!(match_fence_open("```inline```"), MarkerMatch::NoMatch);
        assert_eq!(
            match_fence_open(&format!("```{}", "x".repeat(40))),
            MarkerMatch::NoMatch
        );
    }

    #[test]
    fn fence_close_is_three_backticks() {
        assert_eq!(
            match_fence_close("```\n"),
            MarkerMatch::Complete { len: 3, value: () }
        );
        assert_eq!(match_fence_close("``"), MarkerMatch::Partial);
        assert_eq!(match_fence_close("`x"), MarkerMatch::NoMatch);
    }
}
