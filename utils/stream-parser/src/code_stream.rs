use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::StreamTextChunk;
use crate::StreamTextParser;
use crate::filename::FilenameHintScanner;
use crate::filename::resolve_filename;
use crate::fragment_buffer::FragmentBuffer;
use crate::markers::MarkerMatch;
use crate::markers::match_close_tag;
use crate::markers::match_fence_close;
use crate::markers::match_fence_open;
use crate::markers::match_open_tag;

/// One classified piece of an agent response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text that belongs to the conversation transcript.
    ChatContent { text: String },
    /// A file starts streaming.
    FileStart { path: String },
    /// Verbatim content appended to the open file.
    FileContent { path: String, text: String },
    /// The file is complete; `content` is everything streamed for it.
    FileEnd { path: String, content: String },
}

/// Malformed input the classifier recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParseAnomaly {
    /// A tagged open marker arrived while another tagged file was open. The
    /// open file was closed with what it had before the new one started.
    NestedFileOpen { open_path: String, new_path: String },
    /// The response ended while a file was still open; it was closed with
    /// the content accumulated so far.
    UnterminatedFile { path: String },
}

impl fmt::Display for ParseAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NestedFileOpen {
                open_path,
                new_path,
            } => write!(
                f,
                "file `{new_path}` was opened while `{open_path}` was still open; closed `{open_path}` early"
            ),
            Self::UnterminatedFile { path } => {
                write!(f, "response ended before file `{path}` was closed")
            }
        }
    }
}

/// A file currently receiving content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    pub path: String,
    pub content: String,
}

impl OpenFile {
    fn new(path: String) -> Self {
        Self {
            path,
            content: String::new(),
        }
    }

    fn at_line_start(&self) -> bool {
        self.content.is_empty() || self.content.ends_with('\n')
    }
}

/// Classifier mode. Each variant carries only the state valid in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Chat,
    TaggedFile(OpenFile),
    FencedFile {
        file: OpenFile,
        language: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Chat,
    InTaggedFile,
    InFencedFile,
}

impl Mode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Self::Chat => ModeKind::Chat,
            Self::TaggedFile(_) => ModeKind::InTaggedFile,
            Self::FencedFile { .. } => ModeKind::InFencedFile,
        }
    }

    fn open_file(&self) -> Option<&OpenFile> {
        match self {
            Self::Chat => None,
            Self::TaggedFile(file) | Self::FencedFile { file, .. } => Some(file),
        }
    }

    fn open_file_mut(&mut self) -> Option<&mut OpenFile> {
        match self {
            Self::Chat => None,
            Self::TaggedFile(file) | Self::FencedFile { file, .. } => Some(file),
        }
    }
}

/// Per-response classifier state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserState {
    mode: Mode,
    pending_filename_hint: Option<String>,
    file_counter: u64,
    tagged_markers_seen: bool,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            mode: Mode::Chat,
            pending_filename_hint: None,
            file_counter: 1,
            tagged_markers_seen: false,
        }
    }
}

impl ParserState {
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn current_file_path(&self) -> Option<&str> {
        self.mode.open_file().map(|file| file.path.as_str())
    }

    pub fn open_file_content(&self) -> Option<&str> {
        self.mode.open_file().map(|file| file.content.as_str())
    }

    pub fn pending_filename_hint(&self) -> Option<&str> {
        self.pending_filename_hint.as_deref()
    }

    pub fn fence_language(&self) -> Option<&str> {
        match &self.mode {
            Mode::FencedFile { language, .. } => language.as_deref(),
            Mode::Chat | Mode::TaggedFile(_) => None,
        }
    }

    /// Counter value the next generated file name will use.
    pub fn file_counter(&self) -> u64 {
        self.file_counter
    }

    /// Whether the response has used the tagged grammar. Fences are plain
    /// text from then on.
    pub fn tagged_markers_seen(&self) -> bool {
        self.tagged_markers_seen
    }
}

#[derive(Debug)]
enum Marker {
    TagOpen(String),
    TagClose,
    FenceOpen(Option<String>),
    FenceClose,
}

#[derive(Debug)]
enum Step {
    /// A complete marker starts at `at` and spans `len` bytes.
    Marker {
        at: usize,
        len: usize,
        marker: Marker,
    },
    /// No complete marker; text from `keep_from` on may still become one.
    Settle { keep_from: usize },
}

/// Streaming classifier for one agent response.
///
/// Tagged blocks (`<file path="...">` ... `</file>`) are preferred. Markdown
/// fences are the fallback and are only recognized until the first tagged
/// marker of the response. Markers may be split across fragments at any
/// byte; the concatenated output is the same however the response was
/// fragmented.
///
/// Create one parser per response, or call [`CodeStreamParser::reset`]
/// between responses.
#[derive(Debug, Default)]
pub struct CodeStreamParser {
    state: ParserState,
    buffer: FragmentBuffer,
    hints: FilenameHintScanner,
    anomalies: Vec<ParseAnomaly>,
}

impl CodeStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Bytes held back because they may be the start of a marker.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drains anomalies recorded since the last call.
    pub fn take_anomalies(&mut self) -> Vec<ParseAnomaly> {
        std::mem::take(&mut self.anomalies)
    }

    /// Discards all state, including the file name counter.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn next_step(&self) -> Step {
        match &self.state.mode {
            Mode::Chat => self.scan_chat(),
            Mode::TaggedFile(_) => self.scan_tagged_file(),
            Mode::FencedFile { file, .. } => self.scan_fenced_file(file),
        }
    }

    fn scan_chat(&self) -> Step {
        let text = self.buffer.as_str();
        let fences_enabled = !self.state.tagged_markers_seen;
        for (at, byte) in text.bytes().enumerate() {
            let candidate = match byte {
                b'<' => match_open_tag(&text[at..]).map(Marker::TagOpen),
                b'`' if fences_enabled => match_fence_open(&text[at..]).map(Marker::FenceOpen),
                _ => continue,
            };
            match candidate {
                MarkerMatch::Complete { len, value } => {
                    return Step::Marker {
                        at,
                        len,
                        marker: value,
                    };
                }
                MarkerMatch::Partial => return Step::Settle { keep_from: at },
                MarkerMatch::NoMatch => {}
            }
        }
        Step::Settle {
            keep_from: text.len(),
        }
    }

    fn scan_tagged_file(&self) -> Step {
        let text = self.buffer.as_str();
        for (at, byte) in text.bytes().enumerate() {
            if byte != b'<' {
                continue;
            }
            let close = match_close_tag(&text[at..]).map(|()| Marker::TagClose);
            let open = match_open_tag(&text[at..]).map(Marker::TagOpen);
            match (close, open) {
                (MarkerMatch::Complete { len, value }, _)
                | (_, MarkerMatch::Complete { len, value }) => {
                    return Step::Marker {
                        at,
                        len,
                        marker: value,
                    };
                }
                (MarkerMatch::Partial, _) | (_, MarkerMatch::Partial) => {
                    return Step::Settle { keep_from: at };
                }
                (MarkerMatch::NoMatch, MarkerMatch::NoMatch) => {}
            }
        }
        Step::Settle {
            keep_from: text.len(),
        }
    }

    fn scan_fenced_file(&self, file: &OpenFile) -> Step {
        let text = self.buffer.as_str();
        let bytes = text.as_bytes();
        for (at, &byte) in bytes.iter().enumerate() {
            let line_start = if at == 0 {
                file.at_line_start()
            } else {
                bytes[at - 1] == b'\n'
            };
            if byte != b'`' || !line_start {
                continue;
            }
            match match_fence_close(&text[at..]) {
                MarkerMatch::Complete { len, value: () } => {
                    return Step::Marker {
                        at,
                        len,
                        marker: Marker::FenceClose,
                    };
                }
                MarkerMatch::Partial => return Step::Settle { keep_from: at },
                MarkerMatch::NoMatch => {}
            }
        }
        Step::Settle {
            keep_from: text.len(),
        }
    }

    fn drain_buffer(&mut self, out: &mut StreamTextChunk<StreamEvent>) {
        loop {
            match self.next_step() {
                Step::Marker { at, len, marker } => {
                    let before = self.buffer.take_prefix(at);
                    self.route_text(before, out);
                    self.buffer.discard_prefix(len);
                    self.apply_marker(marker, out);
                }
                Step::Settle { keep_from } => {
                    let released = self.buffer.settle(keep_from);
                    self.route_text(released, out);
                    return;
                }
            }
        }
    }

    /// Sends text to the current destination: the transcript in chat mode,
    /// the open file otherwise.
    fn route_text(&mut self, text: String, out: &mut StreamTextChunk<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        match self.state.mode.open_file_mut() {
            Some(file) => {
                file.content.push_str(&text);
                let path = file.path.clone();
                push_event(out, StreamEvent::FileContent { path, text });
            }
            None => {
                if let Some(hint) = self.hints.observe(&text) {
                    debug!(%hint, "captured filename announcement");
                    self.state.pending_filename_hint = Some(hint);
                }
                push_event(out, StreamEvent::ChatContent { text });
            }
        }
    }

    fn apply_marker(&mut self, marker: Marker, out: &mut StreamTextChunk<StreamEvent>) {
        match marker {
            Marker::TagOpen(path) => {
                self.state.tagged_markers_seen = true;
                if let Some(open) = self.state.mode.open_file() {
                    let anomaly = ParseAnomaly::NestedFileOpen {
                        open_path: open.path.clone(),
                        new_path: path.clone(),
                    };
                    warn!(%anomaly, "closing open file before nested open marker");
                    self.anomalies.push(anomaly);
                    self.close_file(out);
                }
                debug!(%path, "tagged file opened");
                push_event(out, StreamEvent::FileStart { path: path.clone() });
                self.state.mode = Mode::TaggedFile(OpenFile::new(path));
            }
            Marker::FenceOpen(language) => {
                let path = resolve_filename(
                    &mut self.state.pending_filename_hint,
                    language.as_deref(),
                    &mut self.state.file_counter,
                );
                debug!(%path, ?language, "fenced file opened");
                push_event(out, StreamEvent::FileStart { path: path.clone() });
                self.state.mode = Mode::FencedFile {
                    file: OpenFile::new(path),
                    language,
                };
            }
            Marker::TagClose | Marker::FenceClose => self.close_file(out),
        }
    }

    fn close_file(&mut self, out: &mut StreamTextChunk<StreamEvent>) {
        match std::mem::replace(&mut self.state.mode, Mode::Chat) {
            Mode::Chat => {}
            Mode::TaggedFile(file) | Mode::FencedFile { file, .. } => {
                debug!(path = %file.path, bytes = file.content.len(), "file closed");
                push_event(
                    out,
                    StreamEvent::FileEnd {
                        path: file.path,
                        content: file.content,
                    },
                );
            }
        }
    }
}

impl StreamTextParser for CodeStreamParser {
    type Extracted = StreamEvent;

    fn push_str(&mut self, chunk: &str) -> StreamTextChunk<Self::Extracted> {
        let mut out = StreamTextChunk::default();
        self.buffer.append(chunk);
        self.drain_buffer(&mut out);
        out
    }

    /// Flushes held-back text and force-closes a file left open.
    fn finish(&mut self) -> StreamTextChunk<Self::Extracted> {
        let mut out = StreamTextChunk::default();
        let rest = self.buffer.take_all();
        self.route_text(rest, &mut out);
        if let Some(path) = self.state.current_file_path() {
            let anomaly = ParseAnomaly::UnterminatedFile {
                path: path.to_string(),
            };
            warn!(%anomaly, "force-closing unterminated file");
            self.anomalies.push(anomaly);
            self.close_file(&mut out);
        }
        out
    }
}

/// Appends an event, merging it into the previous one when both carry text
/// for the same destination.
fn push_event(out: &mut StreamTextChunk<StreamEvent>, event: StreamEvent) {
    match event {
        StreamEvent::ChatContent { text } => {
            if text.is_empty() {
                return;
            }
            out.visible_text.push_str(&text);
            if let Some(StreamEvent::ChatContent { text: existing }) = out.extracted.last_mut() {
                existing.push_str(&text);
                return;
            }
            out.extracted.push(StreamEvent::ChatContent { text });
        }
        StreamEvent::FileContent { path, text } => {
            if text.is_empty() {
                return;
            }
            if let Some(StreamEvent::FileContent {
                path: existing_path,
                text: existing,
            }) = out.extracted.last_mut()
                && *existing_path == path
            {
                existing.push_str(&text);
                return;
            }
            out.extracted.push(StreamEvent::FileContent { path, text });
        }
        event @ (StreamEvent::FileStart { .. } | StreamEvent::FileEnd { .. }) => {
            out.extracted.push(event);
        }
    }
}

/// Classifies a complete response in one pass.
pub fn parse_complete_response(text: &str) -> Vec<StreamEvent> {
    let mut parser = CodeStreamParser::new();
    let mut out = parser.push_str(text);
    out.append(parser.finish());
    out.extracted
}

/// Returns every file in a complete response as `(path, content)` pairs, in
/// the order the files were closed.
pub fn extract_files(text: &str) -> Vec<(String, String)> {
    parse_complete_response(text)
        .into_iter()
        .filter_map(|event| match event {
            StreamEvent::FileEnd { path, content } => Some((path, content)),
            StreamEvent::ChatContent { .. }
            | StreamEvent::FileStart { .. }
            | StreamEvent::FileContent { .. } => None,
        })
        .collect()
}

/// Returns only the conversation text of a complete response.
pub fn strip_file_blocks(text: &str) -> String {
    let mut parser = CodeStreamParser::new();
    let mut out = parser.push_str(text).visible_text;
    out.push_str(&parser.finish().visible_text);
    out
}

#[cfg(test)]
mod tests {
    use super::CodeStreamParser;
    use super::ModeKind;
    use super::ParseAnomaly;
    use super::StreamEvent;
    use super::extract_files;
    use super::parse_complete_response;
    use super::strip_file_blocks;
    use crate::MAX_MARKER_LEN;
    use crate::StreamTextChunk;
    use crate::StreamTextParser;
    use pretty_assertions::assert_eq;

    fn collect_chunks<P>(parser: &mut P, chunks: &[&str]) -> StreamTextChunk<P::Extracted>
    where
        P: StreamTextParser,
    {
        let mut all = StreamTextChunk::default();
        for chunk in chunks {
            all.append(parser.push_str(chunk));
        }
        all.append(parser.finish());
        all
    }

    /// Merges adjacent text events so event lists from different
    /// fragmentations can be compared directly.
    fn coalesce(events: Vec<StreamEvent>) -> Vec<StreamEvent> {
        let mut merged: Vec<StreamEvent> = Vec::new();
        for event in events {
            match (merged.last_mut(), event) {
                (
                    Some(StreamEvent::ChatContent { text: existing }),
                    StreamEvent::ChatContent { text },
                ) => existing.push_str(&text),
                (
                    Some(StreamEvent::FileContent {
                        path: existing_path,
                        text: existing,
                    }),
                    StreamEvent::FileContent { path, text },
                ) if *existing_path == path => existing.push_str(&text),
                (_, event) => merged.push(event),
            }
        }
        merged
    }

    fn streamed(chunks: &[&str]) -> Vec<StreamEvent> {
        let mut parser = CodeStreamParser::new();
        coalesce(collect_chunks(&mut parser, chunks).extracted)
    }

    fn char_boundaries(text: &str) -> Vec<usize> {
        (1..text.len())
            .filter(|idx| text.is_char_boundary(*idx))
            .collect()
    }

    /// Checks every split into two fragments, and one fragment per char,
    /// against the batch parse.
    fn assert_split_invariant(text: &str) {
        let expected = coalesce(parse_complete_response(text));
        for first in char_boundaries(text) {
            assert_eq!(
                streamed(&[&text[..first], &text[first..]]),
                expected,
                "split at {first}"
            );
        }
        let per_char: Vec<&str> = text
            .char_indices()
            .map(|(idx, ch)| &text[idx..idx + ch.len_utf8()])
            .collect();
        assert_eq!(streamed(&per_char), expected, "one fragment per char");
    }

    /// Like [`assert_split_invariant`], plus every split into three fragments.
    fn assert_fragmentation_invariant(text: &str) {
        assert_split_invariant(text);
        let expected = coalesce(parse_complete_response(text));
        let boundaries = char_boundaries(text);
        for &first in &boundaries {
            for &second in boundaries.iter().filter(|idx| **idx > first) {
                assert_eq!(
                    streamed(&[&text[..first], &text[first..second], &text[second..]]),
                    expected,
                    "split at {first} and {second}"
                );
            }
        }
    }

    fn chat(text: &str) -> StreamEvent {
        StreamEvent::ChatContent {
            text: text.to_string(),
        }
    }

    fn start(path: &str) -> StreamEvent {
        StreamEvent::FileStart {
            path: path.to_string(),
        }
    }

    fn content(path: &str, text: &str) -> StreamEvent {
        StreamEvent::FileContent {
            path: path.to_string(),
            text: text.to_string(),
        }
    }

    fn end(path: &str, text: &str) -> StreamEvent {
        StreamEvent::FileEnd {
            path: path.to_string(),
            content: text.to_string(),
        }
    }

    const TAGGED_RESPONSE: &str =
        "Sure, here's main.py:\n<file path=\"main.py\">\nprint(1)\n</file>\nDone.";
    const FENCED_RESPONSE: &str = "Creating `app.js`:\n```javascript\nconsole.log(1);\n```\n";

    #[test]
    fn tagged_block_split_inside_markers() {
        let mut parser = CodeStreamParser::new();
        let out = collect_chunks(
            &mut parser,
            &[
                "Sure, here's main.py:\n<fi",
                "le path=\"main.py\">\nprint(1)\n</fi",
                "le>\nDone.",
            ],
        );

        assert_eq!(out.visible_text, "Sure, here's main.py:\n\nDone.");
        assert_eq!(
            out.extracted,
            vec![
                chat("Sure, here's main.py:\n"),
                start("main.py"),
                content("main.py", "\nprint(1)\n"),
                end("main.py", "\nprint(1)\n"),
                chat("\nDone."),
            ]
        );
        assert!(parser.take_anomalies().is_empty());
    }

    #[test]
    fn tagged_block_is_fragmentation_invariant() {
        assert_fragmentation_invariant(TAGGED_RESPONSE);
    }

    #[test]
    fn filename_announcement_names_the_fenced_file() {
        let mut parser = CodeStreamParser::new();

        let intro = parser.push_str("Creating `app.js`:\n");
        assert_eq!(intro.extracted, vec![chat("Creating `app.js`:\n")]);
        assert_eq!(parser.state().pending_filename_hint(), Some("app.js"));

        let mut out = parser.push_str("```javascript\nconsole.log(1);\n```\n");
        out.append(parser.finish());

        assert_eq!(parser.state().pending_filename_hint(), None);
        assert_eq!(
            out.extracted,
            vec![
                start("app.js"),
                content("app.js", "console.log(1);\n"),
                end("app.js", "console.log(1);\n"),
                chat("\n"),
            ]
        );
    }

    #[test]
    fn fenced_block_in_a_single_fragment() {
        assert_eq!(
            parse_complete_response(FENCED_RESPONSE),
            vec![
                chat("Creating `app.js`:\n"),
                start("app.js"),
                content("app.js", "console.log(1);\n"),
                end("app.js", "console.log(1);\n"),
                chat("\n"),
            ]
        );
    }

    #[test]
    fn fenced_block_is_fragmentation_invariant() {
        assert_fragmentation_invariant(FENCED_RESPONSE);
    }

    #[test]
    fn fence_without_hint_gets_generated_name() {
        assert_eq!(
            parse_complete_response("```python\nx=1\n```"),
            vec![start("file_1.py"), content("file_1.py", "x=1\n"), end("file_1.py", "x=1\n")]
        );
    }

    #[test]
    fn generated_names_are_unique_within_a_response() {
        let text = "```python\na\n```\nthen\n```\nb\n```\nand\n```rust\nc\n```\n";
        assert_eq!(
            extract_files(text),
            vec![
                ("file_1.py".to_string(), "a\n".to_string()),
                ("file_2.txt".to_string(), "b\n".to_string()),
                ("file_3.rs".to_string(), "c\n".to_string()),
            ]
        );
        assert_fragmentation_invariant(text);
    }

    #[test]
    fn hint_applies_only_to_the_next_fence() {
        let text = "Creating `a.py`:\n```python\n1\n```\nAnother:\n```python\n2\n```\n";
        assert_eq!(
            extract_files(text),
            vec![
                ("a.py".to_string(), "1\n".to_string()),
                ("file_1.py".to_string(), "2\n".to_string()),
            ]
        );
    }

    #[test]
    fn unterminated_tagged_file_is_closed_on_finish() {
        let mut parser = CodeStreamParser::new();
        let out = collect_chunks(&mut parser, &["<file path=\"a.txt\">partial"]);

        assert_eq!(
            out.extracted,
            vec![
                start("a.txt"),
                content("a.txt", "partial"),
                end("a.txt", "partial"),
            ]
        );
        assert_eq!(
            parser.take_anomalies(),
            vec![ParseAnomaly::UnterminatedFile {
                path: "a.txt".to_string()
            }]
        );
        assert_eq!(parser.state().mode().kind(), ModeKind::Chat);
    }

    #[test]
    fn unterminated_fence_keeps_held_back_backticks() {
        let mut parser = CodeStreamParser::new();
        let out = collect_chunks(&mut parser, &["```sh\necho hi\n``"]);

        assert_eq!(
            out.extracted,
            vec![
                start("file_1.sh"),
                content("file_1.sh", "echo hi\n"),
                content("file_1.sh", "``"),
                end("file_1.sh", "echo hi\n``"),
            ]
        );
    }

    #[test]
    fn nested_open_marker_closes_the_open_file() {
        let mut parser = CodeStreamParser::new();
        let out = collect_chunks(
            &mut parser,
            &["<file path=\"a.rs\">fn a() {}\n<file path=\"b.rs\">fn b() {}\n</file>"],
        );

        assert_eq!(
            out.extracted,
            vec![
                start("a.rs"),
                content("a.rs", "fn a() {}\n"),
                end("a.rs", "fn a() {}\n"),
                start("b.rs"),
                content("b.rs", "fn b() {}\n"),
                end("b.rs", "fn b() {}\n"),
            ]
        );
        assert_eq!(
            parser.take_anomalies(),
            vec![ParseAnomaly::NestedFileOpen {
                open_path: "a.rs".to_string(),
                new_path: "b.rs".to_string(),
            }]
        );
    }

    #[test]
    fn anomalies_and_grammar_switches_are_fragmentation_invariant() {
        for text in [
            "<file path=\"a.rs\">fn a() {}\n<file path=\"b.rs\">fn b() {}\n</file>",
            "Here:\n<file path=\"a.txt\">partial",
            "<file path=\"a.rs\">x\n</file>\n```python\ny\n```\n",
            "Creating `run.sh`:\r\n```bash\r\necho hi\r\n```\r\nok",
        ] {
            assert_fragmentation_invariant(text);
        }
    }

    #[test]
    fn long_announcement_is_split_invariant() {
        let text = format!("a creatingx acreating `{}.py`\n```\ny\n```", "p".repeat(1075));

        assert_split_invariant(&text);
        assert_eq!(
            extract_files(&text),
            vec![("file_1.txt".to_string(), "y\n".to_string())]
        );
    }

    #[test]
    fn fences_inside_tagged_file_are_content() {
        let text = "<file path=\"README.md\">```sh\nmake\n```\n</file>";
        assert_eq!(
            extract_files(text),
            vec![("README.md".to_string(), "```sh\nmake\n```\n".to_string())]
        );
    }

    #[test]
    fn fences_are_plain_text_once_tagged_markers_appear() {
        let text = "<file path=\"a.txt\">a</file>\nExample:\n```python\nx\n```\n";
        assert_eq!(
            parse_complete_response(text),
            vec![
                start("a.txt"),
                content("a.txt", "a"),
                end("a.txt", "a"),
                chat("\nExample:\n```python\nx\n```\n"),
            ]
        );
    }

    #[test]
    fn tagged_markers_inside_fenced_file_are_content() {
        let text = "```html\n<file path=\"x\">\n</file>\n```\n";
        assert_eq!(
            extract_files(text),
            vec![(
                "file_1.html".to_string(),
                "<file path=\"x\">\n</file>\n".to_string()
            )]
        );
    }

    #[test]
    fn backticks_mid_line_do_not_close_a_fence() {
        let text = "```js\nconst s = \"```\";\n```\nok";
        assert_eq!(
            extract_files(text),
            vec![("file_1.js".to_string(), "const s = \"```\";\n".to_string())]
        );
        assert_fragmentation_invariant(text);
    }

    #[test]
    fn lone_backtick_is_held_back() {
        let mut parser = CodeStreamParser::new();
        let out = parser.push_str("Creating `");

        assert_eq!(out.extracted, vec![chat("Creating ")]);
        assert_eq!(parser.buffered_len(), 1);

        let out = parser.push_str("x.py` now");
        assert_eq!(out.extracted, vec![chat("`x.py` now")]);
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn partial_open_tag_is_held_back_whole() {
        let mut parser = CodeStreamParser::new();
        let out = parser.push_str("text <file pa");

        assert_eq!(out.visible_text, "text ");
        assert_eq!(parser.buffered_len(), "<file pa".len());
    }

    #[test]
    fn look_back_buffer_stays_bounded() {
        let mut parser = CodeStreamParser::new();
        let mut visible = parser.push_str("<file path=\"").visible_text;
        for _ in 0..MAX_MARKER_LEN {
            visible.push_str(&parser.push_str("a").visible_text);
            assert!(parser.buffered_len() < MAX_MARKER_LEN);
        }
        visible.push_str(&parser.finish().visible_text);

        assert_eq!(
            visible,
            format!("<file path=\"{}", "a".repeat(MAX_MARKER_LEN))
        );
    }

    #[test]
    fn no_bytes_lost_except_markers() {
        let text = "Intro <b>bold</b>\n<file path=\"é.txt\">中文 `x`\n</file>\nbye";
        let mut parser = CodeStreamParser::new();
        let out = collect_chunks(&mut parser, &[text]);

        let mut rebuilt = String::new();
        for event in &out.extracted {
            match event {
                StreamEvent::ChatContent { text } | StreamEvent::FileContent { text, .. } => {
                    rebuilt.push_str(text);
                }
                StreamEvent::FileStart { .. } | StreamEvent::FileEnd { .. } => {}
            }
        }
        let without_markers = text
            .replace("<file path=\"é.txt\">", "")
            .replace("</file>", "");
        assert_eq!(rebuilt, without_markers);
        assert_fragmentation_invariant(text);
    }

    #[test]
    fn file_end_matches_concatenated_chunks() {
        let text = "<file path=\"lib.rs\">pub fn one() {}\npub fn two() {}\n</file>";
        let mut parser = CodeStreamParser::new();
        let chunks: Vec<&str> = text
            .as_bytes()
            .chunks(5)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .collect();
        let out = collect_chunks(&mut parser, &chunks);

        let mut streamed = String::new();
        let mut full = None;
        for event in out.extracted {
            match event {
                StreamEvent::FileContent { text, .. } => streamed.push_str(&text),
                StreamEvent::FileEnd { content, .. } => full = Some(content),
                StreamEvent::ChatContent { .. } | StreamEvent::FileStart { .. } => {}
            }
        }
        assert_eq!(Some(streamed), full);
    }

    #[test]
    fn strip_file_blocks_keeps_only_chat() {
        assert_eq!(strip_file_blocks(TAGGED_RESPONSE), "Sure, here's main.py:\n\nDone.");
    }

    #[test]
    fn reset_restarts_the_counter() {
        let mut parser = CodeStreamParser::new();
        collect_chunks(&mut parser, &["```\na\n```\n"]);
        assert_eq!(parser.state().file_counter(), 2);

        parser.reset();

        assert_eq!(parser.state().file_counter(), 1);
        let out = collect_chunks(&mut parser, &["```\nb\n```\n"]);
        assert_eq!(out.extracted[0], start("file_1.txt"));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(content("a.py", "x")).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"type": "file_content", "path": "a.py", "text": "x"})
        );
    }
}
