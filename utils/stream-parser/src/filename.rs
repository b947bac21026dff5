//! File names for fenced blocks.
//!
//! A fenced block does not carry a path. The name comes from the most recent
//! "Creating `path`" announcement in the chat text before the fence, or is
//! generated from the fence language and a per-response counter.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::markers::MAX_PATH_LEN;

/// Extension used when the fence language is absent or unknown.
pub const DEFAULT_EXTENSION: &str = "txt";

const MAX_HINT_PADDING: usize = 16;
const MAX_HINT_EXTENSION_LEN: usize = 16;

// Longest announcement in bytes: the verb, its padding, two delimiters and a
// path of at most `MAX_PATH_LEN` chars plus an extension, each char taking up
// to four bytes.
const MAX_HINT_LEN: usize =
    "creating".len() + MAX_HINT_PADDING + 2 + 4 * (MAX_PATH_LEN + 1 + MAX_HINT_EXTENSION_LEN);

static FILENAME_HINT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    let path = format!(
        r#"[^`'"\s]{{1,{MAX_PATH_LEN}}}\.[A-Za-z0-9]{{1,{MAX_HINT_EXTENSION_LEN}}}"#
    );
    compile_regex(&format!(
        r#"(?i)\bcreating[ \t]{{1,{MAX_HINT_PADDING}}}(?:`({path})`|'({path})'|"({path})")"#
    ))
});

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Panic is ok thanks to `filename_hint_regex_compiles` test.
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// Maps a fence language tag to a file extension.
pub fn extension_for_language(language: Option<&str>) -> &'static str {
    let Some(language) = language else {
        return DEFAULT_EXTENSION;
    };
    match language.to_ascii_lowercase().as_str() {
        "python" | "py" => "py",
        "javascript" | "js" | "node" => "js",
        "typescript" | "ts" => "ts",
        "tsx" => "tsx",
        "jsx" => "jsx",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "sql" => "sql",
        "bash" | "sh" | "shell" | "zsh" => "sh",
        "rust" | "rs" => "rs",
        "go" | "golang" => "go",
        "java" => "java",
        "c" => "c",
        "cpp" | "c++" => "cpp",
        "ruby" | "rb" => "rb",
        "markdown" | "md" => "md",
        "xml" => "xml",
        _ => DEFAULT_EXTENSION,
    }
}

/// Resolves the path for a fenced block.
///
/// A pending hint is consumed and returned as is. Otherwise the name is
/// `file_{counter}.{ext}` and the counter advances, so generated names never
/// repeat within one response.
pub fn resolve_filename(
    pending_hint: &mut Option<String>,
    fence_language: Option<&str>,
    counter: &mut u64,
) -> String {
    if let Some(hint) = pending_hint.take() {
        return hint;
    }
    let path = format!("file_{counter}.{}", extension_for_language(fence_language));
    *counter += 1;
    path
}

/// Watches chat text for filename announcements.
///
/// Text is observed in the order it is flushed. Announcements never span a
/// line and have a bounded length, so only the tail of the unfinished line
/// is retained, which makes the result independent of how the text was
/// fragmented. The retained text starts with one char of context that is
/// never itself the start of a match.
#[derive(Debug, Default)]
pub(crate) struct FilenameHintScanner {
    line: String,
    search_from: usize,
}

impl FilenameHintScanner {
    /// Returns the last announcement completed by `text`, if any.
    pub(crate) fn observe(&mut self, text: &str) -> Option<String> {
        self.line.push_str(text);

        let mut hint = None;
        let mut keep_from = self.search_from;
        while let Some(captures) = FILENAME_HINT_REGEX.captures_at(&self.line, keep_from) {
            let Some(whole) = captures.get(0) else {
                break;
            };
            if let Some(path) = captures
                .get(1)
                .or_else(|| captures.get(2))
                .or_else(|| captures.get(3))
            {
                hint = Some(path.as_str().to_string());
            }
            keep_from = whole.end();
        }

        if let Some(newline) = self.line[keep_from..].rfind('\n') {
            keep_from += newline + 1;
        }
        let overflow = self.line.len().saturating_sub(MAX_HINT_LEN);
        if overflow > keep_from {
            keep_from = overflow;
            while !self.line.is_char_boundary(keep_from) {
                keep_from += 1;
            }
        }

        let context_start = self.line[..keep_from]
            .char_indices()
            .next_back()
            .map_or(keep_from, |(idx, _)| idx);
        self.line.drain(..context_start);
        self.search_from = keep_from - context_start;

        hint
    }
}
