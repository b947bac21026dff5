use std::io;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use codeforge_session::SessionEvent;
use codeforge_session::Workbench;
use codeforge_utils_stream_parser::CodeStreamParser;
use codeforge_utils_stream_parser::ParseAnomaly;
use codeforge_utils_stream_parser::StreamEvent;
use codeforge_utils_stream_parser::StreamTextParser;

use crate::cli::ReplayArgs;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub events: Vec<StreamEvent>,
    pub anomalies: Vec<ParseAnomaly>,
}

/// Feeds `text` through a fresh classifier `chunk_size` characters at a time.
pub fn replay_text(text: &str, chunk_size: usize) -> ReplayOutcome {
    let mut parser = CodeStreamParser::new();
    let mut events = Vec::new();
    for fragment in fragments(text, chunk_size) {
        events.extend(parser.push_str(fragment).extracted);
    }
    events.extend(parser.finish().extracted);
    ReplayOutcome {
        events,
        anomalies: parser.take_anomalies(),
    }
}

fn fragments(text: &str, chunk_size: usize) -> Vec<&str> {
    if chunk_size == 0 {
        return vec![text];
    }
    let mut out = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % chunk_size == 0 {
            out.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Writes the transcript with a one-line note per finished file, or one JSON
/// object per event.
pub fn render_events(events: &[StreamEvent], json: bool, out: &mut impl Write) -> io::Result<()> {
    for event in events {
        if json {
            let line = serde_json::to_string(event).map_err(io::Error::other)?;
            writeln!(out, "{line}")?;
            continue;
        }
        match event {
            StreamEvent::ChatContent { text } => write!(out, "{text}")?,
            StreamEvent::FileEnd { path, content } => {
                writeln!(out, "[file {path}: {} bytes]", content.len())?;
            }
            StreamEvent::FileStart { .. } | StreamEvent::FileContent { .. } => {}
        }
    }
    out.flush()
}

pub fn run_replay(args: ReplayArgs) -> anyhow::Result<()> {
    let ReplayArgs {
        input,
        chunk_size,
        json,
        write_dir,
    } = args;

    let text = read_input(&input)?;
    let outcome = replay_text(&text, chunk_size);

    render_events(&outcome.events, json, &mut io::stdout().lock())
        .context("failed to write replay output")?;

    let mut stderr = io::stderr().lock();
    for anomaly in &outcome.anomalies {
        writeln!(stderr, "warning: {anomaly}")?;
    }

    if let Some(dir) = write_dir {
        let mut workbench = Workbench::new();
        for event in outcome.events {
            workbench.apply(&SessionEvent::Stream(event))?;
        }
        let report = workbench.write_files(&dir);
        for path in &report.written {
            writeln!(stderr, "wrote {}", path.display())?;
        }
        for err in &report.failed {
            writeln!(stderr, "warning: {err}")?;
        }
        if !report.failed.is_empty() {
            anyhow::bail!(
                "{} file(s) could not be written under {}",
                report.failed.len(),
                dir.display()
            );
        }
    }
    Ok(())
}

fn read_input(input: &Path) -> anyhow::Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read response from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(input)
        .with_context(|| format!("failed to read response from {}", input.display()))
}
