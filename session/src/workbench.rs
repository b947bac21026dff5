//! Consumer-side model of a session: the chat transcript, the editor
//! buffers and the file tree refresh signal.

use std::collections::BTreeMap;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use codeforge_utils_stream_parser::ParseAnomaly;
use codeforge_utils_stream_parser::StreamEvent;
use tracing::debug;
use tracing::warn;

use crate::error::WorkbenchError;
use crate::router::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptMessage {
    pub role: Role,
    pub text: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Content is still arriving; the buffer is read-only.
    Streaming,
    Complete,
    /// The response ended before the file closed (abort or lost connection).
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorBuffer {
    pub path: String,
    pub content: String,
    pub status: BufferStatus,
}

impl EditorBuffer {
    pub fn is_read_only(&self) -> bool {
        self.status == BufferStatus::Streaming
    }
}

/// Outcome of [`Workbench::write_files`].
#[derive(Debug, Default)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<WorkbenchError>,
}

/// Applies session events strictly in order.
#[derive(Debug, Default)]
pub struct Workbench {
    transcript: Vec<TranscriptMessage>,
    buffers: BTreeMap<String, EditorBuffer>,
    file_tree_refreshes: u64,
    anomalies: Vec<ParseAnomaly>,
    notices: Vec<String>,
}

impl Workbench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &[TranscriptMessage] {
        &self.transcript
    }

    pub fn buffer(&self, path: &str) -> Option<&EditorBuffer> {
        self.buffers.get(path)
    }

    /// Buffers sorted by path.
    pub fn buffers(&self) -> impl Iterator<Item = &EditorBuffer> {
        self.buffers.values()
    }

    /// Number of times the project file list should have been refreshed.
    pub fn file_tree_refreshes(&self) -> u64 {
        self.file_tree_refreshes
    }

    pub fn anomalies(&self) -> &[ParseAnomaly] {
        &self.anomalies
    }

    /// Quota and server error messages, oldest first.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn push_user_message(&mut self, text: impl Into<String>) {
        self.transcript.push(TranscriptMessage {
            role: Role::User,
            text: text.into(),
            status: MessageStatus::Complete,
        });
    }

    pub fn apply(&mut self, event: &SessionEvent) -> Result<(), WorkbenchError> {
        match event {
            SessionEvent::ResponseStarted { .. } => self.start_agent_message(),
            SessionEvent::Stream(event) => self.apply_stream_event(event)?,
            SessionEvent::Anomaly(anomaly) => self.anomalies.push(anomaly.clone()),
            SessionEvent::ResponseCompleted { .. } => {
                self.finish_agent_message(MessageStatus::Complete);
            }
            SessionEvent::ResponseAborted | SessionEvent::Disconnected { .. } => {
                self.finish_agent_message(MessageStatus::Aborted);
                self.interrupt_streaming_buffers();
            }
            SessionEvent::QuotaExceeded { message } => {
                self.notices.push(format!("quota exceeded: {message}"));
            }
            SessionEvent::ServerError { message, .. } => {
                self.notices.push(format!("server error: {message}"));
            }
            SessionEvent::Connected { .. } | SessionEvent::Reconnecting { .. } => {}
        }
        Ok(())
    }

    pub fn apply_stream_event(&mut self, event: &StreamEvent) -> Result<(), WorkbenchError> {
        match event {
            StreamEvent::ChatContent { text } => self.agent_message().text.push_str(text),
            StreamEvent::FileStart { path } => {
                debug!(%path, "opening streaming buffer");
                self.buffers.insert(
                    path.clone(),
                    EditorBuffer {
                        path: path.clone(),
                        content: String::new(),
                        status: BufferStatus::Streaming,
                    },
                );
            }
            StreamEvent::FileContent { path, text } => {
                self.streaming_buffer(path)?.content.push_str(text);
            }
            StreamEvent::FileEnd { path, content } => {
                let buffer = self.streaming_buffer(path)?;
                buffer.content.clone_from(content);
                buffer.status = BufferStatus::Complete;
                self.file_tree_refreshes += 1;
            }
        }
        Ok(())
    }

    /// Writes every complete buffer under `dir`. Each buffer is handled on
    /// its own: paths that are absolute or climb out of `dir` are skipped,
    /// and a failed write does not stop the remaining buffers.
    pub fn write_files(&self, dir: &Path) -> WriteReport {
        let mut report = WriteReport::default();
        for buffer in self.buffers.values() {
            if buffer.status != BufferStatus::Complete {
                continue;
            }
            match write_buffer(dir, buffer) {
                Ok(target) => report.written.push(target),
                Err(err) => {
                    warn!("skipping `{}`: {err}", buffer.path);
                    report.failed.push(err);
                }
            }
        }
        report
    }

    fn start_agent_message(&mut self) {
        self.transcript.push(TranscriptMessage {
            role: Role::Agent,
            text: String::new(),
            status: MessageStatus::Streaming,
        });
    }

    fn agent_message(&mut self) -> &mut TranscriptMessage {
        let streaming = self.transcript.last().is_some_and(|message| {
            message.role == Role::Agent && message.status == MessageStatus::Streaming
        });
        if !streaming {
            self.start_agent_message();
        }
        let last = self.transcript.len() - 1;
        &mut self.transcript[last]
    }

    fn finish_agent_message(&mut self, status: MessageStatus) {
        if let Some(message) = self.transcript.last_mut()
            && message.role == Role::Agent
            && message.status == MessageStatus::Streaming
        {
            message.status = status;
        }
    }

    fn interrupt_streaming_buffers(&mut self) {
        for buffer in self.buffers.values_mut() {
            if buffer.status == BufferStatus::Streaming {
                buffer.status = BufferStatus::Interrupted;
            }
        }
    }

    fn streaming_buffer(&mut self, path: &str) -> Result<&mut EditorBuffer, WorkbenchError> {
        match self.buffers.get_mut(path) {
            Some(buffer) if buffer.status == BufferStatus::Streaming => Ok(buffer),
            Some(_) | None => Err(WorkbenchError::UnknownBuffer {
                path: path.to_string(),
            }),
        }
    }
}

fn write_buffer(dir: &Path, buffer: &EditorBuffer) -> Result<PathBuf, WorkbenchError> {
    if !is_contained_relative_path(&buffer.path) {
        return Err(WorkbenchError::UnsafePath {
            path: buffer.path.clone(),
        });
    }
    let target = dir.join(&buffer.path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| WorkbenchError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(&target, &buffer.content).map_err(|source| WorkbenchError::Write {
        path: target.clone(),
        source,
    })?;
    Ok(target)
}

fn is_contained_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
