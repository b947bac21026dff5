use std::io;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use codeforge_session::ChatSession;
use codeforge_session::SessionConfig;
use codeforge_session::SessionEvent;
use codeforge_session::SessionHandle;
use codeforge_session::StaticToken;
use codeforge_session::Workbench;
use codeforge_session::WriteReport;
use codeforge_session::api_token_from_env;
use codeforge_utils_stream_parser::StreamEvent;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tracing::warn;

use crate::cli::ChatArgs;

const QUIT_COMMAND: &str = "/quit";
const ABORT_COMMAND: &str = "/abort";

pub async fn run_chat(args: ChatArgs) -> anyhow::Result<()> {
    let ChatArgs {
        url,
        token,
        write_dir,
    } = args;

    let mut config = SessionConfig::load()?;
    if url.is_some() {
        config.url = url;
    }
    let auth = Arc::new(StaticToken::new(token.or_else(api_token_from_env)));
    let mut session = ChatSession::connect(config, auth)
        .await
        .context("failed to start chat session")?;
    let input_task = tokio::spawn(forward_stdin(session.handle()));

    let mut workbench = Workbench::new();
    while let Some(event) = session.next_event().await {
        if let Err(err) = workbench.apply(&event) {
            warn!("{err}");
        }
        render_session_event(&event, &mut io::stdout().lock(), &mut io::stderr().lock())?;

        if matches!(event, SessionEvent::ResponseCompleted { .. })
            && let Some(dir) = &write_dir
        {
            render_write_report(&workbench.write_files(dir), &mut io::stderr().lock())?;
        }
    }

    input_task.abort();
    session.join().await.context("chat session failed")?;
    Ok(())
}

/// Sends every non-empty stdin line as a user turn. `/abort` cancels the
/// streaming response and `/quit` ends the session.
async fn forward_stdin(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let result = match line.trim() {
            "" => continue,
            QUIT_COMMAND => {
                handle.shutdown().await;
                return;
            }
            ABORT_COMMAND => handle.abort().await,
            _ => handle.send_message(line).await,
        };
        if let Err(err) = result {
            warn!("failed to send to the session: {err}");
        }
    }
}

/// A file that cannot be written is reported and the session goes on.
fn render_write_report(report: &WriteReport, status: &mut impl Write) -> io::Result<()> {
    for path in &report.written {
        writeln!(status, "[saved {}]", path.display())?;
    }
    for err in &report.failed {
        writeln!(status, "[not saved: {err}]")?;
    }
    Ok(())
}

/// Chat text goes to `out`; status lines go to `status`.
fn render_session_event(
    event: &SessionEvent,
    out: &mut impl Write,
    status: &mut impl Write,
) -> io::Result<()> {
    match event {
        SessionEvent::Connected { session_id } => writeln!(status, "[connected: {session_id}]")?,
        SessionEvent::Stream(StreamEvent::ChatContent { text }) => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        SessionEvent::Stream(StreamEvent::FileStart { path }) => {
            writeln!(status, "[writing {path}]")?;
        }
        SessionEvent::Stream(StreamEvent::FileEnd { path, content }) => {
            writeln!(status, "[finished {path}: {} bytes]", content.len())?;
        }
        SessionEvent::ResponseCompleted { .. } => writeln!(out)?,
        SessionEvent::ResponseAborted => writeln!(status, "[response aborted]")?,
        SessionEvent::Anomaly(anomaly) => writeln!(status, "warning: {anomaly}")?,
        SessionEvent::QuotaExceeded { message } => {
            writeln!(status, "quota exceeded: {message}")?;
        }
        SessionEvent::ServerError { message, .. } => writeln!(status, "server error: {message}")?,
        SessionEvent::Disconnected { reason } => writeln!(status, "[disconnected: {reason}]")?,
        SessionEvent::Reconnecting { attempt } => {
            writeln!(status, "[reconnecting, attempt {attempt}]")?;
        }
        SessionEvent::ResponseStarted { .. }
        | SessionEvent::Stream(StreamEvent::FileContent { .. }) => {}
    }
    Ok(())
}
