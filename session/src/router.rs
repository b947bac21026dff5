use codeforge_protocol::ServerMessage;
use codeforge_utils_stream_parser::CodeStreamParser;
use codeforge_utils_stream_parser::ParseAnomaly;
use codeforge_utils_stream_parser::StreamEvent;
use codeforge_utils_stream_parser::StreamTextChunk;
use codeforge_utils_stream_parser::StreamTextParser;
use tracing::debug;
use tracing::info;

/// Everything a session consumer observes, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected {
        session_id: String,
    },
    ResponseStarted {
        response_id: Option<String>,
    },
    Stream(StreamEvent),
    Anomaly(ParseAnomaly),
    ResponseCompleted {
        response_id: Option<String>,
    },
    /// The in-flight response was abandoned; no further events belong to it.
    ResponseAborted,
    QuotaExceeded {
        message: String,
    },
    ServerError {
        message: String,
        fatal: bool,
    },
    /// The connection closed abnormally.
    Disconnected {
        reason: String,
    },
    Reconnecting {
        attempt: u32,
    },
}

struct LiveResponse {
    response_id: Option<String>,
    parser: CodeStreamParser,
}

/// Maps server messages to session events and owns the classifier of the
/// response currently streaming. A classifier never outlives its response.
#[derive(Default)]
pub struct ResponseRouter {
    live: Option<LiveResponse>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_streaming(&self) -> bool {
        self.live.is_some()
    }

    pub fn handle(&mut self, message: ServerMessage) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match message {
            ServerMessage::ConnectionEstablished { session_id } => {
                info!(%session_id, "session established");
                events.push(SessionEvent::Connected { session_id });
            }
            ServerMessage::ResponseStarted { response_id } => {
                events.extend(self.abort_response());
                self.start(response_id, &mut events);
            }
            ServerMessage::Token { content } => {
                if self.live.is_none() {
                    debug!("token arrived before response_started; starting a response");
                    self.start(None, &mut events);
                }
                let Some(live) = self.live.as_mut() else {
                    return events;
                };
                let chunk = live.parser.push_str(&content);
                let anomalies = live.parser.take_anomalies();
                push_chunk(&mut events, chunk, anomalies);
            }
            ServerMessage::ResponseComplete { response_id } => match self.live.take() {
                Some(mut live) => {
                    let chunk = live.parser.finish();
                    let anomalies = live.parser.take_anomalies();
                    push_chunk(&mut events, chunk, anomalies);
                    events.push(SessionEvent::ResponseCompleted {
                        response_id: response_id.or(live.response_id),
                    });
                }
                None => {
                    debug!("response_complete without a live response");
                    events.push(SessionEvent::ResponseCompleted { response_id });
                }
            },
            ServerMessage::QuotaExceeded { message } => {
                events.extend(self.abort_response());
                events.push(SessionEvent::QuotaExceeded { message });
            }
            ServerMessage::Error { message, fatal } => {
                if fatal {
                    events.extend(self.abort_response());
                }
                events.push(SessionEvent::ServerError { message, fatal });
            }
        }
        events
    }

    /// Discards the live response without flushing held-back text. Used when
    /// the user cancels or sends a new message.
    pub fn abort_response(&mut self) -> Option<SessionEvent> {
        let live = self.live.take()?;
        debug!(
            response_id = ?live.response_id,
            "discarding classifier state of aborted response"
        );
        Some(SessionEvent::ResponseAborted)
    }

    /// Same as [`ResponseRouter::abort_response`]; a replayed response after
    /// reconnecting starts from a fresh classifier.
    pub fn connection_lost(&mut self) -> Option<SessionEvent> {
        self.abort_response()
    }

    fn start(&mut self, response_id: Option<String>, events: &mut Vec<SessionEvent>) {
        self.live = Some(LiveResponse {
            response_id: response_id.clone(),
            parser: CodeStreamParser::new(),
        });
        events.push(SessionEvent::ResponseStarted { response_id });
    }
}

fn push_chunk(
    events: &mut Vec<SessionEvent>,
    chunk: StreamTextChunk<StreamEvent>,
    anomalies: Vec<ParseAnomaly>,
) {
    events.extend(chunk.extracted.into_iter().map(SessionEvent::Stream));
    events.extend(anomalies.into_iter().map(SessionEvent::Anomaly));
}
