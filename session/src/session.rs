use std::sync::Arc;

use codeforge_protocol::ClientMessage;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::auth::AuthProvider;
use crate::config::SessionConfig;
use crate::connection::SessionConnection;
use crate::connection::websocket_url;
use crate::error::SessionError;
use crate::router::ResponseRouter;
use crate::router::SessionEvent;

enum SessionCommand {
    SendMessage {
        content: String,
        tx_result: oneshot::Sender<Result<(), SessionError>>,
    },
    Abort {
        tx_result: oneshot::Sender<Result<(), SessionError>>,
    },
    Shutdown,
}

/// Cloneable control surface of a running [`ChatSession`].
#[derive(Clone)]
pub struct SessionHandle {
    tx_command: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Sends a user turn. A response still streaming is aborted first.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<(), SessionError> {
        let content = content.into();
        self.request(|tx_result| SessionCommand::SendMessage { content, tx_result })
            .await
    }

    /// Cancels the in-flight response.
    pub async fn abort(&self) -> Result<(), SessionError> {
        self.request(|tx_result| SessionCommand::Abort { tx_result })
            .await
    }

    /// Closes the connection and ends the session.
    pub async fn shutdown(&self) {
        let _ = self.tx_command.send(SessionCommand::Shutdown).await;
    }

    async fn request(
        &self,
        make_command: impl FnOnce(oneshot::Sender<Result<(), SessionError>>) -> SessionCommand,
    ) -> Result<(), SessionError> {
        let (tx_result, rx_result) = oneshot::channel();
        if self.tx_command.send(make_command(tx_result)).await.is_err() {
            return Err(SessionError::Closed);
        }
        rx_result.await.unwrap_or(Err(SessionError::Closed))
    }
}

/// A live chat session.
///
/// One worker task owns the connection and the response router, so frames
/// are classified strictly in arrival order and events reach the consumer
/// through a single bounded channel in the order they were produced.
pub struct ChatSession {
    handle: SessionHandle,
    rx_event: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl ChatSession {
    /// Connects to the configured endpoint. Failing to connect the first time
    /// is an error; later outages are retried per the reconnect settings.
    pub async fn connect(
        config: SessionConfig,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, SessionError> {
        let Some(raw_url) = config.url.as_deref() else {
            return Err(SessionError::InvalidUrl {
                url: String::new(),
                reason: "no session url configured".to_string(),
            });
        };
        let url = websocket_url(raw_url)?;
        let connection = SessionConnection::connect(&url, auth.as_ref()).await?;

        let (tx_command, rx_command) = mpsc::channel(32);
        let (tx_event, rx_event) = mpsc::channel(config.event_buffer.max(1));
        let worker = SessionWorker {
            url,
            auth,
            config,
            router: ResponseRouter::new(),
            rx_command,
            tx_event,
        };
        let task = tokio::spawn(worker.run(connection));

        Ok(Self {
            handle: SessionHandle { tx_command },
            rx_event,
            task,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Next event, or `None` once the session has ended.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.rx_event.recv().await
    }

    /// Waits for the worker to finish and returns how the session ended.
    /// Undelivered events are dropped.
    pub async fn join(self) -> Result<(), SessionError> {
        let Self { rx_event, task, .. } = self;
        drop(rx_event);
        task.await.unwrap_or(Err(SessionError::Closed))
    }
}

enum PumpExit {
    Shutdown,
    ConsumerGone,
    Fatal,
    ClosedByServer,
    Lost(String),
}

struct SessionWorker {
    url: Url,
    auth: Arc<dyn AuthProvider>,
    config: SessionConfig,
    router: ResponseRouter,
    rx_command: mpsc::Receiver<SessionCommand>,
    tx_event: mpsc::Sender<SessionEvent>,
}

impl SessionWorker {
    async fn run(mut self, mut connection: SessionConnection) -> Result<(), SessionError> {
        loop {
            match self.pump(&mut connection).await {
                PumpExit::Shutdown | PumpExit::ConsumerGone | PumpExit::Fatal => {
                    if let Err(err) = connection.close().await {
                        debug!("failed to close session websocket: {err}");
                    }
                    return Ok(());
                }
                PumpExit::ClosedByServer => {
                    info!("session closed by server");
                    if let Some(event) = self.router.abort_response() {
                        self.emit(event).await;
                    }
                    return Ok(());
                }
                PumpExit::Lost(reason) => {
                    warn!(%reason, "session connection lost");
                    if let Some(event) = self.router.connection_lost()
                        && !self.emit(event).await
                    {
                        return Ok(());
                    }
                    if !self.emit(SessionEvent::Disconnected { reason }).await {
                        return Ok(());
                    }
                    match self.reconnect().await? {
                        Some(reconnected) => connection = reconnected,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn pump(&mut self, connection: &mut SessionConnection) -> PumpExit {
        loop {
            tokio::select! {
                command = self.rx_command.recv() => {
                    let Some(command) = command else {
                        return PumpExit::Shutdown;
                    };
                    let (message, tx_result) = match command {
                        SessionCommand::SendMessage { content, tx_result } => {
                            (ClientMessage::Message { content }, tx_result)
                        }
                        SessionCommand::Abort { tx_result } => (ClientMessage::Abort, tx_result),
                        SessionCommand::Shutdown => return PumpExit::Shutdown,
                    };
                    if let Some(event) = self.router.abort_response()
                        && !self.emit(event).await
                    {
                        return PumpExit::ConsumerGone;
                    }
                    // A failed send surfaces again as a lost connection on the read side.
                    let _ = tx_result.send(connection.send(&message).await);
                }
                message = connection.next_message() => {
                    let message = match message {
                        Ok(Some(message)) => message,
                        Ok(None) => return PumpExit::ClosedByServer,
                        Err(err) => return PumpExit::Lost(err.to_string()),
                    };
                    let fatal = message.is_fatal();
                    for event in self.router.handle(message) {
                        if !self.emit(event).await {
                            return PumpExit::ConsumerGone;
                        }
                    }
                    if fatal {
                        warn!("server reported a fatal error; ending session");
                        return PumpExit::Fatal;
                    }
                }
            }
        }
    }

    /// Waits the fixed delay before each attempt. Returns `None` when the
    /// session is shut down or the consumer goes away meanwhile.
    async fn reconnect(&mut self) -> Result<Option<SessionConnection>, SessionError> {
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempt: u32 = 0;
        loop {
            if max_attempts != 0 && attempt >= max_attempts {
                return Err(SessionError::ReconnectExhausted {
                    attempts: max_attempts,
                });
            }
            attempt = attempt.saturating_add(1);
            if !self.emit(SessionEvent::Reconnecting { attempt }).await {
                return Ok(None);
            }

            let delay = tokio::time::sleep(self.config.reconnect_delay);
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    () = &mut delay => break,
                    command = self.rx_command.recv() => match command {
                        None | Some(SessionCommand::Shutdown) => return Ok(None),
                        Some(
                            SessionCommand::SendMessage { tx_result, .. }
                            | SessionCommand::Abort { tx_result },
                        ) => {
                            let _ = tx_result.send(Err(SessionError::Closed));
                        }
                    },
                }
            }

            match SessionConnection::connect(&self.url, self.auth.as_ref()).await {
                Ok(connection) => {
                    info!(attempt, "session reconnected");
                    return Ok(Some(connection));
                }
                Err(err) => warn!(attempt, "reconnect failed: {err}"),
            }
        }
    }

    /// Returns false when the consumer dropped its receiver.
    async fn emit(&self, event: SessionEvent) -> bool {
        self.tx_event.send(event).await.is_ok()
    }
}
