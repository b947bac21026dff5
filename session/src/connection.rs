use std::sync::Once;

use codeforge_protocol::ClientMessage;
use codeforge_protocol::ServerMessage;
use codeforge_protocol::parse_server_message;
use futures::SinkExt;
use futures::StreamExt;
use http::HeaderMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;
use tracing::info;
use tracing::trace;
use url::Url;

use crate::auth::AuthProvider;
use crate::auth::apply_auth_headers;
use crate::error::SessionError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the frame pump hands to the session: a decoded server message,
/// `Ok(None)` for a clean close, or the error that ended the connection.
type Inbound = Result<Option<ServerMessage>, SessionError>;

enum Outbound {
    Payload {
        payload: String,
        tx_result: oneshot::Sender<Result<(), SessionError>>,
    },
    Close {
        tx_result: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Owns the socket inside its own task. Outgoing payloads and incoming frames
/// are multiplexed so pings are answered and frames keep flowing while the
/// session is busy elsewhere.
struct FramePump {
    socket: Socket,
    rx_outbound: mpsc::Receiver<Outbound>,
    tx_inbound: mpsc::UnboundedSender<Inbound>,
}

impl FramePump {
    async fn run(mut self) {
        loop {
            let keep_running = tokio::select! {
                outbound = self.rx_outbound.recv() => match outbound {
                    Some(outbound) => self.write(outbound).await,
                    None => false,
                },
                frame = self.socket.next() => self.read(frame).await,
            };
            if !keep_running {
                break;
            }
        }
    }

    async fn write(&mut self, outbound: Outbound) -> bool {
        match outbound {
            Outbound::Payload { payload, tx_result } => {
                trace!("session websocket request: {payload}");
                let result = self
                    .socket
                    .send(Message::Text(payload.into()))
                    .await
                    .map_err(SessionError::from);
                let sent = result.is_ok();
                let _ = tx_result.send(result);
                sent
            }
            Outbound::Close { tx_result } => {
                let result = match self.socket.close(None).await {
                    Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
                    Err(err) => Err(err.into()),
                };
                let _ = tx_result.send(result);
                false
            }
        }
    }

    /// Forwards whatever `frame` means to the session. Returns false once the
    /// connection is over.
    async fn read(&mut self, frame: Option<Result<Message, WsError>>) -> bool {
        let inbound = match frame {
            Some(Ok(Message::Text(text))) => {
                trace!("session websocket event: {text}");
                match parse_server_message(&text) {
                    Some(message) => Ok(Some(message)),
                    None => return true,
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                match self.socket.send(Message::Pong(payload)).await {
                    Ok(()) => return true,
                    Err(err) => Err(lost(format!("failed to answer ping: {err}"))),
                }
            }
            Some(Ok(Message::Binary(_))) => {
                debug!("ignoring binary session websocket frame");
                return true;
            }
            Some(Ok(Message::Pong(_) | Message::Frame(_))) => return true,
            Some(Ok(Message::Close(frame))) => close_outcome(frame),
            Some(Err(err)) => Err(lost(err.to_string())),
            None => Err(lost("connection dropped without a close frame".to_string())),
        };
        let is_message = matches!(inbound, Ok(Some(_)));
        self.tx_inbound.send(inbound).is_ok() && is_message
    }
}

fn lost(reason: String) -> SessionError {
    SessionError::ConnectionLost { reason }
}

/// One websocket connection to the agent service.
pub struct SessionConnection {
    tx_outbound: mpsc::Sender<Outbound>,
    rx_inbound: mpsc::UnboundedReceiver<Inbound>,
    pump_task: JoinHandle<()>,
    is_closed: bool,
}

impl SessionConnection {
    pub async fn connect(url: &Url, auth: &dyn AuthProvider) -> Result<Self, SessionError> {
        ensure_rustls_crypto_provider();
        let connect_error = |err: WsError| SessionError::Connect {
            url: url.to_string(),
            source: Box::new(err),
        };
        let mut request = url.as_str().into_client_request().map_err(connect_error)?;
        let mut headers = HeaderMap::new();
        apply_auth_headers(auth, &mut headers);
        request.headers_mut().extend(headers);

        info!("connecting session websocket: {url}");
        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(connect_error)?;

        let (tx_outbound, rx_outbound) = mpsc::channel(32);
        let (tx_inbound, rx_inbound) = mpsc::unbounded_channel();
        let pump = FramePump {
            socket,
            rx_outbound,
            tx_inbound,
        };
        Ok(Self {
            tx_outbound,
            rx_inbound,
            pump_task: tokio::spawn(pump.run()),
            is_closed: false,
        })
    }

    pub async fn send(&self, message: &ClientMessage) -> Result<(), SessionError> {
        if self.is_closed {
            return Err(SessionError::Closed);
        }
        let payload = message.to_json()?;
        self.request(|tx_result| Outbound::Payload { payload, tx_result })
            .await
    }

    /// Returns the next server message in arrival order.
    ///
    /// `Ok(None)` means the server closed the connection cleanly. A dropped
    /// socket or a close frame with an error code is reported as
    /// [`SessionError::ConnectionLost`].
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>, SessionError> {
        if self.is_closed {
            return Ok(None);
        }
        let inbound = self
            .rx_inbound
            .recv()
            .await
            .unwrap_or_else(|| Err(lost("session websocket pump stopped".to_string())));
        if !matches!(inbound, Ok(Some(_))) {
            self.is_closed = true;
        }
        inbound
    }

    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.is_closed {
            return Ok(());
        }
        self.is_closed = true;
        match self.request(|tx_result| Outbound::Close { tx_result }).await {
            Err(SessionError::Closed) => Ok(()),
            result => result,
        }
    }

    /// A pump that is already gone reports [`SessionError::Closed`].
    async fn request(
        &self,
        make_outbound: impl FnOnce(oneshot::Sender<Result<(), SessionError>>) -> Outbound,
    ) -> Result<(), SessionError> {
        let (tx_result, rx_result) = oneshot::channel();
        if self.tx_outbound.send(make_outbound(tx_result)).await.is_err() {
            return Err(SessionError::Closed);
        }
        rx_result.await.unwrap_or(Err(SessionError::Closed))
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.pump_task.abort();
    }
}

fn close_outcome(frame: Option<CloseFrame>) -> Result<Option<ServerMessage>, SessionError> {
    match frame {
        None => Ok(None),
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => Ok(None),
        Some(frame) => Err(SessionError::ConnectionLost {
            reason: format!("server closed with {}: {}", frame.code, frame.reason),
        }),
    }
}

/// Normalizes the configured endpoint into a websocket URL. `http(s)` is
/// mapped to `ws(s)` and an empty path becomes `/ws`.
pub fn websocket_url(raw: &str) -> Result<Url, SessionError> {
    let invalid = |reason: String| SessionError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let mut url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        scheme => return Err(invalid(format!("unsupported scheme `{scheme}`"))),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(invalid(format!("cannot switch scheme to `{scheme}`")));
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/ws");
    }
    Ok(url)
}

fn ensure_rustls_crypto_provider() {
    static RUSTLS_PROVIDER_INIT: Once = Once::new();
    RUSTLS_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
