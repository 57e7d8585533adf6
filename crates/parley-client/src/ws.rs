//! WebSocket transport.
//!
//! [`WsTransport`] upgrades with the bearer credential in the request headers
//! and bridges the socket to a [`TransportLink`] with one task. Ping/pong is
//! answered by tungstenite; STOMP heart-beats travel as ordinary text
//! messages and are handled by the session.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::debug;

use crate::{
    config::DEFAULT_CHANNEL_CAPACITY,
    transport::{ConnectRequest, Transport, TransportError, TransportEvent, TransportLink},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a STOMP-over-WebSocket endpoint (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    channel_capacity: usize,
}

impl WsTransport {
    /// Transport for the endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), channel_capacity: DEFAULT_CHANNEL_CAPACITY }
    }

    /// Override the link channel bound.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

impl Transport for WsTransport {
    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<TransportLink, TransportError>> + Send {
        let url = self.url.clone();
        let capacity = self.channel_capacity;
        async move {
            let socket = open_socket(&url, &request).await?;

            let (to_server_tx, to_server_rx) = mpsc::channel(capacity);
            let (from_server_tx, from_server_rx) = mpsc::channel(capacity);
            let handle = tokio::spawn(run_socket(socket, to_server_rx, from_server_tx));

            Ok(TransportLink::new(to_server_tx, from_server_rx, handle.abort_handle()))
        }
    }
}

async fn open_socket(url: &str, request: &ConnectRequest) -> Result<Socket, TransportError> {
    let mut upgrade = url
        .into_client_request()
        .map_err(|e| TransportError::Connection(format!("invalid url {url}: {e}")))?;
    let bearer = HeaderValue::from_str(&request.credential.bearer())
        .map_err(|e| TransportError::Connection(format!("invalid credential: {e}")))?;
    upgrade.headers_mut().insert(AUTHORIZATION, bearer);

    match connect_async(upgrade).await {
        Ok((socket, _response)) => Ok(socket),
        Err(WsError::Http(response)) => Err(TransportError::from_status(response.status().as_u16())),
        Err(e) => Err(TransportError::Connection(e.to_string())),
    }
}

/// Bridge the socket and the link channels until either side goes away.
///
/// Ends silently when the runtime drops its sender (graceful close) and with
/// a `Closed` event when the socket fails or the server closes.
async fn run_socket(
    socket: Socket,
    mut to_server: mpsc::Receiver<String>,
    from_server: mpsc::Sender<TransportEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    let reason = loop {
        tokio::select! {
            outbound = to_server.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break format!("write failed: {e}");
                    }
                },
                None => {
                    debug!("link closed, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return;
                },
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if from_server.send(TransportEvent::Text(text)).await.is_err() {
                        return;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || "closed by server".to_string(),
                        |frame| format!("closed by server: {} {}", frame.code, frame.reason),
                    );
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => break e.to_string(),
                None => break "connection reset".to_string(),
            },
        }
    };

    let _ = from_server.send(TransportEvent::Closed { reason }).await;
}
