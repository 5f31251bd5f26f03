//! WebSocket transport to the REPL service.

use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use remote_repl_core::{
    ApiToken, ConfigError, Connector, FrameSink, FrameStream, MachineSelector, ReplConfig,
    Transport, TransportError,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens authenticated WebSocket connections to `/v1/machine/{machine}/repl`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: ReplConfig,
    token: ApiToken,
}

impl WebSocketConnector {
    /// Create a connector from connection settings.
    ///
    /// # Errors
    /// Returns `MissingToken` if the config has no token.
    pub fn new(config: &ReplConfig) -> Result<Self, ConfigError> {
        let token = config.require_token()?.clone();
        Ok(Self {
            config: config.clone(),
            token,
        })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, machine: &MachineSelector) -> Result<Transport, TransportError> {
        let url = self.config.repl_url(machine)?;
        tracing::debug!(%url, "Opening WebSocket");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&self.token.bearer())
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = socket.split();

        Ok(Transport::new(WsSink { sink }, WsStream { stream }))
    }
}

struct WsSink {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::debug!("WebSocket close failed: {e}");
        }
    }
}

struct WsStream {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(s) => return Some(Ok(s)),
                    Err(e) => {
                        tracing::warn!("Dropping non-UTF-8 binary frame: {e}");
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "WebSocket closed by server");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
        None
    }
}
