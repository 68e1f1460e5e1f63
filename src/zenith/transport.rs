//! Authenticated WebSocket transport for the JSON subprotocol

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument};
use url::Url;

use crate::common::errors::{ClientError, Result};

/// WebSocket subprotocol negotiated on every handshake
pub const SUBPROTOCOL: &str = "ZenithJson";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something that happened on the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Ping(Vec<u8>),
    Pong,
    /// The peer closed the socket, with the close frame reason if any
    Closed(Option<String>),
    Error(String),
}

/// Build the unsigned handshake request
///
/// The protocol version, when configured, travels as the `version` query
/// parameter. The bearer header is added by the token manager.
pub fn handshake_request(websocket_url: &str, protocol_version: Option<&str>) -> Result<Request> {
    let mut url = Url::parse(websocket_url)
        .map_err(|e| ClientError::Configuration(format!("Invalid WebSocket URL: {}", e)))?;
    if let Some(version) = protocol_version {
        url.query_pairs_mut().append_pair("version", version);
    }

    let mut request = url.as_str().into_client_request()?;
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(SUBPROTOCOL),
    );
    Ok(request)
}

/// One open socket
pub struct Transport {
    stream: WsStream,
}

impl Transport {
    /// Perform the handshake with a signed request
    #[instrument(skip(request), fields(uri = %request.uri()))]
    pub async fn open(request: Request) -> Result<Self> {
        let (stream, response) = connect_async(request).await?;
        debug!(
            "Handshake complete, subprotocol {:?}",
            response.headers().get(header::SEC_WEBSOCKET_PROTOCOL)
        );
        info!("WebSocket connection established");
        Ok(Self { stream })
    }

    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn send_ping(&mut self) -> Result<()> {
        self.stream.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.stream.send(Message::Pong(payload)).await?;
        Ok(())
    }

    /// Wait for the next event; binary frames are skipped
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text),
                Some(Ok(Message::Ping(payload))) => return TransportEvent::Ping(payload),
                Some(Ok(Message::Pong(_))) => return TransportEvent::Pong,
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    return TransportEvent::Closed(reason);
                }
                Some(Ok(_)) => debug!("Ignoring non-text frame"),
                Some(Err(e)) => return TransportEvent::Error(e.to_string()),
                None => return TransportEvent::Closed(None),
            }
        }
    }

    /// Close the socket gracefully
    pub async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}
