//! Common test utilities: a scripted protocol server and a mock token endpoint

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::accept_hdr_async;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zenith_client::{ClientConfig, Credentials, Endpoints};

/// How long a test waits for something the server should see
pub const WAIT: Duration = Duration::from_secs(5);

/// What the client presented during the WebSocket handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    pub authorization: Option<String>,
    pub protocol: Option<String>,
    pub query: Option<String>,
}

/// Control frame the client sent
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

/// Scripted server-side action
#[derive(Debug)]
pub enum ServerFrame {
    Text(String),
    Ping(Vec<u8>),
    Close(String),
    /// Drop the TCP connection without a close frame
    Abort,
}

/// Local stand-in for the protocol server
///
/// Connections are served one at a time: frames the client sends arrive on
/// `received`, pings and pongs on `controls`, frames pushed with `send` go to
/// the current connection.
pub struct MockZenithServer {
    pub url: String,
    received: mpsc::UnboundedReceiver<Value>,
    controls: mpsc::UnboundedReceiver<Control>,
    handshakes: mpsc::UnboundedReceiver<Handshake>,
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

impl MockZenithServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/Zenith", listener.local_addr().unwrap());

        let (received_tx, received) = mpsc::unbounded_channel();
        let (controls_tx, controls) = mpsc::unbounded_channel();
        let (handshake_tx, handshakes) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve(
                    stream,
                    &mut outbound_rx,
                    &received_tx,
                    &controls_tx,
                    handshake_tx.clone(),
                )
                .await;
            }
        });

        Self {
            url,
            received,
            controls,
            handshakes,
            outbound,
        }
    }

    /// Next frame the client sent, parsed
    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, self.received.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("server stopped")
    }

    /// Next ping or pong the client sent
    pub async fn recv_control(&mut self) -> Control {
        timeout(WAIT, self.controls.recv())
            .await
            .expect("timed out waiting for a control frame")
            .expect("server stopped")
    }

    pub async fn handshake(&mut self) -> Handshake {
        timeout(WAIT, self.handshakes.recv())
            .await
            .expect("timed out waiting for a handshake")
            .expect("server stopped")
    }

    pub fn send(&self, frame: Value) {
        self.outbound
            .send(ServerFrame::Text(frame.to_string()))
            .unwrap();
    }

    pub fn ping(&self, payload: &[u8]) {
        self.outbound
            .send(ServerFrame::Ping(payload.to_vec()))
            .unwrap();
    }

    pub fn close(&self, reason: &str) {
        self.outbound
            .send(ServerFrame::Close(reason.to_string()))
            .unwrap();
    }

    pub fn abort(&self) {
        self.outbound.send(ServerFrame::Abort).unwrap();
    }
}

async fn serve(
    stream: TcpStream,
    outbound: &mut mpsc::UnboundedReceiver<ServerFrame>,
    received: &mpsc::UnboundedSender<Value>,
    controls: &mpsc::UnboundedSender<Control>,
    handshakes: mpsc::UnboundedSender<Handshake>,
) {
    let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let text = |name: header::HeaderName| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let _ = handshakes.send(Handshake {
            authorization: text(header::AUTHORIZATION),
            protocol: text(header::SEC_WEBSOCKET_PROTOCOL),
            query: request.uri().query().map(str::to_string),
        });
        response.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("ZenithJson"),
        );
        Ok(response)
    };

    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    loop {
        tokio::select! {
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str(&text) {
                        let _ = received.send(value);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = controls.send(Control::Ping(payload));
                }
                Some(Ok(Message::Pong(payload))) => {
                    let _ = controls.send(Control::Pong(payload));
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
            frame = outbound.recv() => match frame {
                Some(ServerFrame::Text(text)) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Some(ServerFrame::Ping(payload)) => {
                    if ws.send(Message::Ping(payload)).await.is_err() {
                        return;
                    }
                }
                Some(ServerFrame::Close(reason)) => {
                    let _ = ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: reason.into(),
                        }))
                        .await;
                    return;
                }
                Some(ServerFrame::Abort) | None => return,
            },
        }
    }
}

/// Token endpoint answering the password grant with `access_token`
pub async fn mock_token_endpoint(access_token: &str, expires_in: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "refresh_token": "refresh-1"
        })))
        .mount(&server)
        .await;
    server
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new(Credentials::new("client", "secret", "alice", "pw"))
}

pub fn endpoints(token_server: &MockServer, zenith: &MockZenithServer) -> Endpoints {
    Endpoints::from_auth_base(&token_server.uri(), &zenith.url)
}

/// Sample frames
pub mod frames {
    use serde_json::{json, Value};

    /// Response to QueryOrders with one rejected order
    pub fn rejected_order(transaction_id: u64) -> Value {
        json!({
            "TransactionID": transaction_id,
            "Controller": "Trading",
            "Topic": "QueryOrders",
            "Result": "Success",
            "Data": [{
                "O": "A",
                "Order": {
                    "ID": "x",
                    "Status": "Rejected",
                    "Details": {"Side": "Bid", "Code": "BHP", "Quantity": 100}
                }
            }]
        })
    }

    /// Unsolicited update of an account's orders
    pub fn orders_update(account: &str, status: &str) -> Value {
        json!({
            "Controller": "Trading",
            "Topic": format!("Orders!{}", account),
            "Action": "Publish",
            "Data": [{
                "O": "U",
                "Order": {
                    "ID": "x",
                    "Status": status,
                    "UpdatedDate": "2024-03-01T10:15:30+10:00",
                    "Details": {"Side": "Ask", "Code": "BHP", "Quantity": 5}
                }
            }]
        })
    }
}
