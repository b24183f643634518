//! WebSocket implementation of the channel seam (async-tungstenite over tokio)

use crate::error::{Error, Result};
use crate::transport::channel::{ConnectRequest, Connector, DuplexChannel, WireMessage};
use async_trait::async_trait;
use async_tungstenite::WebSocketStream;
use async_tungstenite::tokio::{ConnectStream, connect_async};
use async_tungstenite::tungstenite::Message;
use async_tungstenite::tungstenite::client::IntoClientRequest;
use async_tungstenite::tungstenite::handshake::client::Request;
use async_tungstenite::tungstenite::http::HeaderValue;
use async_tungstenite::tungstenite::http::header::AUTHORIZATION;
use async_tungstenite::tungstenite::protocol::CloseFrame;
use async_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Opens `ws://` (and, with the `tls` feature, `wss://`) connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Build the HTTP upgrade request, adding the bearer token when present.
pub fn build_request(request: &ConnectRequest) -> Result<Request> {
    let mut http = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::TransportConnect(format!("invalid url {}: {}", request.url, e)))?;

    if let Some(token) = &request.token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::TransportConnect(format!("invalid token: {}", e)))?;
        http.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(http)
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Arc<dyn DuplexChannel>> {
        let http = build_request(request)?;
        let (ws_stream, response) = connect_async(http)
            .await
            .map_err(|e| Error::TransportConnect(format!("{}: {}", request.url, e)))?;
        log::info!(
            "WebSocketConnector: connected to {} ({})",
            request.url,
            response.status()
        );

        let (sink, stream) = StreamExt::split(ws_stream);
        Ok(Arc::new(WebSocketChannel {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }))
    }
}

struct WebSocketChannel {
    sink: Mutex<SplitSink<WebSocketStream<ConnectStream>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<ConnectStream>>>,
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    async fn send(&self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Text(text) => Message::text(text),
            WireMessage::Binary(data) => Message::binary(data),
        };
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    async fn recv(&self) -> Result<WireMessage> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(WireMessage::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => return Ok(WireMessage::Binary(data)),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(Error::TransportReceive(format!("closed by peer: {}", reason)));
                }
                // ping, pong and raw frames are handled by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::TransportReceive(e.to_string())),
                None => return Err(Error::TransportReceive("stream ended".into())),
            }
        }
    }

    async fn close(&self, reason: &str) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: reason.to_string().into(),
        };
        sink.send(Message::Close(Some(frame)))
            .await
            .map_err(|e| Error::Send(e.to_string()))?;
        sink.close().await.map_err(|e| Error::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let request = ConnectRequest::new("ws://127.0.0.1:9000/stream", Some("s3cret".into()));
        let http = build_request(&request).unwrap();
        assert_eq!(http.uri().path(), "/stream");
        assert_eq!(http.headers()[AUTHORIZATION], "Bearer s3cret");
    }

    #[test]
    fn test_no_token_no_header() {
        let request = ConnectRequest::new("ws://127.0.0.1:9000/", None);
        let http = build_request(&request).unwrap();
        assert!(http.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_invalid_url() {
        let request = ConnectRequest::new("not a url", None);
        assert!(matches!(
            build_request(&request),
            Err(Error::TransportConnect(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // port 9 (discard) is closed on test hosts
        let request = ConnectRequest::new("ws://127.0.0.1:9/", None);
        assert!(matches!(
            WebSocketConnector::new().open(&request).await,
            Err(Error::TransportConnect(_))
        ));
    }
}
