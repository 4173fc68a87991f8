//! WebSocket transport over `tokio-tungstenite`
//!
//! Each opened transport runs one task that performs the handshake, then
//! forwards outbound frames as text messages and reports inbound text or
//! binary messages as frames.

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvents, TransportFactory, TransportOptions};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::connect_async;
use tracing::{debug, trace, warn};

/// Opens WebSocket transports on a tokio runtime
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    runtime: Handle,
}

impl WebSocketTransportFactory {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Factory bound to the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn open(
        &self,
        url: &str,
        options: &TransportOptions,
        events: TransportEvents,
    ) -> Result<Box<dyn Transport>> {
        let request = build_request(url, options)?;
        let (outbound, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());

        self.runtime.spawn(run_socket(
            request,
            options.connect_timeout,
            rx,
            shutdown.clone(),
            events,
        ));

        Ok(Box::new(WebSocketTransport { outbound, shutdown }))
    }
}

fn build_request(url: &str, options: &TransportOptions) -> Result<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::config(format!("invalid url '{}': {}", url, e)))?;

    let headers = request.headers_mut();
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("invalid value for header '{}': {}", name, e)))?;
        headers.insert(name, value);
    }
    if let Some(authorization) = options.authorization() {
        let mut value = HeaderValue::from_str(&authorization)
            .map_err(|_| Error::config("bearer token is not a valid header value"))?;
        value.set_sensitive(true);
        headers.insert(tokio_tungstenite::tungstenite::http::header::AUTHORIZATION, value);
    }

    Ok(request)
}

async fn run_socket(
    request: Request,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    shutdown: Arc<Notify>,
    events: TransportEvents,
) {
    let uri = request.uri().to_string();

    let handshake = tokio::time::timeout(connect_timeout, connect_async(request));
    let stream = tokio::select! {
        _ = shutdown.notified() => {
            debug!("WebSocket to {} closed during handshake", uri);
            return;
        }
        result = handshake => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                events.error(Error::transport(format!("connect to {} failed: {}", uri, e)));
                return;
            }
            Err(_) => {
                events.error(Error::transport(format!(
                    "connect to {} timed out after {:?}",
                    uri, connect_timeout
                )));
                return;
            }
        },
    };

    debug!("WebSocket connected to {}", uri);
    events.opened();

    let (mut writer, mut reader) = stream.split();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                if let Err(e) = writer.send(WsMessage::Close(None)).await {
                    trace!("WebSocket close frame to {} not delivered: {}", uri, e);
                }
                return;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // transport handle dropped without close
                    let _ = writer.send(WsMessage::Close(None)).await;
                    return;
                };
                let message = match String::from_utf8(frame.to_vec()) {
                    Ok(text) => WsMessage::Text(text),
                    Err(e) => WsMessage::Binary(e.into_bytes()),
                };
                if let Err(e) = writer.send(message).await {
                    events.error(Error::transport(format!("send to {} failed: {}", uri, e)));
                    return;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => events.message(Bytes::from(text)),
                Some(Ok(WsMessage::Binary(data))) => events.message(Bytes::from(data)),
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("WebSocket to {} closed by peer: {:?}", uri, frame);
                    events.closed();
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket to {} failed: {}", uri, e);
                    events.error(Error::transport(e.to_string()));
                    return;
                }
                None => {
                    events.closed();
                    return;
                }
            },
        }
    }
}

/// Handle to a running WebSocket task
#[derive(Debug)]
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown: Arc<Notify>,
}

impl Transport for WebSocketTransport {
    fn send(&self, frame: Bytes) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| Error::transport("websocket task has stopped"))
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_build_request_headers() {
        let options = TransportOptions {
            headers: vec![("Origin".into(), "https://docs.google.com".into())],
            bearer_token: Some(SecretString::from("t0ken".to_string())),
            ..Default::default()
        };
        let request = build_request("ws://localhost:8765/stream", &options).unwrap();

        assert_eq!(request.uri().path(), "/stream");
        assert_eq!(request.headers()["origin"], "https://docs.google.com");
        assert_eq!(request.headers()["authorization"], "Bearer t0ken");
        assert!(request.headers()["authorization"].is_sensitive());
    }

    #[test]
    fn test_build_request_rejects_bad_input() {
        let options = TransportOptions::default();
        assert!(matches!(
            build_request("not a url", &options),
            Err(Error::InvalidConfig(_))
        ));

        let options = TransportOptions {
            headers: vec![("bad header".into(), "x".into())],
            ..Default::default()
        };
        assert!(build_request("ws://localhost:8765", &options).is_err());
    }
}
