//! Duplex transport seam.
//!
//! The connection manager only sees a sink of outbound text frames and a
//! stream of inbound ones. [`WebSocketConnector`] provides them over a real
//! websocket; tests plug in in-memory channels through the same
//! [`Connector`] trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::TransportError;

/// Outbound half of an open transport
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of an open transport. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open duplex transport
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(
        sink: impl Sink<String, Error = TransportError> + Send + 'static,
        stream: impl Stream<Item = Result<String, TransportError>> + Send + 'static,
    ) -> Self {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports to the printer daemon
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new transport to `url`
    async fn open(&self, url: &Url) -> Result<Transport, TransportError>;
}

/// Websocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Transport, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        tracing::debug!(%url, "Websocket opened");

        let (sink, stream) = socket.split();

        let sink = sink
            .with(|text: String| {
                futures::future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(
                    Message::Text(text.into()),
                ))
            })
            .sink_map_err(|e| TransportError::Io(e.to_string()));

        let stream = stream.filter_map(|message| {
            futures::future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Dropping non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Io(e.to_string()))),
            })
        });

        Ok(Transport::new(sink, stream))
    }
}
