//! Socket seam between the connection manager and the network.
//!
//! [`Transport::open`] yields a [`FrameSink`] / [`FrameStream`] pair that the
//! network thread drives inside a `tokio::select!` loop.  The production
//! implementation is [`WebSocketTransport`], a thin wrapper around
//! `tokio-tungstenite`; tests plug in an in-memory transport instead.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rosbridge_types::BridgeError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A frame read from the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// One protocol envelope.
    Text(String),
    /// The remote closed the connection.
    Close { code: u16, reason: String },
}

/// Write half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), BridgeError>;
    async fn close(&mut self) -> Result<(), BridgeError>;
}

/// Read half of an open connection.
#[async_trait]
pub trait FrameStream: Send {
    /// The next frame, or `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, BridgeError>>;
}

/// Opens connections to a rosbridge server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), BridgeError>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), BridgeError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| BridgeError::Transport(format!("ws connect to {url}: {e}")))?;
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsFrames { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), BridgeError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BridgeError::Transport(format!("ws send: {e}")))
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        self.sink
            .close()
            .await
            .map_err(|e| BridgeError::Transport(format!("ws close: {e}")))
    }
}

struct WsFrames {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<Result<Frame, BridgeError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                // rosbridge can be configured to send binary frames; they carry
                // the same JSON.
                Ok(Message::Binary(data)) => {
                    return Some(Ok(Frame::Text(String::from_utf8_lossy(&data).into_owned())));
                }
                Ok(Message::Close(close_frame)) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(Frame::Close { code, reason }));
                }
                // Pings are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(BridgeError::Transport(format!("ws read: {e}")))),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockTransport, WireEvent};
    use super::*;

    #[tokio::test]
    async fn mock_records_sends_and_close_in_order() {
        let (transport, remote) = MockTransport::new();
        let (mut sink, _stream) = transport.open("ws://mock").await.unwrap();

        sink.send_text("one".to_string()).await.unwrap();
        remote.fail_sends_containing("two");
        assert!(sink.send_text("two".to_string()).await.is_err());
        sink.close().await.unwrap();

        assert_eq!(
            remote.events(),
            vec![
                WireEvent::Sent("one".to_string()),
                WireEvent::SendFailed("two".to_string()),
                WireEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn mock_delivers_injected_frames() {
        let (transport, remote) = MockTransport::new();
        remote.inject("hello");
        let (_sink, mut stream) = transport.open("ws://mock").await.unwrap();
        assert_eq!(
            stream.next_frame().await.unwrap().unwrap(),
            Frame::Text("hello".to_string())
        );
    }

    #[tokio::test]
    async fn refusing_mock_fails_to_open() {
        let (transport, _remote) = MockTransport::refusing();
        assert!(matches!(
            transport.open("ws://mock").await,
            Err(BridgeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn websocket_transport_reports_unreachable_server() {
        // Port 9 (discard) is essentially never running a WebSocket server.
        let result = WebSocketTransport.open("ws://127.0.0.1:9").await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
    }
}
