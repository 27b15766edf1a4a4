//! Mock combined-stream WebSocket server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and record each request path (the `streams=` query)
//! - Push mark price frames to every live connection
//! - Close every live connection on demand

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Frame {
    Text(String),
    Close,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    paths: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    live: Arc<AtomicU32>,
    frames: broadcast::Sender<Frame>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let paths: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU32::new(0));
        let live = Arc::new(AtomicU32::new(0));
        let (frames, _) = broadcast::channel::<Frame>(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let paths_clone = paths.clone();
        let connections_clone = connections.clone();
        let live_clone = live.clone();
        let frames_clone = frames.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            paths_clone.clone(),
                            connections_clone.clone(),
                            live_clone.clone(),
                            frames_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            paths,
            connections,
            live,
            frames,
        }
    }

    /// Combined-stream base URL (without the `streams=` query).
    pub fn url(&self) -> String {
        format!("ws://{}/stream", self.addr)
    }

    /// Number of completed handshakes.
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live_count(&self) -> u32 {
        self.live.load(Ordering::SeqCst)
    }

    /// Request path of every handshake, in order.
    pub async fn paths(&self) -> Vec<String> {
        self.paths.lock().await.clone()
    }

    /// Push a mark price event for `symbol` to every live connection.
    pub fn push_price(&self, symbol: &str, price: &str) {
        let frame = serde_json::json!({
            "stream": format!("{}@markPrice@1s", symbol.to_lowercase()),
            "data": {
                "e": "markPriceUpdate",
                "E": 1_700_000_000_000u64,
                "s": symbol.to_uppercase(),
                "p": price,
            }
        });
        let _ = self.frames.send(Frame::Text(frame.to_string()));
    }

    /// Push a raw text frame.
    pub fn push_text(&self, text: &str) {
        let _ = self.frames.send(Frame::Text(text.to_string()));
    }

    /// Close every live connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.frames.send(Frame::Close);
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    paths: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    live: Arc<AtomicU32>,
    mut frames: broadcast::Receiver<Frame>,
) {
    let mut path = String::new();
    let record_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().to_string();
        Ok(resp)
    };
    let ws_stream = match accept_hdr_async(stream, record_path).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    paths.lock().await.push(path);
    connections.fetch_add(1, Ordering::SeqCst);
    live.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(Frame::Text(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Frame::Close) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    live.fetch_sub(1, Ordering::SeqCst);
}
