//! In-process Engine.IO servers that the real polling and websocket engines
//! can connect to over loopback.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::config::{ClientConfig, TransportKind};
use crate::packet::{decode_payload, EnginePacket, OpenInfo};

const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn open_packet(
    ping_interval: u64,
    ping_timeout: u64,
    max_payload: Option<u64>,
) -> String {
    EnginePacket::Open(OpenInfo {
        sid: "fake-sid".to_string(),
        upgrades: Vec::new(),
        ping_interval,
        ping_timeout,
        max_payload,
    })
    .encode()
    .unwrap()
}

pub(crate) fn client_config(addr: SocketAddr, transport: TransportKind) -> ClientConfig {
    ClientConfig {
        server_url: format!("http://{addr}"),
        transport,
        handshake_timeout_ms: 5000,
        ..ClientConfig::default()
    }
}

/// Long-polling server. The handshake GET gets the open packet; every later
/// GET waits for one body from `downlink`. POST bodies show up on `uplink`.
pub(crate) struct PollingServer {
    pub addr: SocketAddr,
    pub downlink: mpsc::UnboundedSender<String>,
    pub uplink: mpsc::UnboundedReceiver<String>,
    /// Highest number of POSTs that were in flight at the same time.
    pub max_concurrent_posts: Arc<AtomicUsize>,
}

struct PollingState {
    open: String,
    downlink: Mutex<mpsc::UnboundedReceiver<String>>,
    uplink: mpsc::UnboundedSender<String>,
    posts_in_flight: AtomicUsize,
    max_concurrent_posts: Arc<AtomicUsize>,
    post_delay: Duration,
}

impl PollingServer {
    pub(crate) async fn start(open: String, post_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (downlink, downlink_rx) = mpsc::unbounded_channel();
        let (uplink_tx, uplink) = mpsc::unbounded_channel();
        let max_concurrent_posts = Arc::new(AtomicUsize::new(0));

        let state = Arc::new(PollingState {
            open,
            downlink: Mutex::new(downlink_rx),
            uplink: uplink_tx,
            posts_in_flight: AtomicUsize::new(0),
            max_concurrent_posts: Arc::clone(&max_concurrent_posts),
            post_delay,
        });
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_request(stream, Arc::clone(&state)));
            }
        });

        PollingServer {
            addr,
            downlink,
            uplink,
            max_concurrent_posts,
        }
    }

    /// Decoded packets from POST bodies until `count` have arrived.
    pub(crate) async fn posted_packets(&mut self, count: usize) -> Vec<EnginePacket> {
        let mut packets = Vec::new();
        while packets.len() < count {
            let body = tokio::time::timeout(WAIT, self.uplink.recv())
                .await
                .expect("timed out waiting for a POST")
                .expect("server stopped");
            packets.extend(decode_payload(&body).unwrap());
        }
        packets
    }
}

struct Request {
    method: String,
    target: String,
    body: String,
}

async fn serve_request(mut stream: TcpStream, state: Arc<PollingState>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };

    let body = if request.method == "POST" {
        let in_flight = state.posts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_concurrent_posts.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(state.post_delay).await;
        state.posts_in_flight.fetch_sub(1, Ordering::SeqCst);
        let _ = state.uplink.send(request.body);
        "ok".to_string()
    } else if !request.target.contains("sid=") {
        state.open.clone()
    } else {
        let next = state.downlink.lock().await.recv().await;
        match next {
            Some(body) => body,
            None => return,
        }
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let content_length: usize = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8(buf[header_end..header_end + content_length].to_vec()).ok()?;
    Some(Request {
        method,
        target,
        body,
    })
}

/// Websocket server for a single client. Sends the open packet on accept,
/// then relays text frames both ways.
pub(crate) struct WebSocketServer {
    pub addr: SocketAddr,
    pub downlink: mpsc::UnboundedSender<String>,
    pub uplink: mpsc::UnboundedReceiver<String>,
}

impl WebSocketServer {
    pub(crate) async fn start(open: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (downlink, mut downlink_rx) = mpsc::unbounded_channel::<String>();
        let (uplink_tx, uplink) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            write.send(Message::text(open)).await.unwrap();
            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let _ = uplink_tx.send(text.as_str().to_string());
                        }
                        Some(Ok(_)) => {}
                        _ => return,
                    },
                    out = downlink_rx.recv() => match out {
                        Some(text) => {
                            if write.send(Message::text(text)).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                }
            }
        });

        WebSocketServer {
            addr,
            downlink,
            uplink,
        }
    }

    pub(crate) async fn next_packet(&mut self) -> EnginePacket {
        let frame = tokio::time::timeout(WAIT, self.uplink.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server stopped");
        EnginePacket::decode(&frame).unwrap()
    }
}
