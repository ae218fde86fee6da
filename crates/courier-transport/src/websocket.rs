//! WebSocket star transport using `tokio-tungstenite`.
//!
//! The hub listens; spokes connect. Right after the upgrade the hub sends
//! one binary frame holding the spoke's node id (8 bytes, big endian).
//! Every frame after that is an opaque payload.
//!
//! Each link runs two tasks: a reader that turns frames into
//! [`TransportEvent`]s, and a writer fed by an unbounded queue so `send`
//! never waits on the socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{EventReceiver, Messenger, NodeId, TransportError, TransportEvent};

/// What a link's writer task should do next.
enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

type LinkSender = mpsc::UnboundedSender<Outgoing>;

fn io_error(kind: std::io::ErrorKind, e: tokio_tungstenite::tungstenite::Error) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// Starts the reader and writer tasks for one established link.
///
/// `on_close` runs once, after the reader stops for any reason.
fn spawn_link<S, F>(
    ws: WebSocketStream<S>,
    peer: NodeId,
    events: mpsc::UnboundedSender<TransportEvent>,
    on_close: F,
) -> LinkSender
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

    tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            match outgoing {
                Outgoing::Frame(data) => {
                    if let Err(e) = sink.send(Message::Binary(data.into())).await {
                        tracing::debug!(%peer, error = %e, "websocket write failed");
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Binary(data)) => {
                    let event = TransportEvent::Message {
                        from: peer,
                        data: data.to_vec(),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue, // ping/pong/text
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "websocket read failed");
                    break;
                }
            }
        }
        on_close();
    });

    tx
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

struct HubLinks {
    links: Mutex<HashMap<NodeId, LinkSender>>,
}

impl HubLinks {
    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, LinkSender>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The hub side: accepts spokes and can reach all of them.
#[derive(Clone)]
pub struct WebSocketHub {
    addr: SocketAddr,
    links: Arc<HubLinks>,
}

impl WebSocketHub {
    /// Binds the hub and starts accepting spokes in the background.
    pub async fn bind(addr: &str) -> Result<(Self, EventReceiver), TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let addr = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        tracing::info!(%addr, "WebSocket hub listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let links = Arc::new(HubLinks {
            links: Mutex::new(HashMap::new()),
        });

        tokio::spawn(accept_loop(listener, Arc::clone(&links), events_tx));

        Ok((Self { addr, links }, events_rx))
    }

    /// The address spokes should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Closes the link to one spoke.
    pub fn disconnect(&self, node: NodeId) {
        if let Some(link) = self.links.lock().remove(&node) {
            let _ = link.send(Outgoing::Close);
        }
    }

    /// Spokes currently attached.
    pub fn spokes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.links.lock().keys().copied().collect();
        nodes.sort();
        nodes
    }
}

/// Counter for spoke ids. Zero is the hub.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

async fn accept_loop(
    listener: TcpListener,
    links: Arc<HubLinks>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                continue;
            }
        };
        if events.is_closed() {
            tracing::info!("hub event receiver dropped, stopping accept loop");
            return;
        }

        let mut ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(%addr, error = %e, "websocket upgrade failed");
                continue;
            }
        };

        let node = NodeId::new(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed));
        let hello = node.into_inner().to_be_bytes().to_vec();
        if let Err(e) = ws.send(Message::Binary(hello.into())).await {
            tracing::debug!(%addr, %node, error = %e, "could not send node id");
            continue;
        }

        let close_links = Arc::clone(&links);
        let close_events = events.clone();
        // The map stays locked until the link is in it, so anyone reacting
        // to the connect event or the node's first frame can reach the node.
        // The connect event goes out before the reader starts.
        let mut attached = links.lock();
        let _ = events.send(TransportEvent::NodeConnected(node));
        let link = spawn_link(ws, node, events.clone(), move || {
            close_links.lock().remove(&node);
            let _ = close_events.send(TransportEvent::NodeDisconnected(node));
        });
        attached.insert(node, link);
        drop(attached);
        tracing::debug!(%node, %addr, "spoke connected");
    }
}

impl Messenger for WebSocketHub {
    fn local_node(&self) -> NodeId {
        NodeId::HUB
    }

    fn hub_node(&self) -> NodeId {
        NodeId::HUB
    }

    async fn send(&self, to: NodeId, data: Vec<u8>) -> Result<(), TransportError> {
        let links = self.links.lock();
        let link = links.get(&to).ok_or(TransportError::UnknownNode(to))?;
        link.send(Outgoing::Frame(data))
            .map_err(|_| TransportError::ConnectionClosed(format!("link to {to} is gone")))
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        for (node, link) in self.links.lock().iter() {
            if link.send(Outgoing::Frame(data.clone())).is_err() {
                tracing::debug!(%node, "broadcast skipped closed link");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Spoke
// ---------------------------------------------------------------------------

/// The spoke side: one link, to the hub.
#[derive(Clone)]
pub struct WebSocketSpoke {
    local: NodeId,
    link: LinkSender,
}

impl WebSocketSpoke {
    /// Connects to a hub at `url` (for example `ws://127.0.0.1:9000`)
    /// and waits for it to assign this node an id.
    pub async fn connect(url: &str) -> Result<(Self, EventReceiver), TransportError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::ConnectionClosed(format!("could not reach hub at {url}: {e}"))
        })?;

        let local = match ws.next().await {
            Some(Ok(Message::Binary(data))) => {
                let bytes = <[u8; 8]>::try_from(&data[..]).map_err(|_| {
                    TransportError::Handshake(format!(
                        "node id frame has {} bytes, expected 8",
                        data.len()
                    ))
                })?;
                NodeId::new(u64::from_be_bytes(bytes))
            }
            Some(Ok(other)) => {
                return Err(TransportError::Handshake(format!(
                    "expected node id frame, got {other:?}"
                )));
            }
            Some(Err(e)) => {
                return Err(TransportError::ReceiveFailed(io_error(
                    std::io::ErrorKind::ConnectionReset,
                    e,
                )));
            }
            None => {
                return Err(TransportError::Handshake(
                    "hub closed before assigning a node id".into(),
                ));
            }
        };
        tracing::info!(node = %local, url, "connected to hub");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let close_events = events_tx.clone();
        let link = spawn_link(ws, NodeId::HUB, events_tx, move || {
            let _ = close_events.send(TransportEvent::ConnectionLost);
        });

        Ok((Self { local, link }, events_rx))
    }

    /// Closes the link to the hub.
    pub fn close(&self) {
        let _ = self.link.send(Outgoing::Close);
    }
}

impl Messenger for WebSocketSpoke {
    fn local_node(&self) -> NodeId {
        self.local
    }

    fn hub_node(&self) -> NodeId {
        NodeId::HUB
    }

    async fn send(&self, to: NodeId, data: Vec<u8>) -> Result<(), TransportError> {
        if to != NodeId::HUB {
            return Err(TransportError::NotRoutable {
                from: self.local,
                to,
            });
        }
        self.link
            .send(Outgoing::Frame(data))
            .map_err(|_| TransportError::ConnectionClosed("link to hub is gone".into()))
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.send(NodeId::HUB, data).await
    }
}
