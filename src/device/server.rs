//! TCP server for the hub connection
//!
//! Only one hub connection is served at a time; accepting a new one closes
//! the previous connection first, so its `Disconnected` event is always
//! delivered before the new `Connected`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::{DeviceInfo, EntityRegistry};
use crate::Result;
use crate::proto::{
    ConnectResponse, DisconnectResponse, FrameCodec, PingResponse, ProtocolMessage,
};

const OUTBOUND_CAPACITY: usize = 256;
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle for sending messages to the connected hub
#[derive(Debug, Clone)]
pub struct HubSender {
    tx: mpsc::Sender<ProtocolMessage>,
}

impl HubSender {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<ProtocolMessage>) -> Self {
        Self { tx }
    }

    /// Queue a message for the writer; returns false once the connection is gone
    pub async fn send(&self, message: impl Into<ProtocolMessage>) -> bool {
        let message = message.into();
        let type_id = message.type_id();
        if self.tx.send(message).await.is_err() {
            tracing::debug!(type_id, "hub connection closed, message dropped");
            return false;
        }
        true
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Connection lifecycle and voice traffic reported to the orchestrator
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A hub connected; the sender stays valid until `Disconnected`
    Connected(HubSender),
    /// A voice-assistant message from the hub
    Voice(ProtocolMessage),
    Disconnected,
}

enum Flow {
    Continue,
    Close,
}

/// Native API server
pub struct DeviceServer {
    info: Arc<DeviceInfo>,
    registry: Arc<EntityRegistry>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl DeviceServer {
    #[must_use]
    pub fn new(
        info: DeviceInfo,
        registry: Arc<EntityRegistry>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            info: Arc::new(info),
            registry,
            events,
        }
    }

    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "device server listening");
        Ok(listener)
    }

    /// Accept hub connections until cancelled
    pub async fn run(self, listener: TcpListener, cancel: CancellationToken) {
        let mut current: Option<(CancellationToken, JoinHandle<()>)> = None;

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if let Some((token, handle)) = current.take() {
                tracing::info!(%peer, "new hub connection replaces the current one");
                token.cancel();
                let _ = handle.await;
            }

            let token = cancel.child_token();
            let connection = Connection {
                info: Arc::clone(&self.info),
                registry: Arc::clone(&self.registry),
                events: self.events.clone(),
                peer,
            };
            let handle = tokio::spawn(connection.serve(stream, token.clone()));
            current = Some((token, handle));
        }

        if let Some((token, handle)) = current {
            token.cancel();
            let _ = handle.await;
        }
        tracing::debug!("device server stopped");
    }
}

struct Connection {
    info: Arc<DeviceInfo>,
    registry: Arc<EntityRegistry>,
    events: mpsc::Sender<ConnectionEvent>,
    peer: SocketAddr,
}

impl Connection {
    async fn serve(self, stream: TcpStream, cancel: CancellationToken) {
        let peer = self.peer;
        tracing::info!(%peer, "hub connected");
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new()).split();
        let (tx, mut rx) = mpsc::channel::<ProtocolMessage>(OUTBOUND_CAPACITY);
        let mut writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "write to hub failed");
                    break;
                }
            }
        });

        let hub = HubSender::new(tx);
        let forwarding = cancel.child_token();
        let mut subscribed = false;
        let _ = self.events.send(ConnectionEvent::Connected(hub.clone())).await;

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => break,
                frame = frames.next() => frame,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    tracing::warn!(%peer, error = %e, "closing hub connection");
                    break;
                }
                None => break,
            };

            match self.handle(message, &hub, &forwarding, &mut subscribed).await {
                Flow::Continue => {}
                Flow::Close => break,
            }
        }

        forwarding.cancel();
        let _ = self.events.send(ConnectionEvent::Disconnected).await;
        drop(hub);
        if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
        tracing::info!(%peer, "hub disconnected");
    }

    async fn handle(
        &self,
        message: ProtocolMessage,
        hub: &HubSender,
        forwarding: &CancellationToken,
        subscribed: &mut bool,
    ) -> Flow {
        let sent = match message {
            ProtocolMessage::HelloRequest(hello) => {
                tracing::debug!(
                    client = %hello.client_info,
                    major = hello.api_version_major,
                    minor = hello.api_version_minor,
                    "hello"
                );
                hub.send(self.info.hello_response()).await
            }
            ProtocolMessage::ConnectRequest(_) => {
                hub.send(ConnectResponse {
                    invalid_password: false,
                })
                .await
            }
            ProtocolMessage::DeviceInfoRequest(_) => hub.send(self.info.device_info_response()).await,
            ProtocolMessage::PingRequest(_) => hub.send(PingResponse {}).await,
            ProtocolMessage::DisconnectRequest(_) => {
                hub.send(DisconnectResponse {}).await;
                return Flow::Close;
            }
            ProtocolMessage::ListEntitiesRequest(_) => {
                let mut sent = true;
                for descriptor in self.registry.list_entities() {
                    sent = hub.send(descriptor).await;
                    if !sent {
                        break;
                    }
                }
                sent
            }
            ProtocolMessage::SubscribeStatesRequest(_) => {
                if !*subscribed {
                    *subscribed = true;
                    let registry = Arc::clone(&self.registry);
                    let tx = hub.tx.clone();
                    let token = forwarding.clone();
                    tokio::spawn(async move { registry.forward_states(tx, token).await });
                }
                true
            }
            message if message.is_voice_assistant() => self
                .events
                .send(ConnectionEvent::Voice(message))
                .await
                .is_ok(),
            message => {
                let mut sent = true;
                for response in self.registry.dispatch(&message).await {
                    sent = hub.send(response).await;
                    if !sent {
                        break;
                    }
                }
                sent
            }
        };

        if sent { Flow::Continue } else { Flow::Close }
    }
}
