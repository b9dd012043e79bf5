//! TCP delivery of registry envelopes between validators.
//!
//! ```text
//! [len: u32 LE][envelope: len bytes]
//! ```
//!
//! A listener decodes each frame with the registry it was built with, so the
//! bytes on the wire are the bytes the WAL records. An envelope the registry
//! rejects costs only that message. A length above `max_message_size` means
//! the stream can no longer be trusted, and the connection is closed.

use {
    crate::{
        config::ConsensusNetConfig,
        error::{ConsensusNetError, Result},
        message::{decode_frame, encode_frame, read_frame_len, FRAME_HEADER_SIZE},
    },
    log::{debug, error, info, warn},
    std::{future::Future, net::SocketAddr, sync::Arc, time::Duration},
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::mpsc,
        task::JoinHandle,
    },
    trv1_consensus_messages::{MessageRegistry, RegistryMessage},
};

#[derive(Debug)]
pub struct InboundMessage<M> {
    pub message: M,
    /// Peer address of the connection the frame arrived on.
    pub from: SocketAddr,
}

/// A running listener. Dropping it stops the accept loop.
pub struct TransportHandle<M> {
    /// Decoded messages from every connection, in per-connection order.
    pub inbound_rx: mpsc::Receiver<InboundMessage<M>>,
    /// Bound address; resolves the port when binding to port 0.
    pub local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl<M> TransportHandle<M> {
    /// Wait for the next inbound message.
    pub async fn recv(&mut self) -> Result<InboundMessage<M>> {
        self.inbound_rx
            .recv()
            .await
            .ok_or(ConsensusNetError::ChannelClosed)
    }

    /// Stop accepting new connections. Connections already accepted run
    /// until the peer closes them or the inbound channel is dropped.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl<M> Drop for TransportHandle<M> {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Accepts peer connections and decodes their frames with a shared registry.
pub struct TransportListener<M> {
    config: ConsensusNetConfig,
    registry: Arc<MessageRegistry<M>>,
}

impl<M: RegistryMessage> TransportListener<M> {
    pub fn new(config: ConsensusNetConfig, registry: Arc<MessageRegistry<M>>) -> Self {
        Self { config, registry }
    }

    /// Bind `config.bind_addr` and spawn the accept loop, with one reader
    /// task per connection.
    pub async fn start(self) -> Result<TransportHandle<M>> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("consensus transport listening on {}", local_addr);

        let (tx, rx) = mpsc::channel::<InboundMessage<M>>(self.config.channel_buffer_size);
        let max_msg = self.config.max_message_size;
        let registry = self.registry;

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("consensus peer connected from {addr}");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            tx.clone(),
                            registry.clone(),
                            max_msg,
                        ));
                    }
                    Err(e) => {
                        error!("failed to accept consensus connection: {e}");
                    }
                }
            }
        });

        Ok(TransportHandle {
            inbound_rx: rx,
            local_addr,
            accept_task,
        })
    }
}

async fn handle_connection<M: RegistryMessage>(
    mut stream: TcpStream,
    addr: SocketAddr,
    tx: mpsc::Sender<InboundMessage<M>>,
    registry: Arc<MessageRegistry<M>>,
    max_message_size: usize,
) {
    let mut header = [0u8; FRAME_HEADER_SIZE];

    loop {
        if let Err(e) = stream.read_exact(&mut header).await {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                warn!("failed reading frame header from {addr}: {e}");
            }
            break;
        }

        let len = read_frame_len(&header);
        if len > max_message_size {
            warn!("closing {addr}: frame of {len} bytes exceeds {max_message_size}");
            break;
        }

        let mut body = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut body).await {
            warn!("failed reading frame body from {addr}: {e}");
            break;
        }

        match decode_frame(&registry, &body) {
            Ok(message) => {
                debug!("received {} from {}", message.kind(), addr);
                if tx
                    .send(InboundMessage {
                        message,
                        from: addr,
                    })
                    .await
                    .is_err()
                {
                    info!("inbound receiver dropped; closing {addr}");
                    break;
                }
            }
            Err(e) => {
                // The frame boundary is intact, so only this message is lost.
                warn!("dropping undecodable frame from {}: {}", addr, e);
            }
        }
    }

    debug!("reader for {addr} finished");
}

// ── Outbound sending ────────────────────────────────────────────────────────

async fn with_timeout<T>(
    timeout_ms: u64,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ConsensusNetError::Timeout(timeout_ms)),
    }
}

async fn connect_and_write(addr: SocketAddr, frame: &[u8]) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(frame).await?;
    stream.flush().await
}

/// Connect to `addr`, write one frame and close. Connect and write share the
/// `message_timeout_ms` budget.
pub async fn send_message<M: RegistryMessage>(
    addr: SocketAddr,
    registry: &MessageRegistry<M>,
    msg: &M,
    config: &ConsensusNetConfig,
) -> Result<()> {
    let frame = encode_frame(registry, msg, config.max_message_size)?;
    with_timeout(config.message_timeout_ms, connect_and_write(addr, &frame)).await
}

/// Write one frame on a connection the caller keeps open.
pub async fn send_on_stream<M: RegistryMessage>(
    stream: &mut TcpStream,
    registry: &MessageRegistry<M>,
    msg: &M,
    config: &ConsensusNetConfig,
) -> Result<()> {
    let frame = encode_frame(registry, msg, config.max_message_size)?;
    with_timeout(config.message_timeout_ms, async {
        stream.write_all(&frame).await?;
        stream.flush().await
    })
    .await
}

/// Encode `msg` once and send it to every address in parallel, each over its
/// own connection. Returns the peers that could not be reached.
pub async fn broadcast_message<M: RegistryMessage>(
    addrs: &[SocketAddr],
    registry: &MessageRegistry<M>,
    msg: &M,
    config: &ConsensusNetConfig,
) -> Vec<(SocketAddr, ConsensusNetError)> {
    let frame = match encode_frame(registry, msg, config.max_message_size) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            return addrs
                .iter()
                .map(|a| {
                    (
                        *a,
                        ConsensusNetError::InvalidMessage(format!("encode failed: {e}")),
                    )
                })
                .collect();
        }
    };

    let timeout_ms = config.message_timeout_ms;
    let mut handles = Vec::with_capacity(addrs.len());
    for &addr in addrs {
        let frame = frame.clone();
        handles.push(tokio::spawn(async move {
            let result = with_timeout(timeout_ms, connect_and_write(addr, &frame)).await;
            (addr, result)
        }));
    }

    let mut failures = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((_, Ok(()))) => {}
            Ok((addr, Err(e))) => failures.push((addr, e)),
            Err(e) => error!("broadcast send task failed: {e}"),
        }
    }
    failures
}

// ── Tests ───────────────────────────────────────────────────────────────────
