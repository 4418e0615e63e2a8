//! Per-connection task
//!
//! Each accepted socket is split: a writer task drains the session's
//! bounded outbound queue into the write half, while the connection task
//! reads, feeds the session and watches for a registry-initiated shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::registry::{SessionHandle, SessionId, SessionRegistry};
use crate::server::config::ServerConfig;
use crate::server::handler::{Authorizer, Event, NotificationSink};
use crate::session::{Session, SessionContext, SessionPhase};

/// A single client connection
pub struct Connection {
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    authorizer: Option<Arc<dyn Authorizer>>,
    sink: Arc<dyn NotificationSink>,
}

impl Connection {
    pub fn new(
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: Arc<ServerConfig>,
        registry: Arc<SessionRegistry>,
        authorizer: Option<Arc<dyn Authorizer>>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            socket,
            peer_addr,
            config,
            registry,
            authorizer,
            sink,
        }
    }

    /// Serve the connection until EOF, error, timeout or shutdown
    ///
    /// The session is always destroyed in the registry before this returns.
    pub async fn run(self) -> SessionId {
        let Connection {
            socket,
            peer_addr,
            config,
            registry,
            authorizer,
            sink,
        } = self;

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session_id = registry
            .register(SessionHandle::new(outbound_tx.clone(), shutdown_tx))
            .await;

        tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

        let (mut reader, writer) = socket.into_split();
        let mut writer_task = spawn_writer(session_id, writer, outbound_rx);

        let ctx = SessionContext::new(
            session_id,
            peer_addr,
            Arc::clone(&config),
            Arc::clone(&registry),
            authorizer,
            Arc::clone(&sink),
            outbound_tx,
        );
        let mut session = Session::new(ctx);

        let result = read_loop(&config, &mut reader, &mut session, shutdown_rx).await;
        match result {
            Ok(()) | Err(Error::ConnectionClosed) => {}
            Err(e) => {
                tracing::debug!(session_id = session_id, error = %e, "Connection error");
                sink.notify(Event::ConnectError {
                    session_id,
                    error: e.to_string(),
                });
            }
        }
        sink.notify(Event::ConnectDone { session_id });

        registry.destroy(session_id).await;
        let duration = session.state().duration();
        // last sender; the writer exits once the queue is drained
        drop(session);

        if tokio::time::timeout(config.connection_timeout, &mut writer_task)
            .await
            .is_err()
        {
            writer_task.abort();
        }

        tracing::debug!(session_id = session_id, duration = ?duration, "Connection closed");
        session_id
    }
}

async fn read_loop(
    config: &ServerConfig,
    reader: &mut OwnedReadHalf,
    session: &mut Session,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    let handshake_deadline = Instant::now() + config.connection_timeout;

    loop {
        let deadline = if session.handshake_done() {
            Instant::now() + config.idle_timeout
        } else {
            handshake_deadline
        };

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
            read = tokio::time::timeout_at(deadline, reader.read(&mut buf)) => {
                let n = match read {
                    Ok(n) => n?,
                    Err(_) => return Err(Error::Timeout),
                };
                if n == 0 {
                    return Ok(());
                }
                session.feed(&buf[..n]).await?;
                if session.phase() == SessionPhase::Closed {
                    return Ok(());
                }
            }
        }
    }
}

fn spawn_writer(
    session_id: SessionId,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                tracing::debug!(session_id = session_id, error = %e, "Write failed");
                return;
            }
        }
        let _ = writer.shutdown().await;
    })
}
