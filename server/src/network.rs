//! Server network layer: TCP listener, per-connection tasks and line I/O

use crate::animation::{DirectoryFrameSource, FrameBroadcaster};
use crate::auth::AuthStore;
use crate::codec::ChatLineCodec;
use crate::config::ServerConfig;
use crate::console::Console;
use crate::error::{HandshakeError, TransportError};
use crate::handshake::{self, HandshakeOutcome};
use crate::registry::{FanOut, SessionRegistry};
use crate::router::Router;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use shared::{MAX_LINE_LEN, SHUTDOWN_NOTICE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

pub type LineSink = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// How long a closing session may spend flushing its last lines
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Reads the next line, treating end of stream as a disconnect
pub async fn read_line<R>(lines: &mut R) -> Result<String, TransportError>
where
    R: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    match lines.next().await {
        Some(line) => Ok(line?),
        None => Err(TransportError::Closed),
    }
}

pub async fn write_line<W>(sink: &mut W, line: &str) -> Result<(), TransportError>
where
    W: Sink<String, Error = LinesCodecError> + Unpin,
{
    sink.send(line.to_string()).await?;
    Ok(())
}

/// Chat server owning the listener and the shared session registry
pub struct Server {
    listener: TcpListener,
    registry: SessionRegistry,
    store: Arc<dyn AuthStore>,
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl Server {
    pub async fn bind(
        config: ServerConfig,
        store: Arc<dyn AuthStore>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            registry: SessionRegistry::new(),
            store,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Cancelling this token stops the accept loop and closes every session
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Frame broadcaster streaming from the configured frames directory
    pub fn frame_broadcaster(&self) -> FrameBroadcaster {
        let fanout: Arc<dyn FanOut> = Arc::new(self.registry.clone());
        FrameBroadcaster::new(
            Arc::new(DirectoryFrameSource::new(&self.config.frames_dir)),
            fanout,
            self.config.frame_delay,
        )
    }

    /// Operator console bound to this server's registry and lifecycle
    pub fn console(&self) -> Console {
        Console::new(
            self.registry.clone(),
            self.frame_broadcaster(),
            self.shutdown.clone(),
        )
    }

    /// Accepts connections until the shutdown token fires
    pub async fn run(self) -> std::io::Result<()> {
        info!("Server started successfully");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let registry = self.registry.clone();
                    let store = Arc::clone(&self.store);
                    let flood_interval = self.config.flood_interval;
                    let shutdown = self.shutdown.child_token();

                    tokio::spawn(async move {
                        handle_connection(stream, peer, registry, store, flood_interval, shutdown)
                            .await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        let closed = self.registry.disconnect_all(SHUTDOWN_NOTICE);
        info!("Server shutting down, closed {} session(s)", closed);
        Ok(())
    }
}

/// Runs one connection from handshake to teardown
///
/// The read half lives here and the write half ends up in the writer task;
/// both are dropped on every exit path, which closes the socket.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: SessionRegistry,
    store: Arc<dyn AuthStore>,
    flood_interval: Duration,
    shutdown: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, ChatLineCodec::new_with_max_length(MAX_LINE_LEN));
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());

    let outcome = tokio::select! {
        _ = shutdown.cancelled() => None,
        outcome = handshake::negotiate(&mut lines, &mut sink, Arc::clone(&store)) => Some(outcome),
    };
    let Some(outcome) = outcome else {
        close(sink).await;
        return;
    };

    let pseudo = match outcome {
        Ok(HandshakeOutcome::Registered(pseudo)) => {
            let _ = write_line(&mut sink, &handshake::registration_reply()).await;
            info!("{} registered from {}", pseudo, peer);
            close(sink).await;
            return;
        }
        Ok(HandshakeOutcome::Authenticated(pseudo)) => pseudo,
        Err(e) => {
            reject(sink, peer, e).await;
            return;
        }
    };

    let (session, outbound) = match handshake::admit(&registry, &pseudo) {
        Ok(admitted) => admitted,
        Err(e) => {
            reject(sink, peer, e).await;
            return;
        }
    };
    info!("{} logged in from {}", pseudo, peer);

    let mut writer = tokio::spawn(write_outbound(sink, outbound, session.close_signal()));

    // Live sessions are closed by `disconnect_all`; this covers a login that
    // completed after the shutdown sweep
    if shutdown.is_cancelled() {
        session.send(SHUTDOWN_NOTICE);
        session.close();
    }

    let mut router = Router::new(Arc::clone(&session), registry.clone(), flood_interval);
    router.run(&mut lines).await;

    registry.remove(&session);
    session.close();
    tokio::select! {
        joined = &mut writer => {
            if let Err(e) = joined {
                warn!("Writer task for {} failed: {}", pseudo, e);
            }
        }
        _ = tokio::time::sleep(CLOSE_GRACE * 2) => {
            warn!("Writer task for {} did not finish, aborting", pseudo);
            writer.abort();
        }
    }
    debug!("Connection from {} closed", peer);
}

async fn reject(mut sink: LineSink, peer: SocketAddr, err: HandshakeError) {
    match err.reply() {
        Some(reply) => {
            info!("Handshake from {} rejected: {}", peer, err);
            let _ = write_line(&mut sink, &reply).await;
        }
        None => debug!("Handshake from {} aborted: {}", peer, err),
    }
    close(sink).await;
}

async fn close(sink: LineSink) {
    let mut write_half = sink.into_inner();
    let _ = write_half.shutdown().await;
}

/// Drains a session's outbound queue onto its socket
///
/// Once `closed` fires, lines already queued are still flushed so a kicked
/// client sees why it was dropped. Every write races the close signal and the
/// final flush is bounded by `CLOSE_GRACE`, so a peer that stopped reading
/// cannot hold the connection open.
async fn write_outbound(
    mut sink: LineSink,
    mut outbound: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            line = outbound.recv() => line,
            _ = closed.cancelled() => break,
        };
        let Some(line) = line else { break };

        let sent = tokio::select! {
            biased;
            sent = sink.send(line) => sent,
            _ = closed.cancelled() => break,
        };
        if let Err(e) = sent {
            debug!("Write failed: {}", e);
            closed.cancel();
            break;
        }
    }

    let drain = async {
        while let Ok(line) = outbound.try_recv() {
            if sink.feed(line).await.is_err() {
                return;
            }
        }
        let _ = SinkExt::<Arc<str>>::flush(&mut sink).await;
    };
    if tokio::time::timeout(CLOSE_GRACE, drain).await.is_err() {
        debug!("Peer stopped reading, dropping unsent lines");
    }
    close(sink).await;
}
