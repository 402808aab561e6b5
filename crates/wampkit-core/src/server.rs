//! TCP transport
//!
//! Every accepted socket is served by its own task, which only moves bytes.
//! Lifecycle events from all sockets funnel into one channel consumed by a
//! single event-loop task that owns the outermost pipeline stage, so stages
//! never see two events at once.

use crate::config::ServerConfig;
use crate::connection::{ConnectionId, ConnectionRef, Outbound, SocketConnection};
use crate::error::{Error, Result};
use crate::middleware::{BoxedMiddleware, ServerMiddleware};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A lifecycle event delivered to the pipeline
#[derive(Debug)]
pub enum ServerEvent {
    Open(ConnectionRef),
    Data(ConnectionRef, Bytes),
    Close(ConnectionRef),
    Error(ConnectionRef, Error),
    Tick,
}

/// Deliver one event to the outermost stage
///
/// Failures of open, message and close handling are reported to `on_error`;
/// failures of `on_error` and `on_tick` are logged.
pub fn dispatch_event(stage: &mut dyn ServerMiddleware, event: ServerEvent) {
    let (connection, result) = match event {
        ServerEvent::Open(connection) => {
            let result = stage.on_open(&connection);
            (connection, result)
        }
        ServerEvent::Data(connection, data) => {
            let result = stage.on_message(&connection, data);
            (connection, result)
        }
        ServerEvent::Close(connection) => {
            let result = stage.on_close(&connection);
            (connection, result)
        }
        ServerEvent::Error(connection, err) => {
            if let Err(err) = stage.on_error(&connection, &err) {
                error!(connection_id = %connection.id(), error = %err, "Error handler failed");
            }
            return;
        }
        ServerEvent::Tick => {
            if let Err(err) = stage.on_tick() {
                error!(error = %err, "Timer handler failed");
            }
            return;
        }
    };

    if let Err(err) = result {
        debug!(connection_id = %connection.id(), error = %err, "Routing failure to error handler");
        if let Err(err) = stage.on_error(&connection, &err) {
            error!(connection_id = %connection.id(), error = %err, "Error handler failed");
        }
    }
}

/// A bound wampkit server
pub struct Server {
    listener: TcpListener,
    stage: BoxedMiddleware,
    tick_interval: Option<Duration>,
}

impl Server {
    /// Bind the configured address
    ///
    /// The keep-alive interval of `config`, if any, drives `on_tick`.
    pub async fn bind(config: &ServerConfig, stage: BoxedMiddleware) -> Result<Self> {
        let listener = TcpListener::bind(config.addr()).await?;
        Ok(Self {
            listener,
            stage,
            tick_interval: config.keep_alive_interval(),
        })
    }

    /// Override the timer interval
    pub fn with_tick_interval(mut self, interval: Option<Duration>) -> Self {
        self.tick_interval = interval;
        self
    }

    /// The bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        let (events, receiver) = mpsc::unbounded_channel();

        tokio::spawn(event_loop(self.stage, receiver));

        if let Some(interval) = self.tick_interval {
            tokio::spawn(ticker(interval, events.clone()));
        }

        info!("wampkit server listening on ws://{}", addr);

        loop {
            let (stream, remote_addr) = self.listener.accept().await?;
            tokio::spawn(serve_socket(stream, remote_addr, events.clone()));
        }
    }
}

async fn event_loop(mut stage: BoxedMiddleware, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
    while let Some(event) = events.recv().await {
        dispatch_event(&mut *stage, event);
    }
    debug!("Event loop stopped");
}

async fn ticker(period: Duration, events: mpsc::UnboundedSender<ServerEvent>) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        if events.send(ServerEvent::Tick).is_err() {
            break;
        }
    }
}

async fn serve_socket(
    mut stream: TcpStream,
    remote_addr: SocketAddr,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let socket = SocketConnection::new(ConnectionId::next(), remote_addr, outbound);
    let connection: ConnectionRef = Arc::new(socket);
    let connection_id = connection.id();

    debug!(connection_id = %connection_id, remote_addr = %remote_addr, "Connection opened");
    if events.send(ServerEvent::Open(connection.clone())).is_err() {
        return;
    }

    let (mut reader, mut writer) = stream.split();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        tokio::select! {
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => break,
                Ok(_) => {
                    let data = buffer.split().freeze();
                    trace!(connection_id = %connection_id, bytes = data.len(), "Data received");
                    if events.send(ServerEvent::Data(connection.clone(), data)).is_err() {
                        break;
                    }
                    buffer.reserve(READ_BUFFER_SIZE);
                }
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "Read failed");
                    let _ = events.send(ServerEvent::Error(connection.clone(), err.into()));
                    break;
                }
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Data(data)) => {
                    if let Err(err) = writer.write_all(&data).await {
                        warn!(connection_id = %connection_id, error = %err, "Write failed");
                        let _ = events.send(ServerEvent::Error(connection.clone(), err.into()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    break;
                }
            },
        }
    }

    connection.close();
    debug!(connection_id = %connection_id, "Connection closed");
    let _ = events.send(ServerEvent::Close(connection));
}
