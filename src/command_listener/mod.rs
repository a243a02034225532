//! CommandListener - Remote Trigger Commands over TCP
//!
//! ## Responsibilities
//!
//! - Accept TCP connections from trigger sources (RFID readers, scripts)
//! - Parse each received chunk into a channel and emit a trigger event
//! - Graceful shutdown with a bounded grace period for open connections
//!
//! ## Wire format
//!
//! Free-form UTF-8 text. Each read chunk is one command:
//! - `camera_<n>` / `rfid_<n>` / a channel id selects that channel
//! - anything else selects the first configured channel

use crate::error::{Error, Result};
use crate::models::{TriggerEvent, TriggerHandler, TriggerSource};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

/// Read chunk size
const CHUNK_SIZE: usize = 4096;

/// Idle read timeout per connection
const DEFAULT_IDLE_TIMEOUT_SEC: u64 = 60;

/// Grace period for open connections on shutdown
const DEFAULT_SHUTDOWN_GRACE_SEC: u64 = 5;

/// Resolve a command payload to a channel id.
///
/// Matching is case-insensitive substring. Channels are checked in order; the
/// first configured channel is the fallback. Returns None only for an empty
/// channel list.
pub fn parse_command<'a>(payload: &str, channels: &'a [String]) -> Option<&'a str> {
    let text = payload.to_lowercase();

    for (idx, channel_id) in channels.iter().enumerate() {
        let n = idx + 1;
        let tokens = [
            format!("camera_{}", n),
            format!("rfid_{}", n),
            channel_id.to_lowercase(),
        ];
        if tokens.iter().any(|t| text.contains(t.as_str())) {
            return Some(channel_id.as_str());
        }
    }

    channels.first().map(|c| c.as_str())
}

struct AcceptTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// CommandListener instance
pub struct CommandListener {
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    channels: Arc<Vec<String>>,
    handler: TriggerHandler,
    idle_timeout: Duration,
    shutdown_grace: Duration,
    task: Mutex<Option<AcceptTask>>,
}

impl CommandListener {
    /// Bind the listening socket
    pub async fn bind(addr: &str, channels: Vec<String>, handler: TriggerHandler) -> Result<Self> {
        if channels.is_empty() {
            return Err(Error::Config("No channels configured for trigger listener".to_string()));
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            channels: Arc::new(channels),
            handler,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SEC),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SEC),
            task: Mutex::new(None),
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting connections
    pub async fn start(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            tracing::warn!("Trigger listener already started");
            return;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(accept_loop(
            listener,
            self.channels.clone(),
            self.handler.clone(),
            self.idle_timeout,
            self.shutdown_grace,
            shutdown_rx,
        ));

        *self.task.lock().await = Some(AcceptTask {
            shutdown: shutdown_tx,
            handle,
        });

        tracing::info!(
            addr = %self.local_addr,
            channels = ?self.channels,
            "Trigger server listening"
        );
    }

    /// Stop accepting, drain open connections within the grace period, then close
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            tracing::warn!(error = %e, "Trigger accept loop ended abnormally");
        }
        tracing::info!("Trigger server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    channels: Arc<Vec<String>>,
    handler: TriggerHandler,
    idle_timeout: Duration,
    shutdown_grace: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            channels.clone(),
                            handler.clone(),
                            idle_timeout,
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Trigger accept failed");
                    }
                }
            }
            // Reap finished connection tasks
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Stop accepting before draining
    drop(listener);

    let open = connections.len();
    if open > 0 {
        tracing::info!(open = open, "Waiting for trigger connections to finish");
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Trigger connections did not finish in time, aborting"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    channels: Arc<Vec<String>>,
    handler: TriggerHandler,
    idle_timeout: Duration,
) {
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, peer = %peer, "Trigger connection opened");

    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match tokio::time::timeout(idle_timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "Trigger read failed");
                break;
            }
            Err(_) => {
                tracing::info!(
                    conn_id = %conn_id,
                    timeout_sec = idle_timeout.as_secs(),
                    "Trigger connection idle, closing"
                );
                break;
            }
        };

        let payload = String::from_utf8_lossy(&buf[..n]);
        let payload = payload.trim();
        if payload.is_empty() {
            continue;
        }

        tracing::info!(conn_id = %conn_id, payload = %payload, "Received trigger");

        match parse_command(payload, &channels) {
            Some(channel_id) => handler(TriggerEvent::new(channel_id, TriggerSource::Command)),
            None => tracing::warn!(conn_id = %conn_id, "No channel for trigger"),
        }
    }

    tracing::info!(conn_id = %conn_id, peer = %peer, "Trigger connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    fn channels() -> Vec<String> {
        vec!["camera_1".to_string(), "camera_2".to_string()]
    }

    fn channel_handler() -> (TriggerHandler, mpsc::UnboundedReceiver<TriggerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: TriggerHandler = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (handler, rx)
    }

    #[test]
    fn test_parse_defaults_to_first_channel() {
        let channels = channels();
        assert_eq!(parse_command("hello world", &channels), Some("camera_1"));
        assert_eq!(parse_command("", &channels), Some("camera_1"));
    }

    #[test]
    fn test_parse_selects_channel() {
        let channels = channels();
        assert_eq!(parse_command("trigger camera_2 now", &channels), Some("camera_2"));
        assert_eq!(parse_command("RFID_2", &channels), Some("camera_2"));
        assert_eq!(parse_command("Camera_1", &channels), Some("camera_1"));
        assert_eq!(parse_command("rfid_1:0042", &channels), Some("camera_1"));
    }

    #[test]
    fn test_parse_custom_channel_ids() {
        let channels = vec!["dock".to_string(), "gate".to_string()];
        assert_eq!(parse_command("GATE open", &channels), Some("gate"));
        assert_eq!(parse_command("camera_2", &channels), Some("gate"));
        assert_eq!(parse_command("nothing", &channels), Some("dock"));
        assert_eq!(parse_command("x", &[]), None);
    }

    #[tokio::test]
    async fn test_bind_requires_channels() {
        let (handler, _rx) = channel_handler();
        let result = CommandListener::bind("127.0.0.1:0", vec![], handler).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_tcp_commands_emit_triggers() {
        let (handler, mut rx) = channel_handler();
        let listener = CommandListener::bind("127.0.0.1:0", channels(), handler)
            .await
            .unwrap();
        listener.start().await;

        let mut client = TcpStream::connect(listener.local_addr()).await.unwrap();
        client.write_all(b"rfid_2\n").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.channel_id, "camera_2");
        assert_eq!(event.source, TriggerSource::Command);

        // whitespace-only chunk is ignored
        client.write_all(b"   \n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"hello").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.channel_id, "camera_1");

        drop(client);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_idle_connections() {
        let (handler, _rx) = channel_handler();
        let listener = CommandListener::bind("127.0.0.1:0", channels(), handler)
            .await
            .unwrap()
            .with_shutdown_grace(Duration::from_millis(100));
        listener.start().await;
        let addr = listener.local_addr();

        // held open and idle
        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), listener.shutdown())
            .await
            .expect("shutdown should be bounded by the grace period");

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_connection() {
        let (handler, _rx) = channel_handler();
        let listener = CommandListener::bind("127.0.0.1:0", channels(), handler)
            .await
            .unwrap()
            .with_idle_timeout(Duration::from_millis(50));
        listener.start().await;

        let mut client = TcpStream::connect(listener.local_addr()).await.unwrap();
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        listener.shutdown().await;
    }
}
