//! Peer transfer (C10): a TCP "code drop" — send a code snippet from one
//! session to another discovered peer.
//!
//! Grounded on `code_drop_server.py`/`code_drop_client.py`: the server picks
//! its listening port by probing a range (here `DEFAULT_TCP_PORT_RANGE`)
//! rather than failing if the conventional port is taken, accepts one
//! connection at a time and reads it to EOF, and the client serializes a
//! single JSON object per send and keeps sends strictly serialized with a
//! bounded wait for any in-flight send before giving up.

use crate::config::DEFAULT_TCP_PORT_RANGE;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// A code snippet dropped from one peer to another, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeMessage {
    pub hostname: String,
    pub username: String,
    pub filename: String,
    pub code: String,
}

/// Decides whether an incoming `CodeMessage` is accepted into the local
/// store, run before the session learns about it at all (spec §4.10).
pub type AcceptCallback = Arc<dyn Fn(&CodeMessage) -> bool + Send + Sync>;

/// Probes `DEFAULT_TCP_PORT_RANGE` for a free port and accepts incoming
/// code drops on it, one connection at a time.
pub struct TransferServer {
    listener: TcpListener,
    port: u16,
}

impl TransferServer {
    /// Binds the first free port in `DEFAULT_TCP_PORT_RANGE`.
    pub async fn bind() -> Result<Self> {
        let (start, end) = DEFAULT_TCP_PORT_RANGE;
        for port in start..=end {
            if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
                return Ok(Self { listener, port });
            }
        }
        Err(crate::Error::port_acquisition(start, end))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accepts connections until `running` returns `false`, reading each to
    /// EOF, decoding it as a [`CodeMessage`], and invoking `accept` before
    /// handing it to `on_message`. Decode failures and rejections are
    /// logged, not propagated — a malformed peer must not take the server
    /// down.
    pub async fn serve<F>(&self, accept: AcceptCallback, on_message: F) -> Result<()>
    where
        F: Fn(CodeMessage),
    {
        loop {
            let (mut stream, addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| crate::Error::transport(e.to_string()))?;

            let mut buf = Vec::new();
            if let Err(e) = stream.read_to_end(&mut buf).await {
                log::debug!("error reading code drop from {addr}: {e}");
                continue;
            }

            match serde_json::from_slice::<CodeMessage>(&buf) {
                Ok(message) => {
                    if accept(&message) {
                        on_message(message);
                    } else {
                        log::debug!("code drop from {addr} rejected by accept callback");
                    }
                }
                Err(e) => log::debug!("malformed code drop from {addr}: {e}"),
            }
        }
    }
}

/// Sends code snippets to discovered peers, one send at a time.
pub struct TransferClient {
    hostname: String,
    username: String,
    sending: Mutex<()>,
}

impl TransferClient {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            sending: Mutex::new(()),
        }
    }

    /// Sends `code` under `filename` to `address:port`. Waits for any
    /// in-flight send for up to 10 attempts of 100ms before giving up,
    /// mirroring `send_message_by_address`'s bounded wait for a previous
    /// send thread to finish.
    pub async fn send_code(
        &self,
        address: &str,
        port: u16,
        filename: &str,
        code: &str,
    ) -> Result<()> {
        let message = CodeMessage {
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            filename: filename.to_string(),
            code: code.to_string(),
        };
        let payload = serde_json::to_vec(&message)
            .map_err(|e| crate::Error::transport(e.to_string()))?;
        self.send_raw(address, port, &payload).await
    }

    async fn send_raw(&self, address: &str, port: u16, payload: &[u8]) -> Result<()> {
        let mut attempts_left = 10u32;
        let guard = loop {
            match self.sending.try_lock() {
                Ok(guard) => break guard,
                Err(_) if attempts_left > 0 => {
                    attempts_left -= 1;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_) => {
                    return Err(crate::Error::transport(
                        "a send is already in progress; gave up waiting for it to finish",
                    ))
                }
            }
        };

        let result = async {
            let mut stream = TcpStream::connect((address, port))
                .await
                .map_err(|e| crate::Error::transport(e.to_string()))?;
            stream
                .write_all(payload)
                .await
                .map_err(|e| crate::Error::transport(e.to_string()))?;
            stream
                .shutdown()
                .await
                .map_err(|e| crate::Error::transport(e.to_string()))?;
            Ok(())
        }
        .await;

        drop(guard);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn server_accepts_and_decodes_a_code_drop() {
        let server = TransferServer::bind().await.unwrap();
        let port = server.port();

        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        let accept: AcceptCallback = Arc::new(|_msg| true);
        let serve = tokio::spawn(async move {
            let _ = server
                .serve(accept, move |msg| {
                    let received = received_clone.clone();
                    tokio::spawn(async move {
                        *received.lock().await = Some(msg);
                    });
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = TransferClient::new("box", "alice");
        client
            .send_code("127.0.0.1", port, "snippet.py", "x = 1")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        serve.abort();

        let message = received.lock().await.clone().unwrap();
        assert_eq!(message.filename, "snippet.py");
        assert_eq!(message.code, "x = 1");
        assert_eq!(message.username, "alice");
    }

    #[tokio::test]
    async fn server_rejects_message_when_accept_callback_declines() {
        let server = TransferServer::bind().await.unwrap();
        let port = server.port();

        let delivered = Arc::new(AtomicBool::new(false));
        let delivered_clone = delivered.clone();
        let accept: AcceptCallback = Arc::new(|_msg| false);
        let serve = tokio::spawn(async move {
            let _ = server
                .serve(accept, move |_msg| {
                    delivered_clone.store(true, Ordering::SeqCst);
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let client = TransferClient::new("box", "alice");
        client
            .send_code("127.0.0.1", port, "snippet.py", "x = 1")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        serve.abort();
        assert!(!delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn bind_chooses_a_port_within_configured_range() {
        let server = TransferServer::bind().await.unwrap();
        let (start, end) = DEFAULT_TCP_PORT_RANGE;
        assert!(server.port() >= start && server.port() <= end);
    }
}
