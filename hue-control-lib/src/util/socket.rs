use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::util::error::DiscoveryError;

const BIND_ADDRESS: &str = "0.0.0.0:0";
const MULTICAST_TTL: u32 = 4;
const RECEIVE_BUFFER_SIZE: usize = 2048;

/// The datagram sent by [`Probe::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Sent verbatim.
    Text(String),
    /// Joined with CRLF and terminated by an empty line, like an HTTP header block.
    Lines(Vec<String>),
}

impl Payload {
    pub fn to_bytes(&self) -> Result<Bytes, DiscoveryError> {
        let text = match self {
            Payload::Text(text) => text.clone(),
            Payload::Lines(lines) => {
                let mut joined = lines.join("\r\n");
                joined.push_str("\r\n\r\n");
                joined
            }
        };
        if text.trim().is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "payload must not be empty".to_string(),
            ));
        }
        Ok(Bytes::from(text))
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<String>> for Payload {
    fn from(lines: Vec<String>) -> Self {
        Payload::Lines(lines)
    }
}

impl From<&[&str]> for Payload {
    fn from(lines: &[&str]) -> Self {
        Payload::Lines(lines.iter().map(|line| line.to_string()).collect())
    }
}

/// A datagram received while a probe was listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The datagram decoded as UTF-8, lossily.
    pub text: String,
    pub bytes: Bytes,
    pub source: SocketAddr,
}

impl Message {
    fn new(data: &[u8], source: SocketAddr) -> Self {
        Message {
            text: String::from_utf8_lossy(data).into_owned(),
            bytes: Bytes::copy_from_slice(data),
            source,
        }
    }
}

/**
Sends a single datagram and collects the replies.

Each call to [`Probe::send`] owns exactly one UDP socket, which is closed before the
call returns, whether it succeeds, fails or is cancelled. Clones of a probe share a
count of currently open sockets, see [`Probe::open_sockets`].
 */
#[derive(Debug, Clone, Default)]
pub struct Probe {
    open_sockets: Arc<AtomicUsize>,
}

/// The socket of one `send` call. Dropping it closes the socket.
struct SocketGuard {
    socket: UdpSocket,
    open_sockets: Arc<AtomicUsize>,
}

impl SocketGuard {
    async fn bind(open_sockets: &Arc<AtomicUsize>) -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(BIND_ADDRESS).await?;
        open_sockets.fetch_add(1, Ordering::SeqCst);
        let guard = SocketGuard {
            socket,
            open_sockets: open_sockets.clone(),
        };
        guard.socket.set_broadcast(true)?;
        guard.socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        Ok(guard)
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        debug!("Closing probe socket");
        self.open_sockets.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sockets currently held by `send` calls of this probe (and its clones).
    pub fn open_sockets(&self) -> usize {
        self.open_sockets.load(Ordering::SeqCst)
    }

    /**
    Sends `payload` once to `address:port` and listens for `window`.

    A zero `window` returns immediately with whatever replies are already queued.

    # Errors
    - [`DiscoveryError::InvalidArgument`] for an empty payload, an empty address or port 0.
    - [`DiscoveryError::Network`] if the socket fails at any point.
    - [`DiscoveryError::Cancelled`] if `cancel` fires before the window elapses.
     */
    pub async fn send(
        &self,
        payload: impl Into<Payload>,
        port: u16,
        address: &str,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, DiscoveryError> {
        let payload = payload.into().to_bytes()?;
        if address.trim().is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "address must be a non-empty string".to_string(),
            ));
        }
        if port == 0 {
            return Err(DiscoveryError::InvalidArgument(
                "port must be non-zero".to_string(),
            ));
        }

        let guard = SocketGuard::bind(&self.open_sockets).await?;
        debug!(
            "Sending {} byte probe to {}:{}, listening for {:?}",
            payload.len(),
            address,
            port,
            window
        );
        guard.socket.send_to(&payload, (address, port)).await?;

        let mut messages = Vec::new();
        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];

        if window.is_zero() {
            loop {
                match guard.socket.try_recv_from(&mut buffer) {
                    Ok((number_of_bytes, source)) => {
                        messages.push(Message::new(&buffer[..number_of_bytes], source))
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("Probe socket failed: {}", e);
                        return Err(e.into());
                    }
                }
            }
            return Ok(messages);
        }

        let deadline = Instant::now() + window;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Probe cancelled after {} message(s)", messages.len());
                    return Err(DiscoveryError::Cancelled);
                }
                _ = sleep_until(deadline) => break,
                received = guard.socket.recv_from(&mut buffer) => match received {
                    Ok((number_of_bytes, source)) => {
                        debug!("Received {} bytes from {}", number_of_bytes, source);
                        messages.push(Message::new(&buffer[..number_of_bytes], source));
                    }
                    Err(e) => {
                        warn!("Probe socket failed: {}", e);
                        return Err(e.into());
                    }
                },
            }
        }

        debug!("Listening window elapsed with {} message(s)", messages.len());
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{silent_udp, udp_responder};

    #[test]
    fn test_lines_are_joined_as_header_block() {
        let payload = Payload::from(&["A", "B: c"][..]);
        assert_eq!(payload.to_bytes().unwrap(), Bytes::from("A\r\nB: c\r\n\r\n"));
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        let err = Payload::Lines(vec![]).to_bytes().unwrap_err();
        assert!(err.is_developer_error());
        let err = Payload::from("  ").to_bytes().unwrap_err();
        assert!(err.is_developer_error());
    }

    #[tokio::test]
    async fn test_collects_all_replies_within_window() {
        let (addr, responder) = udp_responder(vec!["first", "second"]).await;
        let probe = Probe::new();

        let messages = probe
            .send(
                "hello",
                addr.port(),
                "127.0.0.1",
                Duration::from_millis(300),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(responder.await.unwrap(), "hello");
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(messages[0].bytes, Bytes::from_static(b"first"));
        assert_eq!(messages[0].source, addr);
        assert_eq!(probe.open_sockets(), 0);
    }

    #[tokio::test]
    async fn test_no_replies_is_an_empty_list() {
        let silent = silent_udp().await;
        let port = silent.local_addr().unwrap().port();
        let probe = Probe::new();

        let messages = probe
            .send(
                "anyone?",
                port,
                "127.0.0.1",
                Duration::from_millis(100),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert_eq!(probe.open_sockets(), 0);
    }

    #[tokio::test]
    async fn test_zero_window_returns_immediately() {
        let silent = silent_udp().await;
        let port = silent.local_addr().unwrap().port();
        let probe = Probe::new();

        let started = Instant::now();
        let messages = probe
            .send(
                "anyone?",
                port,
                "127.0.0.1",
                Duration::ZERO,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(probe.open_sockets(), 0);
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_before_binding() {
        let probe = Probe::new();
        let cancel = CancellationToken::new();

        let err = probe
            .send("x", 1900, "", Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidArgument(_)));

        let err = probe
            .send("x", 0, "127.0.0.1", Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidArgument(_)));

        let err = probe
            .send(Vec::<String>::new(), 1900, "127.0.0.1", Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidArgument(_)));
        assert_eq!(probe.open_sockets(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_is_a_network_error() {
        let probe = Probe::new();

        // The socket is bound to an IPv4 address, so an IPv6 target cannot be reached.
        let err = probe
            .send("x", 1900, "::1", Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Network(_)));
        assert!(!err.is_developer_error());
        assert_eq!(probe.open_sockets(), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_socket() {
        let silent = silent_udp().await;
        let port = silent.local_addr().unwrap().port();
        let probe = Probe::new();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            let probe = probe.clone();
            tokio::spawn(async move {
                while probe.open_sockets() == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };

        let err = probe
            .send("x", port, "127.0.0.1", Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, DiscoveryError::Cancelled);
        assert_eq!(probe.open_sockets(), 0);
    }

    #[tokio::test]
    async fn test_dropping_send_releases_socket() {
        let silent = silent_udp().await;
        let port = silent.local_addr().unwrap().port();
        let probe = Probe::new();
        let cancel = CancellationToken::new();

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            probe.send("x", port, "127.0.0.1", Duration::from_secs(5), &cancel),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(probe.open_sockets(), 0);
    }
}
