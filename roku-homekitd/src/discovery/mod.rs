pub mod ssdp;

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use shared::protocol::{ECP_SEARCH_TARGET, SSDP_ADDR};
use shared::types::DeviceHandle;

/// How long to collect search responses
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

/// Where search responses arrive from
#[async_trait]
trait ResponseSource: Send + Sync {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl ResponseSource for UdpSocket {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Search the local network for ECP devices, collecting responses until `timeout` elapses.
/// Finding nothing is not an error; only failing to send the search is.
pub async fn discover(timeout: Duration) -> Result<Vec<DeviceHandle>, DiscoveryError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_multicast_loop_v4(true)?;

    let request = ssdp::search_request(ECP_SEARCH_TARGET);
    socket.send_to(request.as_bytes(), SSDP_ADDR).await?;

    Ok(collect(&socket, Instant::now() + timeout).await)
}

async fn collect(source: &dyn ResponseSource, deadline: Instant) -> Vec<DeviceHandle> {
    let mut seen = HashSet::new();
    let mut handles = Vec::new();
    let mut buf = [0u8; 2048];

    loop {
        let (size, from) = match tokio::time::timeout_at(deadline, source.recv(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                // One bad datagram must not end the search
                tracing::warn!("Error receiving search response: {}", e);
                continue;
            }
            Err(_) => break,
        };

        let Ok(text) = std::str::from_utf8(&buf[..size]) else {
            tracing::debug!("Ignoring non-UTF-8 response from {}", from);
            continue;
        };

        match ssdp::parse_response(text) {
            Some(response) if response.st.eq_ignore_ascii_case(ECP_SEARCH_TARGET) => {
                if seen.insert(response.location.clone()) {
                    tracing::info!("Found device at {}", response.location);
                    handles.push(DeviceHandle {
                        location: response.location,
                        usn: response.usn,
                    });
                }
            }
            Some(response) => {
                tracing::debug!("Ignoring {} response from {}", response.st, from);
            }
            None => {
                tracing::debug!("Ignoring malformed response from {}", from);
            }
        }
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted datagrams, then waits forever
    struct Replay {
        pending: Mutex<VecDeque<io::Result<String>>>,
    }

    impl Replay {
        fn new(items: Vec<io::Result<String>>) -> Self {
            Self {
                pending: Mutex::new(items.into()),
            }
        }
    }

    #[async_trait]
    impl ResponseSource for Replay {
        async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let next = self.pending.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => {
                    buf[..text.len()].copy_from_slice(text.as_bytes());
                    Ok((text.len(), "192.168.1.20:1900".parse().unwrap()))
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }
    }

    fn response(location: &str, st: &str) -> io::Result<String> {
        Ok(format!(
            "HTTP/1.1 200 OK\r\nCache-Control: max-age=3600\r\nST: {}\r\nUSN: uuid:roku:ecp:X\r\nLOCATION: {}\r\n\r\n",
            st, location
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_error_does_not_end_search() {
        let source = Replay::new(vec![
            response("http://192.168.1.20:8060/", "roku:ecp"),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            response("http://192.168.1.21:8060/", "roku:ecp"),
        ]);

        let handles = collect(&source, Instant::now() + DISCOVERY_TIMEOUT).await;

        let locations: Vec<_> = handles.iter().map(|h| h.location.as_str()).collect();
        assert_eq!(locations, ["http://192.168.1.20:8060/", "http://192.168.1.21:8060/"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filters_and_deduplicates() {
        let source = Replay::new(vec![
            response("http://192.168.1.20:8060/", "roku:ecp"),
            response("http://192.168.1.30:1400/xml/device_description.xml", "urn:schemas-upnp-org:device:ZonePlayer:1"),
            response("http://192.168.1.20:8060/", "roku:ecp"),
            Ok("garbage".to_string()),
        ]);

        let handles = collect(&source, Instant::now() + DISCOVERY_TIMEOUT).await;

        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].usn, "uuid:roku:ecp:X");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_found_is_empty() {
        let source = Replay::new(Vec::new());
        assert!(collect(&source, Instant::now() + DISCOVERY_TIMEOUT).await.is_empty());
    }
}
