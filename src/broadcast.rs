//! Subscriber registry and packet fan-out
//!
//! Clients subscribe by sending a single zero byte to the bridge port. There
//! is no unsubscribe: an endpoint stays registered for the lifetime of the
//! process and send failures never evict it.

use std::collections::HashSet;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::Haptic;

/// Datagram tag for a subscription request
pub const SUBSCRIBE_TAG: u8 = 0;
/// Datagram tag for a rumble request `[1, large, small]`
pub const RUMBLE_TAG: u8 = 1;

/// Parsed incoming datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe,
    Rumble(Haptic),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty datagram")]
    Empty,

    #[error("truncated command 0x{tag:02x} ({len} bytes)")]
    Truncated { tag: u8, len: usize },

    #[error("unknown command 0x{0:02x}")]
    Unknown(u8),
}

impl ClientCommand {
    pub fn parse(datagram: &[u8]) -> Result<Self, CommandError> {
        match datagram {
            [] => Err(CommandError::Empty),
            [SUBSCRIBE_TAG] => Ok(ClientCommand::Subscribe),
            [RUMBLE_TAG, large, small, ..] => Ok(ClientCommand::Rumble(Haptic {
                large: *large,
                small: *small,
            })),
            [tag @ (SUBSCRIBE_TAG | RUMBLE_TAG), ..] => Err(CommandError::Truncated {
                tag: *tag,
                len: datagram.len(),
            }),
            [tag, ..] => Err(CommandError::Unknown(*tag)),
        }
    }
}

/// Set of subscribed endpoints, shared between the listener and the reader
#[derive(Debug, Default, Clone)]
pub struct ClientRegistry {
    inner: Arc<RwLock<HashSet<SocketAddr>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `endpoint`; returns false when it was already registered
    pub fn register(&self, endpoint: SocketAddr) -> bool {
        let added = self
            .inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(endpoint);
        if added {
            debug!("Registered client {}", endpoint);
        }
        added
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(endpoint)
    }

    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }
}

/// Anything that can send a datagram to an address
pub trait DatagramSink: Send + Sync {
    fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, payload, target)
    }
}

/// A failed send to one endpoint
#[derive(Error, Debug)]
#[error("send to {endpoint} failed: {source}")]
pub struct SendFailure {
    pub endpoint: SocketAddr,
    #[source]
    pub source: io::Error,
}

/// Result of one fan-out
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failures: Vec<SendFailure>,
}

/// Sends each payload to every registered client
pub struct Broadcaster<S: DatagramSink> {
    sink: S,
    registry: ClientRegistry,
}

impl<S: DatagramSink> Broadcaster<S> {
    pub fn new(sink: S, registry: ClientRegistry) -> Self {
        Self { sink, registry }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Send `payload` to all clients, one best-effort attempt each.
    ///
    /// Failures are logged and returned; they never affect the registry.
    pub fn broadcast(&self, payload: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let clients = self.registry.inner.read().unwrap_or_else(|e| e.into_inner());
        for &endpoint in clients.iter() {
            match self.sink.send_to(payload, endpoint) {
                Ok(_) => report.delivered += 1,
                Err(source) => {
                    let failure = SendFailure { endpoint, source };
                    warn!("{}", failure);
                    report.failures.push(failure);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
        refuse: Option<SocketAddr>,
    }

    impl DatagramSink for RecordingSink {
        fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
            if self.refuse == Some(target) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.sent.lock().unwrap().push((target, payload.to_vec()));
            Ok(payload.len())
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ClientCommand::parse(&[0]), Ok(ClientCommand::Subscribe));
        assert_eq!(
            ClientCommand::parse(&[1, 200, 100, 0]),
            Ok(ClientCommand::Rumble(Haptic {
                large: 200,
                small: 100
            }))
        );
        assert_eq!(ClientCommand::parse(&[]), Err(CommandError::Empty));
        assert_eq!(
            ClientCommand::parse(&[0, 0, 0, 0]),
            Err(CommandError::Truncated { tag: 0, len: 4 })
        );
        assert_eq!(
            ClientCommand::parse(&[1, 5]),
            Err(CommandError::Truncated { tag: 1, len: 2 })
        );
        assert_eq!(ClientCommand::parse(&[2]), Err(CommandError::Unknown(2)));
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ClientRegistry::new();
        assert!(registry.register(addr(5000)));
        assert!(!registry.register(addr(5000)));
        assert_eq!(registry.len(), 1);
        assert!(registry.register(addr(5001)));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&addr(5001)));
    }

    #[test]
    fn test_broadcast_identical_payloads() {
        let registry = ClientRegistry::new();
        registry.register(addr(5000));
        registry.register(addr(5001));
        registry.register(addr(5002));
        let broadcaster = Broadcaster::new(RecordingSink::default(), registry);

        let report = broadcaster.broadcast(&[1, 2, 3]);
        assert_eq!(report.delivered, 3);
        assert!(report.failures.is_empty());

        let sent = broadcaster.sink.sent.lock().unwrap();
        let mut targets: Vec<_> = sent.iter().map(|(a, _)| *a).collect();
        targets.sort();
        assert_eq!(targets, vec![addr(5000), addr(5001), addr(5002)]);
        assert!(sent.iter().all(|(_, p)| p == &[1, 2, 3]));
    }

    #[test]
    fn test_send_failure_keeps_client() {
        let registry = ClientRegistry::new();
        registry.register(addr(5000));
        registry.register(addr(5001));
        let sink = RecordingSink {
            refuse: Some(addr(5000)),
            ..Default::default()
        };
        let broadcaster = Broadcaster::new(sink, registry.clone());

        let report = broadcaster.broadcast(&[9]);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].endpoint, addr(5000));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_broadcast_over_loopback() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();

        let registry = ClientRegistry::new();
        registry.register(client.local_addr().unwrap());
        let broadcaster = Broadcaster::new(server, registry);
        broadcaster.broadcast(&[1, 0, 0, 10, 20]);

        let mut buf = [0u8; 32];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 0, 0, 10, 20]);
    }

    #[test]
    fn test_empty_registry() {
        let broadcaster = Broadcaster::new(RecordingSink::default(), ClientRegistry::new());
        let report = broadcaster.broadcast(&[1]);
        assert_eq!(report.delivered, 0);
        assert!(broadcaster.registry().is_empty());
    }
}
