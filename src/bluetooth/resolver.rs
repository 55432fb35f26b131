use async_trait::async_trait;
use bluer::Address;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::sdp::Protocol;

/// One service discovery hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMatch {
    pub host: Address,
    pub name: Option<String>,
    pub protocol: Protocol,
    /// RFCOMM channel or L2CAP PSM, depending on `protocol`.
    pub port: Option<u16>,
}

/// Where to open an RFCOMM connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub host: Address,
    pub port: u8,
}

impl std::fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} channel {}", self.host, self.port)
    }
}

/// Looks up which services a device advertises for a UUID.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn find_services(&self, address: Address, uuid: Uuid) -> Result<Vec<ServiceMatch>>;
}

/// Resolves service UUIDs to RFCOMM endpoints.
///
/// Nothing is cached: headsets may move their RFCOMM channels between
/// pairings, so every action runs a fresh discovery round-trip.
pub struct ServiceResolver<D> {
    discovery: D,
}

impl<D: ServiceDiscovery> ServiceResolver<D> {
    pub fn new(discovery: D) -> Self {
        Self { discovery }
    }

    /// First RFCOMM endpoint advertised for `uuid`, or `ServiceNotFound`.
    pub async fn resolve(&self, address: Address, uuid: Uuid) -> Result<ServiceEndpoint> {
        let matches = self.discovery.find_services(address, uuid).await?;
        debug!("Discovery for {} on {}: {:?}", uuid, address, matches);

        let (service, endpoint) =
            first_rfcomm(&matches).ok_or(Error::ServiceNotFound { address, uuid })?;
        info!(
            "Resolved {} to {} ({})",
            uuid,
            endpoint,
            service.name.as_deref().unwrap_or("unnamed")
        );
        Ok(endpoint)
    }

    /// RFCOMM channel for `uuid`, falling back to `default_port` when
    /// discovery fails or yields no RFCOMM record.
    pub async fn resolve_port_only(&self, address: Address, uuid: Uuid, default_port: u8) -> u8 {
        let matches = match self.discovery.find_services(address, uuid).await {
            Ok(m) => m,
            Err(e) => {
                warn!("Discovery for {} failed ({}), using channel {}", uuid, e, default_port);
                return default_port;
            }
        };

        match first_rfcomm(&matches) {
            Some((_, endpoint)) => endpoint.port,
            None => {
                info!(
                    "No RFCOMM record for {} on {}, using channel {}",
                    uuid, address, default_port
                );
                default_port
            }
        }
    }
}

fn first_rfcomm(matches: &[ServiceMatch]) -> Option<(&ServiceMatch, ServiceEndpoint)> {
    matches.iter().find_map(|m| {
        if m.protocol != Protocol::Rfcomm {
            return None;
        }
        let port = m.port.and_then(|p| u8::try_from(p).ok())?;
        Some((m, ServiceEndpoint { host: m.host, port }))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Discovery stub returning canned results.
    pub(crate) struct FakeDiscovery(pub Result<Vec<ServiceMatch>>);

    #[async_trait]
    impl ServiceDiscovery for FakeDiscovery {
        async fn find_services(&self, _address: Address, _uuid: Uuid) -> Result<Vec<ServiceMatch>> {
            match &self.0 {
                Ok(m) => Ok(m.clone()),
                Err(e) => Err(Error::Sdp(e.to_string())),
            }
        }
    }

    /// Discovery stub counting how often it is asked.
    struct CountingDiscovery {
        hits: Vec<ServiceMatch>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServiceDiscovery for CountingDiscovery {
        async fn find_services(&self, _address: Address, _uuid: Uuid) -> Result<Vec<ServiceMatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    pub(crate) fn hit(protocol: Protocol, port: u16) -> ServiceMatch {
        ServiceMatch {
            host: addr(),
            name: None,
            protocol,
            port: Some(port),
        }
    }

    fn addr() -> Address {
        Address::new([0x38, 0x18, 0x4C, 0x01, 0x02, 0x03])
    }

    #[tokio::test]
    async fn test_resolve_first_rfcomm() {
        let resolver = ServiceResolver::new(FakeDiscovery(Ok(vec![
            hit(Protocol::L2cap, 0x19),
            hit(Protocol::Rfcomm, 9),
            hit(Protocol::Rfcomm, 12),
        ])));
        let ep = resolver.resolve(addr(), Uuid::nil()).await.unwrap();
        assert_eq!(ep, ServiceEndpoint { host: addr(), port: 9 });
    }

    #[tokio::test]
    async fn test_resolve_no_matches_fails() {
        let resolver = ServiceResolver::new(FakeDiscovery(Ok(vec![])));
        let err = resolver.resolve(addr(), Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_without_rfcomm_match_fails() {
        let resolver = ServiceResolver::new(FakeDiscovery(Ok(vec![
            hit(Protocol::L2cap, 0x19),
            hit(Protocol::Unknown, 3),
        ])));
        let err = resolver.resolve(addr(), Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound { .. }));
        assert!(!err.is_offline());
    }

    #[tokio::test]
    async fn test_resolve_queries_discovery_every_time() {
        let resolver = ServiceResolver::new(CountingDiscovery {
            hits: vec![hit(Protocol::Rfcomm, 9)],
            calls: AtomicUsize::new(0),
        });
        let first = resolver.resolve(addr(), Uuid::nil()).await.unwrap();
        let second = resolver.resolve(addr(), Uuid::nil()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.resolve_port_only(addr(), Uuid::nil(), 4).await, 9);
        assert_eq!(resolver.discovery.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_port_only_falls_back_without_rfcomm() {
        let resolver = ServiceResolver::new(FakeDiscovery(Ok(vec![hit(Protocol::L2cap, 3)])));
        assert_eq!(resolver.resolve_port_only(addr(), Uuid::nil(), 4).await, 4);
    }

    #[tokio::test]
    async fn test_resolve_port_only_falls_back_on_empty_and_error() {
        let empty = ServiceResolver::new(FakeDiscovery(Ok(vec![])));
        assert_eq!(empty.resolve_port_only(addr(), Uuid::nil(), 4).await, 4);

        let failing = ServiceResolver::new(FakeDiscovery(Err(Error::Sdp("down".into()))));
        assert_eq!(failing.resolve_port_only(addr(), Uuid::nil(), 4).await, 4);
    }

    #[tokio::test]
    async fn test_resolve_port_only_uses_discovered_channel() {
        let resolver = ServiceResolver::new(FakeDiscovery(Ok(vec![hit(Protocol::Rfcomm, 2)])));
        assert_eq!(resolver.resolve_port_only(addr(), Uuid::nil(), 4).await, 2);
    }
}
