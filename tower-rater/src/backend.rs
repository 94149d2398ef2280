use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::RaterError;

/// Picks the endpoint a request's command is sent to.
pub trait SelectBackend<Req> {
    fn select(&self, req: &Req) -> Result<SocketAddr, RaterError>;
}

/// A named group of backend peers, used round-robin.
#[derive(Debug)]
pub struct Upstream {
    name: String,
    peers: Vec<SocketAddr>,
    cursor: AtomicUsize,
}

impl Upstream {
    /// Create an upstream from already resolved peers.
    ///
    /// # Errors
    ///
    /// Fails if `peers` is empty.
    pub fn new(name: impl Into<String>, peers: Vec<SocketAddr>) -> io::Result<Self> {
        let name = name.into();
        if peers.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("upstream \"{name}\" has no peers"),
            ));
        }
        Ok(Self {
            name,
            peers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Resolve `addr` (`host:port`) once, at setup, into an upstream.
    pub fn resolve(name: impl Into<String>, addr: &str) -> io::Result<Self> {
        let peers = addr.to_socket_addrs()?.collect();
        Self::new(name, peers)
    }

    pub fn single(addr: SocketAddr) -> Self {
        Self {
            name: addr.to_string(),
            peers: vec![addr],
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    pub fn next_peer(&self) -> SocketAddr {
        let at = self.cursor.fetch_add(1, Ordering::Relaxed) % self.peers.len();
        self.peers[at]
    }
}

impl<Req> SelectBackend<Req> for Upstream {
    fn select(&self, _req: &Req) -> Result<SocketAddr, RaterError> {
        Ok(self.next_peer())
    }
}

impl<Req, B> SelectBackend<Req> for Arc<B>
where
    B: SelectBackend<Req> + ?Sized,
{
    fn select(&self, req: &Req) -> Result<SocketAddr, RaterError> {
        (**self).select(req)
    }
}

/// Upstreams registered at setup, looked up by case-insensitive name.
///
/// Read-only once handed to a gate.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    upstreams: HashMap<String, Arc<Upstream>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upstream, replacing any earlier one with the same name.
    pub fn with_upstream(mut self, upstream: Upstream) -> Self {
        self.upstreams
            .insert(upstream.name.to_ascii_lowercase(), Arc::new(upstream));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Upstream>> {
        self.upstreams.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}

/// Selects an upstream per request from a target computed by `target`.
///
/// An empty target, or one naming no registered upstream, is an error.
#[derive(Debug)]
pub struct Routed<T> {
    registry: Arc<BackendRegistry>,
    target: T,
}

impl<T> Routed<T> {
    pub fn new(registry: Arc<BackendRegistry>, target: T) -> Self {
        Self { registry, target }
    }
}

impl<T, Req> SelectBackend<Req> for Routed<T>
where
    T: Fn(&Req) -> Option<String>,
{
    fn select(&self, req: &Req) -> Result<SocketAddr, RaterError> {
        let target = (self.target)(req).unwrap_or_default();
        if target.is_empty() {
            return Err(RaterError::EmptyTarget);
        }

        self.registry
            .get(&target)
            .map(|upstream| upstream.next_peer())
            .ok_or(RaterError::UnknownBackend(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_round_robin() {
        let upstream = Upstream::new("counters", vec![addr(1), addr(2), addr(3)]).unwrap();
        let picked: Vec<_> = (0..6).map(|_| upstream.next_peer().port()).collect();
        assert_eq!(picked, [1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_empty_upstream_is_rejected() {
        let err = Upstream::new("nothing", vec![]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_resolve() {
        let upstream = Upstream::resolve("local", "127.0.0.1:6379").unwrap();
        assert_eq!(upstream.peers(), &[addr(6379)]);
        assert_eq!(upstream.name(), "local");
    }

    #[test]
    fn test_registry_lookup_ignores_case() {
        let registry = BackendRegistry::new()
            .with_upstream(Upstream::new("Counters", vec![addr(7000)]).unwrap());

        assert_eq!(registry.len(), 1);
        assert!(registry.get("counters").is_some());
        assert!(registry.get("COUNTERS").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_routed_selection() {
        let registry = Arc::new(
            BackendRegistry::new()
                .with_upstream(Upstream::new("eu", vec![addr(7001)]).unwrap())
                .with_upstream(Upstream::new("us", vec![addr(7002)]).unwrap()),
        );
        let routed = Routed::new(registry, |region: &&str| Some(region.to_string()));

        assert_eq!(routed.select(&"eu").unwrap(), addr(7001));
        assert_eq!(routed.select(&"US").unwrap(), addr(7002));
        assert!(matches!(routed.select(&""), Err(RaterError::EmptyTarget)));
        assert!(matches!(
            routed.select(&"ap"),
            Err(RaterError::UnknownBackend(name)) if name == "ap"
        ));
    }
}
