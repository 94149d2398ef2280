use std::sync::Arc;

use tower::Layer;

use crate::AdmissionGate;
use crate::backend::Upstream;
use crate::exchange::TcpConnector;
use crate::service::RateLimitService;

/// Checks requests against the rate limit backend before they reach the
/// inner service.
#[derive(Debug)]
pub struct RateLimitLayer<K, B = Upstream, C = TcpConnector> {
    gate: Arc<AdmissionGate<K, B, C>>,
}

impl<K, B, C> Clone for RateLimitLayer<K, B, C> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<K, B, C> RateLimitLayer<K, B, C> {
    /// Create a RateLimitLayer
    pub fn new(gate: AdmissionGate<K, B, C>) -> Self {
        Self::from_shared(Arc::new(gate))
    }

    /// Create a RateLimitLayer around a gate that is also used elsewhere.
    pub fn from_shared(gate: Arc<AdmissionGate<K, B, C>>) -> Self {
        RateLimitLayer { gate }
    }

    pub fn gate(&self) -> &Arc<AdmissionGate<K, B, C>> {
        &self.gate
    }
}

impl<K, B, C, S> Layer<S> for RateLimitLayer<K, B, C> {
    type Service = RateLimitService<S, K, B, C>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService::new(service, self.gate.clone())
    }
}
