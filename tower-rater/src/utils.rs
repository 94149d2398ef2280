use std::sync::Arc;

use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower::util::BoxCloneSyncService;

use crate::AdmissionGate;
use crate::RateLimitLayer;
use crate::backend::SelectBackend;
use crate::exchange::Connect;
use crate::key::KeyExtractor;

/// Put `svc` behind `gate` and erase the resulting type.
pub fn make_gated_svc<V, K, B, C, ReqBody, ResBody>(
    gate: Arc<AdmissionGate<K, B, C>>,
    svc: V,
) -> BoxCloneSyncService<http::Request<ReqBody>, http::Response<ResBody>, BoxError>
where
    V: Service<http::Request<ReqBody>, Response = http::Response<ResBody>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    V::Future: Send + 'static,
    K: KeyExtractor<http::Request<ReqBody>> + Send + Sync + 'static,
    B: SelectBackend<http::Request<ReqBody>> + Send + Sync + 'static,
    C: Connect + Clone + Send + Sync + 'static,
    C::Stream: Send,
    C::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(RateLimitLayer::from_shared(gate))
            .service(svc),
    )
}

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add an admission gate backed by the rate limit backend.
    fn admission_gate<K, B, C>(
        self,
        gate: Arc<AdmissionGate<K, B, C>>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<K, B, C>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn admission_gate<K, B, C>(
        self,
        gate: Arc<AdmissionGate<K, B, C>>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<K, B, C>, L>> {
        self.layer(RateLimitLayer::from_shared(gate))
    }
}
