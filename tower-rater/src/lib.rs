//! # Tower Rater
//!
//! `tower-rater` is an admission gate for the [Tower](https://github.com/tower-rs/tower)
//! ecosystem that delegates the counting to a remote backend speaking the
//! `RATER.LIMIT` command. Every request gets a key, the backend answers whether
//! that key is still within quota, and the answer becomes a verdict plus the
//! usual rate limit headers.
//!
//! ## Key Concepts
//!
//! 1. **One command per request**: [`AdmissionGate::poll_admit`] may be called any
//!    number of times for the same request; only the first call talks to the
//!    backend, the rest drive that single exchange to completion.
//! 2. **No blocking**: the [`Exchange`] owns a non-blocking socket and is polled
//!    through connect, send and receive, with a separate timeout for each phase.
//! 3. **Fail closed on errors, open on missing keys**: a request without a key
//!    bypasses the gate, while any backend failure becomes
//!    [`Verdict::InternalError`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use http::HeaderName;
//! use tower::ServiceBuilder;
//! use tower_rater::AdmissionGate;
//! use tower_rater::HeaderKey;
//! use tower_rater::Rate;
//! use tower_rater::RateLimitConfig;
//! use tower_rater::RateLimitLayer;
//! use tower_rater::Upstream;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RateLimitConfig::new(Rate::per_minute(30)).with_burst(15);
//! let backend = Upstream::resolve("counters", "127.0.0.1:6379")?;
//! let gate = AdmissionGate::new(config, HeaderKey(HeaderName::from_static("x-api-key")), backend)?;
//!
//! let builder = ServiceBuilder::new().layer(RateLimitLayer::new(gate));
//! # let _ = builder;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Enables `Deserialize` for [`RateLimitConfig`], with durations
//!   written in `humantime` form (`"250ms"`, `"1m"`).

mod backend;
mod config;
mod context;
mod error;
mod exchange;
mod gate;
mod headers;
mod key;
mod layer;
mod metrics;
mod service;
mod utils;


pub use backend::BackendRegistry;
pub use backend::Routed;
pub use backend::SelectBackend;
pub use backend::Upstream;
pub use config::ConfigError;
pub use config::Rate;
pub use config::RateLimitConfig;
pub use config::Timeouts;
pub use context::DecisionContext;
pub use error::RaterError;
pub use error::TimeoutPhase;
pub use exchange::Connect;
pub use exchange::DriverState;
pub use exchange::Exchange;
pub use exchange::TcpConnector;
pub use gate::Admission;
pub use gate::AdmissionGate;
pub use gate::Verdict;
pub use headers::X_RATELIMIT_LIMIT;
pub use headers::X_RATELIMIT_REMAINING;
pub use headers::X_RATELIMIT_RESET;
pub use key::HeaderKey;
pub use key::KeyExtractor;
pub use key::prefix_key;
pub use layer::RateLimitLayer;
pub use service::ResponseFuture;
pub use service::RateLimitService;
pub use utils::ServiceBuilderExt;
pub use utils::make_gated_svc;
