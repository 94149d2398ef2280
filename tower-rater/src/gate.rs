use std::fmt;
use std::future::poll_fn;
use std::mem;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use http::HeaderMap;
use http::StatusCode;
use rater_proto::Command;
use rater_proto::MAX_KEY_LEN;
use rater_proto::Status;
use tracing::Level;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::ConfigError;
use crate::DecisionContext;
use crate::RaterError;
use crate::RateLimitConfig;
use crate::backend::SelectBackend;
use crate::backend::Upstream;
use crate::exchange::Connect;
use crate::exchange::DriverState;
use crate::exchange::Exchange;
use crate::exchange::TcpConnector;
use crate::headers;
use crate::key::KeyExtractor;
use crate::key::prefix_key;
use crate::metrics::GateMetrics;
use crate::metrics::Outcome;

/// What the host pipeline should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The backend has not answered yet; call again once woken.
    Pending,
    /// Let the request through.
    Proceed,
    /// Reject the request with this status.
    Deny(StatusCode),
    /// The check could not be completed.
    InternalError,
}

/// Decides, with the help of the backend, whether requests may proceed.
///
/// A gate is shared by every request on a route. The per-request state lives
/// in an [`Admission`], which the host creates once and hands to every call of
/// [`AdmissionGate::poll_admit`] for that request.
#[derive(Debug)]
pub struct AdmissionGate<K, B = Upstream, C = TcpConnector> {
    config: Arc<RateLimitConfig>,
    key: K,
    backend: B,
    connector: C,
    metrics: GateMetrics,
}

impl<K, B> AdmissionGate<K, B, TcpConnector> {
    /// Create a gate that connects to the backend over TCP.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn new(config: RateLimitConfig, key: K, backend: B) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            key,
            backend,
            connector: TcpConnector,
            metrics: GateMetrics::new(),
        })
    }
}

impl<K, B, C> AdmissionGate<K, B, C> {
    /// Replace the way connections to the backend are opened.
    pub fn with_connector<C2: Connect>(self, connector: C2) -> AdmissionGate<K, B, C2> {
        AdmissionGate {
            config: self.config,
            key: self.key,
            backend: self.backend,
            connector,
            metrics: self.metrics,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl<K, B, C> AdmissionGate<K, B, C>
where
    C: Connect + Clone,
{
    /// Drive the admission check for `req`.
    ///
    /// The first call starts the backend exchange and returns
    /// [`Verdict::Pending`]. Later calls keep driving it, never sending a
    /// second command, until a final verdict is reached. Once reached, the
    /// verdict is returned again by any further call.
    pub fn poll_admit<Req>(
        &self,
        cx: &mut Context<'_>,
        req: &Req,
        admission: &mut Admission<C>,
    ) -> Verdict
    where
        K: KeyExtractor<Req>,
        B: SelectBackend<Req>,
    {
        match &mut admission.slot {
            Slot::Fresh => match self.start(req) {
                Ok(Some(mut in_flight)) => {
                    if in_flight.exchange.poll_drive(cx, &mut in_flight.ctx).is_ready() {
                        cx.waker().wake_by_ref();
                    }
                    admission.slot = Slot::InFlight(Box::new(in_flight));
                    Verdict::Pending
                }
                Ok(None) => {
                    trace!("no rate limit key, bypassing");
                    self.metrics.decision(Outcome::Bypass);
                    admission.decide(None, Verdict::Proceed)
                }
                Err(err) => {
                    error!(error = %err, "failed to start rate limit check");
                    self.metrics.decision(Outcome::Error);
                    admission.decide(None, Verdict::InternalError)
                }
            },
            Slot::InFlight(in_flight) => {
                if in_flight.exchange.poll_drive(cx, &mut in_flight.ctx).is_pending() {
                    return Verdict::Pending;
                }
                let verdict = self.finish(&in_flight.ctx, &mut admission.headers);
                let ctx = match mem::replace(&mut admission.slot, Slot::Aborted) {
                    Slot::InFlight(in_flight) => Some(in_flight.ctx),
                    _ => None,
                };
                admission.decide(ctx, verdict)
            }
            Slot::Decided { verdict, .. } => *verdict,
            Slot::Aborted => Verdict::InternalError,
        }
    }

    /// Drive the admission check for `req` to a final verdict.
    pub async fn admit<Req>(&self, req: &Req, admission: &mut Admission<C>) -> Verdict
    where
        K: KeyExtractor<Req>,
        B: SelectBackend<Req>,
    {
        poll_fn(|cx| match self.poll_admit(cx, req, admission) {
            Verdict::Pending => Poll::Pending,
            verdict => Poll::Ready(verdict),
        })
        .await
    }

    fn start<Req>(&self, req: &Req) -> Result<Option<InFlight<C>>, RaterError>
    where
        K: KeyExtractor<Req>,
        B: SelectBackend<Req>,
    {
        let key = match self.key.extract(req) {
            Some(key) if !key.is_empty() => key,
            _ => return Ok(None),
        };

        let key = prefix_key(self.config.prefix(), key);
        if key.len() > MAX_KEY_LEN {
            return Err(RaterError::KeyTooLong { len: key.len() });
        }

        let endpoint = self.backend.select(req)?;
        let command = Command::new(&key, self.config.quota()).encode()?;

        debug!(
            key = %key.escape_ascii(),
            %endpoint,
            "checking rate limit"
        );

        let exchange = Exchange::new(
            self.connector.clone(),
            endpoint,
            command,
            self.config.timeouts(),
            self.config.buffer_size(),
        );

        Ok(Some(InFlight {
            ctx: DecisionContext::new(key),
            exchange,
        }))
    }

    fn finish(&self, ctx: &DecisionContext, headers: &mut HeaderMap) -> Verdict {
        match ctx.status() {
            Status::Limited => {
                self.log_limited(ctx);
                self.metrics.decision(Outcome::Limited);
                headers::append_limits(headers, ctx);
                headers::append_retry_after(headers, ctx);
                Verdict::Deny(self.config.status_code())
            }
            Status::Allowed => {
                self.metrics.decision(Outcome::Allowed);
                if self.config.headers_enabled() {
                    headers::append_limits(headers, ctx);
                }
                Verdict::Proceed
            }
            Status::Unknown => {
                if let Some(err) = ctx.failure() {
                    self.metrics.failure(err);
                }
                error!(
                    key = %ctx.key().escape_ascii(),
                    "rate limit backend gave no decision"
                );
                self.metrics.decision(Outcome::Error);
                Verdict::InternalError
            }
        }
    }

    fn log_limited(&self, ctx: &DecisionContext) {
        let key = ctx.key().escape_ascii();
        let (limit, remaining, retry_after) = (ctx.limit(), ctx.remaining(), ctx.retry_after());
        let level = self.config.limit_log_level();

        if level == Level::ERROR {
            error!(%key, limit, remaining, retry_after, "rate limit exceeded");
        } else if level == Level::WARN {
            warn!(%key, limit, remaining, retry_after, "rate limit exceeded");
        } else if level == Level::INFO {
            info!(%key, limit, remaining, retry_after, "rate limit exceeded");
        } else if level == Level::DEBUG {
            debug!(%key, limit, remaining, retry_after, "rate limit exceeded");
        } else {
            trace!(%key, limit, remaining, retry_after, "rate limit exceeded");
        }
    }
}

struct InFlight<C: Connect> {
    ctx: DecisionContext,
    exchange: Exchange<C>,
}

enum Slot<C: Connect> {
    Fresh,
    InFlight(Box<InFlight<C>>),
    Decided {
        ctx: Option<DecisionContext>,
        verdict: Verdict,
    },
    Aborted,
}

/// Per-request admission state.
///
/// Holds the decision context, the backend exchange while it is running, and
/// the headers queued for the outgoing response.
pub struct Admission<C: Connect = TcpConnector> {
    slot: Slot<C>,
    headers: HeaderMap,
}

impl<C: Connect> Default for Admission<C> {
    fn default() -> Self {
        Self {
            slot: Slot::Fresh,
            headers: HeaderMap::new(),
        }
    }
}

impl<C: Connect> fmt::Debug for Admission<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("verdict", &self.verdict())
            .field("driver", &self.driver_state())
            .field("headers", &self.headers)
            .finish()
    }
}

impl<C: Connect> Admission<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The final verdict, once reached.
    pub fn verdict(&self) -> Option<Verdict> {
        match &self.slot {
            Slot::Decided { verdict, .. } => Some(*verdict),
            Slot::Aborted => Some(Verdict::InternalError),
            Slot::Fresh | Slot::InFlight(_) => None,
        }
    }

    /// The decision context, if a backend check was started.
    pub fn context(&self) -> Option<&DecisionContext> {
        match &self.slot {
            Slot::InFlight(in_flight) => Some(&in_flight.ctx),
            Slot::Decided { ctx, .. } => ctx.as_ref(),
            Slot::Fresh | Slot::Aborted => None,
        }
    }

    pub fn driver_state(&self) -> Option<DriverState> {
        match &self.slot {
            Slot::InFlight(in_flight) => Some(in_flight.exchange.state()),
            _ => None,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Take the headers queued for the response, leaving none behind.
    pub fn take_headers(&mut self) -> HeaderMap {
        mem::take(&mut self.headers)
    }

    /// Cancel a running check. No decision is delivered afterwards.
    ///
    /// Returns `false` if there was nothing to cancel.
    pub fn abort(&mut self) -> bool {
        match &mut self.slot {
            Slot::InFlight(in_flight) => {
                in_flight.exchange.abort();
                self.slot = Slot::Aborted;
                true
            }
            Slot::Fresh => {
                self.slot = Slot::Aborted;
                false
            }
            Slot::Decided { .. } | Slot::Aborted => false,
        }
    }

    fn decide(&mut self, ctx: Option<DecisionContext>, verdict: Verdict) -> Verdict {
        self.slot = Slot::Decided { ctx, verdict };
        verdict
    }
}
