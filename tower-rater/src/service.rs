use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use http::Request;
use http::Response;
use http::StatusCode;
use pin_project_lite::pin_project;
use tower::Service;

use crate::Admission;
use crate::AdmissionGate;
use crate::Verdict;
use crate::backend::SelectBackend;
use crate::exchange::Connect;
use crate::headers::append_all;
use crate::key::KeyExtractor;

/// Asks the [`AdmissionGate`] about every request before calling `inner`.
///
/// Denied requests never reach `inner`: they are answered directly with the
/// configured status, the `X-RateLimit-*` headers and `Retry-After`.
#[derive(Debug)]
pub struct RateLimitService<S, K, B, C> {
    inner: S,
    gate: Arc<AdmissionGate<K, B, C>>,
}

impl<S, K, B, C> Clone for RateLimitService<S, K, B, C>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<S, K, B, C> RateLimitService<S, K, B, C> {
    pub fn new(inner: S, gate: Arc<AdmissionGate<K, B, C>>) -> Self {
        Self { inner, gate }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, K, B, C, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, K, B, C>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
    K: KeyExtractor<Request<ReqBody>>,
    B: SelectBackend<Request<ReqBody>>,
    C: Connect + Clone,
    ResBody: Default,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S, S::Future, K, B, C, ReqBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The ready service goes with the request; keep a fresh clone here.
        let clone = self.inner.clone();
        let inner = mem::replace(&mut self.inner, clone);

        ResponseFuture {
            gate: self.gate.clone(),
            admission: Admission::new(),
            state: State::Admitting {
                inner: Some(inner),
                request: Some(req),
            },
        }
    }
}

pin_project! {
    #[project = StateProj]
    enum State<S, F, ReqBody> {
        Admitting {
            inner: Option<S>,
            request: Option<Request<ReqBody>>,
        },
        Calling {
            #[pin]
            future: F,
        },
        Done,
    }
}

pin_project! {
    /// Response future of [`RateLimitService`].
    ///
    /// Dropping it while the backend check is running aborts the check.
    pub struct ResponseFuture<S, F, K, B, C, ReqBody>
    where
        C: Connect,
    {
        gate: Arc<AdmissionGate<K, B, C>>,
        admission: Admission<C>,
        #[pin]
        state: State<S, F, ReqBody>,
    }
}

impl<S, F, K, B, C, ReqBody, ResBody> Future for ResponseFuture<S, F, K, B, C, ReqBody>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>, Future = F>,
    F: Future<Output = Result<Response<ResBody>, S::Error>>,
    K: KeyExtractor<Request<ReqBody>>,
    B: SelectBackend<Request<ReqBody>>,
    C: Connect + Clone,
    ResBody: Default,
{
    type Output = Result<Response<ResBody>, S::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            match this.state.as_mut().project() {
                StateProj::Admitting { inner, request } => {
                    let verdict = match request.as_ref() {
                        Some(req) => this.gate.poll_admit(cx, req, this.admission),
                        None => panic!("`ResponseFuture` polled after completion"),
                    };

                    match verdict {
                        Verdict::Pending => return Poll::Pending,
                        Verdict::Proceed => {
                            let (Some(mut inner), Some(req)) = (inner.take(), request.take())
                            else {
                                panic!("`ResponseFuture` polled after completion");
                            };
                            let future = inner.call(req);
                            this.state.set(State::Calling { future });
                        }
                        Verdict::Deny(status) => {
                            let headers = this.admission.take_headers();
                            this.state.set(State::Done);
                            return Poll::Ready(Ok(reject(status, headers)));
                        }
                        Verdict::InternalError => {
                            this.state.set(State::Done);
                            return Poll::Ready(Ok(reject(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                http::HeaderMap::new(),
                            )));
                        }
                    }
                }
                StateProj::Calling { future } => {
                    let result = ready!(future.poll(cx));
                    this.state.set(State::Done);
                    return Poll::Ready(result.map(|mut response| {
                        append_all(response.headers_mut(), this.admission.take_headers());
                        response
                    }));
                }
                StateProj::Done => panic!("`ResponseFuture` polled after completion"),
            }
        }
    }
}

fn reject<ResBody: Default>(status: StatusCode, headers: http::HeaderMap) -> Response<ResBody> {
    let mut response = Response::new(ResBody::default());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
