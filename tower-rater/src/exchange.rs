use std::fmt;
use std::future::Future;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use rater_proto::Progress;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::net::TcpSocket;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio::time::Sleep;
use tokio::time::sleep_until;
use tracing::debug;
use tracing::error;

use crate::DecisionContext;
use crate::RaterError;
use crate::Timeouts;
use crate::error::TimeoutPhase;

/// Opens the non-blocking stream a command is sent over.
pub trait Connect {
    type Stream: AsyncRead + AsyncWrite + Unpin;
    type Future: Future<Output = io::Result<Self::Stream>> + Unpin;

    fn connect(&self, endpoint: SocketAddr) -> Self::Future;
}

/// Plain TCP, one fresh connection per command.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Stream = TcpStream;
    type Future = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

    fn connect(&self, endpoint: SocketAddr) -> Self::Future {
        Box::pin(async move {
            let socket = if endpoint.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            let stream = socket.connect(endpoint).await?;
            // A completed connect can still carry a pending socket error.
            if let Some(err) = stream.take_error()? {
                return Err(err);
            }
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }
}

/// Observable position of an [`Exchange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Connecting,
    Sending,
    ReceivingHeader,
    Streaming,
    Done,
    Failed,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

enum Phase<S, F> {
    Idle,
    Connecting(F),
    Sending(S),
    ReceivingHeader(S),
    Streaming(S),
    Done,
    Failed,
}

/// Drives a single command/reply exchange with the backend.
///
/// Each poll advances the exchange as far as the socket allows, then
/// registers for the next readiness or timer notification. The connection
/// is never reused: it is closed as soon as the exchange completes, fails or
/// is aborted. Dropping an `Exchange` releases everything it holds.
pub struct Exchange<C: Connect> {
    connector: C,
    endpoint: SocketAddr,
    phase: Phase<C::Stream, C::Future>,
    command: Vec<u8>,
    written: usize,
    buffer: Vec<u8>,
    filled: usize,
    buffer_size: usize,
    timeouts: Timeouts,
    timer: Option<Pin<Box<Sleep>>>,
}

impl<C: Connect> fmt::Debug for Exchange<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("written", &self.written)
            .field("filled", &self.filled)
            .finish()
    }
}

impl<C: Connect> Exchange<C> {
    pub fn new(
        connector: C,
        endpoint: SocketAddr,
        command: Vec<u8>,
        timeouts: Timeouts,
        buffer_size: usize,
    ) -> Self {
        Self {
            connector,
            endpoint,
            phase: Phase::Idle,
            command,
            written: 0,
            buffer: Vec::new(),
            filled: 0,
            buffer_size,
            timeouts,
            timer: None,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn state(&self) -> DriverState {
        match self.phase {
            Phase::Idle => DriverState::Idle,
            Phase::Connecting(_) => DriverState::Connecting,
            Phase::Sending(_) => DriverState::Sending,
            Phase::ReceivingHeader(_) => DriverState::ReceivingHeader,
            Phase::Streaming(_) => DriverState::Streaming,
            Phase::Done => DriverState::Done,
            Phase::Failed => DriverState::Failed,
        }
    }

    /// Advance the exchange, feeding reply bytes into `ctx`.
    ///
    /// Returns `Ready` once `ctx` is done. Polling a finished exchange is a
    /// no-op that returns `Ready` without touching `ctx`.
    pub fn poll_drive(&mut self, cx: &mut Context<'_>, ctx: &mut DecisionContext) -> Poll<()> {
        loop {
            let next = match mem::replace(&mut self.phase, Phase::Failed) {
                Phase::Idle => {
                    debug!(endpoint = %self.endpoint, "connecting to rate limit backend");
                    self.arm(self.timeouts.connect);
                    Phase::Connecting(self.connector.connect(self.endpoint))
                }
                Phase::Connecting(mut connecting) => match Pin::new(&mut connecting).poll(cx) {
                    Poll::Ready(Ok(stream)) => {
                        self.arm(self.timeouts.send);
                        Phase::Sending(stream)
                    }
                    Poll::Ready(Err(err)) => {
                        return self.fail(ctx, RaterError::connect(self.endpoint, err));
                    }
                    Poll::Pending => {
                        self.phase = Phase::Connecting(connecting);
                        return self.poll_timer(cx, ctx, TimeoutPhase::Connect);
                    }
                },
                Phase::Sending(mut stream) => match self.poll_send(cx, &mut stream) {
                    Poll::Ready(Ok(())) => {
                        debug!(
                            endpoint = %self.endpoint,
                            bytes = self.written,
                            "rate limit command sent"
                        );
                        self.buffer = vec![0; self.buffer_size];
                        self.arm(self.timeouts.read);
                        Phase::ReceivingHeader(stream)
                    }
                    Poll::Ready(Err(err)) => return self.fail(ctx, RaterError::io(err)),
                    Poll::Pending => {
                        self.phase = Phase::Sending(stream);
                        return self.poll_timer(cx, ctx, TimeoutPhase::Send);
                    }
                },
                Phase::ReceivingHeader(mut stream) | Phase::Streaming(mut stream) => {
                    if self.filled == self.buffer.len() {
                        let capacity = self.buffer.len();
                        return self.fail(ctx, RaterError::ResponseTooLarge { capacity });
                    }

                    let mut buf = ReadBuf::new(&mut self.buffer[self.filled..]);
                    match Pin::new(&mut stream).poll_read(cx, &mut buf) {
                        Poll::Ready(Ok(())) => {
                            let read = buf.filled().len();
                            if read == 0 {
                                return self.fail(ctx, RaterError::PrematureClose);
                            }

                            let start = self.filled;
                            self.filled += read;
                            match ctx.feed(&self.buffer[start..self.filled]) {
                                Ok(Progress::Complete { .. }) => {
                                    debug!(
                                        endpoint = %self.endpoint,
                                        bytes = self.filled,
                                        "rate limit reply complete"
                                    );
                                    self.release();
                                    self.phase = Phase::Done;
                                    ctx.complete();
                                    return Poll::Ready(());
                                }
                                Ok(Progress::NeedMore) => {
                                    self.arm(self.timeouts.read);
                                    Phase::Streaming(stream)
                                }
                                Err(source) => {
                                    let received =
                                        self.buffer[..self.filled].escape_ascii().to_string();
                                    return self.fail(ctx, RaterError::Protocol { source, received });
                                }
                            }
                        }
                        Poll::Ready(Err(err)) => return self.fail(ctx, RaterError::io(err)),
                        Poll::Pending => {
                            self.phase = if self.filled == 0 {
                                Phase::ReceivingHeader(stream)
                            } else {
                                Phase::Streaming(stream)
                            };
                            return self.poll_timer(cx, ctx, TimeoutPhase::Read);
                        }
                    }
                }
                Phase::Done => {
                    self.phase = Phase::Done;
                    return Poll::Ready(());
                }
                Phase::Failed => return Poll::Ready(()),
            };

            self.phase = next;
        }
    }

    /// Stop the exchange without delivering a decision.
    ///
    /// Returns `false` if it had already finished.
    pub fn abort(&mut self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        debug!(endpoint = %self.endpoint, state = ?self.state(), "rate limit exchange aborted");
        self.phase = Phase::Failed;
        self.release();
        true
    }

    fn poll_send(&mut self, cx: &mut Context<'_>, stream: &mut C::Stream) -> Poll<io::Result<()>> {
        while self.written < self.command.len() {
            match Pin::new(&mut *stream).poll_write(cx, &self.command[self.written..]) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => {
                    self.written += n;
                    self.arm(self.timeouts.send);
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Pin::new(stream).poll_flush(cx)
    }

    fn poll_timer(
        &mut self,
        cx: &mut Context<'_>,
        ctx: &mut DecisionContext,
        phase: TimeoutPhase,
    ) -> Poll<()> {
        if let Some(timer) = self.timer.as_mut()
            && timer.as_mut().poll(cx).is_ready()
        {
            return self.fail(ctx, RaterError::Timeout { phase });
        }
        Poll::Pending
    }

    fn arm(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().reset(deadline),
            None => self.timer = Some(Box::pin(sleep_until(deadline))),
        }
    }

    fn fail(&mut self, ctx: &mut DecisionContext, err: RaterError) -> Poll<()> {
        error!(
            endpoint = %self.endpoint,
            key = %ctx.key().escape_ascii(),
            error = %err,
            "rate limit exchange failed"
        );
        self.phase = Phase::Failed;
        self.release();
        ctx.fail(err);
        Poll::Ready(())
    }

    fn release(&mut self) {
        self.timer = None;
        self.command = Vec::new();
        self.buffer = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::net::TcpListener;

    use rater_proto::Status;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::tests::ALLOWED;
    use crate::tests::DuplexConnector;
    use crate::tests::USER123_COMMAND;

    fn exchange<C: Connect>(connector: C, endpoint: SocketAddr) -> Exchange<C> {
        Exchange::new(
            connector,
            endpoint,
            USER123_COMMAND.to_vec(),
            Timeouts::default(),
            4096,
        )
    }

    async fn drive_once<C: Connect>(
        exchange: &mut Exchange<C>,
        ctx: &mut DecisionContext,
    ) -> Poll<()> {
        poll_fn(|cx| Poll::Ready(exchange.poll_drive(cx, ctx))).await
    }

    fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 6379))
    }

    #[tokio::test]
    async fn test_state_progression() {
        let (connector, mut server) = DuplexConnector::new(4096);
        let mut exchange = exchange(connector.clone(), local());
        let mut ctx = DecisionContext::new(b"user123".to_vec());
        assert_eq!(exchange.state(), DriverState::Idle);

        assert!(drive_once(&mut exchange, &mut ctx).await.is_pending());
        assert_eq!(exchange.state(), DriverState::ReceivingHeader);

        let mut received = vec![0; USER123_COMMAND.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, USER123_COMMAND);

        server.write_all(&ALLOWED[..6]).await.unwrap();
        assert!(drive_once(&mut exchange, &mut ctx).await.is_pending());
        assert_eq!(exchange.state(), DriverState::Streaming);
        assert_eq!(ctx.status(), Status::Allowed);
        assert!(!ctx.is_done());

        server.write_all(&ALLOWED[6..]).await.unwrap();
        assert!(drive_once(&mut exchange, &mut ctx).await.is_ready());
        assert_eq!(exchange.state(), DriverState::Done);
        assert!(ctx.is_done());
        assert_eq!(ctx.reset(), 60);
        assert_eq!(connector.drops(), 1);

        assert!(drive_once(&mut exchange, &mut ctx).await.is_ready());
        assert_eq!(exchange.state(), DriverState::Done);
        assert!(ctx.failure().is_none());
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_trailing_bytes_are_ignored() {
        let (connector, mut server) = DuplexConnector::new(4096);
        let mut exchange = exchange(connector, local());
        let mut ctx = DecisionContext::new(b"user123".to_vec());

        let mut reply = ALLOWED.to_vec();
        reply.extend_from_slice(b"*5\r\n");
        server.write_all(&reply).await.unwrap();

        assert!(drive_once(&mut exchange, &mut ctx).await.is_ready());
        assert_eq!(exchange.state(), DriverState::Done);
        assert_eq!(ctx.remaining(), 14);
    }

    #[tokio::test]
    async fn test_abort_delivers_no_decision() {
        let (connector, _server) = DuplexConnector::new(4096);
        let mut exchange = exchange(connector.clone(), local());
        let mut ctx = DecisionContext::new(b"user123".to_vec());

        assert!(exchange.abort());
        assert_eq!(exchange.state(), DriverState::Failed);
        assert!(!exchange.abort());

        assert!(drive_once(&mut exchange, &mut ctx).await.is_ready());
        assert!(!ctx.is_done());
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let mut exchange = exchange(TcpConnector, addr);
        let mut ctx = DecisionContext::new(b"user123".to_vec());

        poll_fn(|cx| exchange.poll_drive(cx, &mut ctx)).await;

        assert_eq!(exchange.state(), DriverState::Failed);
        match ctx.failure() {
            Some(RaterError::Connect { endpoint, .. }) => assert_eq!(*endpoint, addr),
            other => panic!("unexpected failure: {other:?}"),
        }
    }
}
