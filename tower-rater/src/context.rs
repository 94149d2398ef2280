use rater_proto::Progress;
use rater_proto::ProtocolError;
use rater_proto::Reply;
use rater_proto::ReplyDecoder;
use rater_proto::Status;

use crate::RaterError;

/// Per-request state of one admission check.
///
/// Created on the first gate call and dropped with the request. `done` is
/// set at most once: either a full reply was decoded or the exchange failed,
/// in which case `status` stays [`Status::Unknown`].
#[derive(Debug)]
pub struct DecisionContext {
    key: Vec<u8>,
    decoder: ReplyDecoder,
    done: bool,
    failure: Option<RaterError>,
}

impl DecisionContext {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            decoder: ReplyDecoder::new(),
            done: false,
            failure: None,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The decoded status. A failed exchange reports [`Status::Unknown`] even
    /// if the status element had already arrived.
    pub fn status(&self) -> Status {
        if self.failure.is_some() {
            return Status::Unknown;
        }
        self.decoder.reply().status
    }

    pub fn limit(&self) -> u64 {
        self.decoder.reply().limit
    }

    pub fn remaining(&self) -> u64 {
        self.decoder.reply().remaining
    }

    pub fn retry_after(&self) -> i64 {
        self.decoder.reply().retry_after
    }

    pub fn reset(&self) -> u64 {
        self.decoder.reply().reset
    }

    /// The decoded reply, once the exchange completed successfully.
    pub fn reply(&self) -> Option<&Reply> {
        (self.done && self.failure.is_none()).then(|| self.decoder.reply())
    }

    /// The error that ended the exchange, if any.
    pub fn failure(&self) -> Option<&RaterError> {
        self.failure.as_ref()
    }

    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Result<Progress, ProtocolError> {
        self.decoder.decode(bytes)
    }

    pub(crate) fn complete(&mut self) {
        self.done = true;
    }

    pub(crate) fn fail(&mut self, err: RaterError) {
        if !self.done {
            self.failure = Some(err);
            self.done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_follow_the_decoder() {
        let mut ctx = DecisionContext::new(b"user123".to_vec());
        assert_eq!(ctx.status(), Status::Unknown);
        assert!(ctx.reply().is_none());

        ctx.feed(b"*5\r\n:1\r\n:15\r\n").unwrap();
        assert_eq!(ctx.status(), Status::Limited);
        assert_eq!(ctx.limit(), 15);
        assert!(!ctx.is_done());

        let progress = ctx.feed(b":0\r\n:30\r\n:45\r\n").unwrap();
        assert_eq!(progress, Progress::Complete { consumed: 14 });
        ctx.complete();

        assert!(ctx.is_done());
        assert_eq!(ctx.remaining(), 0);
        assert_eq!(ctx.retry_after(), 30);
        assert_eq!(ctx.reset(), 45);
        assert_eq!(ctx.reply().map(|r| r.status), Some(Status::Limited));
    }

    #[test]
    fn test_failure_hides_a_partial_status() {
        let mut ctx = DecisionContext::new(b"k".to_vec());
        ctx.feed(b"*5\r\n:0\r\n").unwrap();
        assert_eq!(ctx.status(), Status::Allowed);

        ctx.fail(RaterError::PrematureClose);
        assert_eq!(ctx.status(), Status::Unknown);
    }

    #[test]
    fn test_done_is_set_once() {
        let mut ctx = DecisionContext::new(b"k".to_vec());
        ctx.fail(RaterError::PrematureClose);
        ctx.fail(RaterError::Aborted);

        assert!(ctx.is_done());
        assert!(matches!(ctx.failure(), Some(RaterError::PrematureClose)));
        assert_eq!(ctx.status(), Status::Unknown);
        assert!(ctx.reply().is_none());
    }
}
