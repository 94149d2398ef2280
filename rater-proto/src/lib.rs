//! # rater-proto
//!
//! `rater-proto` frames the `RATER.LIMIT` admission command and decodes the
//! backend's fixed five-element reply. It performs no I/O: callers own the
//! socket and hand bytes in and out.
//!
//! ## Key Concepts
//!
//! * **Exact framing**: [`Command::encoded_len`] computes the framed size up
//!   front, and [`Command::encode`] refuses to return a buffer of any other size.
//! * **Incremental decoding**: [`ReplyDecoder`] accepts the reply in arbitrary
//!   chunks and never revisits a byte.
//! * **One contract**: the reply is always `status, limit, remaining,
//!   retry-after, reset`, in that order.
//!
//! ## Example
//!
//! ```rust
//! use rater_proto::Command;
//! use rater_proto::Progress;
//! use rater_proto::Quota;
//! use rater_proto::ReplyDecoder;
//! use rater_proto::Status;
//!
//! let quota = Quota { burst: 15, rate: 30, period: 60, quantity: 1 };
//! let wire = Command::new(b"user123", quota).encode().unwrap();
//! assert!(wire.starts_with(b"*5\r\n$11\r\nRATER.LIMIT\r\n"));
//!
//! let mut decoder = ReplyDecoder::new();
//! assert_eq!(decoder.decode(b"*5\r\n:0\r\n:15\r\n").unwrap(), Progress::NeedMore);
//! assert!(matches!(
//!     decoder.decode(b":14\r\n:-1\r\n:60\r\n").unwrap(),
//!     Progress::Complete { .. }
//! ));
//! assert_eq!(decoder.reply().status, Status::Allowed);
//! ```

mod command;
mod error;
mod reply;

pub use command::COMMAND_NAME;
pub use command::Command;
pub use command::MAX_KEY_LEN;
pub use command::Quota;
pub use command::decimal_len;
pub use error::EncodeError;
pub use error::ProtocolError;
pub use reply::Field;
pub use reply::NOT_LIMITED;
pub use reply::Progress;
pub use reply::REPLY_ARITY;
pub use reply::Reply;
pub use reply::ReplyDecoder;
pub use reply::State;
pub use reply::Status;
