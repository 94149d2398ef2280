use crate::ProtocolError;

/// Number of elements in every reply.
pub const REPLY_ARITY: u8 = 5;

/// Value of the retry-after element when the action was allowed.
pub const NOT_LIMITED: i64 = -1;

/// Outcome reported by the backend in the first reply element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// No status element has been decoded yet.
    #[default]
    Unknown,
    Allowed,
    Limited,
}

/// The decision fields carried by a reply.
///
/// Every numeric field other than `status` is meaningless while
/// `status == Status::Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the caller should retry, or [`NOT_LIMITED`].
    pub retry_after: i64,
    pub reset: u64,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            status: Status::Unknown,
            limit: 0,
            remaining: 0,
            retry_after: NOT_LIMITED,
            reset: 0,
        }
    }
}

/// The five reply elements, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Status,
    Limit,
    Remaining,
    RetryAfter,
    Reset,
}

impl Field {
    fn next(self) -> Option<Field> {
        match self {
            Field::Status => Some(Field::Limit),
            Field::Limit => Some(Field::Remaining),
            Field::Remaining => Some(Field::RetryAfter),
            Field::RetryAfter => Some(Field::Reset),
            Field::Reset => None,
        }
    }
}

/// Position of the decoder inside a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Waiting for the `*` multi-bulk marker.
    #[default]
    Start,
    /// Waiting for the element count, which must be `5`.
    Count,
    /// Saw the count, waiting for its CR.
    CountCr,
    /// Saw the count CR, waiting for LF.
    CountLf,
    /// Inside an element. `digits` counts accepted value bytes so far and
    /// `marked` records whether the `:` type marker was seen.
    Value {
        field: Field,
        digits: u32,
        marked: bool,
    },
    /// Saw CR at the end of an element, waiting for LF.
    ValueLf { field: Field },
    /// The whole reply was consumed.
    Complete,
}

/// What happened to the bytes handed to [`ReplyDecoder::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Every byte was consumed and the reply is still incomplete.
    NeedMore,
    /// The final terminator was reached after `consumed` bytes. Anything past
    /// it was not looked at.
    Complete { consumed: usize },
}

/// Incremental parser for the backend reply.
///
/// Bytes may be delivered in arbitrary chunks; the decoder keeps its
/// position between calls and never looks at a byte twice.
///
/// ```text
/// *5\r\n:0\r\n:15\r\n:14\r\n:-1\r\n:60\r\n
/// ```
///
/// The `:` type marker is optional and accepted at most once, as the first
/// byte of an element. Numeric elements wrap on overflow; the backend is trusted to send
/// values inside the integer range.
#[derive(Debug, Clone, Default)]
pub struct ReplyDecoder {
    state: State,
    reply: Reply,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The fields decoded so far.
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Feed the next chunk of reply bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] at the first byte the current state does
    /// not accept. The decoder is unusable afterwards.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Progress, ProtocolError> {
        for (offset, &byte) in chunk.iter().enumerate() {
            self.step(byte).map_err(|state| ProtocolError {
                state,
                byte,
                offset,
            })?;

            if self.state == State::Complete {
                return Ok(Progress::Complete {
                    consumed: offset + 1,
                });
            }
        }

        if self.state == State::Complete {
            Ok(Progress::Complete { consumed: 0 })
        } else {
            Ok(Progress::NeedMore)
        }
    }

    fn step(&mut self, byte: u8) -> Result<(), State> {
        let current = self.state;

        self.state = match current {
            State::Start => match byte {
                b'*' => State::Count,
                _ => return Err(current),
            },
            State::Count => match byte {
                b'0'..=b'9' if byte - b'0' == REPLY_ARITY => State::CountCr,
                _ => return Err(current),
            },
            State::CountCr => match byte {
                b'\r' => State::CountLf,
                _ => return Err(current),
            },
            State::CountLf => match byte {
                b'\n' => State::Value {
                    field: Field::Status,
                    digits: 0,
                    marked: false,
                },
                _ => return Err(current),
            },
            State::Value {
                field,
                digits,
                marked,
            } => self.value(field, digits, marked, byte)?,
            State::ValueLf { field } => match (byte, field.next()) {
                (b'\n', Some(next)) => State::Value {
                    field: next,
                    digits: 0,
                    marked: false,
                },
                (b'\n', None) => State::Complete,
                _ => return Err(current),
            },
            State::Complete => return Err(current),
        };

        Ok(())
    }

    fn value(
        &mut self,
        field: Field,
        digits: u32,
        marked: bool,
        byte: u8,
    ) -> Result<State, State> {
        let current = State::Value {
            field,
            digits,
            marked,
        };

        if byte == b':' && digits == 0 && !marked {
            return Ok(State::Value {
                field,
                digits,
                marked: true,
            });
        }

        if byte == b'\r' {
            return if digits == 0 || (field == Field::Status && digits != 1) {
                Err(current)
            } else if field == Field::RetryAfter
                && self.reply.status == Status::Allowed
                && digits != 2
            {
                Err(current)
            } else {
                Ok(State::ValueLf { field })
            };
        }

        let next = State::Value {
            field,
            digits: digits + 1,
            marked,
        };

        match field {
            Field::Status => match (digits, byte) {
                (0, b'0') => self.reply.status = Status::Allowed,
                (0, b'1') => self.reply.status = Status::Limited,
                _ => return Err(current),
            },
            Field::RetryAfter if self.reply.status == Status::Allowed => match (digits, byte) {
                (0, b'-') | (1, b'1') => {}
                _ => return Err(current),
            },
            Field::RetryAfter => {
                let d = digit(byte).ok_or(current)?;
                if digits == 0 {
                    self.reply.retry_after = 0;
                }
                self.reply.retry_after = accumulate_signed(self.reply.retry_after, d);
            }
            Field::Limit => {
                self.reply.limit = accumulate(self.reply.limit, digit(byte).ok_or(current)?);
            }
            Field::Remaining => {
                self.reply.remaining =
                    accumulate(self.reply.remaining, digit(byte).ok_or(current)?);
            }
            Field::Reset => {
                self.reply.reset = accumulate(self.reply.reset, digit(byte).ok_or(current)?);
            }
        }

        Ok(next)
    }
}

fn digit(byte: u8) -> Option<u8> {
    byte.is_ascii_digit().then(|| byte - b'0')
}

fn accumulate(acc: u64, d: u8) -> u64 {
    acc.wrapping_mul(10).wrapping_add(u64::from(d))
}

fn accumulate_signed(acc: i64, d: u8) -> i64 {
    acc.wrapping_mul(10).wrapping_add(i64::from(d))
}
