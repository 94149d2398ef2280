use std::io::Write;

use crate::EncodeError;

/// Name of the single command the backend understands.
pub const COMMAND_NAME: &[u8] = b"RATER.LIMIT";

/// Upper bound on the key length accepted by the backend.
pub const MAX_KEY_LEN: usize = 65535;

const CRLF: &[u8] = b"\r\n";

/// The quota window sent with every command.
///
/// `rate` actions are allowed per `period` seconds, with up to `burst`
/// additional actions absorbed before limiting kicks in. Each request
/// consumes `quantity` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub burst: u64,
    pub rate: u64,
    pub period: u64,
    pub quantity: u64,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            burst: 0,
            rate: 1,
            period: 1,
            quantity: 1,
        }
    }
}

impl Quota {
    /// The command only carries a quantity argument when it differs from the
    /// backend's implicit default of one.
    pub fn sends_quantity(&self) -> bool {
        self.quantity != 1
    }
}

/// A `RATER.LIMIT` command ready to be framed.
///
/// ```text
/// *5\r\n$11\r\nRATER.LIMIT\r\n$<n>\r\n<key>\r\n$<n>\r\n<burst>\r\n$<n>\r\n<rate>\r\n$<n>\r\n<period>\r\n[$<n>\r\n<quantity>\r\n]
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Command<'a> {
    key: &'a [u8],
    quota: Quota,
}

impl<'a> Command<'a> {
    pub fn new(key: &'a [u8], quota: Quota) -> Self {
        Self { key, quota }
    }

    pub fn key(&self) -> &'a [u8] {
        self.key
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Number of array elements announced in the header.
    pub fn arity(&self) -> u8 {
        if self.quota.sends_quantity() { 6 } else { 5 }
    }

    /// Exact size of the framed command, computed without formatting anything.
    pub fn encoded_len(&self) -> usize {
        // "*5\r\n"
        let mut len = 1 + 1 + CRLF.len();

        len += bulk_len(COMMAND_NAME.len());
        len += bulk_len(self.key.len());
        len += number_bulk_len(self.quota.burst);
        len += number_bulk_len(self.quota.rate);
        len += number_bulk_len(self.quota.period);

        if self.quota.sends_quantity() {
            len += number_bulk_len(self.quota.quantity);
        }

        len
    }

    /// Frame the command into a single freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// Fails on an empty or oversized key, or if the framed output does not
    /// match [`Command::encoded_len`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if self.key.is_empty() {
            return Err(EncodeError::EmptyKey);
        }
        if self.key.len() > MAX_KEY_LEN {
            return Err(EncodeError::KeyTooLong {
                len: self.key.len(),
            });
        }

        let expected = self.encoded_len();
        let mut buf = Vec::with_capacity(expected);

        write!(buf, "*{}\r\n", self.arity())?;
        write_bulk(&mut buf, COMMAND_NAME)?;
        write_bulk(&mut buf, self.key)?;
        write_number(&mut buf, self.quota.burst)?;
        write_number(&mut buf, self.quota.rate)?;
        write_number(&mut buf, self.quota.period)?;

        if self.quota.sends_quantity() {
            write_number(&mut buf, self.quota.quantity)?;
        }

        if buf.len() != expected {
            return Err(EncodeError::LengthMismatch {
                expected,
                written: buf.len(),
            });
        }

        Ok(buf)
    }
}

/// Count the decimal digits of `n` (zero has one digit).
pub fn decimal_len(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

// "$<len>\r\n<payload>\r\n"
fn bulk_len(payload: usize) -> usize {
    1 + decimal_len(payload as u64) + CRLF.len() + payload + CRLF.len()
}

fn number_bulk_len(n: u64) -> usize {
    bulk_len(decimal_len(n))
}

fn write_bulk(buf: &mut Vec<u8>, payload: &[u8]) -> std::io::Result<()> {
    write!(buf, "${}\r\n", payload.len())?;
    buf.extend_from_slice(payload);
    buf.extend_from_slice(CRLF);
    Ok(())
}

fn write_number(buf: &mut Vec<u8>, n: u64) -> std::io::Result<()> {
    write!(buf, "${}\r\n{}\r\n", decimal_len(n), n)
}
