//! The flagduel wire format: ASCII-delimited, length-tagged frames.
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! tlength:<N>;type:<TAG>;length:<L>;data:<payload>[type:...length:...data:...]
//! ```
//!
//! `N` is the decimal byte count of the *entire* frame, including the
//! `tlength:<N>;` field itself (`tlength:41;type:FLG;length:7;data:FLG_DIR`
//! is exactly 41 bytes). A frame carries one or more segments; each segment
//! is a three-letter tag, a decimal payload length, and exactly that many
//! payload bytes. Segments concatenate back to back — the declared length is
//! the only delimiter between one payload and the next `type:` field.
//!
//! [`encode`] produces single-segment frames. [`Frame::parse`] validates the
//! outer envelope and hands out a lazy [`Segments`] iterator; segment errors
//! surface only when the iterator reaches them.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest frame the stream reader will buffer before giving up on a sender.
pub const MAX_FRAME_LEN: usize = 8192;

const TLENGTH_FIELD: &[u8] = b"tlength:";
const TYPE_FIELD: &[u8] = b"type:";
const LENGTH_FIELD: &[u8] = b"length:";
const DATA_FIELD: &[u8] = b"data:";

/// Segment type tag. Exactly three ASCII characters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// A shell command to run on the receiving player's machine.
    Cmd,
    /// Command output echoed back to a player.
    Out,
    /// An error notice for the receiving player.
    Err,
    /// The sending player's current working directory.
    Cwd,
    /// Flag-provisioning traffic, consumed by the server.
    Flg,
    /// Key-exchange material for the transport wrapper.
    Key,
}

impl Tag {
    /// The three-character wire spelling of this tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Cmd => "CMD",
            Tag::Out => "OUT",
            Tag::Err => "ERR",
            Tag::Cwd => "CWD",
            Tag::Flg => "FLG",
            Tag::Key => "KEY",
        }
    }

    /// Parse a three-byte wire tag. Returns `None` for tags outside the set.
    pub fn from_bytes(bytes: &[u8]) -> Option<Tag> {
        match bytes {
            b"CMD" => Some(Tag::Cmd),
            b"OUT" => Some(Tag::Out),
            b"ERR" => Some(Tag::Err),
            b"CWD" => Some(Tag::Cwd),
            b"FLG" => Some(Tag::Flg),
            b"KEY" => Some(Tag::Key),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that make a frame undecodable.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// The frame does not start with `tlength:`.
    #[error("missing tlength field")]
    MissingTlength,

    /// The tlength value is empty, non-decimal, or absurdly long.
    #[error("unparseable tlength value")]
    BadTlength,

    /// Fewer bytes were supplied than the frame declares.
    #[error("frame truncated: declared {declared} bytes, got {actual}")]
    Truncated {
        /// Declared total frame length.
        declared: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The frame declares a length larger than [`MAX_FRAME_LEN`].
    #[error("frame of {declared} bytes exceeds limit {max}")]
    Oversized {
        /// Declared total frame length.
        declared: usize,
        /// The enforced maximum.
        max: usize,
    },

    /// A segment does not start with `type:`.
    #[error("missing type field")]
    MissingType,

    /// A segment tag is not exactly three characters.
    #[error("segment tag is not three characters")]
    ShortTag,

    /// A segment tag is three characters but not in the tag set.
    #[error("unknown segment tag")]
    UnknownTag,

    /// A segment is missing its `length:` field or the value is not decimal.
    #[error("unparseable segment length")]
    BadLength,

    /// A segment is missing its `data:` field.
    #[error("missing data field")]
    MissingData,

    /// A segment declares more payload bytes than remain in the frame.
    #[error("segment payload of {declared} bytes overruns frame")]
    LengthOverrun {
        /// Declared payload length.
        declared: usize,
    },
}

/// One decoded segment: a tag and its raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// The segment's type tag.
    pub tag: Tag,
    /// The segment payload, exactly as received.
    pub payload: &'a [u8],
}

/// A validated frame envelope over borrowed bytes.
///
/// Only the outer `tlength` envelope is checked at parse time; segments are
/// decoded lazily by [`Frame::segments`].
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Validate the envelope of `bytes` and wrap the segment region.
    ///
    /// `bytes` may extend past the declared frame end; the excess is ignored.
    /// Refuses the frame when fewer bytes than `tlength` are available.
    pub fn parse(bytes: &'a [u8]) -> Result<Frame<'a>, WireError> {
        let (total, header_len) = parse_tlength(bytes)?;
        if bytes.len() < total {
            return Err(WireError::Truncated {
                declared: total,
                actual: bytes.len(),
            });
        }
        Ok(Frame {
            body: &bytes[header_len..total],
        })
    }

    /// Lazy iterator over the frame's segments, in wire order.
    pub fn segments(&self) -> Segments<'a> {
        Segments { rest: self.body }
    }

    /// The first segment of the frame, which drives routing.
    pub fn leading(&self) -> Result<Segment<'a>, WireError> {
        self.segments()
            .next()
            .unwrap_or(Err(WireError::MissingType))
    }
}

/// Iterator over the segments of one frame.
///
/// Yields `Err` once and then stops if the remaining bytes are malformed.
pub struct Segments<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match split_segment(self.rest) {
            Ok((segment, rest)) => {
                self.rest = rest;
                Some(Ok(segment))
            }
            Err(e) => {
                // Poison the iterator; a malformed tail has no frame boundary.
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

/// Encode a single-segment frame for `payload` under `tag`.
///
/// The emitted bytes are the canonical wire form: `tlength` is the length of
/// the whole frame, solved so the digit count of the value is consistent with
/// the total it contributes to.
pub fn encode(tag: Tag, payload: &[u8]) -> Vec<u8> {
    let body_len = TYPE_FIELD.len()
        + 4 // "TAG;"
        + LENGTH_FIELD.len()
        + decimal_digits(payload.len())
        + 1 // ';'
        + DATA_FIELD.len()
        + payload.len();

    // tlength counts itself: total = len("tlength:") + digits(total) + 1 + body.
    let base = TLENGTH_FIELD.len() + 1 + body_len;
    let mut total = 0;
    for digits in 1..=10 {
        let candidate = base + digits;
        if decimal_digits(candidate) == digits {
            total = candidate;
            break;
        }
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(TLENGTH_FIELD);
    out.extend_from_slice(total.to_string().as_bytes());
    out.push(b';');
    out.extend_from_slice(TYPE_FIELD);
    out.extend_from_slice(tag.as_str().as_bytes());
    out.push(b';');
    out.extend_from_slice(LENGTH_FIELD);
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b';');
    out.extend_from_slice(DATA_FIELD);
    out.extend_from_slice(payload);
    debug_assert_eq!(out.len(), total);
    out
}

/// How many bytes of `buf` the next frame occupies, if its header is
/// complete.
///
/// Returns `Ok(None)` while the `tlength:<N>;` header is still arriving,
/// `Ok(Some(total))` once the header is readable, and an error when the bytes
/// can never become a valid header.
pub fn peek_frame_len(buf: &[u8]) -> Result<Option<usize>, WireError> {
    // Reject as soon as the prefix diverges, even before it is complete.
    let probe = buf.len().min(TLENGTH_FIELD.len());
    if buf[..probe] != TLENGTH_FIELD[..probe] {
        return Err(WireError::MissingTlength);
    }
    if buf.len() <= TLENGTH_FIELD.len() {
        return Ok(None);
    }
    let digits = &buf[TLENGTH_FIELD.len()..];
    match digits.iter().position(|&b| b == b';') {
        Some(_) => parse_tlength(buf).map(|(total, _)| Some(total)),
        None => {
            if digits.len() > 10 || digits.iter().any(|b| !b.is_ascii_digit()) {
                Err(WireError::BadTlength)
            } else {
                Ok(None)
            }
        }
    }
}

/// Read one frame from `reader`, buffering partial data in `buf`.
///
/// `buf` carries stream state between calls and must be reused for the same
/// connection. Returns `Ok(None)` on a clean end-of-stream at a frame
/// boundary. A malformed or oversized header is returned as
/// [`std::io::ErrorKind::InvalidData`]; the buffer is cleared so the caller
/// may keep reading.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<Vec<u8>>> {
    loop {
        match peek_frame_len(buf) {
            Ok(Some(total)) if total > MAX_FRAME_LEN => {
                buf.clear();
                return Err(invalid_data(WireError::Oversized {
                    declared: total,
                    max: MAX_FRAME_LEN,
                }));
            }
            Ok(Some(total)) if buf.len() >= total => {
                let rest = buf.split_off(total);
                let frame = std::mem::replace(buf, rest);
                return Ok(Some(frame));
            }
            Ok(_) => {}
            Err(e) => {
                buf.clear();
                return Err(invalid_data(e));
            }
        }

        let mut chunk = [0u8; 4096];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            // EOF mid-frame drops the partial bytes; there is no peer left
            // to complete them.
            buf.clear();
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Write one already-encoded frame to `writer` and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

fn invalid_data(e: WireError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Parse `tlength:<N>;` at the start of `bytes`.
///
/// Returns the declared total and the header length in bytes.
fn parse_tlength(bytes: &[u8]) -> Result<(usize, usize), WireError> {
    let rest = bytes
        .strip_prefix(TLENGTH_FIELD)
        .ok_or(WireError::MissingTlength)?;
    let end = rest
        .iter()
        .position(|&b| b == b';')
        .ok_or(WireError::BadTlength)?;
    let total = parse_decimal(&rest[..end]).ok_or(WireError::BadTlength)?;
    let header_len = TLENGTH_FIELD.len() + end + 1;
    if total < header_len {
        return Err(WireError::BadTlength);
    }
    Ok((total, header_len))
}

/// Split one `type:<T>;length:<L>;data:<payload>` group off the front of
/// `bytes`.
fn split_segment(bytes: &[u8]) -> Result<(Segment<'_>, &[u8]), WireError> {
    let rest = bytes
        .strip_prefix(TYPE_FIELD)
        .ok_or(WireError::MissingType)?;
    let sep = rest
        .iter()
        .position(|&b| b == b';')
        .ok_or(WireError::ShortTag)?;
    if sep < 3 {
        return Err(WireError::ShortTag);
    }
    if sep > 3 {
        return Err(WireError::UnknownTag);
    }
    let tag = Tag::from_bytes(&rest[..3]).ok_or(WireError::UnknownTag)?;
    let rest = &rest[4..];

    let rest = rest
        .strip_prefix(LENGTH_FIELD)
        .ok_or(WireError::BadLength)?;
    let sep = rest
        .iter()
        .position(|&b| b == b';')
        .ok_or(WireError::BadLength)?;
    let len = parse_decimal(&rest[..sep]).ok_or(WireError::BadLength)?;
    let rest = &rest[sep + 1..];

    let rest = rest.strip_prefix(DATA_FIELD).ok_or(WireError::MissingData)?;
    if rest.len() < len {
        return Err(WireError::LengthOverrun { declared: len });
    }
    let (payload, rest) = rest.split_at(len);
    Ok((Segment { tag, payload }, rest))
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || digits.len() > 10 {
        return None;
    }
    let mut value = 0usize;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + usize::from(b - b'0');
    }
    Some(value)
}
