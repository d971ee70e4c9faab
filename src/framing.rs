//! Splitting a raw IMAP byte stream into self-contained frames.
//!
//! A [`Frame`] is a slice of the stream that a response parser can consume on its own: a line
//! (terminated by CRLF, or the lone `\n` and lone `\r` some servers produce), possibly carrying
//! one or more literals `{N}\r\n` whose payload bytes are passed through uninterpreted.
//!
//! Separating framing from parsing sets clear message boundaries even in the presence of
//! malformed messages, and keeps literal data from ever being interpreted as protocol text. The
//! parser is a pure transducer: bytes may arrive in arbitrary chunks, it never blocks and never
//! over-consumes, and partial input leaves the state where it can resume on the next append.
//!
//! # Example
//!
//! ```
//! use imap_engine::framing::FramingParser;
//!
//! let mut parser = FramingParser::new(Some(1024));
//!
//! let frames = parser.append_and_frame(b"A1 NOOP\r\nA2 LOGIN {5}\r\nal").unwrap();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].as_bytes(), b"A1 NOOP\r\n");
//!
//! let frames = parser.append_and_frame(b"ice pass\r\n").unwrap();
//! assert_eq!(frames[0].as_bytes(), b"A2 LOGIN {5}\r\nalice pass\r\n");
//! ```

use bytes::BytesMut;
use thiserror::Error;

use crate::{core::Tag, utils::escape_byte_string};

/// Default limit for the line portion of a frame, 32 KiB.
///
/// Literal payloads are exempt; they are drained into the frame as they arrive.
pub const DEFAULT_BUFFER_SIZE_LIMIT: usize = 32 * 1024;

/// The longest literal size accepted, in decimal digits. A `u64` holds at most 20.
const MAX_LITERAL_SIZE_DIGITS: usize = 20;

/// A self-delimited slice of the stream, sufficient for a response parser.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame(BytesMut);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BytesMut {
        self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Frame> for BytesMut {
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

/// An error raised while framing. All variants are fatal for the connection; the parser sticks to
/// the first error and reports it on every further call.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum FramingError {
    /// A structurally invalid byte inside a literal header.
    #[error("Unexpected byte b'\\x{found:02x}' inside a literal header")]
    InvalidFrame { found: u8 },

    /// The literal size is missing, too long, or does not fit a `u64`.
    #[error("Invalid literal size `{}`", escape_byte_string(.digits))]
    LiteralSizeParsingError { digits: Vec<u8> },

    /// The line portion of the current frame outgrew the configured limit.
    #[error("Buffered {buffered} bytes without completing a frame (limit: {limit})")]
    BufferExceeded { buffered: usize, limit: usize },
}

/// How to treat a `\n` at the start of the next frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LineFeedStrategy {
    /// A lone `\r` at the end of a previous delivery already completed a frame; if the matching
    /// `\n` arrives as the next byte it is consumed and discarded.
    IgnoreFirst,
    /// `\n` terminates the current frame and belongs to it.
    IncludeInFrame,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum State {
    NormalTraversal(LineFeedStrategy),
    FoundCr,
    SearchingForLiteralHeader(LiteralHeaderState),
    InsideLiteral { remaining: u64 },
    Failed(FramingError),
}

/// Progress marker inside a literal header `{`, `~?\d+[+-]?}\r\n`.
#[derive(Clone, Debug, Eq, PartialEq)]
enum LiteralHeaderState {
    FindingBinaryFlag,
    FindingSize { digits: Vec<u8> },
    FindingLiteralExtension { size: u64 },
    FindingClosingCurly { size: u64 },
    FindingCr { size: u64 },
    FindingLf { size: u64 },
}

/// Splits an append-only stream of bytes into complete [`Frame`]s.
#[derive(Clone, Debug)]
pub struct FramingParser {
    /// Holds the bytes of the current, incomplete frame plus anything not yet traversed.
    buffer: BytesMut,
    /// How many bytes from the front of `buffer` tentatively belong to the current frame.
    frame_length: usize,
    /// How many of those bytes are literal payload (exempt from the size limit).
    frame_literal_bytes: usize,
    state: State,
    buffer_size_limit: Option<usize>,
}

impl FramingParser {
    /// Creates a parser whose line portion per frame is bounded by `buffer_size_limit`.
    ///
    /// `None` disables the bound, which allows a malicious peer to allocate an arbitrary amount
    /// of memory by never terminating a line.
    pub fn new(buffer_size_limit: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::new(),
            frame_length: 0,
            frame_literal_bytes: 0,
            state: State::NormalTraversal(LineFeedStrategy::IncludeInFrame),
            buffer_size_limit,
        }
    }

    /// Appends `bytes` and returns every frame that is now complete, in stream order.
    ///
    /// A single call may yield zero, one, or many frames. Once an error was returned the parser
    /// is unusable and every further call returns the same error; the caller should close the
    /// connection.
    pub fn append_and_frame(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, FramingError> {
        if let State::Failed(error) = &self.state {
            return Err(error.clone());
        }

        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            match self.parse_next() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(error) => {
                    self.state = State::Failed(error.clone());
                    return Err(error);
                }
            }
        }

        if let Some(limit) = self.buffer_size_limit {
            let buffered = self.frame_length - self.frame_literal_bytes;
            if buffered > limit {
                let error = FramingError::BufferExceeded { buffered, limit };
                self.state = State::Failed(error.clone());
                return Err(error);
            }
        }

        Ok(frames)
    }

    /// Resumes traversal and returns the next complete frame, or `None` when all buffered bytes
    /// were consumed.
    fn parse_next(&mut self) -> Result<Option<Frame>, FramingError> {
        loop {
            let state = std::mem::replace(
                &mut self.state,
                State::NormalTraversal(LineFeedStrategy::IncludeInFrame),
            );

            match state {
                State::NormalTraversal(strategy) => {
                    let Some(byte) = self.peek() else {
                        self.state = State::NormalTraversal(strategy);
                        return Ok(None);
                    };

                    if strategy == LineFeedStrategy::IgnoreFirst
                        && self.frame_length == 0
                        && byte == b'\n'
                    {
                        // The terminator of a frame that already ended on a lone `\r`.
                        let _ = self.buffer.split_to(1);
                        continue;
                    }

                    self.frame_length += 1;
                    match byte {
                        b'\r' => self.state = State::FoundCr,
                        b'\n' => return Ok(Some(self.emit())),
                        b'{' => {
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingBinaryFlag,
                            )
                        }
                        _ => {}
                    }
                }
                State::FoundCr => match self.peek() {
                    None => {
                        // `\r` was the last byte of this delivery: the frame is complete, and a
                        // `\n` arriving next is a stand-alone terminator to discard.
                        let frame = self.emit();
                        self.state = State::NormalTraversal(LineFeedStrategy::IgnoreFirst);
                        return Ok(Some(frame));
                    }
                    Some(b'\n') => {
                        self.frame_length += 1;
                        return Ok(Some(self.emit()));
                    }
                    Some(_) => {
                        // The lone `\r` already ended the frame; this byte starts the next one.
                        return Ok(Some(self.emit()));
                    }
                },
                State::SearchingForLiteralHeader(substate) => match substate {
                    LiteralHeaderState::FindingBinaryFlag => {
                        let Some(byte) = self.peek() else {
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingBinaryFlag,
                            );
                            return Ok(None);
                        };

                        if byte == b'~' {
                            self.frame_length += 1;
                        }
                        self.state = State::SearchingForLiteralHeader(
                            LiteralHeaderState::FindingSize { digits: Vec::new() },
                        );
                    }
                    LiteralHeaderState::FindingSize { mut digits } => {
                        let Some(byte) = self.peek() else {
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingSize { digits },
                            );
                            return Ok(None);
                        };

                        if byte.is_ascii_digit() {
                            if digits.len() >= MAX_LITERAL_SIZE_DIGITS {
                                return Err(FramingError::LiteralSizeParsingError { digits });
                            }
                            digits.push(byte);
                            self.frame_length += 1;
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingSize { digits },
                            );
                        } else {
                            let size = parse_literal_size(digits)?;
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingLiteralExtension { size },
                            );
                        }
                    }
                    LiteralHeaderState::FindingLiteralExtension { size } => {
                        let Some(byte) = self.peek() else {
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingLiteralExtension { size },
                            );
                            return Ok(None);
                        };

                        if byte == b'+' || byte == b'-' {
                            self.frame_length += 1;
                        }
                        self.state = State::SearchingForLiteralHeader(
                            LiteralHeaderState::FindingClosingCurly { size },
                        );
                    }
                    LiteralHeaderState::FindingClosingCurly { size } => {
                        let Some(byte) = self.peek() else {
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingClosingCurly { size },
                            );
                            return Ok(None);
                        };

                        if byte != b'}' {
                            return Err(FramingError::InvalidFrame { found: byte });
                        }
                        self.frame_length += 1;
                        self.state = State::SearchingForLiteralHeader(
                            LiteralHeaderState::FindingCr { size },
                        );
                    }
                    LiteralHeaderState::FindingCr { size } => {
                        let Some(byte) = self.peek() else {
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingCr { size },
                            );
                            return Ok(None);
                        };

                        if byte != b'\r' {
                            return Err(FramingError::InvalidFrame { found: byte });
                        }
                        self.frame_length += 1;
                        self.state = State::SearchingForLiteralHeader(
                            LiteralHeaderState::FindingLf { size },
                        );
                    }
                    LiteralHeaderState::FindingLf { size } => {
                        let Some(byte) = self.peek() else {
                            self.state = State::SearchingForLiteralHeader(
                                LiteralHeaderState::FindingLf { size },
                            );
                            return Ok(None);
                        };

                        if byte != b'\n' {
                            return Err(FramingError::InvalidFrame { found: byte });
                        }
                        self.frame_length += 1;
                        if size == 0 {
                            // `{0}\r\n` completes the frame with no payload.
                            return Ok(Some(self.emit()));
                        }
                        self.state = State::InsideLiteral { remaining: size };
                    }
                },
                State::InsideLiteral { remaining } => {
                    let available = self.buffer.len() - self.frame_length;
                    if available == 0 {
                        self.state = State::InsideLiteral { remaining };
                        return Ok(None);
                    }

                    let taken = remaining.min(available as u64) as usize;
                    self.frame_length += taken;
                    self.frame_literal_bytes += taken;

                    let remaining = remaining - taken as u64;
                    if remaining > 0 {
                        self.state = State::InsideLiteral { remaining };
                        return Ok(None);
                    }
                    // Literal drained; the frame continues until the next terminator.
                }
                State::Failed(error) => {
                    self.state = State::Failed(error.clone());
                    return Err(error);
                }
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buffer.get(self.frame_length).copied()
    }

    fn emit(&mut self) -> Frame {
        let bytes = self.buffer.split_to(self.frame_length);
        self.frame_length = 0;
        self.frame_literal_bytes = 0;
        Frame(bytes)
    }
}

impl Default for FramingParser {
    fn default() -> Self {
        Self::new(Some(DEFAULT_BUFFER_SIZE_LIMIT))
    }
}

fn parse_literal_size(digits: Vec<u8>) -> Result<u64, FramingError> {
    if digits.is_empty() || digits.len() > MAX_LITERAL_SIZE_DIGITS {
        return Err(FramingError::LiteralSizeParsingError { digits });
    }

    // Safety: `unwrap` can't fail, `digits` contains ASCII digits only.
    std::str::from_utf8(&digits)
        .unwrap()
        .parse::<u64>()
        .map_err(|_| FramingError::LiteralSizeParsingError { digits })
}

/// Tries to decode the [`Tag`] of a raw frame.
///
/// Decoding is on a best-effort basis: some frames don't carry a tag, and without context it is
/// unknown whether this function will succeed. It is useful for diagnostics when a frame is
/// malformed and a tag is needed to report the failure.
pub fn parse_tag(frame: &[u8]) -> Option<Tag> {
    let mut space = None;
    for (position, byte) in frame.iter().enumerate() {
        match byte {
            // A tag is always delimited by SP.
            b' ' => {
                space = Some(position);
                break;
            }
            // End of line reached.
            b'\n' => return None,
            _ => continue,
        }
    }

    Tag::try_from(&frame[..space?]).ok()
}
