//! Encoder/decoder adapter: the byte-in / byte-out boundary of the engine.
//!
//! [`ClientCodec`] wires the [`FramingParser`](crate::framing::FramingParser) to an external
//! response parser (the [`ResponseDecoder`] seam) and drives the
//! [`ClientStateMachine`](crate::client::ClientStateMachine):
//!
//! - Inbound: transport bytes are framed, each frame is decoded into a [`Response`] or a
//!   continuation request, and the result is routed through the state machine. Bytes unblocked by
//!   a continuation request (synchronizing literals) land in the outbound buffer on the way.
//! - Outbound: [`CommandStreamPart`]s are validated by the state machine and rendered into the
//!   outbound buffer, which the transport drains with [`ClientCodec::take_outgoing`].
//!
//! Grammar encoding stays external. The codec renders only structural glue: literal headers,
//! `DONE`, base64 continuation data, and the catenate separators.

use base64::{engine::general_purpose::STANDARD as base64, Engine};
use bytes::BytesMut;
use log::{debug, trace};
use thiserror::Error;

use crate::{
    client::{
        AppendPart, ClientStateMachine, ClientStateMachineOptions, CommandStreamPart,
        ContinuationAction, ContinuationRequest, ProtocolStateError, Response, ResponseEvent,
        TaggedResponse,
    },
    core::LiteralMode,
    framing::{FramingError, FramingParser, DEFAULT_BUFFER_SIZE_LIMIT},
};

/// The intended action of a client for one piece of an encoded message.
///
/// External encoders produce commands in this form so that the state machine can hold
/// synchronizing literals back until the server agrees to receive them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fragment {
    /// A line that is ready to be sent, including its literal announcement (if any) and CRLF.
    Line { data: Vec<u8> },

    /// A literal payload that may require a continuation request before it can be sent.
    Literal { data: Vec<u8>, mode: LiteralMode },
}

/// A decoded inbound message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InboundMessage {
    Response(Response),
    ContinuationRequest(ContinuationRequest),
}

/// The seam to the external response grammar parser.
///
/// The engine hands every complete frame to the decoder; only the variant of the returned message
/// drives the state machine, the payloads pass through opaquely.
pub trait ResponseDecoder {
    type Error;

    fn decode(&mut self, frame: &[u8]) -> Result<InboundMessage, Self::Error>;
}

/// An error at the codec boundary. All variants are fatal for the connection.
#[derive(Debug, Eq, Error, PartialEq)]
pub enum ClientError<E> {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    State(#[from] ProtocolStateError),

    /// The external response parser rejected a frame.
    #[error("Failed to decode a framed response")]
    Decode(E),
}

/// An event produced by [`ClientCodec::receive`] for the application.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientEvent {
    /// Server data forwarded to the application.
    Response(Response),
    /// The tagged response that completed the oldest pending command.
    CommandCompleted(TaggedResponse),
    /// The APPEND sub-machine may stream message bytes now.
    AppendReady,
    /// The server confirmed IDLE.
    IdleConfirmed,
    /// A SASL challenge; answer with [`CommandStreamPart::ContinuationResponse`].
    AuthenticationChallenge(ContinuationRequest),
}

/// Connects a transport's byte stream to the client state machine.
#[derive(Debug)]
pub struct ClientCodec<D> {
    parser: FramingParser,
    decoder: D,
    machine: ClientStateMachine,
    outgoing: BytesMut,
}

impl<D: ResponseDecoder> ClientCodec<D> {
    pub fn new(decoder: D) -> Self {
        Self::with_options(
            decoder,
            ClientStateMachineOptions::default(),
            Some(DEFAULT_BUFFER_SIZE_LIMIT),
        )
    }

    pub fn with_options(
        decoder: D,
        options: ClientStateMachineOptions,
        buffer_size_limit: Option<usize>,
    ) -> Self {
        Self {
            parser: FramingParser::new(buffer_size_limit),
            decoder,
            machine: ClientStateMachine::new(options),
            outgoing: BytesMut::new(),
        }
    }

    /// Validates and renders an outbound command part.
    ///
    /// The wire bytes are appended to the outbound buffer; drain it with
    /// [`ClientCodec::take_outgoing`].
    pub fn send(&mut self, part: CommandStreamPart) -> Result<(), ClientError<D::Error>> {
        let bytes = self.machine.send_command(part)?;
        trace!("enqueued {} outbound bytes", bytes.len());
        self.outgoing.extend_from_slice(&bytes);
        Ok(())
    }

    /// Feeds transport bytes through the framer, the response decoder, and the state machine.
    ///
    /// Returns the events for the application, in stream order. Deferred literal bytes released
    /// by a continuation request are appended to the outbound buffer.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Vec<ClientEvent>, ClientError<D::Error>> {
        let frames = self.parser.append_and_frame(bytes)?;

        let mut events = Vec::new();
        for frame in frames {
            trace!("framed {} bytes", frame.len());

            let message = self
                .decoder
                .decode(frame.as_bytes())
                .map_err(ClientError::Decode)?;

            match message {
                InboundMessage::Response(response) => {
                    match self.machine.receive_response(response)? {
                        ResponseEvent::Response(response) => {
                            events.push(ClientEvent::Response(response))
                        }
                        ResponseEvent::CommandCompleted(tagged) => {
                            events.push(ClientEvent::CommandCompleted(tagged))
                        }
                    }
                }
                InboundMessage::ContinuationRequest(request) => {
                    match self.machine.receive_continuation_request(request)? {
                        ContinuationAction::ProceedWithLiteral(bytes) => {
                            debug!("continuation request released {} deferred bytes", bytes.len());
                            self.outgoing.extend_from_slice(&bytes);
                        }
                        ContinuationAction::AppendReady => events.push(ClientEvent::AppendReady),
                        ContinuationAction::IdleConfirmed => {
                            events.push(ClientEvent::IdleConfirmed)
                        }
                        ContinuationAction::AuthenticationChallenge(request) => {
                            events.push(ClientEvent::AuthenticationChallenge(request))
                        }
                    }
                }
            }
        }

        Ok(events)
    }

    /// Drains the bytes to be written to the transport.
    pub fn take_outgoing(&mut self) -> BytesMut {
        self.outgoing.split()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Whether the state machine reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.machine.is_closed()
    }
}

/// Renders the structural glue of an APPEND part. Opaque grammar bytes carried by the part are
/// emitted verbatim.
pub(crate) fn render_append_part(part: &AppendPart) -> Vec<u8> {
    let mut out = Vec::new();

    match part {
        AppendPart::Start { tag, header } => {
            out.extend_from_slice(tag.inner().as_bytes());
            out.push(b' ');
            out.extend_from_slice(header);
        }
        AppendPart::BeginMessage {
            options,
            size,
            mode,
            binary,
        } => {
            out.extend_from_slice(options);
            out.push(b' ');
            write_literal_header(&mut out, *size, *mode, *binary);
        }
        AppendPart::MessageBytes(data) => out.extend_from_slice(data),
        AppendPart::EndMessage => {}
        AppendPart::BeginCatenate => out.extend_from_slice(b" CATENATE ("),
        AppendPart::CatenateUrl(url) => out.extend_from_slice(url),
        AppendPart::CatenateData {
            options,
            size,
            mode,
            binary,
        } => {
            out.extend_from_slice(options);
            out.push(b' ');
            write_literal_header(&mut out, *size, *mode, *binary);
        }
        AppendPart::EndCatenate => out.push(b')'),
        AppendPart::Finish => out.extend_from_slice(b"\r\n"),
    }

    out
}

/// `~?{size[+]}` and CRLF.
fn write_literal_header(out: &mut Vec<u8>, size: u64, mode: LiteralMode, binary: bool) {
    if binary {
        out.push(b'~');
    }
    out.push(b'{');
    out.extend_from_slice(size.to_string().as_bytes());
    if mode == LiteralMode::NonSync {
        out.push(b'+');
    }
    out.extend_from_slice(b"}\r\n");
}

pub(crate) fn render_idle_done() -> Vec<u8> {
    b"DONE\r\n".to_vec()
}

pub(crate) fn render_continuation_data(data: &[u8]) -> Vec<u8> {
    let mut out = base64.encode(data).into_bytes();
    out.extend_from_slice(b"\r\n");
    out
}
