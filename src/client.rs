//! Client command-response flow.
//!
//! [`ClientStateMachine`] multiplexes long-running commands (APPEND, AUTHENTICATE, IDLE) with
//! ordinary tagged traffic. Ordinary commands are pipelined freely and their tagged responses
//! matched in FIFO order; at most one long-running command is active at a time and owns the
//! conversation until it completes.
//!
//! The machine is pure: it accepts outbound [`CommandStreamPart`]s and inbound [`Response`]s /
//! continuation requests, validates every transition, and returns the bytes that may go on the
//! wire. It never performs I/O and never suspends; see [`crate::codec::ClientCodec`] for the
//! byte-stream boundary.

pub mod append;
pub mod authenticate;
pub mod idle;

use std::collections::VecDeque;

use thiserror::Error;

pub use append::AppendPart;
use append::AppendStateMachine;
use authenticate::AuthenticationStateMachine;
use idle::{IdleResponseAction, IdleStateMachine};

use crate::{
    codec::{render_append_part, render_continuation_data, render_idle_done, Fragment},
    core::{LiteralMode, Tag},
};

/// An error raised by the state machine.
///
/// Outbound errors ([`ProtocolStateError::InvalidCommandForState`]) reject the offending command
/// part and leave the state unchanged. Inbound errors mean client and server have desynchronized;
/// the machine closes and only teardown remains valid.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
pub enum ProtocolStateError {
    #[error("Command is not valid in the current state")]
    InvalidCommandForState,
    #[error("Unexpected response in the current state")]
    UnexpectedResponse,
    #[error("Unexpected continuation request in the current state")]
    UnexpectedContinuationRequest,
}

/// A tagged response, e.g., `A1 OK LOGIN completed`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TaggedResponse {
    pub tag: Tag,
    /// The opaque remainder of the response; decoding it is the response parser's business.
    pub data: Vec<u8>,
}

/// A command continuation request, e.g., `+ Ready for literal data`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ContinuationRequest {
    /// The opaque payload after `+`, e.g., a base64 SASL challenge.
    pub data: Vec<u8>,
}

/// A parsed server response, reduced to what the state machine needs.
///
/// Payloads are opaque; only the variant drives state transitions. Context-free response parsers
/// deliver server challenges and the IDLE confirmation through
/// [`ClientStateMachine::receive_continuation_request`]; the typed
/// [`Response::AuthenticationChallenge`] and [`Response::IdleStarted`] variants exist for parsers
/// that track the conversation themselves and route identically.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Response {
    Tagged(TaggedResponse),
    Untagged(Vec<u8>),
    Fetch(Vec<u8>),
    /// An untagged `BYE` or equivalent connection-fatal response; terminal in every state.
    Fatal(Vec<u8>),
    AuthenticationChallenge(ContinuationRequest),
    IdleStarted,
}

/// How the command must be supervised after its first line hits the wire.
///
/// Command bodies are opaque here, so the router cannot sniff `IDLE` or `AUTHENTICATE` out of the
/// encoded bytes; the caller states the kind explicitly.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaggedCommandKind {
    /// Request-response; completed by the matching tagged response.
    Ordinary,
    /// Enters the IDLE sub-machine; concluded by `DONE`.
    Idle,
    /// Enters the AUTHENTICATE sub-machine; concluded by the tagged response.
    Authenticate,
}

/// An externally encoded tagged command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaggedCommand {
    pub tag: Tag,
    pub kind: TaggedCommandKind,
    /// The encoded command, split at literal boundaries. A synchronizing literal fragment is
    /// held back until the server acknowledges it with a continuation request.
    pub fragments: Vec<Fragment>,
}

/// One outbound element of the client command stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandStreamPart {
    Tagged(TaggedCommand),
    Append(AppendPart),
    /// The literal `DONE` line concluding an IDLE command.
    IdleDone,
    /// Raw SASL payload answering a server challenge; rendered as base64 and CRLF.
    ContinuationResponse(Vec<u8>),
}

/// The outcome of [`ClientStateMachine::receive_response`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseEvent {
    /// Server data forwarded to the application.
    Response(Response),
    /// The tagged response completed the oldest pending command.
    CommandCompleted(TaggedResponse),
}

/// The outcome of [`ClientStateMachine::receive_continuation_request`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContinuationAction {
    /// Deferred bytes of an ordinary command (a synchronizing literal and whatever follows it up
    /// to the next one) are now allowed on the wire.
    ProceedWithLiteral(Vec<u8>),
    /// The APPEND sub-machine may stream message bytes now.
    AppendReady,
    /// The server confirmed IDLE.
    IdleConfirmed,
    /// A SASL challenge; answer with [`CommandStreamPart::ContinuationResponse`].
    AuthenticationChallenge(ContinuationRequest),
}

/// Policy for untagged responses that arrive between `IDLE` and the server's confirmation.
///
/// Servers disagree on whether this is legal; the strict default treats it as a desync.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum IdleUntaggedPolicy {
    /// Fail with [`ProtocolStateError::UnexpectedResponse`].
    #[default]
    Reject,
    /// Forward the response to the application.
    Deliver,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClientStateMachineOptions {
    pub idle_untagged_policy: IdleUntaggedPolicy,
}

#[derive(Debug)]
enum State {
    /// No long-running command active; ordinary traffic only.
    ExpectingNormalResponse,
    /// A synchronizing literal of an ordinary command awaits its continuation request.
    ExpectingLiteralContinuationRequest,
    Appending(AppendStateMachine),
    Idle(IdleStateMachine),
    Authenticating(AuthenticationStateMachine),
    /// Terminal; entered on a fatal response or an inbound protocol error.
    Closed,
}

/// The outer client state machine.
#[derive(Debug)]
pub struct ClientStateMachine {
    state: State,
    /// Tags of commands whose tagged response is outstanding, in send order.
    pending_tags: VecDeque<Tag>,
    /// Fragments held back behind an unacknowledged synchronizing literal.
    deferred: VecDeque<Fragment>,
    options: ClientStateMachineOptions,
}

impl ClientStateMachine {
    pub fn new(options: ClientStateMachineOptions) -> Self {
        Self {
            state: State::ExpectingNormalResponse,
            pending_tags: VecDeque::new(),
            deferred: VecDeque::new(),
            options,
        }
    }

    /// Whether the machine reached its terminal state. Once closed, every input is rejected and
    /// only teardown remains.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Number of commands whose tagged response is still outstanding.
    pub fn pending_commands(&self) -> usize {
        self.pending_tags.len()
    }

    /// Accepts an outbound command part and returns the bytes now allowed on the wire.
    ///
    /// The returned buffer may be empty, e.g., for a command queued entirely behind an
    /// unacknowledged synchronizing literal. Rejected parts leave the state unchanged.
    pub fn send_command(&mut self, part: CommandStreamPart) -> Result<Vec<u8>, ProtocolStateError> {
        match part {
            CommandStreamPart::Tagged(command) => self.send_tagged(command),
            CommandStreamPart::Append(part) => self.send_append(part),
            CommandStreamPart::IdleDone => self.send_idle_done(),
            CommandStreamPart::ContinuationResponse(data) => self.send_continuation_response(data),
        }
    }

    /// Accepts an inbound response.
    ///
    /// Fatal responses are delivered and close the machine. Inbound protocol errors close the
    /// machine as well: after a desync it is unsafe to continue.
    pub fn receive_response(
        &mut self,
        response: Response,
    ) -> Result<ResponseEvent, ProtocolStateError> {
        if self.is_closed() {
            return Err(ProtocolStateError::UnexpectedResponse);
        }

        if matches!(response, Response::Fatal(_)) {
            self.close();
            return Ok(ResponseEvent::Response(response));
        }

        match &mut self.state {
            State::ExpectingNormalResponse | State::ExpectingLiteralContinuationRequest => {
                match response {
                    Response::Tagged(tagged) => self.complete_pending_command(tagged),
                    Response::Untagged(_) | Response::Fetch(_) => {
                        Ok(ResponseEvent::Response(response))
                    }
                    Response::AuthenticationChallenge(_)
                    | Response::IdleStarted
                    | Response::Fatal(_) => {
                        Err(self.close_with(ProtocolStateError::UnexpectedResponse))
                    }
                }
            }
            State::Appending(machine) => {
                let result = match &response {
                    Response::Tagged(_) => machine.receive_tagged_response(),
                    // The server MUST NOT interleave data during an APPEND.
                    _ => Err(ProtocolStateError::UnexpectedResponse),
                };

                match (result, response) {
                    (Ok(()), Response::Tagged(tagged)) => {
                        self.state = State::ExpectingNormalResponse;
                        self.complete_pending_command(tagged)
                    }
                    (Ok(()), _) => Err(self.close_with(ProtocolStateError::UnexpectedResponse)),
                    (Err(error), _) => Err(self.close_with(error)),
                }
            }
            State::Idle(machine) => match machine.receive_response(&response) {
                Ok(IdleResponseAction::Confirmed) | Ok(IdleResponseAction::Deliver) => {
                    Ok(ResponseEvent::Response(response))
                }
                Err(error) => Err(self.close_with(error)),
            },
            State::Authenticating(machine) => match response {
                Response::Tagged(tagged) => match machine.receive_tagged_response() {
                    Ok(()) => {
                        self.state = State::ExpectingNormalResponse;
                        self.complete_pending_command(tagged)
                    }
                    Err(error) => Err(self.close_with(error)),
                },
                Response::AuthenticationChallenge(request) => {
                    match machine.receive_continuation_request() {
                        Ok(()) => Ok(ResponseEvent::Response(Response::AuthenticationChallenge(
                            request,
                        ))),
                        Err(error) => Err(self.close_with(error)),
                    }
                }
                _ => Err(self.close_with(ProtocolStateError::UnexpectedResponse)),
            },
            State::Closed => Err(ProtocolStateError::UnexpectedResponse),
        }
    }

    /// Accepts a command continuation request and routes it to the active sub-machine, or to the
    /// pipeline of an ordinary command owing a synchronizing literal.
    pub fn receive_continuation_request(
        &mut self,
        request: ContinuationRequest,
    ) -> Result<ContinuationAction, ProtocolStateError> {
        match &mut self.state {
            State::ExpectingLiteralContinuationRequest => {
                Ok(ContinuationAction::ProceedWithLiteral(
                    self.acknowledge_literal(),
                ))
            }
            State::Appending(machine) => {
                let result = machine.receive_continuation_request();
                match result {
                    Ok(()) => Ok(ContinuationAction::AppendReady),
                    Err(error) => Err(self.close_with(error)),
                }
            }
            State::Idle(machine) => {
                let result = machine.receive_continuation_request();
                match result {
                    Ok(()) => Ok(ContinuationAction::IdleConfirmed),
                    Err(error) => Err(self.close_with(error)),
                }
            }
            State::Authenticating(machine) => {
                let result = machine.receive_continuation_request();
                match result {
                    Ok(()) => Ok(ContinuationAction::AuthenticationChallenge(request)),
                    Err(error) => Err(self.close_with(error)),
                }
            }
            State::ExpectingNormalResponse | State::Closed => {
                Err(self.close_with(ProtocolStateError::UnexpectedContinuationRequest))
            }
        }
    }

    fn send_tagged(&mut self, command: TaggedCommand) -> Result<Vec<u8>, ProtocolStateError> {
        match command.kind {
            TaggedCommandKind::Ordinary => {
                if !matches!(
                    self.state,
                    State::ExpectingNormalResponse | State::ExpectingLiteralContinuationRequest
                ) {
                    return Err(ProtocolStateError::InvalidCommandForState);
                }

                self.pending_tags.push_back(command.tag);
                self.deferred.extend(command.fragments);

                let bytes = self.drain_deferred();
                self.state = if self.deferred.is_empty() {
                    State::ExpectingNormalResponse
                } else {
                    State::ExpectingLiteralContinuationRequest
                };
                Ok(bytes)
            }
            TaggedCommandKind::Idle => {
                if !matches!(self.state, State::ExpectingNormalResponse) {
                    return Err(ProtocolStateError::InvalidCommandForState);
                }

                self.pending_tags.push_back(command.tag);
                self.state = State::Idle(IdleStateMachine::new(self.options.idle_untagged_policy));
                Ok(dump_fragments(command.fragments))
            }
            TaggedCommandKind::Authenticate => {
                if !matches!(self.state, State::ExpectingNormalResponse) {
                    return Err(ProtocolStateError::InvalidCommandForState);
                }

                self.pending_tags.push_back(command.tag);
                self.state = State::Authenticating(AuthenticationStateMachine::new());
                Ok(dump_fragments(command.fragments))
            }
        }
    }

    fn send_append(&mut self, part: AppendPart) -> Result<Vec<u8>, ProtocolStateError> {
        if let AppendPart::Start { tag, .. } = &part {
            if !matches!(self.state, State::ExpectingNormalResponse) {
                return Err(ProtocolStateError::InvalidCommandForState);
            }

            self.pending_tags.push_back(tag.clone());
            self.state = State::Appending(AppendStateMachine::new());
            return Ok(render_append_part(&part));
        }

        match &mut self.state {
            State::Appending(machine) => {
                machine.send_part(&part)?;
                Ok(render_append_part(&part))
            }
            _ => Err(ProtocolStateError::InvalidCommandForState),
        }
    }

    fn send_idle_done(&mut self) -> Result<Vec<u8>, ProtocolStateError> {
        match &mut self.state {
            State::Idle(machine) => {
                machine.done()?;
                // The sub-machine finished on DONE; the tagged response to the IDLE command is
                // matched by the ordinary pipeline.
                self.state = State::ExpectingNormalResponse;
                Ok(render_idle_done())
            }
            _ => Err(ProtocolStateError::InvalidCommandForState),
        }
    }

    fn send_continuation_response(&mut self, data: Vec<u8>) -> Result<Vec<u8>, ProtocolStateError> {
        match &mut self.state {
            State::Authenticating(machine) => {
                machine.send_continuation_response()?;
                Ok(render_continuation_data(&data))
            }
            _ => Err(ProtocolStateError::InvalidCommandForState),
        }
    }

    /// Matches a tagged response against the pending-tag FIFO.
    fn complete_pending_command(
        &mut self,
        tagged: TaggedResponse,
    ) -> Result<ResponseEvent, ProtocolStateError> {
        match self.pending_tags.front() {
            Some(tag) if *tag == tagged.tag => {
                self.pending_tags.pop_front();
                Ok(ResponseEvent::CommandCompleted(tagged))
            }
            _ => Err(self.close_with(ProtocolStateError::UnexpectedResponse)),
        }
    }

    /// Emits the synchronizing literal at the front of the queue plus everything behind it up to
    /// the next one.
    fn acknowledge_literal(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        if let Some(Fragment::Literal { data, .. }) = self.deferred.pop_front() {
            bytes.extend_from_slice(&data);
        }
        bytes.extend_from_slice(&self.drain_deferred());

        self.state = if self.deferred.is_empty() {
            State::ExpectingNormalResponse
        } else {
            State::ExpectingLiteralContinuationRequest
        };
        bytes
    }

    /// Drains queued fragments up to (excluding) the next synchronizing literal.
    fn drain_deferred(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();

        while let Some(fragment) = self.deferred.front() {
            if matches!(
                fragment,
                Fragment::Literal {
                    mode: LiteralMode::Sync,
                    ..
                }
            ) {
                break;
            }

            match self.deferred.pop_front() {
                Some(Fragment::Line { data }) | Some(Fragment::Literal { data, .. }) => {
                    bytes.extend_from_slice(&data)
                }
                None => break,
            }
        }

        bytes
    }

    fn close(&mut self) {
        self.state = State::Closed;
        self.pending_tags.clear();
        self.deferred.clear();
    }

    fn close_with(&mut self, error: ProtocolStateError) -> ProtocolStateError {
        self.close();
        error
    }
}

impl Default for ClientStateMachine {
    fn default() -> Self {
        Self::new(ClientStateMachineOptions::default())
    }
}

/// Concatenates fragments unconditionally; used for command kinds that cannot carry
/// synchronizing literals (IDLE, AUTHENTICATE).
fn dump_fragments(fragments: Vec<Fragment>) -> Vec<u8> {
    let mut bytes = Vec::new();
    for fragment in fragments {
        match fragment {
            Fragment::Line { data } | Fragment::Literal { data, .. } => {
                bytes.extend_from_slice(&data)
            }
        }
    }
    bytes
}
