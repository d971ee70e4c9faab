//! The APPEND sub-state machine.
//!
//! APPEND streams one or more messages (raw or catenated, see
//! [RFC 4469](https://www.rfc-editor.org/rfc/rfc4469.html)) into a mailbox within a single tagged
//! command, honoring the server's per-literal synchronization requests. The machine tracks which
//! part of the command is currently allowed on the wire; it never touches the payload bytes.

use crate::core::{LiteralMode, Tag};

use super::ProtocolStateError;

/// One client-side event of an APPEND command in progress.
///
/// Grammar productions (mailbox names, flag lists, URLs) are carried as externally encoded bytes;
/// the engine renders only the structural glue around them: literal headers, the catenate
/// parentheses, and the final CRLF.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppendPart {
    /// Opens the command: `tag` SP `header`, where `header` is the encoded `APPEND mailbox`
    /// prefix.
    Start { tag: Tag, header: Vec<u8> },
    /// Announces the next message literal: `options` SP `{size}` CRLF. `options` is the encoded
    /// append-options prefix (flags, date), possibly empty.
    BeginMessage {
        options: Vec<u8>,
        size: u64,
        mode: LiteralMode,
        binary: bool,
    },
    /// Raw literal payload, sent as-is. May be repeated until the declared size is reached.
    MessageBytes(Vec<u8>),
    /// Concludes the current message; another message or `Finish` may follow.
    EndMessage,
    /// Opens a catenated message: SP `CATENATE (`.
    BeginCatenate,
    /// A `URL` catenate part, encoded by the caller including separators.
    CatenateUrl(Vec<u8>),
    /// Announces a `TEXT` catenate literal: `options` SP `{size}` CRLF.
    CatenateData {
        options: Vec<u8>,
        size: u64,
        mode: LiteralMode,
        binary: bool,
    },
    /// Closes the catenate part list: `)`.
    EndCatenate,
    /// Terminates the command line with CRLF; the tagged response concludes the command.
    Finish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// `can_finish` is set once at least one message or catenation has completed, and guards
    /// `Finish`: an APPEND without any message is malformed.
    Started { can_finish: bool },
    WaitingForAppendContinuationRequest,
    SendingMessageBytes,
    Catenating,
    WaitingForCatenateContinuationRequest,
    SendingCatenateBytes,
    WaitingForTaggedResponse,
    Finished,
}

#[derive(Clone, Debug)]
pub(crate) struct AppendStateMachine {
    state: State,
}

impl AppendStateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Started { can_finish: false },
        }
    }

    pub(crate) fn send_part(&mut self, part: &AppendPart) -> Result<(), ProtocolStateError> {
        self.state = match (self.state, part) {
            (
                State::Started { .. },
                AppendPart::BeginMessage {
                    mode: LiteralMode::Sync,
                    ..
                },
            ) => State::WaitingForAppendContinuationRequest,
            // A non-synchronizing literal is not acknowledged by the server; the payload may
            // follow right away.
            (
                State::Started { .. },
                AppendPart::BeginMessage {
                    mode: LiteralMode::NonSync,
                    ..
                },
            ) => State::SendingMessageBytes,
            (State::Started { .. }, AppendPart::BeginCatenate) => State::Catenating,
            (State::Started { can_finish: true }, AppendPart::Finish) => {
                State::WaitingForTaggedResponse
            }
            (State::SendingMessageBytes, AppendPart::MessageBytes(_)) => State::SendingMessageBytes,
            (State::SendingMessageBytes, AppendPart::EndMessage) => {
                State::Started { can_finish: true }
            }
            (State::Catenating, AppendPart::CatenateUrl(_)) => State::Catenating,
            (
                State::Catenating,
                AppendPart::CatenateData {
                    mode: LiteralMode::Sync,
                    ..
                },
            ) => State::WaitingForCatenateContinuationRequest,
            (
                State::Catenating,
                AppendPart::CatenateData {
                    mode: LiteralMode::NonSync,
                    ..
                },
            ) => State::SendingCatenateBytes,
            (State::Catenating, AppendPart::EndCatenate) => State::Started { can_finish: true },
            (State::SendingCatenateBytes, AppendPart::MessageBytes(_)) => {
                State::SendingCatenateBytes
            }
            (State::SendingCatenateBytes, AppendPart::EndCatenate) => {
                State::Started { can_finish: true }
            }
            _ => return Err(ProtocolStateError::InvalidCommandForState),
        };

        Ok(())
    }

    pub(crate) fn receive_continuation_request(&mut self) -> Result<(), ProtocolStateError> {
        self.state = match self.state {
            State::WaitingForAppendContinuationRequest => State::SendingMessageBytes,
            State::WaitingForCatenateContinuationRequest => State::SendingCatenateBytes,
            _ => return Err(ProtocolStateError::UnexpectedContinuationRequest),
        };

        Ok(())
    }

    /// Accepts the tagged response that concludes the command.
    ///
    /// The server MUST NOT interleave other data while message bytes are owed, so this is the
    /// only response the machine accepts, and only once `Finish` was sent.
    pub(crate) fn receive_tagged_response(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            State::WaitingForTaggedResponse => {
                self.state = State::Finished;
                Ok(())
            }
            _ => Err(ProtocolStateError::UnexpectedResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin_message(mode: LiteralMode) -> AppendPart {
        AppendPart::BeginMessage {
            options: Vec::new(),
            size: 5,
            mode,
            binary: false,
        }
    }

    #[test]
    fn happy_path() {
        let mut machine = AppendStateMachine::new();

        machine.send_part(&begin_message(LiteralMode::Sync)).unwrap();
        assert_eq!(machine.state, State::WaitingForAppendContinuationRequest);

        machine.receive_continuation_request().unwrap();
        assert_eq!(machine.state, State::SendingMessageBytes);

        machine
            .send_part(&AppendPart::MessageBytes(b"hello".to_vec()))
            .unwrap();
        machine.send_part(&AppendPart::EndMessage).unwrap();
        assert_eq!(machine.state, State::Started { can_finish: true });

        machine.send_part(&AppendPart::Finish).unwrap();
        assert_eq!(machine.state, State::WaitingForTaggedResponse);

        machine.receive_tagged_response().unwrap();
        assert_eq!(machine.state, State::Finished);
    }

    #[test]
    fn non_sync_literal_skips_continuation() {
        let mut machine = AppendStateMachine::new();

        machine
            .send_part(&begin_message(LiteralMode::NonSync))
            .unwrap();
        assert_eq!(machine.state, State::SendingMessageBytes);
    }

    #[test]
    fn finish_requires_a_completed_message() {
        let mut machine = AppendStateMachine::new();

        assert_eq!(
            machine.send_part(&AppendPart::Finish),
            Err(ProtocolStateError::InvalidCommandForState)
        );
        assert_eq!(machine.state, State::Started { can_finish: false });

        machine.send_part(&begin_message(LiteralMode::Sync)).unwrap();
        machine.receive_continuation_request().unwrap();
        machine.send_part(&AppendPart::EndMessage).unwrap();
        machine.send_part(&AppendPart::Finish).unwrap();
    }

    #[test]
    fn catenate_path() {
        let mut machine = AppendStateMachine::new();

        machine.send_part(&AppendPart::BeginCatenate).unwrap();
        machine
            .send_part(&AppendPart::CatenateUrl(b" URL \"/INBOX/;UID=20\"".to_vec()))
            .unwrap();
        machine
            .send_part(&AppendPart::CatenateData {
                options: b" TEXT".to_vec(),
                size: 3,
                mode: LiteralMode::Sync,
                binary: false,
            })
            .unwrap();
        assert_eq!(machine.state, State::WaitingForCatenateContinuationRequest);

        machine.receive_continuation_request().unwrap();
        machine
            .send_part(&AppendPart::MessageBytes(b"abc".to_vec()))
            .unwrap();
        machine.send_part(&AppendPart::EndCatenate).unwrap();
        assert_eq!(machine.state, State::Started { can_finish: true });

        machine.send_part(&AppendPart::Finish).unwrap();
    }

    #[test]
    fn catenate_can_end_without_data() {
        let mut machine = AppendStateMachine::new();

        machine.send_part(&AppendPart::BeginCatenate).unwrap();
        machine.send_part(&AppendPart::EndCatenate).unwrap();
        assert_eq!(machine.state, State::Started { can_finish: true });
    }

    #[test]
    fn rejected_events() {
        let mut machine = AppendStateMachine::new();

        // No message announced yet.
        assert_eq!(
            machine.send_part(&AppendPart::MessageBytes(b"x".to_vec())),
            Err(ProtocolStateError::InvalidCommandForState)
        );
        assert_eq!(
            machine.send_part(&AppendPart::EndMessage),
            Err(ProtocolStateError::InvalidCommandForState)
        );
        assert_eq!(
            machine.receive_continuation_request(),
            Err(ProtocolStateError::UnexpectedContinuationRequest)
        );
        assert_eq!(
            machine.receive_tagged_response(),
            Err(ProtocolStateError::UnexpectedResponse)
        );

        // Message bytes are owed; no command part other than payload is valid.
        machine.send_part(&begin_message(LiteralMode::Sync)).unwrap();
        assert_eq!(
            machine.send_part(&begin_message(LiteralMode::Sync)),
            Err(ProtocolStateError::InvalidCommandForState)
        );

        machine.receive_continuation_request().unwrap();
        assert_eq!(
            machine.send_part(&AppendPart::EndCatenate),
            Err(ProtocolStateError::InvalidCommandForState)
        );
        assert_eq!(
            machine.send_part(&AppendPart::Finish),
            Err(ProtocolStateError::InvalidCommandForState)
        );
    }
}
