//! The IDLE sub-state machine ([RFC 2177](https://www.rfc-editor.org/rfc/rfc2177.html)).
//!
//! After the client sends `IDLE`, the server confirms with a continuation request and may then
//! push unsolicited data until the client sends the literal `DONE`. The tagged response to the
//! IDLE command itself arrives after `DONE` and is matched by the ordinary pipeline.

use super::{IdleUntaggedPolicy, ProtocolStateError, Response};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    WaitingForConfirmation,
    Idling,
    Finished,
}

/// What the outer machine should do with a response received while idling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IdleResponseAction {
    /// The server confirmed IDLE (typed `IdleStarted` path).
    Confirmed,
    /// Unsolicited data to forward to the application.
    Deliver,
}

#[derive(Clone, Debug)]
pub(crate) struct IdleStateMachine {
    state: State,
    untagged_policy: IdleUntaggedPolicy,
}

impl IdleStateMachine {
    pub(crate) fn new(untagged_policy: IdleUntaggedPolicy) -> Self {
        Self {
            state: State::WaitingForConfirmation,
            untagged_policy,
        }
    }

    pub(crate) fn receive_continuation_request(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            State::WaitingForConfirmation => {
                self.state = State::Idling;
                Ok(())
            }
            _ => Err(ProtocolStateError::UnexpectedContinuationRequest),
        }
    }

    pub(crate) fn receive_response(
        &mut self,
        response: &Response,
    ) -> Result<IdleResponseAction, ProtocolStateError> {
        match (self.state, response) {
            (State::WaitingForConfirmation, Response::IdleStarted) => {
                self.state = State::Idling;
                Ok(IdleResponseAction::Confirmed)
            }
            // Whether untagged data may precede the server's confirmation is ambiguous in the
            // wild; the strict reading rejects it, the lenient one hands it to the application.
            (State::WaitingForConfirmation, Response::Untagged(_) | Response::Fetch(_)) => {
                match self.untagged_policy {
                    IdleUntaggedPolicy::Reject => Err(ProtocolStateError::UnexpectedResponse),
                    IdleUntaggedPolicy::Deliver => Ok(IdleResponseAction::Deliver),
                }
            }
            (State::Idling, Response::Untagged(_) | Response::Fetch(_)) => {
                Ok(IdleResponseAction::Deliver)
            }
            _ => Err(ProtocolStateError::UnexpectedResponse),
        }
    }

    /// The only valid outbound event: the literal `DONE`.
    pub(crate) fn done(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            State::Idling => {
                self.state = State::Finished;
                Ok(())
            }
            _ => Err(ProtocolStateError::InvalidCommandForState),
        }
    }
}
