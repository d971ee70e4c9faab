//! The AUTHENTICATE sub-state machine.
//!
//! Shepherds the SASL challenge-response exchange without interpreting the payloads: every
//! server challenge arrives as a continuation request, every client answer leaves as a base64
//! continuation response, and a tagged response concludes the command either way.

use super::ProtocolStateError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// A challenge or the tagged completion may arrive.
    WaitingForServer,
    /// The client owes the server a continuation response.
    WaitingForChallengeResponse,
    Finished,
}

#[derive(Clone, Debug)]
pub(crate) struct AuthenticationStateMachine {
    state: State,
}

impl AuthenticationStateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: State::WaitingForServer,
        }
    }

    pub(crate) fn receive_continuation_request(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            State::WaitingForServer => {
                self.state = State::WaitingForChallengeResponse;
                Ok(())
            }
            _ => Err(ProtocolStateError::UnexpectedContinuationRequest),
        }
    }

    pub(crate) fn receive_tagged_response(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            State::WaitingForServer => {
                self.state = State::Finished;
                Ok(())
            }
            _ => Err(ProtocolStateError::UnexpectedResponse),
        }
    }

    pub(crate) fn send_continuation_response(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            State::WaitingForChallengeResponse => {
                self.state = State::WaitingForServer;
                Ok(())
            }
            _ => Err(ProtocolStateError::InvalidCommandForState),
        }
    }
}
