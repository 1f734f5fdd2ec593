//! The session state machine.
//!
//! A session's [`SessionState`] is an accumulating flag set. Every legal
//! combination appears exactly once in [`step`]; any other combination is
//! reported as [`Step::Undefined`] so engine bugs surface as counted errors
//! instead of stuck sessions.
//!
//! The machine is pure: it never touches sockets, clocks or counters. The
//! engine feeds it the current flags and carries out the returned step.

use crate::config::{Config, Followup};
use crate::options::MessageType;
use crate::packet::Classification;
use crate::session::{Phase, SessionState};

const A: SessionState = SessionState::ALLOCATED;
const SOLICITING: SessionState = A.union(SessionState::SOLICIT_SENT);
const ADVERTISED: SessionState = SOLICITING.union(SessionState::SOLICIT_ACK);
const ADVERTISE_REFUSED: SessionState = SOLICITING.union(SessionState::SOLICIT_NAK);
const ADVERTISE_CONFLICT: SessionState = ADVERTISED.union(SessionState::SOLICIT_NAK);
const REQUESTING: SessionState = ADVERTISED.union(SessionState::REQUEST_SENT);
const LEASED: SessionState = REQUESTING.union(SessionState::REQUEST_ACK);
const REQUEST_REFUSED: SessionState = REQUESTING.union(SessionState::REQUEST_NAK);
const DECLINING: SessionState = LEASED.union(SessionState::DECLINE_SENT);
const DECLINED: SessionState = DECLINING.union(SessionState::DECLINE_ACK);
const DECLINE_REFUSED: SessionState = DECLINING.union(SessionState::DECLINE_NAK);
const RELEASING: SessionState = LEASED.union(SessionState::RELEASE_SENT);
const RELEASED: SessionState = RELEASING.union(SessionState::RELEASE_ACK);
const RELEASE_REFUSED: SessionState = RELEASING.union(SessionState::RELEASE_NAK);

/// State a lease-reuse session starts in: the SOLICIT round is treated as
/// already answered so the first message is the exchange (RENEW).
pub const LEASE_REUSE_START: SessionState = ADVERTISED;

/// Run-wide settings that select transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workflow {
    /// Stop as soon as the SOLICIT is answered.
    pub ping: bool,
    pub followup: Followup,
}

impl Workflow {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ping: config.ping,
            followup: config.followup,
        }
    }
}

/// How a finished session is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Success.
    Completed,
    /// Success with a lease the caller may record.
    Leased,
    /// Refused or out of retries.
    Failed,
    /// Protocol error; counted as both an error and a failure.
    Error,
}

/// What the engine should do with a session on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Freshly allocated, nothing to do yet.
    Idle,
    /// Waiting for the server's answer in this phase; check the timeout.
    Await(Phase),
    /// Start the next phase by sending this message.
    Send(MessageType),
    /// Terminal: count the outcome and free the slot.
    Finish(Outcome),
    /// A flag combination outside the table.
    Undefined,
}

/// Looks up the step for the exact flag set `state`.
///
/// `exchange` is the session's second-phase message (REQUEST, RENEW or
/// INFORMATION-REQUEST).
pub fn step(state: SessionState, exchange: MessageType, workflow: &Workflow) -> Step {
    if state.contains(SessionState::PACKET_ERROR) {
        return Step::Finish(Outcome::Error);
    }

    match state {
        A => Step::Idle,
        SOLICITING => Step::Await(Phase::Solicit),
        ADVERTISED if workflow.ping => Step::Finish(Outcome::Completed),
        ADVERTISED => Step::Send(exchange),
        ADVERTISE_REFUSED | ADVERTISE_CONFLICT => Step::Finish(Outcome::Error),
        REQUESTING => Step::Await(Phase::Request),
        LEASED => match workflow.followup {
            Followup::Release => Step::Send(MessageType::Release),
            Followup::Decline => Step::Send(MessageType::Decline),
            Followup::None => Step::Finish(Outcome::Leased),
        },
        REQUEST_REFUSED => Step::Finish(Outcome::Failed),
        DECLINING => Step::Await(Phase::Decline),
        RELEASING => Step::Await(Phase::Release),
        DECLINED | RELEASED => Step::Finish(Outcome::Completed),
        DECLINE_REFUSED | RELEASE_REFUSED => Step::Finish(Outcome::Failed),
        _ => Step::Undefined,
    }
}

/// Whether a timed-out phase gets another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retransmit,
    GiveUp,
}

/// Retransmits while `limit > retries`, or forever when `until_answered`.
pub fn retry_decision(retries: u32, limit: u32, until_answered: bool) -> RetryDecision {
    if until_answered || limit > retries {
        RetryDecision::Retransmit
    } else {
        RetryDecision::GiveUp
    }
}

/// The message that repeats `phase` on retransmission.
pub fn phase_message(phase: Phase, exchange: MessageType) -> MessageType {
    match phase {
        Phase::Solicit => MessageType::Solicit,
        Phase::Request => exchange,
        Phase::Decline => MessageType::Decline,
        Phase::Release => MessageType::Release,
    }
}

/// How an inbound server message relates to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// The message answers the session's outstanding phase.
    Accept(Phase),
    /// A late or duplicate answer to a phase the session has moved past.
    Stale,
    /// Not a message a server sends to a client.
    Malformed,
}

/// Decides whether an ADVERTISE or REPLY answers the session's current phase.
pub fn receive(state: SessionState, msg_type: u8) -> Reception {
    match MessageType::try_from(msg_type) {
        Ok(MessageType::Advertise) => {
            if state.contains(SOLICITING) && !state.contains(SessionState::REQUEST_SENT) {
                Reception::Accept(Phase::Solicit)
            } else {
                Reception::Stale
            }
        }
        Ok(MessageType::Reply) => match state {
            REQUESTING => Reception::Accept(Phase::Request),
            DECLINING => Reception::Accept(Phase::Decline),
            RELEASING => Reception::Accept(Phase::Release),
            _ => Reception::Stale,
        },
        _ => Reception::Malformed,
    }
}

/// Adds the ACK or NAK flag of `phase` to `state`.
pub fn acknowledge(state: SessionState, phase: Phase, classification: Classification) -> SessionState {
    match classification {
        Classification::Ack => state | phase.ack_flag(),
        Classification::Nak => state | phase.nak_flag(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: MessageType = MessageType::Request;

    fn workflow(ping: bool, followup: Followup) -> Workflow {
        Workflow { ping, followup }
    }

    #[test]
    fn test_solicit_phase() {
        let plain = workflow(false, Followup::None);
        assert_eq!(step(A, REQUEST, &plain), Step::Idle);
        assert_eq!(step(SOLICITING, REQUEST, &plain), Step::Await(Phase::Solicit));
        assert_eq!(step(ADVERTISED, REQUEST, &plain), Step::Send(MessageType::Request));
        assert_eq!(
            step(ADVERTISED, MessageType::Renew, &plain),
            Step::Send(MessageType::Renew)
        );
        assert_eq!(
            step(ADVERTISED, MessageType::InformationRequest, &plain),
            Step::Send(MessageType::InformationRequest)
        );
        assert_eq!(step(ADVERTISE_REFUSED, REQUEST, &plain), Step::Finish(Outcome::Error));
        assert_eq!(step(ADVERTISE_CONFLICT, REQUEST, &plain), Step::Finish(Outcome::Error));
    }

    #[test]
    fn test_ping_finishes_after_advertise() {
        let ping = workflow(true, Followup::None);
        assert_eq!(step(ADVERTISED, REQUEST, &ping), Step::Finish(Outcome::Completed));
    }

    #[test]
    fn test_request_phase_and_followups() {
        let plain = workflow(false, Followup::None);
        assert_eq!(step(REQUESTING, REQUEST, &plain), Step::Await(Phase::Request));
        assert_eq!(step(LEASED, REQUEST, &plain), Step::Finish(Outcome::Leased));
        assert_eq!(step(REQUEST_REFUSED, REQUEST, &plain), Step::Finish(Outcome::Failed));

        let release = workflow(false, Followup::Release);
        assert_eq!(step(LEASED, REQUEST, &release), Step::Send(MessageType::Release));
        assert_eq!(step(RELEASING, REQUEST, &release), Step::Await(Phase::Release));
        assert_eq!(step(RELEASED, REQUEST, &release), Step::Finish(Outcome::Completed));
        assert_eq!(step(RELEASE_REFUSED, REQUEST, &release), Step::Finish(Outcome::Failed));

        let decline = workflow(false, Followup::Decline);
        assert_eq!(step(LEASED, REQUEST, &decline), Step::Send(MessageType::Decline));
        assert_eq!(step(DECLINING, REQUEST, &decline), Step::Await(Phase::Decline));
        assert_eq!(step(DECLINED, REQUEST, &decline), Step::Finish(Outcome::Completed));
        assert_eq!(step(DECLINE_REFUSED, REQUEST, &decline), Step::Finish(Outcome::Failed));
    }

    #[test]
    fn test_packet_error_is_terminal() {
        let plain = workflow(false, Followup::None);
        assert_eq!(
            step(SessionState::PACKET_ERROR, REQUEST, &plain),
            Step::Finish(Outcome::Error)
        );
        assert_eq!(
            step(REQUESTING | SessionState::PACKET_ERROR, REQUEST, &plain),
            Step::Finish(Outcome::Error)
        );
    }

    #[test]
    fn test_undefined_combinations() {
        let plain = workflow(false, Followup::None);
        let undefined = [
            SessionState::SOLICIT_SENT,
            A | SessionState::REQUEST_SENT,
            REQUESTING | SessionState::REQUEST_ACK | SessionState::REQUEST_NAK,
            LEASED | SessionState::DECLINE_SENT | SessionState::RELEASE_SENT,
            SOLICITING | SessionState::SOLICIT_ACK | SessionState::RELEASE_ACK,
        ];
        for state in undefined {
            assert_eq!(step(state, REQUEST, &plain), Step::Undefined, "{}", state);
        }
    }

    #[test]
    fn test_every_reachable_state_is_defined() {
        let plain = workflow(false, Followup::None);
        let reachable = [
            A,
            SOLICITING,
            ADVERTISED,
            ADVERTISE_REFUSED,
            ADVERTISE_CONFLICT,
            REQUESTING,
            LEASED,
            REQUEST_REFUSED,
            DECLINING,
            DECLINED,
            DECLINE_REFUSED,
            RELEASING,
            RELEASED,
            RELEASE_REFUSED,
        ];
        for state in reachable {
            assert_ne!(step(state, REQUEST, &plain), Step::Undefined, "{}", state);
        }
    }

    #[test]
    fn test_retry_decision_is_strict() {
        assert_eq!(retry_decision(0, 2, false), RetryDecision::Retransmit);
        assert_eq!(retry_decision(1, 2, false), RetryDecision::Retransmit);
        assert_eq!(retry_decision(2, 2, false), RetryDecision::GiveUp);
        assert_eq!(retry_decision(0, 0, false), RetryDecision::GiveUp);
        assert_eq!(retry_decision(50, 0, true), RetryDecision::Retransmit);
    }

    #[test]
    fn test_phase_message() {
        assert_eq!(phase_message(Phase::Solicit, REQUEST), MessageType::Solicit);
        assert_eq!(phase_message(Phase::Request, MessageType::Renew), MessageType::Renew);
        assert_eq!(phase_message(Phase::Release, REQUEST), MessageType::Release);
        assert_eq!(phase_message(Phase::Decline, REQUEST), MessageType::Decline);
    }

    #[test]
    fn test_receive_advertise() {
        assert_eq!(
            receive(SOLICITING, MessageType::Advertise as u8),
            Reception::Accept(Phase::Solicit)
        );
        assert_eq!(
            receive(ADVERTISED, MessageType::Advertise as u8),
            Reception::Accept(Phase::Solicit)
        );
        assert_eq!(receive(REQUESTING, MessageType::Advertise as u8), Reception::Stale);
    }

    #[test]
    fn test_receive_reply() {
        let reply = MessageType::Reply as u8;
        assert_eq!(receive(REQUESTING, reply), Reception::Accept(Phase::Request));
        assert_eq!(receive(DECLINING, reply), Reception::Accept(Phase::Decline));
        assert_eq!(receive(RELEASING, reply), Reception::Accept(Phase::Release));
        assert_eq!(receive(SOLICITING, reply), Reception::Stale);
        assert_eq!(receive(LEASED, reply), Reception::Stale);
    }

    #[test]
    fn test_receive_unexpected_type() {
        assert_eq!(receive(SOLICITING, MessageType::Solicit as u8), Reception::Malformed);
        assert_eq!(receive(SOLICITING, MessageType::RelayRepl as u8), Reception::Malformed);
        assert_eq!(receive(SOLICITING, 0), Reception::Malformed);
        assert_eq!(receive(SOLICITING, 200), Reception::Malformed);
    }

    #[test]
    fn test_acknowledge() {
        assert_eq!(acknowledge(SOLICITING, Phase::Solicit, Classification::Ack), ADVERTISED);
        assert_eq!(
            acknowledge(SOLICITING, Phase::Solicit, Classification::Nak),
            ADVERTISE_REFUSED
        );
        assert_eq!(acknowledge(REQUESTING, Phase::Request, Classification::Ack), LEASED);
        assert_eq!(acknowledge(RELEASING, Phase::Release, Classification::Nak), RELEASE_REFUSED);
    }
}
