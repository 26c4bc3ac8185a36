use std::time::Duration;

use crate::protocol::{Done, Job, Proposal};
use crate::supervisor::window::StopReason;

/// How an awarded round ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Pipelined mode: the next round started right after the Accept.
    NotAwaited,
    Done(Done),
    /// The configured bound on waiting for Done elapsed.
    TimedOut,
    /// Shutdown was requested while waiting.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundResult {
    /// No proposal arrived before the window closed; no Accept was sent.
    NoWinner,
    Awarded {
        winner: Proposal,
        guard_applied: bool,
        completion: Completion,
    },
}

/// Everything observable about one negotiation round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub job: Job,
    /// Proposals in arrival order
    pub proposals: Vec<Proposal>,
    pub stop_reason: StopReason,
    /// Time from CfP publication to the end of bid collection
    pub collection_time: Duration,
    pub result: RoundResult,
}

impl RoundOutcome {
    pub fn winner(&self) -> Option<&Proposal> {
        match &self.result {
            RoundResult::Awarded { winner, .. } => Some(winner),
            RoundResult::NoWinner => None,
        }
    }

    pub fn done(&self) -> Option<&Done> {
        match &self.result {
            RoundResult::Awarded {
                completion: Completion::Done(done),
                ..
            } => Some(done),
            _ => None,
        }
    }

    pub fn guard_applied(&self) -> bool {
        matches!(
            self.result,
            RoundResult::Awarded {
                guard_applied: true,
                ..
            }
        )
    }
}
