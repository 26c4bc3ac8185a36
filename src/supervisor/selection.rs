use crate::config::LookaheadConfig;
use crate::protocol::Proposal;

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub winner: Proposal,
    /// The runner-up was picked to keep the fastest bidder free.
    pub guard_applied: bool,
}

/// Proposals ordered by ETA, fastest first. The sort is stable, so equal
/// ETAs keep arrival order and the earliest bid ranks first.
pub fn rank(proposals: &[Proposal]) -> Vec<Proposal> {
    let mut ranked = proposals.to_vec();
    ranked.sort_by(|a, b| a.eta_s.total_cmp(&b.eta_s));
    ranked
}

/// Pick the winner of a round.
///
/// The best bid wins unless the lookahead guard is enabled, the next job in
/// the sequence has the same type, and the runner-up is within `alpha` of
/// the best ETA. Only the immediately next job and only the second-best bid
/// are considered.
pub fn select_winner(
    proposals: &[Proposal],
    lookahead: &LookaheadConfig,
    next_job_same_type: bool,
) -> Option<Selection> {
    let ranked = rank(proposals);
    let mut iter = ranked.into_iter();
    let best = iter.next()?;

    if lookahead.enabled && next_job_same_type {
        if let Some(second) = iter.next() {
            if second.eta_s <= lookahead.alpha * best.eta_s {
                return Some(Selection {
                    winner: second,
                    guard_applied: true,
                });
            }
        }
    }

    Some(Selection {
        winner: best,
        guard_applied: false,
    })
}
