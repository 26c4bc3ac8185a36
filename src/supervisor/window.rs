use std::collections::HashSet;
use std::time::Duration;

use crate::config::SupervisorConfig;
use crate::protocol::Proposal;

/// Why a bid window closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Deadline,
    MinBidders,
    QuietPeriod,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Deadline => write!(f, "deadline"),
            StopReason::MinBidders => write!(f, "min-bidders"),
            StopReason::QuietPeriod => write!(f, "quiet-period"),
        }
    }
}

/// Termination policy of the bid collection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidWindow {
    pub deadline: Duration,
    /// 0 disables the condition
    pub min_bidders: usize,
    pub quiet_period: Option<Duration>,
}

impl BidWindow {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            deadline: config.deadline,
            min_bidders: config.min_bidders,
            quiet_period: config.quiet_period,
        }
    }

    /// Evaluate every enabled condition. The deadline is checked first and
    /// always applies.
    pub fn check(
        &self,
        since_cfp: Duration,
        since_last_bid: Duration,
        distinct_bidders: usize,
    ) -> Option<StopReason> {
        if since_cfp >= self.deadline {
            return Some(StopReason::Deadline);
        }
        if self.min_bidders > 0 && distinct_bidders >= self.min_bidders {
            return Some(StopReason::MinBidders);
        }
        match self.quiet_period {
            Some(quiet) if since_last_bid >= quiet => Some(StopReason::QuietPeriod),
            _ => None,
        }
    }
}

pub fn distinct_bidders(proposals: &[Proposal]) -> usize {
    proposals
        .iter()
        .map(|p| p.machine_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(min_bidders: usize, quiet_ms: u64) -> BidWindow {
        BidWindow {
            deadline: Duration::from_millis(1000),
            min_bidders,
            quiet_period: (quiet_ms > 0).then(|| Duration::from_millis(quiet_ms)),
        }
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn deadline_always_applies() {
        let w = window(0, 0);
        assert_eq!(w.check(ms(999), ms(999), 0), None);
        assert_eq!(w.check(ms(1000), ms(0), 0), Some(StopReason::Deadline));
    }

    #[test]
    fn deadline_wins_over_other_conditions() {
        let w = window(1, 10);
        assert_eq!(w.check(ms(1000), ms(500), 3), Some(StopReason::Deadline));
    }

    #[test]
    fn min_bidders() {
        let w = window(2, 0);
        assert_eq!(w.check(ms(50), ms(0), 1), None);
        assert_eq!(w.check(ms(50), ms(0), 2), Some(StopReason::MinBidders));
    }

    #[test]
    fn quiet_period() {
        let w = window(0, 200);
        assert_eq!(w.check(ms(240), ms(190), 2), None);
        assert_eq!(w.check(ms(250), ms(200), 2), Some(StopReason::QuietPeriod));
    }

    #[test]
    fn disabled_conditions_never_fire() {
        let w = window(0, 0);
        assert_eq!(w.check(ms(10), ms(10_000), 100), None);
    }

    #[test]
    fn distinct_counts_machines_not_bids() {
        let bid = |m: &str| Proposal {
            job_id: "j".to_string(),
            job_type: "cut".to_string(),
            machine_id: m.to_string(),
            eta_s: 1.0,
            at: 0.0,
        };
        assert_eq!(distinct_bidders(&[bid("M1"), bid("M1"), bid("M2")]), 2);
        assert_eq!(distinct_bidders(&[]), 0);
    }
}
