use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::Instant;

use crate::protocol::{Done, Job, JobId, Proposal};
use crate::supervisor::window::distinct_bidders;

/// What happened to an incoming proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalDisposition {
    Recorded,
    /// The round's bid window already closed.
    Late,
    UnknownRound,
}

/// Point-in-time view of a round's bids, read by the collection loop.
#[derive(Debug, Clone, Copy)]
pub struct BidSnapshot {
    pub opened_at: Instant,
    pub last_bid_at: Instant,
    pub bids: usize,
    pub distinct_bidders: usize,
}

#[derive(Debug)]
struct RoundEntry {
    job_type: String,
    proposals: Vec<Proposal>,
    opened_at: Instant,
    last_bid_at: Instant,
    open: bool,
    done_tx: Option<oneshot::Sender<Done>>,
}

/// Per-round supervisor state shared between the bus listener (writer)
/// and the round loop (reader).
#[derive(Debug, Default)]
pub struct RoundBook {
    rounds: Mutex<HashMap<JobId, RoundEntry>>,
    arrivals: Notify,
}

impl RoundBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a round. The quiet-period clock starts here.
    pub async fn open(&self, job: &Job) -> Instant {
        let now = Instant::now();
        self.rounds.lock().await.insert(
            job.job_id.clone(),
            RoundEntry {
                job_type: job.job_type.clone(),
                proposals: Vec::new(),
                opened_at: now,
                last_bid_at: now,
                open: true,
                done_tx: None,
            },
        );
        now
    }

    pub async fn record_proposal(&self, proposal: Proposal) -> ProposalDisposition {
        let mut rounds = self.rounds.lock().await;
        let Some(entry) = rounds.get_mut(&proposal.job_id) else {
            return ProposalDisposition::UnknownRound;
        };
        if !entry.open {
            return ProposalDisposition::Late;
        }
        if entry.job_type != proposal.job_type {
            tracing::debug!(
                job_id = %proposal.job_id,
                expected = %entry.job_type,
                got = %proposal.job_type,
                "Proposal job type differs from the round"
            );
        }
        entry.proposals.push(proposal);
        entry.last_bid_at = Instant::now();
        drop(rounds);

        self.arrivals.notify_one();
        ProposalDisposition::Recorded
    }

    pub async fn snapshot(&self, job_id: &str) -> Option<BidSnapshot> {
        let rounds = self.rounds.lock().await;
        rounds.get(job_id).map(|entry| BidSnapshot {
            opened_at: entry.opened_at,
            last_bid_at: entry.last_bid_at,
            bids: entry.proposals.len(),
            distinct_bidders: distinct_bidders(&entry.proposals),
        })
    }

    /// Resolves when a proposal is recorded for any round.
    pub async fn bid_arrived(&self) {
        self.arrivals.notified().await
    }

    /// End bid collection and hand back the proposals in arrival order.
    pub async fn close(&self, job_id: &str) -> Vec<Proposal> {
        let mut rounds = self.rounds.lock().await;
        match rounds.get_mut(job_id) {
            Some(entry) => {
                entry.open = false;
                entry.proposals.clone()
            }
            None => Vec::new(),
        }
    }

    /// Register interest in the round's Done. Must be called before the
    /// Accept goes out so a fast completion is not missed.
    pub async fn expect_done(&self, job_id: &str) -> oneshot::Receiver<Done> {
        let (tx, rx) = oneshot::channel();
        if let Some(entry) = self.rounds.lock().await.get_mut(job_id) {
            entry.done_tx = Some(tx);
        }
        rx
    }

    /// Deliver a Done to the waiting round, if any. Returns true when a
    /// waiter received it.
    pub async fn record_done(&self, done: &Done) -> bool {
        let waiter = self
            .rounds
            .lock()
            .await
            .get_mut(&done.job_id)
            .and_then(|entry| entry.done_tx.take());

        match waiter {
            Some(tx) => tx.send(done.clone()).is_ok(),
            None => false,
        }
    }

    pub async fn remove(&self, job_id: &str) {
        self.rounds.lock().await.remove(job_id);
    }

    pub async fn len(&self) -> usize {
        self.rounds.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rounds.lock().await.is_empty()
    }
}
