use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bus::{publish_message, SharedBus, Subscription};
use crate::config::{DoneWait, SupervisorConfig};
use crate::error::Result;
use crate::protocol::{new_job_id, now_s, Accept, CallForProposal, Done, Inbound, Job, JobId, Topics};
use crate::supervisor::book::{ProposalDisposition, RoundBook};
use crate::supervisor::outcome::{Completion, RoundOutcome, RoundResult};
use crate::supervisor::selection::select_winner;
use crate::supervisor::window::{BidWindow, StopReason};

/// Timer horizon used when the bid deadline does not fit the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Coordinator that auctions a sequence of jobs.
///
/// A background listener feeds proposals and completions from the bus into
/// the [`RoundBook`]; the round loop reads it while collecting bids and
/// waiting for completions. Dropping the supervisor stops the listener.
pub struct Supervisor {
    config: SupervisorConfig,
    topics: Topics,
    bus: SharedBus,
    book: Arc<RoundBook>,
    issued: HashSet<JobId>,
    listener: CancellationToken,
    listener_handle: JoinHandle<()>,
}

impl Supervisor {
    /// Validate the configuration and subscribe to proposals and completions.
    pub async fn connect(config: SupervisorConfig, topics: Topics, bus: SharedBus) -> Result<Self> {
        config.validate()?;

        let subscription = bus
            .subscribe(vec![topics.proposals(), topics.done()])
            .await?;

        let book = Arc::new(RoundBook::new());
        let listener = CancellationToken::new();
        let listener_handle = tokio::spawn(Self::listen(
            book.clone(),
            topics.clone(),
            subscription,
            listener.clone(),
        ));

        tracing::info!(
            jobs = ?config.jobs,
            deadline_s = config.deadline.as_secs_f64(),
            wait_for_done = config.wait_for_done,
            min_bidders = config.min_bidders,
            quiet_ms = config.quiet_period.map(|q| q.as_millis() as u64).unwrap_or(0),
            guard = config.lookahead.enabled,
            alpha = config.lookahead.alpha,
            "Supervisor connected"
        );

        Ok(Self {
            config,
            topics,
            bus,
            book,
            issued: HashSet::new(),
            listener,
            listener_handle,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Negotiate every job of the configured sequence in order.
    ///
    /// Stops early, without error, when `shutdown` is cancelled between
    /// rounds or while waiting for a completion.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<Vec<RoundOutcome>> {
        let jobs = self.config.jobs.clone();
        let mut outcomes = Vec::with_capacity(jobs.len());

        for (idx, job_type) in jobs.iter().enumerate() {
            if shutdown.is_cancelled() {
                tracing::info!(completed_rounds = outcomes.len(), "Supervisor stopped");
                break;
            }

            let next_job_type = jobs.get(idx + 1).map(String::as_str);
            let outcome = self.run_round(job_type, next_job_type, shutdown).await?;
            let cancelled = matches!(
                outcome.result,
                RoundResult::Awarded {
                    completion: Completion::Cancelled,
                    ..
                }
            );
            outcomes.push(outcome);
            if cancelled {
                break;
            }
        }

        let awarded = outcomes.iter().filter(|o| o.winner().is_some()).count();
        tracing::info!(
            rounds = outcomes.len(),
            awarded,
            skipped = outcomes.len() - awarded,
            "Job sequence finished"
        );
        Ok(outcomes)
    }

    /// Run one negotiation round for `job_type`.
    ///
    /// `next_job_type` is the job that follows in the sequence; it only
    /// matters to the lookahead guard.
    pub async fn run_round(
        &mut self,
        job_type: &str,
        next_job_type: Option<&str>,
        shutdown: &CancellationToken,
    ) -> Result<RoundOutcome> {
        let job = CallForProposal {
            job_id: self.fresh_job_id(),
            job_type: job_type.to_string(),
            deadline_s: self.config.deadline.as_secs_f64(),
            issued_at: now_s(),
        };

        let opened_at = self.book.open(&job).await;
        if let Err(e) = publish_message(self.bus.as_ref(), &self.topics.cfp(job_type), &job).await {
            self.book.remove(&job.job_id).await;
            return Err(e);
        }
        tracing::info!(
            job_id = %job.job_id,
            job_type = %job.job_type,
            deadline_s = job.deadline_s,
            "CfP sent"
        );

        let (stop_reason, collection_time) = self.collect_bids(&job.job_id, opened_at).await;
        let proposals = self.book.close(&job.job_id).await;

        let next_same_type = next_job_type == Some(job_type);
        let Some(selection) = select_winner(&proposals, &self.config.lookahead, next_same_type)
        else {
            tracing::info!(
                job_id = %job.job_id,
                job_type = %job.job_type,
                stop_reason = %stop_reason,
                "No proposals, job skipped"
            );
            self.book.remove(&job.job_id).await;
            return Ok(RoundOutcome {
                job,
                proposals,
                stop_reason,
                collection_time,
                result: RoundResult::NoWinner,
            });
        };

        if selection.guard_applied {
            tracing::info!(
                job_id = %job.job_id,
                picked = %selection.winner.machine_id,
                picked_eta_s = selection.winner.eta_s,
                alpha = self.config.lookahead.alpha,
                "Lookahead guard picked runner-up to keep the fastest machine free"
            );
        }
        tracing::info!(
            job_id = %job.job_id,
            job_type = %job.job_type,
            winner = %selection.winner.machine_id,
            eta_s = selection.winner.eta_s,
            bids = proposals.len(),
            stop_reason = %stop_reason,
            "Winner selected"
        );

        let done_rx = if self.config.wait_for_done {
            Some(self.book.expect_done(&job.job_id).await)
        } else {
            self.book.remove(&job.job_id).await;
            None
        };

        let accept = Accept {
            job_id: job.job_id.clone(),
            job_type: job.job_type.clone(),
        };
        let accept_topic = self.topics.accept(&selection.winner.machine_id);
        if let Err(e) = publish_message(self.bus.as_ref(), &accept_topic, &accept).await {
            self.book.remove(&job.job_id).await;
            return Err(e);
        }

        let completion = match done_rx {
            Some(rx) => {
                let completion = self.await_done(&job, rx, shutdown).await;
                self.book.remove(&job.job_id).await;
                completion
            }
            None => Completion::NotAwaited,
        };

        Ok(RoundOutcome {
            job,
            proposals,
            stop_reason,
            collection_time,
            result: RoundResult::Awarded {
                winner: selection.winner,
                guard_applied: selection.guard_applied,
                completion,
            },
        })
    }

    /// Wait until the bid window closes. Conditions are re-evaluated on every
    /// quantum tick and whenever a bid arrives; the deadline has its own timer.
    async fn collect_bids(&self, job_id: &str, opened_at: Instant) -> (StopReason, Duration) {
        let window = BidWindow::from_config(&self.config);
        // A deadline too far out for the clock never fires; the window check
        // still applies it.
        let deadline_at = opened_at
            .checked_add(window.deadline)
            .unwrap_or_else(|| opened_at + FAR_FUTURE);
        let hard_deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(hard_deadline);

        let mut ticker = tokio::time::interval(self.config.quantum);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let (last_bid_at, distinct) = match self.book.snapshot(job_id).await {
                Some(snap) => (snap.last_bid_at, snap.distinct_bidders),
                None => (opened_at, 0),
            };
            let now = Instant::now();
            let since_cfp = now.saturating_duration_since(opened_at);
            let since_last_bid = now.saturating_duration_since(last_bid_at);
            if let Some(reason) = window.check(since_cfp, since_last_bid, distinct) {
                return (reason, since_cfp);
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.book.bid_arrived() => {}
                _ = &mut hard_deadline => {}
            }
        }
    }

    async fn await_done(
        &self,
        job: &Job,
        rx: oneshot::Receiver<Done>,
        shutdown: &CancellationToken,
    ) -> Completion {
        let wait = async {
            match self.config.done_wait {
                DoneWait::Unbounded => match rx.await {
                    Ok(done) => Completion::Done(done),
                    Err(_) => Completion::Cancelled,
                },
                DoneWait::Timeout(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(Ok(done)) => Completion::Done(done),
                    Ok(Err(_)) => Completion::Cancelled,
                    Err(_) => {
                        tracing::warn!(
                            job_id = %job.job_id,
                            timeout_s = limit.as_secs_f64(),
                            "Gave up waiting for Done"
                        );
                        Completion::TimedOut
                    }
                },
            }
        };

        tokio::select! {
            completion = wait => completion,
            _ = shutdown.cancelled() => {
                tracing::info!(job_id = %job.job_id, "Stopped waiting for Done");
                Completion::Cancelled
            }
        }
    }

    fn fresh_job_id(&mut self) -> JobId {
        loop {
            let job_id = new_job_id();
            if self.issued.insert(job_id.clone()) {
                return job_id;
            }
        }
    }

    async fn listen(
        book: Arc<RoundBook>,
        topics: Topics,
        mut subscription: Subscription,
        stop: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = stop.cancelled() => break,
                msg = subscription.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        tracing::error!("Supervisor bus subscription closed");
                        break;
                    }
                },
            };

            match Inbound::decode(&topics, &msg) {
                Ok(Inbound::Proposal(proposal)) => {
                    let job_id = proposal.job_id.clone();
                    let machine_id = proposal.machine_id.clone();
                    let eta_s = proposal.eta_s;
                    match book.record_proposal(proposal).await {
                        ProposalDisposition::Recorded => tracing::info!(
                            job_id = %job_id,
                            machine_id = %machine_id,
                            eta_s,
                            "Proposal received"
                        ),
                        ProposalDisposition::Late => tracing::debug!(
                            job_id = %job_id,
                            machine_id = %machine_id,
                            "Proposal arrived after the bid window closed"
                        ),
                        ProposalDisposition::UnknownRound => tracing::debug!(
                            job_id = %job_id,
                            machine_id = %machine_id,
                            "Proposal for unknown round"
                        ),
                    }
                }
                Ok(Inbound::Done(done)) => {
                    tracing::info!(
                        job_id = %done.job_id,
                        machine_id = %done.machine_id,
                        elapsed_s = done.elapsed_s(),
                        "Job completed"
                    );
                    book.record_done(&done).await;
                }
                Ok(other) => {
                    tracing::debug!(topic = %msg.topic, job_id = %other.job_id(), "Ignoring message");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable message");
                }
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.listener.cancel();
        self.listener_handle.abort();
    }
}
