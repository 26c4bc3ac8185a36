use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{publish_message, BusMessage, SharedBus, Subscription};
use crate::config::MachineConfig;
use crate::error::{CnpError, Result};
use crate::machine::executor::JobExecutor;
use crate::machine::state::{AcceptDecision, MachineState, MachineStatus};
use crate::protocol::{now_s, Accept, CallForProposal, Inbound, JobId, Proposal, Topics};

/// Read-only view of a running machine's state.
#[derive(Debug, Clone)]
pub struct MachineHandle {
    machine_id: String,
    state: Arc<Mutex<MachineState>>,
}

impl MachineHandle {
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub async fn status(&self) -> MachineStatus {
        self.state.lock().await.status().clone()
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.is_busy()
    }

    pub async fn completed_jobs(&self) -> Vec<JobId> {
        self.state.lock().await.completed_jobs()
    }
}

/// Bidder and executor for one resource.
///
/// A single loop consumes the machine's subscription and dispatches each
/// message to the CfP or Accept transition. Awarded jobs run on a spawned
/// task so the loop keeps draining the subscription while busy.
pub struct MachineAgent {
    config: MachineConfig,
    topics: Topics,
    bus: SharedBus,
    state: Arc<Mutex<MachineState>>,
    executor: JobExecutor,
}

impl MachineAgent {
    pub fn new(config: MachineConfig, topics: Topics, bus: SharedBus) -> Self {
        let executor = JobExecutor::new(config.machine_id.clone());
        Self {
            config,
            topics,
            bus,
            state: Arc::new(Mutex::new(MachineState::new())),
            executor,
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.config.machine_id
    }

    pub fn handle(&self) -> MachineHandle {
        MachineHandle {
            machine_id: self.config.machine_id.clone(),
            state: self.state.clone(),
        }
    }

    /// CfP topics of every supported job type plus this machine's Accept topic.
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self
            .config
            .capabilities
            .job_types()
            .map(|job_type| self.topics.cfp(job_type))
            .collect();
        filters.push(self.topics.accept(&self.config.machine_id));
        filters
    }

    /// Subscribe, then spawn the message loop. The machine is reachable as
    /// soon as this returns.
    pub async fn start(self, shutdown: CancellationToken) -> Result<JoinHandle<Result<()>>> {
        let subscription = self.bus.subscribe(self.filters()).await?;
        tracing::info!(
            machine_id = %self.config.machine_id,
            capabilities = ?self.config.capabilities,
            "Machine connected"
        );
        Ok(tokio::spawn(self.run(subscription, shutdown)))
    }

    pub async fn run(self, mut subscription: Subscription, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(machine_id = %self.config.machine_id, "Machine shutting down");
                    return Ok(());
                }
                msg = subscription.recv() => {
                    let Some(msg) = msg else {
                        tracing::error!(machine_id = %self.config.machine_id, "Bus subscription closed");
                        return Err(CnpError::BusClosed);
                    };
                    self.dispatch(msg).await;
                }
            }
        }
    }

    async fn dispatch(&self, msg: BusMessage) {
        match Inbound::decode(&self.topics, &msg) {
            Ok(Inbound::CallForProposal(cfp)) => self.on_cfp(cfp).await,
            Ok(Inbound::Accept { machine_id, accept }) => self.on_accept(&machine_id, accept).await,
            Ok(other) => {
                tracing::debug!(
                    machine_id = %self.config.machine_id,
                    topic = %msg.topic,
                    job_id = %other.job_id(),
                    "Ignoring message not meant for machines"
                );
            }
            Err(e) => {
                tracing::warn!(
                    machine_id = %self.config.machine_id,
                    error = %e,
                    "Dropping undecodable message"
                );
            }
        }
    }

    async fn on_cfp(&self, cfp: CallForProposal) {
        let machine_id = &self.config.machine_id;

        if self.state.lock().await.is_busy() {
            tracing::debug!(machine_id = %machine_id, job_id = %cfp.job_id, "Busy, not bidding");
            return;
        }
        let Some(eta_s) = self.config.capabilities.eta_for(&cfp.job_type) else {
            tracing::debug!(
                machine_id = %machine_id,
                job_id = %cfp.job_id,
                job_type = %cfp.job_type,
                "Unsupported job type, not bidding"
            );
            return;
        };

        let proposal = Proposal {
            job_id: cfp.job_id,
            job_type: cfp.job_type,
            machine_id: machine_id.clone(),
            eta_s,
            at: now_s(),
        };

        match publish_message(self.bus.as_ref(), &self.topics.proposals(), &proposal).await {
            Ok(()) => tracing::info!(
                machine_id = %machine_id,
                job_id = %proposal.job_id,
                job_type = %proposal.job_type,
                eta_s,
                "Proposal sent"
            ),
            Err(e) => tracing::error!(
                machine_id = %machine_id,
                job_id = %proposal.job_id,
                error = %e,
                "Failed to publish proposal"
            ),
        }
    }

    async fn on_accept(&self, addressed_to: &str, accept: Accept) {
        let machine_id = &self.config.machine_id;

        if addressed_to != machine_id {
            tracing::debug!(
                machine_id = %machine_id,
                addressed_to,
                job_id = %accept.job_id,
                "Accept addressed to another machine"
            );
            return;
        }
        let Some(eta_s) = self.config.capabilities.eta_for(&accept.job_type) else {
            tracing::warn!(
                machine_id = %machine_id,
                job_id = %accept.job_id,
                job_type = %accept.job_type,
                "Accept for unsupported job type ignored"
            );
            return;
        };

        let decision = self
            .state
            .lock()
            .await
            .try_begin(&accept.job_id, &accept.job_type);

        match decision {
            AcceptDecision::Start => {
                tracing::info!(
                    machine_id = %machine_id,
                    job_id = %accept.job_id,
                    job_type = %accept.job_type,
                    "Accepted, running job"
                );
                self.spawn_execution(accept, eta_s);
            }
            AcceptDecision::AlreadyBusy { current } => {
                tracing::debug!(
                    machine_id = %machine_id,
                    job_id = %accept.job_id,
                    current_job = %current,
                    "Accept while busy ignored"
                );
            }
            AcceptDecision::AlreadyCompleted => {
                tracing::debug!(
                    machine_id = %machine_id,
                    job_id = %accept.job_id,
                    "Accept for completed job ignored"
                );
            }
        }
    }

    fn spawn_execution(&self, accept: Accept, eta_s: f64) {
        let executor = self.executor.clone();
        let bus = self.bus.clone();
        let done_topic = self.topics.done();
        let state = self.state.clone();

        tokio::spawn(async move {
            let done = executor.execute(&accept, eta_s).await;

            match publish_message(bus.as_ref(), &done_topic, &done).await {
                Ok(()) => tracing::info!(
                    machine_id = %done.machine_id,
                    job_id = %done.job_id,
                    elapsed_s = done.elapsed_s(),
                    "Job done"
                ),
                Err(e) => tracing::error!(
                    machine_id = %done.machine_id,
                    job_id = %done.job_id,
                    error = %e,
                    "Failed to publish Done"
                ),
            }

            state.lock().await.finish(&done.job_id);
        });
    }
}
