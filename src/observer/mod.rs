//! Passive protocol observer.
//!
//! Subscribes to every protocol topic and folds the traffic into a
//! [`JobLedger`], reporting the elapsed time of each completed job. The
//! ledger backs the HTTP [`dashboard`](crate::dashboard).

pub mod ledger;

pub use ledger::{BidRecord, JobLedger, JobPhase, JobRecord, LedgerSummary};

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::{SharedBus, Subscription};
use crate::error::{CnpError, Result};
use crate::protocol::{Inbound, Topics};

pub struct Observer {
    topics: Topics,
    ledger: Arc<RwLock<JobLedger>>,
}

impl Observer {
    pub fn new(topics: Topics, ledger: Arc<RwLock<JobLedger>>) -> Self {
        Self { topics, ledger }
    }

    pub async fn subscribe(&self, bus: &SharedBus) -> Result<Subscription> {
        bus.subscribe(vec![self.topics.all()]).await
    }

    pub async fn run(self, mut subscription: Subscription, shutdown: CancellationToken) -> Result<()> {
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                msg = subscription.recv() => msg.ok_or(CnpError::BusClosed)?,
            };

            match Inbound::decode(&self.topics, &msg) {
                Ok(inbound) => {
                    if let Inbound::Done(done) = &inbound {
                        tracing::info!(
                            job_id = %done.job_id,
                            job_type = %done.job_type,
                            machine_id = %done.machine_id,
                            elapsed_s = done.elapsed_s(),
                            "Job completed"
                        );
                    }
                    self.ledger.write().await.apply(&inbound);
                }
                Err(e) => tracing::warn!(error = %e, "Dropping undecodable message"),
            }
        }
    }
}
