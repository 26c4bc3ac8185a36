//! Test harness for Contract Net integration tests.
//!
//! Provides an in-process bus, machine spawning, scripted bidders, and a
//! recorder that captures everything published on a set of topics.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use contract_net::bus::{publish_message, BusMessage, MemoryBus, MessageBus, SharedBus};
use contract_net::config::{Capabilities, MachineConfig};
use contract_net::error::Result;
use contract_net::machine::{MachineAgent, MachineHandle};
use contract_net::protocol::{
    now_s, topic_matches, CallForProposal, Inbound, Proposal, Topics, WireMessage,
};

/// Fresh in-process bus plus its trait-object handle.
pub fn memory_bus() -> (MemoryBus, SharedBus) {
    let bus = MemoryBus::new();
    let shared: SharedBus = Arc::new(bus.clone());
    (bus, shared)
}

/// Handle to a running machine agent
pub struct TestMachine {
    pub handle: MachineHandle,
    task: JoinHandle<Result<()>>,
    shutdown: CancellationToken,
}

impl TestMachine {
    /// Start a machine with the given capability table.
    pub async fn spawn(bus: &SharedBus, topics: &Topics, machine_id: &str, caps: &[(&str, f64)]) -> Self {
        let capabilities = caps
            .iter()
            .fold(Capabilities::new(), |c, (job_type, eta)| c.with(*job_type, *eta));
        let config = MachineConfig::new(machine_id, capabilities);
        let agent = MachineAgent::new(config, topics.clone(), bus.clone());
        let handle = agent.handle();

        let shutdown = CancellationToken::new();
        let task = agent
            .start(shutdown.clone())
            .await
            .expect("machine should subscribe");

        Self {
            handle,
            task,
            shutdown,
        }
    }

    pub async fn stop(mut self) {
        self.shutdown.cancel();
        let result = (&mut self.task).await.expect("machine task should not panic");
        assert!(result.is_ok(), "machine should stop cleanly: {:?}", result);
    }
}

impl Drop for TestMachine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One scripted reply to every CfP: `machine_id` bids `eta_s` after `delay`.
#[derive(Debug, Clone)]
pub struct ScriptedBid {
    pub machine_id: String,
    pub eta_s: f64,
    pub delay: Duration,
}

pub fn bid_after(machine_id: &str, eta_s: f64, delay_ms: u64) -> ScriptedBid {
    ScriptedBid {
        machine_id: machine_id.to_string(),
        eta_s,
        delay: Duration::from_millis(delay_ms),
    }
}

/// Answers every CfP with a fixed bid script and never executes anything.
/// Lets tests control proposal timing precisely.
pub struct ScriptedBidder {
    task: JoinHandle<()>,
}

impl ScriptedBidder {
    pub async fn spawn(bus: &SharedBus, topics: &Topics, script: Vec<ScriptedBid>) -> Self {
        let mut subscription = bus
            .subscribe(vec![topics.cfp_all()])
            .await
            .expect("bidder should subscribe");
        let bus = bus.clone();
        let topics = topics.clone();

        let task = tokio::spawn(async move {
            while let Some(msg) = subscription.recv().await {
                let Ok(Inbound::CallForProposal(cfp)) = Inbound::decode(&topics, &msg) else {
                    continue;
                };
                for bid in script.clone() {
                    let bus = bus.clone();
                    let topic = topics.proposals();
                    let cfp = cfp.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(bid.delay).await;
                        let proposal = Proposal {
                            job_id: cfp.job_id,
                            job_type: cfp.job_type,
                            machine_id: bid.machine_id,
                            eta_s: bid.eta_s,
                            at: now_s(),
                        };
                        let _ = publish_message(bus.as_ref(), &topic, &proposal).await;
                    });
                }
            }
        });

        Self { task }
    }
}

impl Drop for ScriptedBidder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Captures every message published on the given filters, with the
/// (possibly paused) tokio time it arrived at.
#[derive(Clone)]
pub struct TopicRecorder {
    messages: Arc<Mutex<Vec<(tokio::time::Instant, BusMessage)>>>,
}

impl TopicRecorder {
    pub async fn spawn(bus: &SharedBus, filters: Vec<String>) -> Self {
        let mut subscription = bus.subscribe(filters).await.expect("recorder should subscribe");
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        tokio::spawn(async move {
            while let Some(msg) = subscription.recv().await {
                sink.lock().await.push((tokio::time::Instant::now(), msg));
            }
        });
        Self { messages }
    }

    pub async fn messages(&self) -> Vec<BusMessage> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Messages whose topic matches `filter`, decoded as `M`.
    pub async fn decoded<M: WireMessage>(&self, filter: &str) -> Vec<M> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(_, m)| topic_matches(filter, &m.topic))
            .map(|(_, m)| M::decode(&m.topic, &m.payload).expect("recorded message should decode"))
            .collect()
    }

    pub async fn count(&self, filter: &str) -> usize {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(_, m)| topic_matches(filter, &m.topic))
            .count()
    }

    pub async fn arrival_times(&self, filter: &str) -> Vec<tokio::time::Instant> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(_, m)| topic_matches(filter, &m.topic))
            .map(|(at, _)| *at)
            .collect()
    }
}

/// A CfP as the supervisor would publish it.
pub fn cfp(job_id: &str, job_type: &str) -> CallForProposal {
    CallForProposal {
        job_id: job_id.to_string(),
        job_type: job_type.to_string(),
        deadline_s: 1.0,
        issued_at: now_s(),
    }
}

/// Let spawned tasks drain their queues without advancing paused time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Wait for a condition to become true
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
