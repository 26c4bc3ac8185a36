//! Full negotiations: supervisor, machines, and an observer sharing one bus.

mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use contract_net::config::{DoneWait, SupervisorConfig};
use contract_net::machine::MachineStatus;
use contract_net::observer::{JobLedger, JobPhase, Observer};
use contract_net::protocol::Topics;
use contract_net::supervisor::Supervisor;
use test_harness::{assert_eventually, memory_bus, settle, TestMachine};

/// Supervisor issues a "cut" CfP; machines promising 3.0s and 4.0s bid; the
/// 3.0s machine wins, runs Idle -> Busy -> Idle, and reports about 3s.
#[tokio::test(start_paused = true)]
async fn test_cut_job_goes_to_fastest_machine() {
    let topics = Topics::default();
    let (_, bus) = memory_bus();
    let fast = TestMachine::spawn(&bus, &topics, "M1", &[("cut", 3.0)]).await;
    let slow = TestMachine::spawn(&bus, &topics, "M2", &[("cut", 4.0), ("drill", 2.0)]).await;

    let config = SupervisorConfig::new(vec!["cut".to_string()])
        .with_deadline(Duration::from_secs(1))
        .with_wait_for_done(DoneWait::Unbounded);
    let mut supervisor = Supervisor::connect(config, topics.clone(), bus.clone())
        .await
        .unwrap();

    let outcomes = supervisor.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];

    assert_eq!(outcome.job.job_type, "cut");
    assert_eq!(outcome.job.deadline_s, 1.0);
    assert_eq!(outcome.proposals.len(), 2);
    let winner = outcome.winner().unwrap();
    assert_eq!(winner.machine_id, "M1");
    assert_eq!(winner.eta_s, 3.0);

    let done = outcome.done().expect("winner should report Done");
    assert_eq!(done.job_id, outcome.job.job_id);
    assert_eq!(done.machine_id, "M1");
    assert!((done.elapsed_s() - 3.0).abs() < 0.01);

    settle().await;
    assert_eq!(fast.handle.status().await, MachineStatus::Idle);
    assert_eq!(fast.handle.completed_jobs().await, vec![outcome.job.job_id.clone()]);
    assert!(slow.handle.completed_jobs().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_observer_ledger_follows_negotiation() {
    let topics = Topics::new("plant/line1");
    let (_, bus) = memory_bus();
    let _m1 = TestMachine::spawn(&bus, &topics, "M1", &[("cut", 2.0)]).await;
    let _m2 = TestMachine::spawn(&bus, &topics, "M2", &[("cut", 2.5), ("paint", 1.0)]).await;

    let ledger = Arc::new(RwLock::new(JobLedger::new()));
    let observer = Observer::new(topics.clone(), ledger.clone());
    let subscription = observer.subscribe(&bus).await.unwrap();
    let stop = CancellationToken::new();
    let observer_task = tokio::spawn(observer.run(subscription, stop.clone()));

    let config = SupervisorConfig::new(vec!["cut".to_string(), "paint".to_string(), "drill".to_string()])
        .with_deadline(Duration::from_millis(500))
        .with_wait_for_done(DoneWait::Unbounded);
    let mut supervisor = Supervisor::connect(config, topics.clone(), bus.clone())
        .await
        .unwrap();
    let outcomes = supervisor.run(&CancellationToken::new()).await.unwrap();
    settle().await;

    let ledger_view = ledger.clone();
    assert_eventually(
        || {
            let ledger = ledger_view.clone();
            async move { ledger.read().await.summary().completed == 2 }
        },
        Duration::from_secs(1),
        "observer should see both completions",
    )
    .await;

    let ledger = ledger.read().await;
    let summary = ledger.summary();
    assert_eq!(summary.jobs, 3);
    assert_eq!(summary.bidding, 1, "drill had no bidders");
    assert!((summary.mean_elapsed_s.unwrap() - 1.5).abs() < 0.01);

    let cut = ledger.get(&outcomes[0].job.job_id).unwrap();
    assert_eq!(cut.phase, JobPhase::Completed);
    assert_eq!(cut.bids.len(), 2);
    assert_eq!(cut.awarded_to.as_deref(), Some("M1"));
    assert_eq!(cut.executed_by.as_deref(), Some("M1"));
    assert_eq!(cut.deadline_s, Some(0.5));

    let drill = ledger.get(&outcomes[2].job.job_id).unwrap();
    assert_eq!(drill.phase, JobPhase::Bidding);
    assert!(drill.bids.is_empty());
    drop(ledger);

    stop.cancel();
    assert!(observer_task.await.unwrap().is_ok());
}
