use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceExt;

use contract_net::dashboard::{router, DashboardState};
use contract_net::observer::JobLedger;
use contract_net::protocol::{Accept, CallForProposal, Done, Inbound, Proposal};

/// Helper to create test state with one completed and one open job
fn create_test_state() -> DashboardState {
    let mut ledger = JobLedger::new();

    ledger.apply(&Inbound::CallForProposal(CallForProposal {
        job_id: "a1".to_string(),
        job_type: "cut".to_string(),
        deadline_s: 1.0,
        issued_at: 1_700_000_000.0,
    }));
    ledger.apply(&Inbound::Proposal(Proposal {
        job_id: "a1".to_string(),
        job_type: "cut".to_string(),
        machine_id: "M1".to_string(),
        eta_s: 3.0,
        at: 1_700_000_000.2,
    }));
    ledger.apply(&Inbound::Accept {
        machine_id: "M1".to_string(),
        accept: Accept {
            job_id: "a1".to_string(),
            job_type: "cut".to_string(),
        },
    });
    ledger.apply(&Inbound::Done(Done {
        job_id: "a1".to_string(),
        job_type: "cut".to_string(),
        machine_id: "M1".to_string(),
        started_at: 1_700_000_001.0,
        finished_at: 1_700_000_004.0,
    }));
    ledger.apply(&Inbound::CallForProposal(CallForProposal {
        job_id: "b2".to_string(),
        job_type: "paint".to_string(),
        deadline_s: 1.0,
        issued_at: 1_700_000_005.0,
    }));

    DashboardState {
        ledger: Arc::new(RwLock::new(ledger)),
    }
}

async fn get_json(state: DashboardState, uri: &str) -> (StatusCode, Value) {
    let response = router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_jobs_endpoint_lists_in_arrival_order() {
    let (status, json) = get_json(create_test_state(), "/api/jobs").await;

    assert_eq!(status, StatusCode::OK);
    let jobs = json.as_array().unwrap();
    assert_eq!(jobs.len(), 2);

    assert_eq!(jobs[0]["job_id"], "a1");
    assert_eq!(jobs[0]["phase"], "completed");
    assert_eq!(jobs[0]["awarded_to"], "M1");
    assert_eq!(jobs[0]["elapsed_s"], 3.0);
    assert_eq!(jobs[0]["bids"][0]["machine_id"], "M1");
    assert_eq!(jobs[0]["bids"][0]["eta_s"], 3.0);

    assert_eq!(jobs[1]["job_id"], "b2");
    assert_eq!(jobs[1]["phase"], "bidding");
    assert!(jobs[1]["awarded_to"].is_null());
}

#[tokio::test]
async fn test_job_endpoint() {
    let state = create_test_state();

    let (status, json) = get_json(state.clone(), "/api/jobs/a1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["job_type"], "cut");
    assert_eq!(json["executed_by"], "M1");

    let (status, json) = get_json(state, "/api/jobs/zzz").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("zzz"));
}

#[tokio::test]
async fn test_summary_endpoint() {
    let (status, json) = get_json(create_test_state(), "/api/summary").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["jobs"], 2);
    assert_eq!(json["bidding"], 1);
    assert_eq!(json["awarded"], 0);
    assert_eq!(json["completed"], 1);
    assert_eq!(json["mean_elapsed_s"], 3.0);
}

#[tokio::test]
async fn test_empty_ledger() {
    let state = DashboardState {
        ledger: Arc::new(RwLock::new(JobLedger::new())),
    };

    let (_, jobs) = get_json(state.clone(), "/api/jobs").await;
    assert_eq!(jobs, serde_json::json!([]));

    let (_, summary) = get_json(state, "/api/summary").await;
    assert_eq!(summary["jobs"], 0);
    assert!(summary["mean_elapsed_s"].is_null());
}
