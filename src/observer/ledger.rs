use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{Inbound, JobId};

const DEFAULT_MAX_RECORDS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Bidding,
    Awarded,
    Completed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Bidding => write!(f, "bidding"),
            JobPhase::Awarded => write!(f, "awarded"),
            JobPhase::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BidRecord {
    pub machine_id: String,
    pub eta_s: f64,
}

/// What an observer has seen of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub phase: JobPhase,
    pub deadline_s: Option<f64>,
    pub issued_at: Option<DateTime<Utc>>,
    pub bids: Vec<BidRecord>,
    pub awarded_to: Option<String>,
    pub executed_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_s: Option<f64>,
}

impl JobRecord {
    fn new(job_id: &str, job_type: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            phase: JobPhase::Bidding,
            deadline_s: None,
            issued_at: None,
            bids: Vec::new(),
            awarded_to: None,
            executed_by: None,
            started_at: None,
            finished_at: None,
            elapsed_s: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub jobs: usize,
    pub bidding: usize,
    pub awarded: usize,
    pub completed: usize,
    pub mean_elapsed_s: Option<f64>,
}

fn to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Job history rebuilt from protocol traffic. Any subset of messages is
/// accepted: an observer that starts late still records what it sees.
#[derive(Debug)]
pub struct JobLedger {
    records: HashMap<JobId, JobRecord>,
    order: VecDeque<JobId>,
    max_records: usize,
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RECORDS)
    }

    pub fn with_capacity(max_records: usize) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            max_records: max_records.max(1),
        }
    }

    fn entry(&mut self, job_id: &str, job_type: &str) -> &mut JobRecord {
        if !self.records.contains_key(job_id) {
            if self.order.len() >= self.max_records {
                if let Some(oldest) = self.order.pop_front() {
                    self.records.remove(&oldest);
                }
            }
            self.order.push_back(job_id.to_string());
        }
        self.records
            .entry(job_id.to_string())
            .or_insert_with(|| JobRecord::new(job_id, job_type))
    }

    pub fn apply(&mut self, message: &Inbound) {
        match message {
            Inbound::CallForProposal(cfp) => {
                let record = self.entry(&cfp.job_id, &cfp.job_type);
                record.deadline_s = Some(cfp.deadline_s);
                record.issued_at = to_datetime(cfp.issued_at);
            }
            Inbound::Proposal(p) => {
                let record = self.entry(&p.job_id, &p.job_type);
                record.bids.push(BidRecord {
                    machine_id: p.machine_id.clone(),
                    eta_s: p.eta_s,
                });
            }
            Inbound::Accept { machine_id, accept } => {
                let record = self.entry(&accept.job_id, &accept.job_type);
                record.awarded_to = Some(machine_id.clone());
                if record.phase == JobPhase::Bidding {
                    record.phase = JobPhase::Awarded;
                }
            }
            Inbound::Done(done) => {
                let record = self.entry(&done.job_id, &done.job_type);
                record.phase = JobPhase::Completed;
                record.executed_by = Some(done.machine_id.clone());
                record.started_at = to_datetime(done.started_at);
                record.finished_at = to_datetime(done.finished_at);
                record.elapsed_s = Some(done.elapsed_s());
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.records.get(job_id)
    }

    /// Records in the order their jobs were first seen.
    pub fn records(&self) -> Vec<&JobRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let count = |phase: JobPhase| self.records.values().filter(|r| r.phase == phase).count();
        let elapsed: Vec<f64> = self.records.values().filter_map(|r| r.elapsed_s).collect();
        let mean_elapsed_s =
            (!elapsed.is_empty()).then(|| elapsed.iter().sum::<f64>() / elapsed.len() as f64);

        LedgerSummary {
            jobs: self.records.len(),
            bidding: count(JobPhase::Bidding),
            awarded: count(JobPhase::Awarded),
            completed: count(JobPhase::Completed),
            mean_elapsed_s,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
