use std::collections::VecDeque;

use crate::protocol::JobId;

/// How many finished job ids a machine remembers for duplicate detection.
pub const COMPLETED_HISTORY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineStatus {
    Idle,
    Busy { job_id: JobId, job_type: String },
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Idle => write!(f, "idle"),
            MachineStatus::Busy { job_id, job_type } => {
                write!(f, "busy({} {})", job_type, job_id)
            }
        }
    }
}

/// Outcome of an Accept against the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptDecision {
    /// The machine is now busy with the job and must execute it.
    Start,
    AlreadyBusy { current: JobId },
    AlreadyCompleted,
}

/// Run state of one machine. Owned by the machine's agent; every transition
/// happens under a single lock so check-and-set is atomic.
#[derive(Debug)]
pub struct MachineState {
    status: MachineStatus,
    completed: VecDeque<JobId>,
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineState {
    pub fn new() -> Self {
        Self {
            status: MachineStatus::Idle,
            completed: VecDeque::with_capacity(COMPLETED_HISTORY),
        }
    }

    pub fn status(&self) -> &MachineStatus {
        &self.status
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.status, MachineStatus::Busy { .. })
    }

    pub fn has_completed(&self, job_id: &str) -> bool {
        self.completed.iter().any(|id| id == job_id)
    }

    /// Idle → Busy, unless the machine is busy or already ran this job.
    pub fn try_begin(&mut self, job_id: &str, job_type: &str) -> AcceptDecision {
        if let MachineStatus::Busy { job_id: current, .. } = &self.status {
            return AcceptDecision::AlreadyBusy {
                current: current.clone(),
            };
        }
        if self.has_completed(job_id) {
            return AcceptDecision::AlreadyCompleted;
        }
        self.status = MachineStatus::Busy {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
        };
        AcceptDecision::Start
    }

    /// Busy → Idle. Returns false if the machine was not running `job_id`.
    pub fn finish(&mut self, job_id: &str) -> bool {
        match &self.status {
            MachineStatus::Busy { job_id: current, .. } if current == job_id => {
                self.status = MachineStatus::Idle;
                if self.completed.len() == COMPLETED_HISTORY {
                    self.completed.pop_front();
                }
                self.completed.push_back(job_id.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn completed_jobs(&self) -> Vec<JobId> {
        self.completed.iter().cloned().collect()
    }
}
