use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CnpError, Result};

/// Opaque round identifier: the first 12 hex digits of a v4 UUID.
pub type JobId = String;

const JOB_ID_LEN: usize = 12;

/// Wall-clock seconds since the Unix epoch.
pub fn now_s() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub fn new_job_id() -> JobId {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(JOB_ID_LEN)
        .collect()
}

/// JSON encoding shared by all protocol messages.
///
/// Fields are written in declaration order. Decoding rejects unknown fields
/// and validates value ranges on top of the schema, so a bad payload is
/// rejected as a whole.
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(topic: &str, payload: &[u8]) -> Result<Self> {
        let msg: Self = serde_json::from_slice(payload).map_err(|e| CnpError::decode(topic, e))?;
        msg.validate().map_err(|reason| CnpError::decode(topic, reason))?;
        Ok(msg)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

fn require_id(name: &str, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        Err(format!("{} must not be empty", name))
    } else {
        Ok(())
    }
}

fn require_timestamp(name: &str, value: f64) -> std::result::Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("{} must be a finite timestamp", name))
    }
}

/// Announcement that a job is open for bidding. This is also the job record
/// the supervisor keeps for the round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallForProposal {
    pub job_id: JobId,
    pub job_type: String,
    pub deadline_s: f64,
    pub issued_at: f64,
}

pub type Job = CallForProposal;

impl WireMessage for CallForProposal {
    fn validate(&self) -> std::result::Result<(), String> {
        require_id("job_id", &self.job_id)?;
        require_id("job_type", &self.job_type)?;
        if !self.deadline_s.is_finite() || self.deadline_s < 0.0 {
            return Err(format!("deadline_s must be >= 0, got {}", self.deadline_s));
        }
        require_timestamp("issued_at", self.issued_at)
    }
}

/// A bid: the machine promises to finish the job within `eta_s` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Proposal {
    pub job_id: JobId,
    pub job_type: String,
    pub machine_id: String,
    pub eta_s: f64,
    pub at: f64,
}

impl WireMessage for Proposal {
    fn validate(&self) -> std::result::Result<(), String> {
        require_id("job_id", &self.job_id)?;
        require_id("job_type", &self.job_type)?;
        require_id("machine_id", &self.machine_id)?;
        if !self.eta_s.is_finite() || self.eta_s <= 0.0 {
            return Err(format!("eta_s must be > 0, got {}", self.eta_s));
        }
        require_timestamp("at", self.at)
    }
}

/// Award of a job. The recipient is given by the topic it is published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Accept {
    pub job_id: JobId,
    pub job_type: String,
}

impl WireMessage for Accept {
    fn validate(&self) -> std::result::Result<(), String> {
        require_id("job_id", &self.job_id)?;
        require_id("job_type", &self.job_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Done {
    pub job_id: JobId,
    pub job_type: String,
    pub machine_id: String,
    pub started_at: f64,
    pub finished_at: f64,
}

impl Done {
    /// Wall-clock execution time reported by the machine.
    pub fn elapsed_s(&self) -> f64 {
        self.finished_at - self.started_at
    }
}

impl WireMessage for Done {
    fn validate(&self) -> std::result::Result<(), String> {
        require_id("job_id", &self.job_id)?;
        require_id("job_type", &self.job_type)?;
        require_id("machine_id", &self.machine_id)?;
        require_timestamp("started_at", self.started_at)?;
        require_timestamp("finished_at", self.finished_at)?;
        if self.finished_at < self.started_at {
            return Err("finished_at precedes started_at".to_string());
        }
        Ok(())
    }
}
