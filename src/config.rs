use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{CnpError, Result};
use crate::protocol::topics::validate_segment;

/// Namespace every protocol topic lives under unless overridden.
pub const DEFAULT_PREFIX: &str = "lab/cnp";

/// Connection settings for the shared message bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker host name or IP
    pub host: String,
    /// Broker gRPC port
    pub port: u16,
    /// Topic namespace shared by all agents
    pub prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl BusConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// URI the gRPC client connects to.
    pub fn endpoint(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// How long the supervisor waits for a Done after sending an Accept.
///
/// The protocol itself has no timeout; `Unbounded` keeps that behavior and
/// `Timeout` is the opt-in bound for deployments that cannot tolerate a
/// crashed machine stalling the round loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoneWait {
    #[default]
    Unbounded,
    Timeout(Duration),
}

/// Second-best selection heuristic applied when the next job shares a type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookaheadConfig {
    pub enabled: bool,
    /// The runner-up is chosen when its ETA is at most `alpha` times the best.
    pub alpha: f64,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 1.15,
        }
    }
}

impl LookaheadConfig {
    pub fn enabled(alpha: f64) -> Self {
        Self {
            enabled: true,
            alpha,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Ordered job types to negotiate; repeats are allowed
    pub jobs: Vec<String>,
    /// Hard ceiling on each bid window
    pub deadline: Duration,
    /// Run rounds sequentially, blocking on each Done
    pub wait_for_done: bool,
    pub done_wait: DoneWait,
    /// Stop collecting once this many distinct machines have bid (0 disables)
    pub min_bidders: usize,
    /// Stop collecting after this long without a new proposal (None disables)
    pub quiet_period: Option<Duration>,
    pub lookahead: LookaheadConfig,
    /// Re-evaluation cadence of the bid window
    pub quantum: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            jobs: ["cut", "drill", "cut", "paint", "drill"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            deadline: Duration::from_secs(1),
            wait_for_done: false,
            done_wait: DoneWait::Unbounded,
            min_bidders: 0,
            quiet_period: None,
            lookahead: LookaheadConfig::default(),
            quantum: Duration::from_millis(20),
        }
    }
}

impl SupervisorConfig {
    pub fn new(jobs: Vec<String>) -> Self {
        Self {
            jobs,
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_wait_for_done(mut self, wait: DoneWait) -> Self {
        self.wait_for_done = true;
        self.done_wait = wait;
        self
    }

    pub fn with_min_bidders(mut self, min_bidders: usize) -> Self {
        self.min_bidders = min_bidders;
        self
    }

    /// Quiet period in milliseconds; 0 disables the condition.
    pub fn with_quiet_ms(mut self, quiet_ms: u64) -> Self {
        self.quiet_period = (quiet_ms > 0).then(|| Duration::from_millis(quiet_ms));
        self
    }

    pub fn with_lookahead(mut self, lookahead: LookaheadConfig) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum;
        self
    }

    /// Parse a comma-separated job list such as `"cut,drill,cut"`.
    pub fn parse_jobs(jobs: &str) -> Result<Vec<String>> {
        let jobs: Vec<String> = jobs
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        for job in &jobs {
            validate_segment(job)?;
        }
        Ok(jobs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quantum.is_zero() {
            return Err(CnpError::Config("quantum must be greater than zero".into()));
        }
        if !self.lookahead.alpha.is_finite() || self.lookahead.alpha < 1.0 {
            return Err(CnpError::Config(format!(
                "alpha must be a finite value >= 1.0, got {}",
                self.lookahead.alpha
            )));
        }
        for job in &self.jobs {
            validate_segment(job)?;
        }
        Ok(())
    }
}

/// Longest duration a machine may promise for a job type.
pub const MAX_ETA_S: f64 = 86_400.0 * 365.0;

/// Promised duration, in seconds, for every job type a machine supports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    table: BTreeMap<String, f64>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, job_type: impl Into<String>, eta_s: f64) -> Self {
        self.table.insert(job_type.into(), eta_s);
        self
    }

    /// Parse `"cut:3,drill:5,paint:2.5"`.
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut table = BTreeMap::new();
        for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (job_type, eta) = entry.split_once(':').ok_or_else(|| {
                CnpError::Config(format!("capability '{}' must look like type:seconds", entry))
            })?;
            let eta: f64 = eta.trim().parse().map_err(|_| {
                CnpError::Config(format!("capability '{}' has a non-numeric duration", entry))
            })?;
            table.insert(job_type.trim().to_string(), eta);
        }
        let caps = Self { table };
        caps.validate()?;
        Ok(caps)
    }

    /// Parse `{"cut":3,"drill":5}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let table: BTreeMap<String, f64> = serde_json::from_str(json)
            .map_err(|e| CnpError::Config(format!("invalid capability JSON: {}", e)))?;
        let caps = Self { table };
        caps.validate()?;
        Ok(caps)
    }

    fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(CnpError::Config("at least one capability is required".into()));
        }
        for (job_type, eta) in &self.table {
            validate_segment(job_type)?;
            if !eta.is_finite() || *eta <= 0.0 || *eta > MAX_ETA_S {
                return Err(CnpError::Config(format!(
                    "duration for '{}' must be in (0, {}], got {}",
                    job_type, MAX_ETA_S, eta
                )));
            }
        }
        Ok(())
    }

    pub fn eta_for(&self, job_type: &str) -> Option<f64> {
        self.table.get(job_type).copied()
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub machine_id: String,
    pub capabilities: Capabilities,
}

impl MachineConfig {
    pub fn new(machine_id: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            machine_id: machine_id.into(),
            capabilities,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_segment(&self.machine_id)?;
        self.capabilities.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_config_default() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.port, 1883);
        assert_eq!(cfg.prefix, "lab/cnp");
        assert_eq!(cfg.endpoint(), "http://127.0.0.1:1883");
    }

    #[test]
    fn bus_config_endpoint_keeps_scheme() {
        let cfg = BusConfig::new("http://broker.local", 9000);
        assert_eq!(cfg.endpoint(), "http://broker.local:9000");
    }

    #[test]
    fn supervisor_config_default() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.jobs, vec!["cut", "drill", "cut", "paint", "drill"]);
        assert_eq!(cfg.deadline, Duration::from_secs(1));
        assert!(!cfg.wait_for_done);
        assert_eq!(cfg.done_wait, DoneWait::Unbounded);
        assert_eq!(cfg.min_bidders, 0);
        assert!(cfg.quiet_period.is_none());
        assert!(!cfg.lookahead.enabled);
        assert_eq!(cfg.lookahead.alpha, 1.15);
        assert_eq!(cfg.quantum, Duration::from_millis(20));
    }

    #[test]
    fn quiet_ms_zero_disables() {
        let cfg = SupervisorConfig::default().with_quiet_ms(0);
        assert!(cfg.quiet_period.is_none());
        let cfg = cfg.with_quiet_ms(200);
        assert_eq!(cfg.quiet_period, Some(Duration::from_millis(200)));
    }

    #[test]
    fn parse_jobs_skips_blanks() {
        let jobs = SupervisorConfig::parse_jobs(" cut, ,drill,cut ").unwrap();
        assert_eq!(jobs, vec!["cut", "drill", "cut"]);
    }

    #[test]
    fn parse_jobs_rejects_wildcards() {
        assert!(SupervisorConfig::parse_jobs("cut,dr+ill").is_err());
        assert!(SupervisorConfig::parse_jobs("a/b").is_err());
    }

    #[test]
    fn validate_rejects_alpha_below_one() {
        let cfg = SupervisorConfig::default().with_lookahead(LookaheadConfig::enabled(0.9));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_quantum() {
        let cfg = SupervisorConfig::default().with_quantum(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn capabilities_parse_list() {
        let caps = Capabilities::parse_list("cut:3, drill:5,paint:2.5").unwrap();
        assert_eq!(caps.len(), 3);
        assert_eq!(caps.eta_for("cut"), Some(3.0));
        assert_eq!(caps.eta_for("paint"), Some(2.5));
        assert_eq!(caps.eta_for("drill"), Some(5.0));
        assert_eq!(caps.eta_for("weld"), None);
    }

    #[test]
    fn capabilities_parse_list_errors() {
        assert!(Capabilities::parse_list("").is_err());
        assert!(Capabilities::parse_list("cut").is_err());
        assert!(Capabilities::parse_list("cut:fast").is_err());
        assert!(Capabilities::parse_list("cut:0").is_err());
        assert!(Capabilities::parse_list("cut:-1").is_err());
        assert!(Capabilities::parse_list("cut:1e30").is_err());
    }

    #[test]
    fn capabilities_bound_promised_duration() {
        let caps = Capabilities::parse_list(&format!("cut:{}", MAX_ETA_S)).unwrap();
        assert_eq!(caps.eta_for("cut"), Some(MAX_ETA_S));
        assert!(Capabilities::from_json(r#"{"cut":1e19}"#).is_err());

        let unbounded = Capabilities::new().with("cut", 1e30);
        assert!(MachineConfig::new("M1", unbounded).validate().is_err());
    }

    #[test]
    fn capabilities_from_json() {
        let caps = Capabilities::from_json(r#"{"cut":3,"drill":5}"#).unwrap();
        assert_eq!(caps.eta_for("drill"), Some(5.0));
        assert!(Capabilities::from_json("[1,2]").is_err());
        assert!(Capabilities::from_json("{}").is_err());
    }

    #[test]
    fn machine_config_validate() {
        let caps = Capabilities::new().with("cut", 3.0);
        assert!(MachineConfig::new("M1", caps.clone()).validate().is_ok());
        assert!(MachineConfig::new("M/1", caps.clone()).validate().is_err());
        assert!(MachineConfig::new("", caps).validate().is_err());
    }
}
