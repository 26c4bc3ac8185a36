use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::{now_s, Accept, Done};

/// Runs awarded jobs. Execution is simulated: the machine holds for the
/// duration it promised in its proposal.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    machine_id: String,
}

impl JobExecutor {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
        }
    }

    /// Hold for `eta_s` seconds and report the completion.
    ///
    /// `finished_at` is derived from a monotonic clock so the reported
    /// elapsed time is not skewed by wall-clock adjustments.
    pub async fn execute(&self, accept: &Accept, eta_s: f64) -> Done {
        tracing::info!(
            machine_id = %self.machine_id,
            job_id = %accept.job_id,
            job_type = %accept.job_type,
            eta_s,
            "Executing job"
        );

        let started_at = now_s();
        let clock = Instant::now();
        let hold = Duration::try_from_secs_f64(eta_s).unwrap_or_default();
        tokio::time::sleep(hold).await;
        let finished_at = started_at + clock.elapsed().as_secs_f64();

        Done {
            job_id: accept.job_id.clone(),
            job_type: accept.job_type.clone(),
            machine_id: self.machine_id.clone(),
            started_at,
            finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn holds_for_promised_duration() {
        let executor = JobExecutor::new("M1");
        let accept = Accept {
            job_id: "j1".to_string(),
            job_type: "cut".to_string(),
        };

        let begin = Instant::now();
        let done = executor.execute(&accept, 3.0).await;

        let held = begin.elapsed();
        assert!(held >= Duration::from_secs(3));
        assert!(held < Duration::from_millis(3010));
        assert_eq!(done.job_id, "j1");
        assert_eq!(done.job_type, "cut");
        assert_eq!(done.machine_id, "M1");
        assert!((done.elapsed_s() - 3.0).abs() < 0.01);
    }
}
