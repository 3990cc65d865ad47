//! SLURM dialect: `sbatch`, `scontrol show jobid -dd`, `scancel`

use crate::backend::{to_torque_time, BackendError, QueueDialect, QueueState, PURGED_STATUS};
use crate::execution::Job;
use regex::Regex;
use std::sync::OnceLock;

fn job_state_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"JobState=(\w+)").expect("valid regex"))
}

fn submitted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Submitted batch job (\d+)").expect("valid regex"))
}

/// Extract the raw job state from `scontrol show jobid` output
///
/// An unknown job id yields `ERROR`. Output carrying neither is malformed.
pub fn extract_slurm_status(text: &str) -> Result<String, BackendError> {
    if let Some(caps) = job_state_re().captures(text) {
        return Ok(caps[1].to_string());
    }
    if text.contains("Invalid job id") {
        return Ok(PURGED_STATUS.to_string());
    }
    Err(BackendError::MalformedOutput(format!(
        "no JobState in scontrol output: {}",
        text.trim()
    )))
}

/// Normalise a SLURM job state
pub fn slurm_state(raw: &str) -> QueueState {
    match raw {
        "PENDING" | "CONFIGURING" | "SUSPENDED" | "REQUEUED" | "REQUEUE_HOLD"
        | "RESV_DEL_HOLD" => QueueState::Pending,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" => QueueState::Running,
        "FAILED" | "TIMEOUT" | "CANCELLED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL"
        | "DEADLINE" | "PREEMPTED" => QueueState::Error,
        PURGED_STATUS => QueueState::Error,
        _ => QueueState::Completed,
    }
}

/// SLURM queue dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct Slurm;

impl QueueDialect for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn submit_program(&self) -> &'static str {
        "sbatch"
    }

    fn status_command(&self, id: &str) -> (&'static str, Vec<String>) {
        (
            "scontrol",
            vec![
                "show".to_string(),
                "jobid".to_string(),
                "-dd".to_string(),
                id.to_string(),
            ],
        )
    }

    fn cancel_command(&self, id: &str) -> (&'static str, Vec<String>) {
        ("scancel", vec![id.to_string()])
    }

    fn script_header(&self, job: &Job, queue: Option<&str>) -> String {
        let mut header = String::from("#!/bin/bash\n");
        header.push_str(&format!("#SBATCH -J {}\n", job.name));
        if let Some(queue) = queue {
            header.push_str(&format!("#SBATCH -p {}\n", queue));
        }
        header.push_str("#SBATCH --nodes=1\n");
        header.push_str(&format!(
            "#SBATCH --tasks-per-node={}\n",
            job.spec.resources.cores
        ));
        header.push_str(&format!("#SBATCH --output={}\n", job.stdout_path().display()));
        header.push_str(&format!("#SBATCH --error={}\n", job.stderr_path().display()));
        header.push_str(&format!(
            "#SBATCH --time={}\n",
            to_torque_time(job.spec.resources.walltime_min)
        ));
        header
    }

    fn parse_submit(&self, stdout: &str) -> Result<String, BackendError> {
        submitted_re()
            .captures(stdout)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| {
                BackendError::MalformedOutput(format!("unexpected sbatch output: {}", stdout.trim()))
            })
    }

    fn parse_status(&self, text: &str) -> Result<(String, QueueState), BackendError> {
        let raw = extract_slurm_status(text)?;
        let state = slurm_state(&raw);
        Ok((raw, state))
    }
}
