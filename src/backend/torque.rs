//! Torque/PBS dialect: `qsub`, `qstat -f`, `qdel`

use crate::backend::{BackendError, QueueDialect, QueueState, PURGED_STATUS};
use crate::execution::Job;
use regex::Regex;
use std::sync::OnceLock;

fn job_state_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"job_state\s*=\s*([A-Z])").expect("valid regex"))
}

/// Format minutes as a `HH:MM:SS` wall time; hours are not wrapped
pub fn to_torque_time(minutes: u64) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}

/// Normalise a Torque single-letter job state
pub fn torque_state(raw: &str) -> QueueState {
    match raw {
        "Q" | "H" | "W" | "T" | "S" => QueueState::Pending,
        "R" | "E" => QueueState::Running,
        PURGED_STATUS => QueueState::Error,
        _ => QueueState::Completed,
    }
}

/// Torque/PBS queue dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct Torque;

impl QueueDialect for Torque {
    fn name(&self) -> &'static str {
        "torque"
    }

    fn submit_program(&self) -> &'static str {
        "qsub"
    }

    fn status_command(&self, id: &str) -> (&'static str, Vec<String>) {
        ("qstat", vec!["-f".to_string(), id.to_string()])
    }

    fn cancel_command(&self, id: &str) -> (&'static str, Vec<String>) {
        ("qdel", vec![id.to_string()])
    }

    fn script_header(&self, job: &Job, queue: Option<&str>) -> String {
        let mut header = String::from("#!/bin/bash\n");
        header.push_str(&format!("#PBS -N {}\n", job.name));
        if let Some(queue) = queue {
            header.push_str(&format!("#PBS -q {}\n", queue));
        }
        header.push_str(&format!("#PBS -l nodes=1:ppn={}\n", job.spec.resources.cores));
        header.push_str("#PBS -S /bin/bash\n");
        header.push_str(&format!("#PBS -o {}\n", job.stdout_path().display()));
        header.push_str(&format!("#PBS -e {}\n", job.stderr_path().display()));
        header.push_str(&format!(
            "#PBS -l walltime={}\n",
            to_torque_time(job.spec.resources.walltime_min)
        ));
        header
    }

    fn parse_submit(&self, stdout: &str) -> Result<String, BackendError> {
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .filter(|id| !id.contains(char::is_whitespace))
            .map(str::to_string)
            .ok_or_else(|| {
                BackendError::MalformedOutput(format!("unexpected qsub output: {}", stdout.trim()))
            })
    }

    fn parse_status(&self, text: &str) -> Result<(String, QueueState), BackendError> {
        let raw = match job_state_re().captures(text) {
            Some(caps) => caps[1].to_string(),
            None if text.contains("Unknown Job Id") => PURGED_STATUS.to_string(),
            None => {
                return Err(BackendError::MalformedOutput(format!(
                    "no job_state in qstat output: {}",
                    text.trim()
                )))
            }
        };
        let state = torque_state(&raw);
        Ok((raw, state))
    }
}
