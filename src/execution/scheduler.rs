//! Job scheduler - dispatches a step's jobs to a backend and waits for all
//! of them to resolve

use crate::{
    backend::{JobBackend, QueueState, PURGED_STATUS},
    core::config::RunSettings,
    execution::job::{Job, JobStatus, PollState},
};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Split `nmodels` units over `ncores` workers
///
/// Returns `ncores + 1` boundaries; worker `i` takes `[b[i], b[i + 1])`.
/// Every worker gets `nmodels / ncores` units and the first
/// `nmodels % ncores` workers one more.
pub fn get_index_list(nmodels: usize, ncores: usize) -> Vec<usize> {
    let ncores = ncores.max(1);
    let per_core = nmodels / ncores;
    let remainder = nmodels % ncores;

    let mut index_list = Vec::with_capacity(ncores + 1);
    index_list.push(0);
    for core in 0..ncores {
        let last = index_list[core];
        let size = if core < remainder { per_core + 1 } else { per_core };
        index_list.push(last + size);
    }
    index_list
}

/// Worker ranges for `nmodels` units over at most `ncores` workers
///
/// Never more workers than units, so no range is empty unless there is
/// nothing to split.
pub fn partition(nmodels: usize, ncores: usize) -> Vec<Range<usize>> {
    let workers = ncores.clamp(1, nmodels.max(1));
    get_index_list(nmodels, workers)
        .windows(2)
        .map(|w| w[0]..w[1])
        .collect()
}

/// Effective number of local workers
///
/// `0` means all available cores. Never more workers than jobs, and at
/// least one.
pub fn parse_ncores(requested: usize, njobs: usize) -> usize {
    let requested = if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        requested
    };
    requested.min(njobs).max(1)
}

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum outstanding jobs
    pub budget: usize,

    pub poll_interval: Duration,

    /// Ceiling per submission, measured from submit
    pub job_timeout: Duration,

    /// Consecutive failed status queries before a job is failed
    pub max_query_retries: u32,

    /// Resubmissions of a failed job
    pub resubmit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            budget: 1,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(3600),
            max_query_retries: 5,
            resubmit: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            budget: settings.concurrency_budget(),
            poll_interval: settings.poll_interval,
            job_timeout: settings.job_timeout(),
            max_query_retries: settings.max_query_retries,
            resubmit: settings.resubmit,
        }
    }
}

/// Progress over the jobs of one scheduler run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub finished: usize,
    pub failed: usize,
    pub total: usize,
}

/// Type for job progress callbacks
pub type JobProgressFn = Arc<dyn Fn(JobProgress) + Send + Sync>;

/// Outcome of a scheduler run
#[derive(Debug, Clone)]
pub struct SchedulerReport {
    /// Jobs in submission order with their final status
    pub jobs: Vec<Job>,

    /// The run was stopped by an interrupt; some jobs may still be pending
    pub interrupted: bool,
}

impl SchedulerReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn all_done(&self) -> bool {
        !self.interrupted && self.jobs.iter().all(|j| j.status == JobStatus::Done)
    }

    /// Expected outputs of jobs that ended in a given status
    pub fn outputs_with(&self, status: JobStatus) -> Vec<std::path::PathBuf> {
        self.jobs
            .iter()
            .filter(|j| j.status == status)
            .map(|j| j.expected_output.clone())
            .collect()
    }
}

struct ActiveJob {
    index: usize,
    handle: String,
    submitted_at: Instant,
    poll: PollState,
}

/// Dispatches jobs to a backend within a concurrency budget
pub struct JobScheduler {
    backend: Arc<dyn JobBackend>,
    config: SchedulerConfig,
    interrupt: Arc<AtomicBool>,
    progress: Option<JobProgressFn>,
}

impl JobScheduler {
    pub fn new(backend: Arc<dyn JobBackend>, config: SchedulerConfig) -> Self {
        Self {
            backend,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Share an interrupt flag; once set, outstanding jobs are cancelled
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_progress(mut self, progress: JobProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run jobs until every one is terminal or the run is interrupted
    pub async fn run(&self, mut jobs: Vec<Job>) -> SchedulerReport {
        let total = jobs.len();
        let budget = self.config.budget.clamp(1, total.max(1));
        let mut queue: VecDeque<usize> = (0..total).collect();
        let mut active: Vec<ActiveJob> = Vec::new();
        let mut interrupted = false;
        let mut last_progress = None;

        info!(
            "Scheduling {} job(s) on {} backend (budget {})",
            total,
            self.backend.name(),
            budget
        );

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                warn!("Interrupt received, cancelling {} outstanding job(s)", active.len());
                self.cancel_all(&mut jobs, &mut active).await;
                interrupted = true;
                break;
            }

            while active.len() < budget {
                let Some(index) = queue.pop_front() else {
                    break;
                };
                self.submit(&mut jobs, index, &mut active, &mut queue).await;
            }

            self.report_progress(&jobs, &mut last_progress);
            if active.is_empty() && queue.is_empty() {
                break;
            }

            sleep(self.config.poll_interval).await;
            if self.interrupt.load(Ordering::SeqCst) {
                continue;
            }

            let now = Instant::now();
            let mut still_active = Vec::with_capacity(active.len());
            for entry in active.drain(..) {
                if let Some(entry) = self.poll(&mut jobs, entry, now, &mut queue).await {
                    still_active.push(entry);
                }
            }
            active = still_active;
        }

        self.report_progress(&jobs, &mut last_progress);
        SchedulerReport { jobs, interrupted }
    }

    async fn submit(
        &self,
        jobs: &mut [Job],
        index: usize,
        active: &mut Vec<ActiveJob>,
        queue: &mut VecDeque<usize>,
    ) {
        let job = &mut jobs[index];
        job.submissions += 1;

        if let Err(e) = job.clear_outputs() {
            warn!("Could not clear stale outputs of job {}: {}", job.name, e);
            self.job_failed(job, index, format!("stale output not removed: {}", e), queue);
            return;
        }

        match self.backend.submit(job).await {
            Ok(handle) => {
                debug!("Job {} submitted as {}", job.name, handle);
                job.status = JobStatus::Submitted;
                job.handle = Some(handle.clone());
                let now = Instant::now();
                active.push(ActiveJob {
                    index,
                    handle,
                    submitted_at: now,
                    poll: PollState::new(now),
                });
            }
            Err(e) => {
                warn!("Submission of job {} failed: {}", job.name, e);
                self.job_failed(job, index, format!("submission failed: {}", e), queue);
            }
        }
    }

    /// Poll one outstanding job; returns it if it is still outstanding
    async fn poll(
        &self,
        jobs: &mut [Job],
        mut entry: ActiveJob,
        now: Instant,
        queue: &mut VecDeque<usize>,
    ) -> Option<ActiveJob> {
        let job = &mut jobs[entry.index];

        if now.duration_since(entry.submitted_at) >= self.config.job_timeout {
            warn!(
                "Job {} exceeded its {}s ceiling, cancelling",
                job.name,
                self.config.job_timeout.as_secs()
            );
            self.cancel(&entry.handle).await;
            job.status = JobStatus::TimedOut;
            job.error = Some(format!(
                "exceeded {}s ceiling",
                self.config.job_timeout.as_secs()
            ));
            return None;
        }

        if !entry.poll.is_due(now) {
            return Some(entry);
        }

        match self.backend.poll(&entry.handle).await {
            Ok(record) => {
                entry.poll.succeeded(now, self.config.poll_interval);
                job.backend_status = Some(record.raw_status.clone());
                if record.exit_code.is_some() {
                    job.exit_code = record.exit_code;
                }

                match record.state {
                    QueueState::Pending => Some(entry),
                    QueueState::Running => {
                        job.status = JobStatus::Running;
                        Some(entry)
                    }
                    QueueState::Completed if job.output_ready() => {
                        debug!("Job {} done", job.name);
                        job.status = JobStatus::Done;
                        None
                    }
                    QueueState::Completed => {
                        let reason = match job.exit_code {
                            Some(code) => format!(
                                "exited with code {} without producing {}",
                                code,
                                job.expected_output.display()
                            ),
                            None => format!(
                                "finished without producing {}",
                                job.expected_output.display()
                            ),
                        };
                        self.job_failed(job, entry.index, reason, queue);
                        None
                    }
                    QueueState::Error
                        if record.raw_status == PURGED_STATUS && job.output_ready() =>
                    {
                        debug!("Job {} left the queue with its output written", job.name);
                        job.status = JobStatus::Done;
                        None
                    }
                    QueueState::Error => {
                        let reason = format!("backend reported {}", record.raw_status);
                        self.job_failed(job, entry.index, reason, queue);
                        None
                    }
                }
            }
            Err(e) => {
                entry.poll.failed(now, self.config.poll_interval);
                if !e.is_transient() || entry.poll.attempts > self.config.max_query_retries {
                    self.cancel(&entry.handle).await;
                    let reason = format!(
                        "status query failed {} times: {}",
                        entry.poll.attempts, e
                    );
                    self.job_failed(job, entry.index, reason, queue);
                    None
                } else {
                    warn!(
                        "Status query for job {} failed (attempt {}/{}): {}",
                        job.name, entry.poll.attempts, self.config.max_query_retries, e
                    );
                    Some(entry)
                }
            }
        }
    }

    /// Mark a job failed, or put it back in the queue while resubmissions remain
    fn job_failed(&self, job: &mut Job, index: usize, reason: String, queue: &mut VecDeque<usize>) {
        if job.submissions <= self.config.resubmit {
            info!(
                "Job {} failed ({}), resubmitting ({}/{})",
                job.name, reason, job.submissions, self.config.resubmit
            );
            job.requeue();
            queue.push_back(index);
            return;
        }
        warn!("Job {} failed: {}", job.name, reason);
        job.status = JobStatus::Failed;
        job.error = Some(reason);
    }

    async fn cancel(&self, handle: &str) {
        if let Err(e) = self.backend.cancel(handle).await {
            warn!("Cancelling job {} failed: {}", handle, e);
        }
    }

    async fn cancel_all(&self, jobs: &mut [Job], active: &mut Vec<ActiveJob>) {
        for entry in active.drain(..) {
            self.cancel(&entry.handle).await;
            let job = &mut jobs[entry.index];
            job.status = JobStatus::Failed;
            job.error = Some("interrupted".to_string());
        }
    }

    fn report_progress(&self, jobs: &[Job], last: &mut Option<JobProgress>) {
        let Some(progress) = &self.progress else {
            return;
        };
        let current = JobProgress {
            finished: jobs.iter().filter(|j| j.status.is_terminal()).count(),
            failed: jobs
                .iter()
                .filter(|j| matches!(j.status, JobStatus::Failed | JobStatus::TimedOut))
                .count(),
            total: jobs.len(),
        };
        if *last != Some(current) {
            *last = Some(current);
            progress(current);
        }
    }
}
